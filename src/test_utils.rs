use crate::common::{ClientHandle, ColValue, DependencyId, EndpointId, PartitionId, ResultSet};
use rand::Rng;

pub fn mk_eid(id: &str) -> EndpointId {
  EndpointId(id.to_string())
}

pub fn mk_pid(id: u32) -> PartitionId {
  PartitionId(id)
}

pub fn mk_did(id: u32) -> DependencyId {
  DependencyId(id)
}

pub fn mk_handle(id: u64) -> ClientHandle {
  ClientHandle(id)
}

pub fn cvi(i: i32) -> ColValue {
  ColValue::Int(i)
}

pub fn cvs(s: &str) -> ColValue {
  ColValue::String(s.to_string())
}

pub fn mk_result(rows: Vec<Vec<ColValue>>) -> ResultSet {
  ResultSet::new(rows)
}

/// Create a seed for a new RNG from an existing one. Test cases derive one
/// seed per case so that a failure reproduces from the printed seed alone.
pub fn mk_seed<R: Rng>(rng: &mut R) -> [u8; 16] {
  let mut seed = [0; 16];
  rng.fill(&mut seed);
  seed
}
