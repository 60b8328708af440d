use crate::common::EndpointId;
use crate::message as msg;
use std::collections::{BTreeMap, VecDeque};

/// Helpers shared by the deterministic simulation harnesses. Messages travel
/// between endpoints as rmp-serde bytes through per-channel FIFO queues, so
/// per-pair ordering holds while cross-pair delivery order is up to the
/// simulation's RNG.

pub fn mk_node_eid(i: u32) -> EndpointId {
  EndpointId(format!("node{}", i))
}

pub fn mk_client_eid(i: u32) -> EndpointId {
  EndpointId(format!("client{}", i))
}

/// Enqueue an encoded message on the `(from, to)` channel, registering the
/// channel as nonempty if it was not already.
pub fn add_msg(
  queues: &mut BTreeMap<EndpointId, BTreeMap<EndpointId, VecDeque<Vec<u8>>>>,
  nonempty_queues: &mut Vec<(EndpointId, EndpointId)>,
  msg: msg::NetworkMessage,
  from_eid: &EndpointId,
  to_eid: &EndpointId,
) {
  let queue = queues
    .entry(from_eid.clone())
    .or_insert_with(Default::default)
    .entry(to_eid.clone())
    .or_insert_with(Default::default);
  if queue.is_empty() {
    let queue_id = (from_eid.clone(), to_eid.clone());
    if !nonempty_queues.contains(&queue_id) {
      nonempty_queues.push(queue_id);
    }
  }
  queue.push_back(rmp_serde::to_vec(&msg).unwrap());
}
