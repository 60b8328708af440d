use crate::common::{EndpointId, PartitionId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// -----------------------------------------------------------------------------------------------
//  Topology
// -----------------------------------------------------------------------------------------------

/// The Coordinator's view of which endpoints own which partitions. This is
/// injected at construction and replaced wholesale by a `MembershipChange`
/// notification; the Coordinator never reads ambient cluster state.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
  /// The partition coordinators, in a fixed order. Fan-out follows this order.
  partition_coords: Vec<(PartitionId, EndpointId)>,
  /// Explicit collocation entries: which partition coordinator acts as the
  /// local helper for a given coordinating node.
  helper_map: BTreeMap<EndpointId, EndpointId>,
}

impl Topology {
  pub fn new(partition_coords: Vec<(PartitionId, EndpointId)>) -> Topology {
    Topology { partition_coords, helper_map: Default::default() }
  }

  /// Record that `partition_eid` is collocated with the coordinating node at
  /// `coord_eid`.
  pub fn add_helper(&mut self, coord_eid: EndpointId, partition_eid: EndpointId) {
    self.helper_map.insert(coord_eid, partition_eid);
  }

  pub fn partitions(&self) -> &Vec<(PartitionId, EndpointId)> {
    &self.partition_coords
  }

  pub fn num_partitions(&self) -> usize {
    self.partition_coords.len()
  }

  /// The ordered endpoints of all partition coordinators.
  pub fn partition_coordinator_eids(&self) -> Vec<EndpointId> {
    self.partition_coords.iter().map(|(_, eid)| eid.clone()).collect()
  }

  /// The partition coordinator that is locally collocated with `this_eid` and
  /// can run borrowed work on its behalf. Falls back to the first partition
  /// coordinator when no collocation entry was recorded.
  pub fn local_helper(&self, this_eid: &EndpointId) -> Option<&EndpointId> {
    self
      .helper_map
      .get(this_eid)
      .or_else(|| self.partition_coords.first().map(|(_, eid)| eid))
  }
}
