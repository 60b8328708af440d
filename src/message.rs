use crate::common::{ClientHandle, ColValue, DependencyId, EndpointId, PartitionId, ResultSet, TxnId};
use crate::topology::Topology;
use serde::{Deserialize, Serialize};

// -------------------------------------------------------------------------------------------------
//  NetworkMessage
// -------------------------------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum NetworkMessage {
  Coord(CoordMessage),
  Partition(PartitionMessage),
  External(ExternalMessage),
}

// -------------------------------------------------------------------------------------------------
//  CoordMessage
// -------------------------------------------------------------------------------------------------

/// Every message kind the Coordinator can receive. `FragmentTask` and
/// `CompleteTransaction` appear here because they arrive on the same channel,
/// but they are never valid input to this role; the Coordinator rejects them
/// loudly (see `FatalError`).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum CoordMessage {
  Initiation(Initiation),
  InitiateResponse(InitiateResponse),
  FragmentResponse(FragmentResponse),
  FragmentTask(FragmentTask),
  CompleteTransaction(CompleteTransaction),
  MembershipChange(MembershipChange),
}

// -------------------------------------------------------------------------------------------------
//  PartitionMessage
// -------------------------------------------------------------------------------------------------

/// Messages the Coordinator sends to partition coordinators.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum PartitionMessage {
  /// A single-partition-shaped copy of an every-partition call.
  SpInitiation(SpInitiation),
  /// One unit of per-partition work of a multi-partition plan. The Coordinator
  /// never produces these itself; the execution engine does.
  FragmentTask(FragmentTask),
}

// -------------------------------------------------------------------------------------------------
//  ExternalMessage
// -------------------------------------------------------------------------------------------------

/// Messages sent back to the client-facing layer.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ExternalMessage {
  Response(InitiateResponse),
  UnknownProcedure(UnknownProcedure),
}

// -------------------------------------------------------------------------------------------------
//  Payloads
// -------------------------------------------------------------------------------------------------

/// The invocation payload of a procedure call, carried through opaquely by
/// the Coordinator.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
  pub args: Vec<ColValue>,
}

/// A procedure-invocation request from a client-facing endpoint.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Initiation {
  pub procedure: String,
  pub read_only: bool,
  pub single_partition: bool,
  pub invocation: Invocation,
  pub client_handle: ClientHandle,
  /// Where the eventual reply must be routed.
  pub initiator_eid: EndpointId,
}

/// One fanned-out copy of an every-partition call, shaped like a
/// single-partition initiation. The Coordinator records itself as the
/// initiator so that every reply routes back through it for deduplication.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SpInitiation {
  pub tid: TxnId,
  pub procedure: String,
  pub read_only: bool,
  pub invocation: Invocation,
  pub client_handle: ClientHandle,
  pub initiator_eid: EndpointId,
}

/// The final response of a transaction, produced by a partition coordinator
/// (every-partition calls) or by the execution engine (multi-partition calls).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InitiateResponse {
  pub tid: TxnId,
  /// The recorded initiator. For every-partition replies this is the
  /// Coordinator itself; for multi-partition responses it is the original
  /// client-facing endpoint the Coordinator must relay to.
  pub initiator_eid: EndpointId,
  pub client_handle: ClientHandle,
  pub result: ResultSet,
}

/// A partition-level fragment result for a multi-partition transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FragmentResponse {
  pub tid: TxnId,
  pub partition_id: PartitionId,
  pub dependency_id: DependencyId,
  pub result: ResultSet,
}

/// Per-partition work issued by the execution engine. Valid input only to the
/// per-partition scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FragmentTask {
  pub tid: TxnId,
  pub partition_id: PartitionId,
  pub dependency_id: DependencyId,
  /// Where the fragment result must be sent back.
  pub coordinator_eid: EndpointId,
  pub work: Invocation,
}

/// Commit/abort notice for a partition's piece of a multi-partition
/// transaction. Valid input only to the per-partition scheduler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CompleteTransaction {
  pub tid: TxnId,
  pub commit: bool,
}

/// An explicit membership-change notification carrying the new topology.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MembershipChange {
  pub topology: Topology,
}

/// Client-facing rejection of an initiation naming an unregistered procedure.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UnknownProcedure {
  pub procedure: String,
  pub client_handle: ClientHandle,
}
