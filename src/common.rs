use crate::message as msg;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;

/// These are common PODs that form the core data objects
/// of the system.

// -----------------------------------------------------------------------------------------------
//  Identifiers
// -----------------------------------------------------------------------------------------------

/// A logical network endpoint. Both node-level endpoints (the coordinator, the
/// partition coordinators) and client-facing endpoints are addressed this way.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointId(pub String);

/// A global identifier of a partition (an independently-owned shard of data).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionId(pub u32);

/// A Transaction Identifier. These are minted by the Coordinator at admission time,
/// strictly increase for the lifetime of a Coordinator instance, and are never reused.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxnId(pub u64);

/// Identifies one fragment result that a later step of a multi-partition
/// transaction's plan is blocked on.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DependencyId(pub u32);

/// A caller-supplied handle that the client-facing layer uses to route the
/// eventual reply. The Coordinator carries it through opaquely.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientHandle(pub u64);

// -----------------------------------------------------------------------------------------------
//  Result payloads
// -----------------------------------------------------------------------------------------------

/// The values that result-set columns can take on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColValue {
  Int(i32),
  Bool(bool),
  String(String),
}

/// A result set produced by a procedure or a fragment. The derived `PartialEq`
/// is the content-equality rule the duplicate counter compares replies with;
/// every replica of an every-partition call must produce an equal `ResultSet`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
  pub rows: Vec<Vec<ColValue>>,
}

impl ResultSet {
  pub fn new(rows: Vec<Vec<ColValue>>) -> ResultSet {
    ResultSet { rows }
  }
}

// -----------------------------------------------------------------------------------------------
//  Errors
// -----------------------------------------------------------------------------------------------

/// Returned by `BasicIOCtx::send` when the transport could not deliver to `eid`.
/// Whether this is fatal depends on the send site (see `FatalError`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendError {
  pub eid: EndpointId,
}

/// The unrecoverable conditions of the Coordinator. These propagate out of
/// `handle_input` to a top-level supervisor, which halts the process; the
/// in-memory tables have no durable backing, so partial recovery is unsafe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FatalError {
  /// A FragmentTask belongs to the per-partition scheduler; receiving one here
  /// means a message was misrouted.
  MisroutedFragmentTask(TxnId),
  /// Same as above for CompleteTransaction.
  MisroutedCompleteTransaction(TxnId),
  /// A fan-out send failed. The duplicate counter's expected count can no
  /// longer be satisfied, so the every-partition call can never complete.
  FanoutSendFailed { tid: TxnId, eid: EndpointId, procedure: String },
  /// The deduplicated reply of an every-partition call could not be forwarded.
  DedupForwardFailed { tid: TxnId, eid: EndpointId },
  /// Replicas of a logically-deterministic every-partition call produced
  /// divergent results.
  ResponseMismatch(TxnId),
}

impl fmt::Display for FatalError {
  fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
    match self {
      FatalError::MisroutedFragmentTask(tid) => {
        write!(f, "Coordinator received a FragmentTask for {:?}", tid)
      }
      FatalError::MisroutedCompleteTransaction(tid) => {
        write!(f, "Coordinator received a CompleteTransaction for {:?}", tid)
      }
      FatalError::FanoutSendFailed { tid, eid, procedure } => {
        write!(f, "Failed to send initiation for '{}' ({:?}) to {:?}", procedure, tid, eid)
      }
      FatalError::DedupForwardFailed { tid, eid } => {
        write!(f, "Failed to forward deduplicated response for {:?} to {:?}", tid, eid)
      }
      FatalError::ResponseMismatch(tid) => {
        write!(f, "Result mismatch running every-partition call {:?}", tid)
      }
    }
  }
}

impl std::error::Error for FatalError {}

// -----------------------------------------------------------------------------------------------
//  Trace Messages
// -----------------------------------------------------------------------------------------------

/// Structured observability events emitted from the Coordinator's hot paths.
/// Harnesses collect these instead of scraping log output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordTraceMessage {
  /// An every-partition call was fanned out to this many partition coordinators.
  FanoutStarted(TxnId, usize),
  /// A deduplicated every-partition reply was forwarded to its destination.
  DedupForwarded(TxnId, EndpointId),
  /// A true multi-partition transaction was admitted and enqueued.
  TransactionAdmitted(TxnId),
  /// The execution layer signaled completion; the outstanding entry was removed.
  TransactionFinished(TxnId),
  /// A terminal multi-partition response was relayed to its initiator.
  ResponseRelayed(TxnId, EndpointId),
  /// A best-effort relay failed; the client layer is expected to retry.
  RelayFailed(TxnId, EndpointId),
  /// A FragmentResponse arrived for a transaction that already completed.
  StaleFragmentResponse(TxnId),
  /// An initiation named a procedure the catalog does not know.
  UnknownProcedure(String),
  /// A membership-change notification replaced the topology.
  MembershipChanged(usize),
}

// -----------------------------------------------------------------------------------------------
//  IOCtx
// -----------------------------------------------------------------------------------------------

/// The interface the Coordinator uses to interact with the outside world. All
/// side effects (sends, traces) go through here, which is what lets the same
/// state machine run under a production transport or a deterministic simulation.
pub trait BasicIOCtx {
  type RngCoreT: RngCore;

  fn rand(&mut self) -> &mut Self::RngCoreT;

  fn send(&mut self, eid: &EndpointId, msg: msg::NetworkMessage) -> Result<(), SendError>;

  fn trace(&mut self, trace_msg: CoordTraceMessage);
}

/// Extends `BasicIOCtx` with the one signal the Coordinator sends to the
/// execution engine: a blocked plan's dependencies are all satisfied and the
/// transaction should be rescheduled.
pub trait CoreIOCtx: BasicIOCtx {
  fn plan_runnable(&mut self, tid: TxnId);
}
