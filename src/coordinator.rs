use crate::catalog::ProcedureCatalog;
use crate::common::{CoordTraceMessage, CoreIOCtx, EndpointId, FatalError, TxnId};
use crate::duplicate_counter::{DuplicateCounter, DuplicateOutcome};
use crate::message as msg;
use crate::topology::Topology;
use crate::txn_state::{DependencyStatus, MpProcedureTask, MpTransactionState};
use log::{error, info, warn};
use std::collections::{BTreeMap, VecDeque};

#[path = "test/coordinator_test.rs"]
pub mod coordinator_test;

// -----------------------------------------------------------------------------------------------
//  CoordForwardMsg
// -----------------------------------------------------------------------------------------------

pub enum CoordForwardMsg {
  CoordMessage(msg::CoordMessage),
  EngineBackMessage(EngineBackMessage),
}

/// Messages sent from the execution engine back to the Coordinator.
pub enum EngineBackMessage {
  /// The transaction's plan ran to completion; its outstanding entry can go.
  TransactionFinished(TxnId),
}

// -----------------------------------------------------------------------------------------------
//  Statuses
// -----------------------------------------------------------------------------------------------

/// The Coordinator's tables. Every TxnId here is unique across both maps: the
/// outstanding table holds true multi-partition transactions and the counter
/// table holds every-partition calls, never the same identifier in both.
#[derive(Debug, Default)]
pub struct Statuses {
  outstanding_txns: BTreeMap<TxnId, MpTransactionState>,
  duplicate_counters: BTreeMap<TxnId, DuplicateCounter>,
  /// FIFO; preserves client admission order as execution order.
  pending_tasks: VecDeque<MpProcedureTask>,
}

// -----------------------------------------------------------------------------------------------
//  Coord State
// -----------------------------------------------------------------------------------------------

#[derive(Debug)]
pub struct CoordState {
  pub ctx: CoordContext,
  statuses: Statuses,
}

/// The metadata of the Coordinator. All handlers run on a single logical
/// stream, which is what lets the tables and the identifier counter live here
/// without any locking.
#[derive(Debug)]
pub struct CoordContext {
  pub this_eid: EndpointId,
  pub topology: Topology,
  pub catalog: ProcedureCatalog,
  /// The last minted TxnId. Strictly increasing for this instance's lifetime.
  next_tid: u64,
}

impl CoordState {
  pub fn new(ctx: CoordContext) -> CoordState {
    CoordState { ctx, statuses: Default::default() }
  }

  pub fn handle_input<IO: CoreIOCtx>(
    &mut self,
    io_ctx: &mut IO,
    coord_input: CoordForwardMsg,
  ) -> Result<(), FatalError> {
    self.ctx.handle_input(io_ctx, &mut self.statuses, coord_input)
  }

  /// Drained by the execution engine, in admission order.
  pub fn dequeue_task(&mut self) -> Option<MpProcedureTask> {
    self.statuses.pending_tasks.pop_front()
  }

  /// The engine reads and advances the plan through here; the table entry's
  /// lifetime stays owned by the Coordinator.
  pub fn txn_state_mut(&mut self, tid: TxnId) -> Option<&mut MpTransactionState> {
    self.statuses.outstanding_txns.get_mut(&tid)
  }
}

impl CoordContext {
  pub fn new(this_eid: EndpointId, topology: Topology, catalog: ProcedureCatalog) -> CoordContext {
    CoordContext { this_eid, topology, catalog, next_tid: 0 }
  }

  /// Mint a fresh Transaction Identifier. Exactly one mint per admitted
  /// transaction; identifiers never repeat.
  fn mint_tid(&mut self) -> TxnId {
    self.next_tid += 1;
    TxnId(self.next_tid)
  }

  pub fn handle_input<IO: CoreIOCtx>(
    &mut self,
    io_ctx: &mut IO,
    statuses: &mut Statuses,
    coord_input: CoordForwardMsg,
  ) -> Result<(), FatalError> {
    match coord_input {
      CoordForwardMsg::CoordMessage(message) => match message {
        msg::CoordMessage::Initiation(initiation) => {
          self.handle_initiation(io_ctx, statuses, initiation)
        }
        msg::CoordMessage::InitiateResponse(response) => {
          self.handle_initiate_response(io_ctx, statuses, response)
        }
        msg::CoordMessage::FragmentResponse(response) => {
          self.handle_fragment_response(io_ctx, statuses, response)
        }
        msg::CoordMessage::FragmentTask(task) => {
          // These belong to the per-partition scheduler; a misrouted message
          // must be caught immediately rather than corrupting state.
          Err(FatalError::MisroutedFragmentTask(task.tid))
        }
        msg::CoordMessage::CompleteTransaction(complete) => {
          Err(FatalError::MisroutedCompleteTransaction(complete.tid))
        }
        msg::CoordMessage::MembershipChange(change) => {
          if change.topology.num_partitions() == 0 {
            // A topology with no partition coordinators can never satisfy a
            // fan-out; keep the current one.
            warn!("ignoring membership change with no partition coordinators");
            return Ok(());
          }
          self.topology = change.topology;
          io_ctx.trace(CoordTraceMessage::MembershipChanged(self.topology.num_partitions()));
          Ok(())
        }
      },
      CoordForwardMsg::EngineBackMessage(message) => match message {
        EngineBackMessage::TransactionFinished(tid) => {
          statuses.outstanding_txns.remove(&tid);
          io_ctx.trace(CoordTraceMessage::TransactionFinished(tid));
          Ok(())
        }
      },
    }
  }

  /// The Coordinator expects to see initiations for multi-partition procedures
  /// and for system procedures that are every-partition, which run as
  /// single-partition procedures at every partition and are deduplicated here.
  fn handle_initiation<IO: CoreIOCtx>(
    &mut self,
    io_ctx: &mut IO,
    statuses: &mut Statuses,
    initiation: msg::Initiation,
  ) -> Result<(), FatalError> {
    let config = match self.catalog.lookup(&initiation.procedure) {
      Some(config) => config.clone(),
      None => {
        // Unknown procedure: a recoverable client-facing error, never a crash.
        warn!("rejecting initiation for unknown procedure '{}'", initiation.procedure);
        let reply = msg::NetworkMessage::External(msg::ExternalMessage::UnknownProcedure(
          msg::UnknownProcedure {
            procedure: initiation.procedure.clone(),
            client_handle: initiation.client_handle,
          },
        ));
        if io_ctx.send(&initiation.initiator_eid, reply).is_err() {
          warn!("failed to deliver unknown-procedure reply to {:?}", initiation.initiator_eid);
        }
        io_ctx.trace(CoordTraceMessage::UnknownProcedure(initiation.procedure));
        return Ok(());
      }
    };

    if config.is_system && config.every_partition {
      // Fan the call out to every partition coordinator as a
      // single-partition initiation, with this Coordinator recorded as the
      // initiator so that all replies route back here for deduplication.
      let tid = self.mint_tid();
      let partition_eids = self.topology.partition_coordinator_eids();
      let sp = msg::SpInitiation {
        tid,
        procedure: initiation.procedure.clone(),
        read_only: initiation.read_only,
        invocation: initiation.invocation,
        client_handle: initiation.client_handle,
        initiator_eid: self.this_eid.clone(),
      };
      let counter = DuplicateCounter::new(tid, initiation.initiator_eid, partition_eids.len());
      statuses.duplicate_counters.insert(tid, counter);
      io_ctx.trace(CoordTraceMessage::FanoutStarted(tid, partition_eids.len()));
      for eid in &partition_eids {
        let message =
          msg::NetworkMessage::Partition(msg::PartitionMessage::SpInitiation(sp.clone()));
        if let Err(err) = io_ctx.send(eid, message) {
          // The counter's expected count can never be satisfied now; halting
          // is safer than hanging forever.
          return Err(FatalError::FanoutSendFailed {
            tid,
            eid: err.eid,
            procedure: sp.procedure,
          });
        }
      }
      return Ok(());
    }

    // Multi-partition initiation. Capture the partition coordinators and the
    // locally-collocated helper, then hand the plan to the execution engine
    // through the pending queue.
    let tid = self.mint_tid();
    let partition_eids = self.topology.partition_coordinator_eids();
    let helper_eid =
      self.topology.local_helper(&self.this_eid).cloned().unwrap_or_else(|| self.this_eid.clone());
    let task = MpProcedureTask {
      tid,
      procedure: initiation.procedure,
      read_only: initiation.read_only,
      invocation: initiation.invocation,
      client_handle: initiation.client_handle,
      initiator_eid: initiation.initiator_eid,
      partition_eids,
      helper_eid,
    };
    statuses.outstanding_txns.insert(tid, MpTransactionState::new(tid));
    statuses.pending_tasks.push_back(task);
    io_ctx.trace(CoordTraceMessage::TransactionAdmitted(tid));
    Ok(())
  }

  /// InitiateResponses arrive from the partition coordinators when an
  /// every-partition call is in flight. A consequence of deduplicating here is
  /// that the Coordinator must also relay the final InitiateResponse of a
  /// normal multi-partition procedure back to the client-facing endpoint,
  /// since it is the recorded initiator for all fanned-out and planned work.
  fn handle_initiate_response<IO: CoreIOCtx>(
    &mut self,
    io_ctx: &mut IO,
    statuses: &mut Statuses,
    response: msg::InitiateResponse,
  ) -> Result<(), FatalError> {
    let tid = response.tid;
    if let Some(counter) = statuses.duplicate_counters.get_mut(&tid) {
      match counter.offer(&response.result) {
        DuplicateOutcome::Waiting => {}
        DuplicateOutcome::Done => {
          let destination_eid = counter.destination_eid.clone();
          statuses.duplicate_counters.remove(&tid);
          let message = msg::NetworkMessage::External(msg::ExternalMessage::Response(response));
          if let Err(err) = io_ctx.send(&destination_eid, message) {
            return Err(FatalError::DedupForwardFailed { tid, eid: err.eid });
          }
          io_ctx.trace(CoordTraceMessage::DedupForwarded(tid, destination_eid));
        }
        DuplicateOutcome::Mismatch => {
          statuses.duplicate_counters.remove(&tid);
          return Err(FatalError::ResponseMismatch(tid));
        }
      }
      // Duplicate suppression consumed the message; no further routing.
      return Ok(());
    }

    // The terminal response of a true multi-partition transaction: relay it
    // verbatim to its declared initiator, best-effort.
    let destination_eid = response.initiator_eid.clone();
    let message = msg::NetworkMessage::External(msg::ExternalMessage::Response(response));
    match io_ctx.send(&destination_eid, message) {
      Ok(()) => io_ctx.trace(CoordTraceMessage::ResponseRelayed(tid, destination_eid)),
      Err(err) => {
        // The client-facing layer is expected to time out and retry above us.
        error!("failed to relay response for {:?} to {:?}", tid, err.eid);
        io_ctx.trace(CoordTraceMessage::RelayFailed(tid, err.eid));
      }
    }
    Ok(())
  }

  /// FragmentResponses arrive from the partition coordinators; offer them to
  /// the matching transaction's dependency intake so the blocked plan step can
  /// eventually resume.
  fn handle_fragment_response<IO: CoreIOCtx>(
    &mut self,
    io_ctx: &mut IO,
    statuses: &mut Statuses,
    response: msg::FragmentResponse,
  ) -> Result<(), FatalError> {
    if let Some(txn) = statuses.outstanding_txns.get_mut(&response.tid) {
      let status =
        txn.offer_fragment_response(response.partition_id, response.dependency_id, response.result);
      if let DependencyStatus::Runnable = status {
        io_ctx.plan_runnable(response.tid);
      }
    } else {
      // The transaction already completed locally while this response was in
      // flight from a remote partition. Drop it on the floor.
      info!("dropping FragmentResponse for unknown {:?}", response.tid);
      io_ctx.trace(CoordTraceMessage::StaleFragmentResponse(response.tid));
    }
    Ok(())
  }
}
