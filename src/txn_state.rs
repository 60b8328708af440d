use crate::common::{ClientHandle, DependencyId, EndpointId, PartitionId, ResultSet, TxnId};
use crate::message as msg;
use std::collections::{BTreeMap, BTreeSet};

#[cfg(test)]
#[path = "test/txn_state_test.rs"]
mod txn_state_test;

// -----------------------------------------------------------------------------------------------
//  MpProcedureTask
// -----------------------------------------------------------------------------------------------

/// The work unit of one admitted multi-partition transaction. These are
/// enqueued FIFO and drained by the execution engine; admission order is
/// execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MpProcedureTask {
  pub tid: TxnId,
  pub procedure: String,
  pub read_only: bool,
  pub invocation: msg::Invocation,
  pub client_handle: ClientHandle,
  /// The client-facing endpoint the final response must reach.
  pub initiator_eid: EndpointId,
  /// The partition coordinators this transaction's plan will issue work to,
  /// captured at admission time.
  pub partition_eids: Vec<EndpointId>,
  /// The locally-collocated partition coordinator that can run borrowed work
  /// on the Coordinator's behalf.
  pub helper_eid: EndpointId,
}

// -----------------------------------------------------------------------------------------------
//  MpTransactionState
// -----------------------------------------------------------------------------------------------

/// The dependency-intake verdict after one fragment result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
  /// The current step still has outstanding dependencies (or no step is active).
  Blocked,
  /// This result was the last outstanding dependency; the plan can resume.
  Runnable,
}

/// Per-transaction record of the partition-level fragment results the
/// still-executing plan is blocked on. The Coordinator feeds results in as
/// `FragmentResponse`s arrive; the execution engine declares each step's
/// dependency set and consumes the completed step's results. This component
/// never sends; it is purely a receiver.
#[derive(Debug)]
pub struct MpTransactionState {
  tid: TxnId,
  /// The dependencies the current step blocks on: for each dependency, the
  /// partitions whose results have not arrived yet.
  outstanding: BTreeMap<DependencyId, BTreeSet<PartitionId>>,
  /// The results received for the current step, keyed by dependency.
  received: BTreeMap<DependencyId, BTreeMap<PartitionId, ResultSet>>,
  step_active: bool,
}

impl MpTransactionState {
  pub fn new(tid: TxnId) -> MpTransactionState {
    MpTransactionState { tid, outstanding: Default::default(), received: Default::default(), step_active: false }
  }

  pub fn tid(&self) -> TxnId {
    self.tid
  }

  /// Declare the dependency set the next plan step blocks on. The previous
  /// step's results must already have been taken.
  pub fn begin_step(&mut self, outstanding: BTreeMap<DependencyId, BTreeSet<PartitionId>>) {
    debug_assert!(!self.step_active);
    debug_assert!(outstanding.values().all(|partitions| !partitions.is_empty()));
    self.outstanding = outstanding;
    self.received.clear();
    self.step_active = true;
  }

  /// Record one fragment result. Arrival order is free; the step becomes
  /// runnable exactly when every declared dependency has arrived (conjunction,
  /// not race-to-first). Results for undeclared dependencies and duplicate
  /// arrivals are dropped. `Runnable` is returned at most once per step.
  pub fn offer_fragment_response(
    &mut self,
    partition_id: PartitionId,
    dependency_id: DependencyId,
    result: ResultSet,
  ) -> DependencyStatus {
    let (accepted, dependency_done) = match self.outstanding.get_mut(&dependency_id) {
      Some(partitions) => (partitions.remove(&partition_id), partitions.is_empty()),
      None => (false, false),
    };

    let mut became_runnable = false;
    if accepted {
      self.received.entry(dependency_id).or_insert_with(Default::default).insert(partition_id, result);
      if dependency_done {
        self.outstanding.remove(&dependency_id);
        became_runnable = self.outstanding.is_empty();
      }
    }

    if became_runnable {
      DependencyStatus::Runnable
    } else {
      DependencyStatus::Blocked
    }
  }

  pub fn is_blocked(&self) -> bool {
    self.step_active && !self.outstanding.is_empty()
  }

  /// Hand the completed step's results to the execution engine and reset the
  /// step so the plan can advance.
  pub fn take_step_results(&mut self) -> BTreeMap<DependencyId, BTreeMap<PartitionId, ResultSet>> {
    debug_assert!(self.step_active && self.outstanding.is_empty());
    self.step_active = false;
    std::mem::take(&mut self.received)
  }
}
