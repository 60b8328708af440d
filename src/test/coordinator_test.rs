use crate::coordinator::CoordState;

// -----------------------------------------------------------------------------------------------
//  Consistency Testing
// -----------------------------------------------------------------------------------------------

/// Asserts various consistency properties in the `CoordState`.
pub fn assert_coord_consistency(coord: &CoordState) {
  let statuses = &coord.statuses;

  // The two tables partition the identifier space by call kind.
  for tid in statuses.duplicate_counters.keys() {
    assert!(!statuses.outstanding_txns.contains_key(tid));
  }

  // Table keys agree with the identifier each entry carries.
  for (tid, txn) in &statuses.outstanding_txns {
    assert_eq!(*tid, txn.tid());
  }
  for (tid, counter) in &statuses.duplicate_counters {
    assert_eq!(*tid, counter.tid());
  }

  // Every not-yet-drained task has its outstanding entry.
  for task in &statuses.pending_tasks {
    assert!(statuses.outstanding_txns.contains_key(&task.tid));
  }

  // No table holds an identifier that was never minted.
  for tid in statuses.outstanding_txns.keys().chain(statuses.duplicate_counters.keys()) {
    assert!(tid.0 <= coord.ctx.next_tid);
  }
}

/// Verifies that the Coordinator has no residual state, i.e. all admitted
/// transactions ran to completion.
pub fn check_coord_clean(coord: &CoordState) {
  let statuses = &coord.statuses;
  assert!(statuses.outstanding_txns.is_empty());
  assert!(statuses.duplicate_counters.is_empty());
  assert!(statuses.pending_tasks.is_empty());
}

// -----------------------------------------------------------------------------------------------
//  Handler Tests
// -----------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
  use crate::catalog::{ProcedureCatalog, ProcedureConfig};
  use crate::common::{
    BasicIOCtx, CoordTraceMessage, CoreIOCtx, EndpointId, FatalError, SendError, TxnId,
  };
  use crate::coordinator::coordinator_test::{assert_coord_consistency, check_coord_clean};
  use crate::coordinator::{CoordContext, CoordForwardMsg, CoordState, EngineBackMessage};
  use crate::message as msg;
  use crate::test_utils::{cvi, cvs, mk_did, mk_eid, mk_handle, mk_pid, mk_result};
  use crate::topology::Topology;
  use rand_xorshift::XorShiftRng;
  use rand::SeedableRng;
  use std::collections::{BTreeMap, BTreeSet};

  // ---------------------------------------------------------------------------------------------
  //  TestIOCtx
  // ---------------------------------------------------------------------------------------------

  struct TestIOCtx {
    rand: XorShiftRng,
    /// All messages sent through the IOCtx, in send order.
    sent: Vec<(EndpointId, msg::NetworkMessage)>,
    traces: Vec<CoordTraceMessage>,
    runnable: Vec<TxnId>,
    /// Sends to these endpoints fail, simulating a transport delivery failure.
    failing_eids: BTreeSet<EndpointId>,
  }

  impl TestIOCtx {
    fn new() -> TestIOCtx {
      TestIOCtx {
        rand: XorShiftRng::from_seed([1; 16]),
        sent: Vec::new(),
        traces: Vec::new(),
        runnable: Vec::new(),
        failing_eids: Default::default(),
      }
    }

    fn sent_to(&self, eid: &EndpointId) -> Vec<&msg::NetworkMessage> {
      self.sent.iter().filter(|(to, _)| to == eid).map(|(_, m)| m).collect()
    }
  }

  impl BasicIOCtx for TestIOCtx {
    type RngCoreT = XorShiftRng;

    fn rand(&mut self) -> &mut Self::RngCoreT {
      &mut self.rand
    }

    fn send(&mut self, eid: &EndpointId, msg: msg::NetworkMessage) -> Result<(), SendError> {
      if self.failing_eids.contains(eid) {
        return Err(SendError { eid: eid.clone() });
      }
      self.sent.push((eid.clone(), msg));
      Ok(())
    }

    fn trace(&mut self, trace_msg: CoordTraceMessage) {
      self.traces.push(trace_msg);
    }
  }

  impl CoreIOCtx for TestIOCtx {
    fn plan_runnable(&mut self, tid: TxnId) {
      self.runnable.push(tid);
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Setup
  // ---------------------------------------------------------------------------------------------

  fn mk_topology(num_partitions: u32) -> Topology {
    let partition_coords =
      (0..num_partitions).map(|i| (mk_pid(i), mk_eid(&format!("node{}", i + 1)))).collect();
    let mut topology = Topology::new(partition_coords);
    topology.add_helper(mk_eid("node0"), mk_eid("node1"));
    topology
  }

  fn mk_coord(num_partitions: u32) -> (CoordState, TestIOCtx) {
    let mut catalog = ProcedureCatalog::with_system_listing();
    catalog.register("mp_write", ProcedureConfig::multi_partition(false));
    catalog.register("mp_read", ProcedureConfig::multi_partition(true));
    let ctx = CoordContext::new(mk_eid("node0"), mk_topology(num_partitions), catalog);
    (CoordState::new(ctx), TestIOCtx::new())
  }

  fn mk_initiation(procedure: &str) -> msg::Initiation {
    msg::Initiation {
      procedure: procedure.to_string(),
      read_only: false,
      single_partition: false,
      invocation: msg::Invocation { args: vec![cvi(1)] },
      client_handle: mk_handle(42),
      initiator_eid: mk_eid("client0"),
    }
  }

  fn initiate(coord: &mut CoordState, io_ctx: &mut TestIOCtx, procedure: &str) {
    coord
      .handle_input(
        io_ctx,
        CoordForwardMsg::CoordMessage(msg::CoordMessage::Initiation(mk_initiation(procedure))),
      )
      .unwrap();
  }

  fn initiate_response(tid: TxnId, initiator_eid: EndpointId, result: &str) -> CoordForwardMsg {
    CoordForwardMsg::CoordMessage(msg::CoordMessage::InitiateResponse(msg::InitiateResponse {
      tid,
      initiator_eid,
      client_handle: mk_handle(42),
      result: mk_result(vec![vec![cvs(result)]]),
    }))
  }

  // ---------------------------------------------------------------------------------------------
  //  Every-partition calls
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn every_partition_fanout_and_dedup() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    initiate(&mut coord, &mut io_ctx, "@Statistics");
    assert_coord_consistency(&coord);

    // Exactly one single-partition-shaped copy per partition coordinator, with
    // the Coordinator recorded as initiator.
    assert_eq!(io_ctx.sent.len(), 3);
    for i in 0..3 {
      let (eid, message) = &io_ctx.sent[i as usize];
      assert_eq!(eid, &mk_eid(&format!("node{}", i + 1)));
      match message {
        msg::NetworkMessage::Partition(msg::PartitionMessage::SpInitiation(sp)) => {
          assert_eq!(sp.tid, TxnId(1));
          assert_eq!(sp.initiator_eid, mk_eid("node0"));
          assert_eq!(sp.procedure, "@Statistics");
        }
        _ => panic!("expected an SpInitiation fan-out copy"),
      }
    }

    // An every-partition call registers a counter but never an outstanding txn.
    assert!(coord.statuses.duplicate_counters.contains_key(&TxnId(1)));
    assert!(coord.statuses.outstanding_txns.is_empty());
    assert!(io_ctx.traces.contains(&CoordTraceMessage::FanoutStarted(TxnId(1), 3)));

    // Offer the three matching replies; the dedup completes on the third.
    for _ in 0..2 {
      coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "OK")).unwrap();
      assert!(io_ctx.sent_to(&mk_eid("client0")).is_empty());
    }
    coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "OK")).unwrap();

    // Exactly one deduplicated reply reaches the original caller, routed to
    // the counter's recorded destination rather than the reply's initiator.
    let to_client = io_ctx.sent_to(&mk_eid("client0"));
    assert_eq!(to_client.len(), 1);
    match to_client[0] {
      msg::NetworkMessage::External(msg::ExternalMessage::Response(response)) => {
        assert_eq!(response.result, mk_result(vec![vec![cvs("OK")]]));
      }
      _ => panic!("expected the deduplicated response"),
    }
    check_coord_clean(&coord);
  }

  #[test]
  fn mismatch_is_fatal() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    initiate(&mut coord, &mut io_ctx, "@Statistics");

    coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "OK")).unwrap();
    let result =
      coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "FAIL"));
    assert_eq!(result, Err(FatalError::ResponseMismatch(TxnId(1))));

    // The terminal counter was removed before the halt propagated.
    assert!(coord.statuses.duplicate_counters.is_empty());
    // No reply ever reached the client.
    assert!(io_ctx.sent_to(&mk_eid("client0")).is_empty());
  }

  #[test]
  fn dedup_forward_failure_is_fatal() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    initiate(&mut coord, &mut io_ctx, "@Statistics");
    io_ctx.failing_eids.insert(mk_eid("client0"));

    for _ in 0..2 {
      coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "OK")).unwrap();
    }
    // The final matching reply completes the dedup, but the forward to the
    // original caller cannot be delivered.
    let result = coord.handle_input(&mut io_ctx, initiate_response(TxnId(1), mk_eid("node0"), "OK"));
    assert_eq!(
      result,
      Err(FatalError::DedupForwardFailed { tid: TxnId(1), eid: mk_eid("client0") })
    );

    // The terminal counter was removed before the halt propagated.
    assert!(coord.statuses.duplicate_counters.is_empty());
  }

  #[test]
  fn fanout_send_failure_is_fatal() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    io_ctx.failing_eids.insert(mk_eid("node2"));
    let result = coord.handle_input(
      &mut io_ctx,
      CoordForwardMsg::CoordMessage(msg::CoordMessage::Initiation(mk_initiation("@Statistics"))),
    );
    assert_eq!(
      result,
      Err(FatalError::FanoutSendFailed {
        tid: TxnId(1),
        eid: mk_eid("node2"),
        procedure: "@Statistics".to_string()
      })
    );
  }

  // ---------------------------------------------------------------------------------------------
  //  Multi-partition admission
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn multi_partition_admission() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    initiate(&mut coord, &mut io_ctx, "mp_write");
    assert_coord_consistency(&coord);

    // Admission creates the outstanding entry and enqueues the work unit; it
    // sends nothing and registers no counter.
    assert!(io_ctx.sent.is_empty());
    assert!(coord.statuses.outstanding_txns.contains_key(&TxnId(1)));
    assert!(coord.statuses.duplicate_counters.is_empty());

    let task = coord.dequeue_task().unwrap();
    assert_eq!(task.tid, TxnId(1));
    assert_eq!(task.procedure, "mp_write");
    assert_eq!(task.initiator_eid, mk_eid("client0"));
    assert_eq!(task.partition_eids, vec![mk_eid("node1"), mk_eid("node2"), mk_eid("node3")]);
    assert_eq!(task.helper_eid, mk_eid("node1"));
  }

  #[test]
  fn admission_order_is_execution_order() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    initiate(&mut coord, &mut io_ctx, "mp_write");
    initiate(&mut coord, &mut io_ctx, "mp_read");
    initiate(&mut coord, &mut io_ctx, "mp_write");

    let tids: Vec<TxnId> = std::iter::from_fn(|| coord.dequeue_task()).map(|t| t.tid).collect();
    assert_eq!(tids, vec![TxnId(1), TxnId(2), TxnId(3)]);
  }

  #[test]
  fn txn_ids_strictly_increase_across_call_kinds() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    initiate(&mut coord, &mut io_ctx, "mp_write");
    initiate(&mut coord, &mut io_ctx, "@Statistics");
    initiate(&mut coord, &mut io_ctx, "mp_write");

    assert!(coord.statuses.outstanding_txns.contains_key(&TxnId(1)));
    assert!(coord.statuses.duplicate_counters.contains_key(&TxnId(2)));
    assert!(coord.statuses.outstanding_txns.contains_key(&TxnId(3)));
    assert_coord_consistency(&coord);
  }

  // ---------------------------------------------------------------------------------------------
  //  Fragment responses
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn fragment_responses_unblock_the_plan() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    initiate(&mut coord, &mut io_ctx, "mp_write");
    let task = coord.dequeue_task().unwrap();

    // The engine declares the step's dependency: one result per partition.
    let mut outstanding = BTreeMap::new();
    outstanding.insert(mk_did(0), (0..3).map(mk_pid).collect::<BTreeSet<_>>());
    coord.txn_state_mut(task.tid).unwrap().begin_step(outstanding);

    for i in 0..3 {
      let response =
        CoordForwardMsg::CoordMessage(msg::CoordMessage::FragmentResponse(msg::FragmentResponse {
          tid: task.tid,
          partition_id: mk_pid(i),
          dependency_id: mk_did(0),
          result: mk_result(vec![vec![cvi(i as i32)]]),
        }));
      coord.handle_input(&mut io_ctx, response).unwrap();
      if i < 2 {
        // Two of three arrived: the plan stays blocked.
        assert!(io_ctx.runnable.is_empty());
      }
    }
    assert_eq!(io_ctx.runnable, vec![task.tid]);

    let results = coord.txn_state_mut(task.tid).unwrap().take_step_results();
    assert_eq!(results.get(&mk_did(0)).unwrap().len(), 3);
  }

  #[test]
  fn stale_fragment_response_is_benign() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    let response =
      CoordForwardMsg::CoordMessage(msg::CoordMessage::FragmentResponse(msg::FragmentResponse {
        tid: TxnId(99),
        partition_id: mk_pid(0),
        dependency_id: mk_did(0),
        result: mk_result(vec![]),
      }));
    coord.handle_input(&mut io_ctx, response).unwrap();

    assert!(io_ctx.traces.contains(&CoordTraceMessage::StaleFragmentResponse(TxnId(99))));
    assert!(io_ctx.runnable.is_empty());
    check_coord_clean(&coord);
  }

  #[test]
  fn completion_signal_removes_outstanding_entry() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    initiate(&mut coord, &mut io_ctx, "mp_write");
    let task = coord.dequeue_task().unwrap();
    assert!(coord.statuses.outstanding_txns.contains_key(&task.tid));

    coord
      .handle_input(
        &mut io_ctx,
        CoordForwardMsg::EngineBackMessage(EngineBackMessage::TransactionFinished(task.tid)),
      )
      .unwrap();
    check_coord_clean(&coord);

    // A completion notice for an unknown identifier is benign.
    coord
      .handle_input(
        &mut io_ctx,
        CoordForwardMsg::EngineBackMessage(EngineBackMessage::TransactionFinished(TxnId(50))),
      )
      .unwrap();
  }

  // ---------------------------------------------------------------------------------------------
  //  Response relaying
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn terminal_response_relayed_to_declared_initiator() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    // No counter is registered for this identifier, so the Coordinator must
    // relay to the response's own initiator endpoint.
    coord.handle_input(&mut io_ctx, initiate_response(TxnId(8), mk_eid("client1"), "OK")).unwrap();

    let to_client = io_ctx.sent_to(&mk_eid("client1"));
    assert_eq!(to_client.len(), 1);
    assert!(io_ctx.traces.contains(&CoordTraceMessage::ResponseRelayed(TxnId(8), mk_eid("client1"))));
  }

  #[test]
  fn relay_failure_is_recoverable() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    io_ctx.failing_eids.insert(mk_eid("client1"));
    coord.handle_input(&mut io_ctx, initiate_response(TxnId(8), mk_eid("client1"), "OK")).unwrap();
    assert!(io_ctx.traces.contains(&CoordTraceMessage::RelayFailed(TxnId(8), mk_eid("client1"))));
  }

  // ---------------------------------------------------------------------------------------------
  //  Protocol violations
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn fragment_task_is_a_protocol_violation() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    let result = coord.handle_input(
      &mut io_ctx,
      CoordForwardMsg::CoordMessage(msg::CoordMessage::FragmentTask(msg::FragmentTask {
        tid: TxnId(4),
        partition_id: mk_pid(0),
        dependency_id: mk_did(0),
        coordinator_eid: mk_eid("node0"),
        work: Default::default(),
      })),
    );
    assert_eq!(result, Err(FatalError::MisroutedFragmentTask(TxnId(4))));
  }

  #[test]
  fn complete_transaction_is_a_protocol_violation() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    let result = coord.handle_input(
      &mut io_ctx,
      CoordForwardMsg::CoordMessage(msg::CoordMessage::CompleteTransaction(
        msg::CompleteTransaction { tid: TxnId(4), commit: true },
      )),
    );
    assert_eq!(result, Err(FatalError::MisroutedCompleteTransaction(TxnId(4))));
  }

  // ---------------------------------------------------------------------------------------------
  //  Catalog and topology
  // ---------------------------------------------------------------------------------------------

  #[test]
  fn unknown_procedure_is_a_client_error() {
    let (mut coord, mut io_ctx) = mk_coord(2);
    initiate(&mut coord, &mut io_ctx, "no_such_proc");

    let to_client = io_ctx.sent_to(&mk_eid("client0"));
    assert_eq!(to_client.len(), 1);
    match to_client[0] {
      msg::NetworkMessage::External(msg::ExternalMessage::UnknownProcedure(reject)) => {
        assert_eq!(reject.procedure, "no_such_proc");
        assert_eq!(reject.client_handle, mk_handle(42));
      }
      _ => panic!("expected an unknown-procedure rejection"),
    }
    // No identifier was consumed and no table was touched.
    check_coord_clean(&coord);
  }

  #[test]
  fn membership_change_affects_subsequent_fanouts() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    let new_topology = mk_topology(5);
    coord
      .handle_input(
        &mut io_ctx,
        CoordForwardMsg::CoordMessage(msg::CoordMessage::MembershipChange(msg::MembershipChange {
          topology: new_topology,
        })),
      )
      .unwrap();
    assert!(io_ctx.traces.contains(&CoordTraceMessage::MembershipChanged(5)));

    initiate(&mut coord, &mut io_ctx, "@Statistics");
    assert_eq!(io_ctx.sent.len(), 5);
    assert!(io_ctx.traces.contains(&CoordTraceMessage::FanoutStarted(TxnId(1), 5)));
  }

  #[test]
  fn empty_membership_change_is_ignored() {
    let (mut coord, mut io_ctx) = mk_coord(3);
    coord
      .handle_input(
        &mut io_ctx,
        CoordForwardMsg::CoordMessage(msg::CoordMessage::MembershipChange(msg::MembershipChange {
          topology: Topology::new(vec![]),
        })),
      )
      .unwrap();
    assert!(!io_ctx.traces.contains(&CoordTraceMessage::MembershipChanged(0)));

    // Fan-out still targets the retained topology.
    initiate(&mut coord, &mut io_ctx, "@Statistics");
    assert_eq!(io_ctx.sent.len(), 3);
    assert!(io_ctx.traces.contains(&CoordTraceMessage::FanoutStarted(TxnId(1), 3)));
  }
}
