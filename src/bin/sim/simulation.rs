use mpcoord::catalog::{ProcedureCatalog, ProcedureConfig};
use mpcoord::common::{
  BasicIOCtx, ClientHandle, ColValue, CoordTraceMessage, CoreIOCtx, DependencyId, EndpointId,
  FatalError, PartitionId, ResultSet, SendError, TxnId,
};
use mpcoord::coordinator::{CoordContext, CoordForwardMsg, CoordState, EngineBackMessage};
use mpcoord::message as msg;
use mpcoord::simulation_utils::{add_msg, mk_client_eid, mk_node_eid};
use mpcoord::topology::Topology;
use mpcoord::txn_state::MpProcedureTask;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// -----------------------------------------------------------------------------------------------
//  SimIOCtx
// -----------------------------------------------------------------------------------------------

/// The IOCtx the simulated Coordinator runs under. Sends are encoded onto the
/// in-memory channels; traces are collected for the scenarios to assert on.
pub struct SimIOCtx<'a> {
  rand: &'a mut XorShiftRng,
  this_eid: &'a EndpointId,
  queues: &'a mut BTreeMap<EndpointId, BTreeMap<EndpointId, VecDeque<Vec<u8>>>>,
  nonempty_queues: &'a mut Vec<(EndpointId, EndpointId)>,
  traces: &'a mut VecDeque<CoordTraceMessage>,
  runnable: &'a mut VecDeque<TxnId>,
}

impl<'a> BasicIOCtx for SimIOCtx<'a> {
  type RngCoreT = XorShiftRng;

  fn rand(&mut self) -> &mut Self::RngCoreT {
    &mut self.rand
  }

  fn send(&mut self, eid: &EndpointId, msg: msg::NetworkMessage) -> Result<(), SendError> {
    add_msg(self.queues, self.nonempty_queues, msg, self.this_eid, eid);
    Ok(())
  }

  fn trace(&mut self, trace_msg: CoordTraceMessage) {
    self.traces.push_back(trace_msg);
  }
}

impl<'a> CoreIOCtx for SimIOCtx<'a> {
  fn plan_runnable(&mut self, tid: TxnId) {
    self.runnable.push_back(tid);
  }
}

// -----------------------------------------------------------------------------------------------
//  Partition executor stub
// -----------------------------------------------------------------------------------------------

/// A stand-in for a partition coordinator's single-partition scheduler. It
/// executes every-partition copies and fragment work deterministically, so
/// all replicas of an every-partition call agree by construction.
struct PartitionExecutor {
  pid: PartitionId,
  eid: EndpointId,
}

impl PartitionExecutor {
  /// The reply of a single-partition-shaped every-partition copy. A pure
  /// function of the call itself, identical at every partition.
  fn sp_result(sp: &msg::SpInitiation) -> ResultSet {
    ResultSet::new(vec![vec![
      ColValue::String(sp.procedure.clone()),
      ColValue::Int(sp.invocation.args.len() as i32),
    ]])
  }

  /// A fragment result, distinct per partition and per dependency.
  fn fragment_result(&self, task: &msg::FragmentTask) -> ResultSet {
    ResultSet::new(vec![vec![
      ColValue::Int(self.pid.0 as i32),
      ColValue::Int(task.dependency_id.0 as i32),
    ]])
  }

  fn handle(&mut self, message: msg::PartitionMessage) -> Vec<(EndpointId, msg::NetworkMessage)> {
    match message {
      msg::PartitionMessage::SpInitiation(sp) => {
        let reply = msg::InitiateResponse {
          tid: sp.tid,
          initiator_eid: sp.initiator_eid.clone(),
          client_handle: sp.client_handle,
          result: PartitionExecutor::sp_result(&sp),
        };
        vec![(
          sp.initiator_eid,
          msg::NetworkMessage::Coord(msg::CoordMessage::InitiateResponse(reply)),
        )]
      }
      msg::PartitionMessage::FragmentTask(task) => {
        let reply = msg::FragmentResponse {
          tid: task.tid,
          partition_id: self.pid,
          dependency_id: task.dependency_id,
          result: self.fragment_result(&task),
        };
        vec![(
          task.coordinator_eid,
          msg::NetworkMessage::Coord(msg::CoordMessage::FragmentResponse(reply)),
        )]
      }
    }
  }
}

// -----------------------------------------------------------------------------------------------
//  Engine stub
// -----------------------------------------------------------------------------------------------

pub const ENGINE_STEPS: u32 = 2;

/// A stand-in for the stored-procedure execution engine. It drains the
/// Coordinator's pending queue in admission order, runs a fixed two-step plan
/// per transaction (one fragment per partition per step), and produces the
/// final response once the last step's dependencies are satisfied.
struct EngineTxn {
  task: MpProcedureTask,
  step: u32,
  collected_rows: Vec<Vec<ColValue>>,
}

#[derive(Default)]
struct EngineStub {
  txns: BTreeMap<TxnId, EngineTxn>,
}

// -----------------------------------------------------------------------------------------------
//  Simulation
// -----------------------------------------------------------------------------------------------

pub struct Simulation {
  pub rand: XorShiftRng,
  client_eid: EndpointId,
  coord_eid: EndpointId,
  pub coord: CoordState,
  partitions: BTreeMap<EndpointId, PartitionExecutor>,
  engine: EngineStub,

  /// Message channels, keyed `(from, to)`, FIFO within a channel.
  queues: BTreeMap<EndpointId, BTreeMap<EndpointId, VecDeque<Vec<u8>>>>,
  nonempty_queues: Vec<(EndpointId, EndpointId)>,

  /// Replies observed at the client-facing endpoint, in arrival order.
  pub client_responses: Vec<msg::ExternalMessage>,
  pub traces: VecDeque<CoordTraceMessage>,
  runnable: VecDeque<TxnId>,
  next_handle: u64,

  /// Set when the supervisor observed a fatal error from the Coordinator.
  pub halted: Option<FatalError>,
}

impl Simulation {
  pub fn new(seed: [u8; 16], num_partitions: u32) -> Simulation {
    let client_eid = mk_client_eid(0);
    let coord_eid = mk_node_eid(0);

    let mut partition_coords = Vec::new();
    let mut partitions = BTreeMap::new();
    for i in 0..num_partitions {
      let pid = PartitionId(i);
      let eid = mk_node_eid(i + 1);
      partition_coords.push((pid, eid.clone()));
      partitions.insert(eid.clone(), PartitionExecutor { pid, eid });
    }

    let mut topology = Topology::new(partition_coords);
    if let Some((_, first_eid)) = topology.partitions().first().cloned() {
      topology.add_helper(coord_eid.clone(), first_eid);
    }

    let mut catalog = ProcedureCatalog::with_system_listing();
    catalog.register("mp_write", ProcedureConfig::multi_partition(false));
    catalog.register("mp_read", ProcedureConfig::multi_partition(true));

    let ctx = CoordContext::new(coord_eid.clone(), topology, catalog);
    Simulation {
      rand: XorShiftRng::from_seed(seed),
      client_eid,
      coord_eid,
      coord: CoordState::new(ctx),
      partitions,
      engine: Default::default(),
      queues: Default::default(),
      nonempty_queues: Vec::new(),
      client_responses: Vec::new(),
      traces: Default::default(),
      runnable: Default::default(),
      next_handle: 0,
      halted: None,
    }
  }

  /// Submit a procedure invocation from the simulated client.
  pub fn submit(&mut self, procedure: &str, args: Vec<ColValue>) -> ClientHandle {
    let client_handle = ClientHandle(self.next_handle);
    self.next_handle += 1;
    let initiation = msg::Initiation {
      procedure: procedure.to_string(),
      read_only: false,
      single_partition: false,
      invocation: msg::Invocation { args },
      client_handle,
      initiator_eid: self.client_eid.clone(),
    };
    let message = msg::NetworkMessage::Coord(msg::CoordMessage::Initiation(initiation));
    let client_eid = self.client_eid.clone();
    let coord_eid = self.coord_eid.clone();
    add_msg(&mut self.queues, &mut self.nonempty_queues, message, &client_eid, &coord_eid);
    client_handle
  }

  /// Deliver one message from a randomly chosen nonempty channel, then let the
  /// engine make progress. Returns false once the network is quiescent.
  pub fn step(&mut self) -> bool {
    if self.halted.is_some() || self.nonempty_queues.is_empty() {
      return false;
    }

    let index = self.rand.gen_range(0, self.nonempty_queues.len());
    let (from_eid, to_eid) = self.nonempty_queues[index].clone();
    let queue = self.queues.get_mut(&from_eid).unwrap().get_mut(&to_eid).unwrap();
    let bytes = queue.pop_front().unwrap();
    if queue.is_empty() {
      self.nonempty_queues.remove(index);
    }
    let message: msg::NetworkMessage = rmp_serde::from_slice(&bytes).unwrap();

    self.deliver(to_eid, message);
    self.run_engine();
    true
  }

  /// Run until all channels drain or a fatal error halts the Coordinator.
  pub fn run_to_quiescence(&mut self) {
    // A generous bound; exceeding it means the protocol livelocked.
    for _ in 0..100_000 {
      if !self.step() {
        return;
      }
    }
    panic!("simulation did not quiesce");
  }

  fn deliver(&mut self, to_eid: EndpointId, message: msg::NetworkMessage) {
    if to_eid == self.coord_eid {
      let coord_msg = match message {
        msg::NetworkMessage::Coord(coord_msg) => coord_msg,
        other => panic!("non-Coord message {:?} delivered to the Coordinator", other),
      };
      self.forward_to_coord(CoordForwardMsg::CoordMessage(coord_msg));
    } else if to_eid == self.client_eid {
      match message {
        msg::NetworkMessage::External(external) => self.client_responses.push(external),
        other => panic!("non-External message {:?} delivered to the client", other),
      }
    } else {
      let executor = match self.partitions.get_mut(&to_eid) {
        Some(executor) => executor,
        None => panic!("message delivered to unknown endpoint {:?}", to_eid),
      };
      let partition_msg = match message {
        msg::NetworkMessage::Partition(partition_msg) => partition_msg,
        other => panic!("non-Partition message {:?} delivered to partition {:?}", other, to_eid),
      };
      let from_eid = executor.eid.clone();
      for (dest_eid, out) in executor.handle(partition_msg) {
        add_msg(&mut self.queues, &mut self.nonempty_queues, out, &from_eid, &dest_eid);
      }
    }
  }

  /// Feed one input to the Coordinator under a fresh `SimIOCtx`, acting as the
  /// top-level supervisor for fatal errors.
  fn forward_to_coord(&mut self, forward_msg: CoordForwardMsg) {
    let mut io_ctx = SimIOCtx {
      rand: &mut self.rand,
      this_eid: &self.coord_eid,
      queues: &mut self.queues,
      nonempty_queues: &mut self.nonempty_queues,
      traces: &mut self.traces,
      runnable: &mut self.runnable,
    };
    if let Err(fatal) = self.coord.handle_input(&mut io_ctx, forward_msg) {
      log::error!("coordinator halted: {}", fatal);
      self.halted = Some(fatal);
    }
  }

  // ---------------------------------------------------------------------------------------------
  //  Engine stub driving
  // ---------------------------------------------------------------------------------------------

  fn run_engine(&mut self) {
    // Admit new work in queue (i.e. admission) order.
    while let Some(task) = self.coord.dequeue_task() {
      let tid = task.tid;
      self
        .engine
        .txns
        .insert(tid, EngineTxn { task, step: 0, collected_rows: Vec::new() });
      self.start_step(tid);
    }

    // Advance plans whose dependencies are all satisfied.
    while let Some(tid) = self.runnable.pop_front() {
      self.advance_plan(tid);
    }
  }

  /// Declare the next step's dependencies and issue one fragment per partition.
  fn start_step(&mut self, tid: TxnId) {
    let engine_txn = self.engine.txns.get_mut(&tid).unwrap();
    let dependency_id = DependencyId(engine_txn.step);

    // The plan issues work to the partitions captured at admission time.
    let mut partitions = Vec::<(PartitionId, EndpointId)>::new();
    for eid in &engine_txn.task.partition_eids {
      partitions.push((self.partitions.get(eid).unwrap().pid, eid.clone()));
    }
    let mut outstanding = BTreeMap::new();
    outstanding.insert(dependency_id, partitions.iter().map(|(pid, _)| *pid).collect::<BTreeSet<_>>());
    self.coord.txn_state_mut(tid).unwrap().begin_step(outstanding);

    let coord_eid = self.coord_eid.clone();
    for (pid, eid) in partitions {
      let task_msg = msg::FragmentTask {
        tid,
        partition_id: pid,
        dependency_id,
        coordinator_eid: coord_eid.clone(),
        work: engine_txn.task.invocation.clone(),
      };
      let message = msg::NetworkMessage::Partition(msg::PartitionMessage::FragmentTask(task_msg));
      add_msg(&mut self.queues, &mut self.nonempty_queues, message, &coord_eid, &eid);
    }
  }

  /// Consume the completed step's results; start the next step or finish.
  fn advance_plan(&mut self, tid: TxnId) {
    let results = match self.coord.txn_state_mut(tid) {
      Some(txn) => txn.take_step_results(),
      None => return,
    };
    let engine_txn = self.engine.txns.get_mut(&tid).unwrap();
    for (_, by_partition) in results {
      for (_, result) in by_partition {
        engine_txn.collected_rows.extend(result.rows);
      }
    }
    engine_txn.step += 1;

    if engine_txn.step < ENGINE_STEPS {
      self.start_step(tid);
      return;
    }

    // The plan ran to completion: produce the final response addressed to the
    // original client endpoint, then signal completion so the Coordinator
    // retires the outstanding entry.
    let engine_txn = self.engine.txns.remove(&tid).unwrap();
    let mut rows = engine_txn.collected_rows;
    rows.sort();
    let response = msg::InitiateResponse {
      tid,
      initiator_eid: engine_txn.task.initiator_eid.clone(),
      client_handle: engine_txn.task.client_handle,
      result: ResultSet::new(rows),
    };
    let message = msg::NetworkMessage::Coord(msg::CoordMessage::InitiateResponse(response));
    let coord_eid = self.coord_eid.clone();
    add_msg(&mut self.queues, &mut self.nonempty_queues, message, &coord_eid, &coord_eid);

    self.forward_to_coord(CoordForwardMsg::EngineBackMessage(EngineBackMessage::TransactionFinished(
      tid,
    )));
  }
}
