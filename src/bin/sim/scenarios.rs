use crate::simulation::{Simulation, ENGINE_STEPS};
use log::info;
use mpcoord::common::{ColValue, CoordTraceMessage};
use mpcoord::coordinator::coordinator_test::{assert_coord_consistency, check_coord_clean};
use mpcoord::message as msg;
use mpcoord::test_utils::mk_seed;
use rand_xorshift::XorShiftRng;

/**
 * End-to-end scenarios driven through the deterministic simulation. Each
 * scenario derives its own seed so a failure reproduces from the printed seed
 * alone.
 */

pub fn run_all(rand: &mut XorShiftRng, num_partitions: u32, num_txns: u32) {
  every_partition_scenario(mk_seed(rand), num_partitions, num_txns);
  multi_partition_scenario(mk_seed(rand), num_partitions, num_txns);
  mixed_workload_scenario(mk_seed(rand), num_partitions, num_txns);
}

/// Every-partition calls only: each call fans out to all partitions and
/// exactly one deduplicated reply per call reaches the client.
pub fn every_partition_scenario(seed: [u8; 16], num_partitions: u32, num_calls: u32) {
  info!("every_partition_scenario seed={:?}", seed);
  let mut sim = Simulation::new(seed, num_partitions);
  for _ in 0..num_calls {
    sim.submit("@Statistics", vec![ColValue::Int(1)]);
  }
  sim.run_to_quiescence();

  assert!(sim.halted.is_none(), "coordinator halted: {:?}", sim.halted);
  assert_eq!(sim.client_responses.len(), num_calls as usize);
  for response in &sim.client_responses {
    match response {
      msg::ExternalMessage::Response(response) => {
        // The deduplicated reply carries the replicas' (identical) result.
        assert_eq!(response.result.rows.len(), 1);
      }
      other => panic!("unexpected client reply {:?}", other),
    }
  }

  let fanouts = sim
    .traces
    .iter()
    .filter(|t| matches!(t, CoordTraceMessage::FanoutStarted(_, n) if *n == num_partitions as usize))
    .count();
  assert_eq!(fanouts, num_calls as usize);

  assert_coord_consistency(&sim.coord);
  check_coord_clean(&sim.coord);
}

/// Multi-partition transactions only: FIFO admission, fragment fan-in over
/// shuffled delivery orders, exactly one final response per transaction.
pub fn multi_partition_scenario(seed: [u8; 16], num_partitions: u32, num_txns: u32) {
  info!("multi_partition_scenario seed={:?}", seed);
  let mut sim = Simulation::new(seed, num_partitions);
  for i in 0..num_txns {
    sim.submit("mp_write", vec![ColValue::Int(i as i32)]);
  }
  sim.run_to_quiescence();

  assert!(sim.halted.is_none(), "coordinator halted: {:?}", sim.halted);
  assert_eq!(sim.client_responses.len(), num_txns as usize);
  for response in &sim.client_responses {
    match response {
      msg::ExternalMessage::Response(response) => {
        // One row per partition per plan step, regardless of arrival order.
        let expected_rows = (num_partitions * ENGINE_STEPS) as usize;
        assert_eq!(response.result.rows.len(), expected_rows);
      }
      other => panic!("unexpected client reply {:?}", other),
    }
  }

  assert_coord_consistency(&sim.coord);
  check_coord_clean(&sim.coord);
}

/// Both call kinds interleaved, plus initiations for an unregistered
/// procedure, which must produce client-facing rejections and nothing else.
pub fn mixed_workload_scenario(seed: [u8; 16], num_partitions: u32, num_txns: u32) {
  info!("mixed_workload_scenario seed={:?}", seed);
  let mut sim = Simulation::new(seed, num_partitions);
  let mut expected_rejections = 0;
  for i in 0..num_txns {
    match i % 3 {
      0 => sim.submit("mp_write", vec![ColValue::Int(i as i32)]),
      1 => sim.submit("@Statistics", vec![]),
      _ => {
        expected_rejections += 1;
        sim.submit("no_such_proc", vec![])
      }
    };
  }
  sim.run_to_quiescence();

  assert!(sim.halted.is_none(), "coordinator halted: {:?}", sim.halted);
  assert_eq!(sim.client_responses.len(), num_txns as usize);

  let rejections = sim
    .client_responses
    .iter()
    .filter(|r| matches!(r, msg::ExternalMessage::UnknownProcedure(_)))
    .count();
  assert_eq!(rejections, expected_rejections);

  assert_coord_consistency(&sim.coord);
  check_coord_clean(&sim.coord);
}
