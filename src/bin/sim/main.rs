use clap::{arg, App};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

mod scenarios;
mod simulation;

/**
 * Runs the coordination-core scenarios against the deterministic in-memory
 * cluster simulation. We thread one global RNG through the scenarios, but
 * each scenario only draws a fresh seed from it; on a failure, rerunning with
 * the printed seed reproduces the exact message interleaving.
 */

fn main() {
  env_logger::init();

  let matches = App::new("mpcoord simulation")
    .version("1.0")
    .arg(arg!(-s --seed <VALUE>).required(false).help("Seed for the top-level RNG."))
    .arg(arg!(-p --partitions <VALUE>).required(false).help("Number of partition coordinators."))
    .arg(arg!(-t --transactions <VALUE>).required(false).help("Transactions per scenario."))
    .get_matches();

  let mut seed = [1; 16];
  if let Some(value) = matches.value_of("seed") {
    let value: u64 = value.parse().unwrap();
    seed[..8].copy_from_slice(&value.to_le_bytes());
  }
  let num_partitions: u32 =
    matches.value_of("partitions").map(|v| v.parse().unwrap()).unwrap_or(3);
  let num_txns: u32 =
    matches.value_of("transactions").map(|v| v.parse().unwrap()).unwrap_or(20);

  let mut rand = XorShiftRng::from_seed(seed);
  scenarios::run_all(&mut rand, num_partitions, num_txns);
  println!("All scenarios passed.");
}
