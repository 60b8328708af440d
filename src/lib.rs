pub mod catalog;
pub mod common;
pub mod coordinator;
pub mod duplicate_counter;
pub mod message;
pub mod simulation_utils;
pub mod test_utils;
pub mod topology;
pub mod txn_state;
