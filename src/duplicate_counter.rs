use crate::common::{EndpointId, ResultSet, TxnId};

#[cfg(test)]
#[path = "test/duplicate_counter_test.rs"]
mod duplicate_counter_test;

// -----------------------------------------------------------------------------------------------
//  DuplicateCounter
// -----------------------------------------------------------------------------------------------

/// The outcome of offering one reply to a `DuplicateCounter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateOutcome {
  /// The reply matched the baseline but more replies are still expected.
  Waiting,
  /// All expected replies arrived and agreed.
  Done,
  /// The reply diverged from the baseline. The replicas of a
  /// logically-deterministic call disagree; this is unrecoverable.
  Mismatch,
}

/// Accumulates the replies of one every-partition fan-out. The expected count
/// is fixed at fan-out time; the first reply becomes the comparison baseline,
/// and every later reply must be content-equal to it. Which concrete reply
/// arrives first only decides which instance is forwarded, never the outcome.
#[derive(Debug)]
pub struct DuplicateCounter {
  tid: TxnId,
  /// Where the single deduplicated reply must ultimately be sent.
  pub destination_eid: EndpointId,
  expected: usize,
  received: usize,
  baseline: Option<ResultSet>,
}

impl DuplicateCounter {
  pub fn new(tid: TxnId, destination_eid: EndpointId, expected: usize) -> DuplicateCounter {
    debug_assert!(expected >= 1);
    DuplicateCounter { tid, destination_eid, expected, received: 0, baseline: None }
  }

  /// Offer one reply. Once this returns `Done` or `Mismatch` the counter is
  /// terminal; the caller removes it from its table, so a further offer is a
  /// programming error.
  pub fn offer(&mut self, result: &ResultSet) -> DuplicateOutcome {
    debug_assert!(self.received < self.expected);
    match &self.baseline {
      None => {
        self.baseline = Some(result.clone());
      }
      Some(baseline) => {
        if baseline != result {
          return DuplicateOutcome::Mismatch;
        }
      }
    }

    self.received += 1;
    if self.received == self.expected {
      DuplicateOutcome::Done
    } else {
      DuplicateOutcome::Waiting
    }
  }

  pub fn tid(&self) -> TxnId {
    self.tid
  }

  pub fn expected(&self) -> usize {
    self.expected
  }

  pub fn received(&self) -> usize {
    self.received
  }
}
