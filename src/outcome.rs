//! The result of a single probe.

use std::time::Duration;

/// A probe either comes back with a round-trip time, or is declared lost
/// (no matching reply arrived before the deadline, or the OS reported the
/// destination unreachable at send time). There is no third state: this is
/// a tagged two-variant sum, not a polymorphic result type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Rtt(Duration),
    Lost,
}

impl Outcome {
    pub fn is_lost(self) -> bool {
        matches!(self, Outcome::Lost)
    }

    pub fn rtt(self) -> Option<Duration> {
        match self {
            Outcome::Rtt(d) => Some(d),
            Outcome::Lost => None,
        }
    }
}
