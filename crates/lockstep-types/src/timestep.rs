//! The simulation timestep.
//!
//! A timestep pairs a monotonically increasing logical step number with the
//! real time period it represents. Logical steps are allowed to cover
//! variable real periods; profile-based load smoothing divides observed
//! step time by the period width so agents stepped over a long period are
//! not mistaken for expensive agents.

use serde::{Deserialize, Serialize};

/// A single simulation timestep.
///
/// Passed in every protocol message belonging to a step. Immutable once
/// created by the timestep generator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timestep {
    /// Logical step number, starting at 0 and strictly increasing.
    pub step: u64,
    /// Real start time of the period this step represents (inclusive).
    pub start: f64,
    /// Real end time of the period this step represents (exclusive).
    pub end: f64,
}

impl Timestep {
    /// Width of the real time period represented by this step.
    ///
    /// Returns at least a small positive value so callers can divide by it
    /// without guarding against zero-width periods.
    pub fn period(&self) -> f64 {
        let width = self.end - self.start;
        if width > f64::EPSILON { width } else { 1.0 }
    }
}

impl core::fmt::Display for Timestep {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "step {} [{}, {})", self.step, self.start, self.end)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn period_is_end_minus_start() {
        let ts = Timestep { step: 4, start: 4.0, end: 6.5 };
        assert_eq!(ts.period(), 2.5);
    }

    #[test]
    fn zero_width_period_is_clamped() {
        let ts = Timestep { step: 0, start: 1.0, end: 1.0 };
        assert_eq!(ts.period(), 1.0);
    }
}
