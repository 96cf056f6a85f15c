//! Timestep generation.
//!
//! The simulation tracks both logical steps and the real time period each
//! step represents; periods may vary in width. The generator decides what
//! period the next logical step covers, and ends the run by returning
//! `None`.

use lockstep_types::Timestep;

/// Produces the sequence of timesteps for a run.
pub trait TimestepGenerator: Send {
    /// The next timestep, or `None` when the simulation should end.
    fn next_timestep(&mut self) -> Option<Timestep>;
}

/// Generates `nsteps` unit-width timesteps, `0..nsteps`.
#[derive(Debug, Clone)]
pub struct RangeTimestepGenerator {
    nsteps: u64,
    next: u64,
}

impl RangeTimestepGenerator {
    /// Create a generator for the given number of steps.
    pub const fn new(nsteps: u64) -> Self {
        Self { nsteps, next: 0 }
    }
}

impl TimestepGenerator for RangeTimestepGenerator {
    // Unit-width real periods; precision loss only matters past 2^52
    // steps, far beyond any plausible run length.
    #[allow(clippy::cast_precision_loss)]
    fn next_timestep(&mut self) -> Option<Timestep> {
        if self.next >= self.nsteps {
            return None;
        }
        let step = self.next;
        self.next = self.next.saturating_add(1);
        Some(Timestep {
            step,
            start: step as f64,
            end: (step as f64) + 1.0,
        })
    }
}
