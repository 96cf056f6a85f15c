//! Error types for the engine binary.
//!
//! [`EngineError`] is the top-level error type that wraps all failure
//! modes during engine startup and the run itself, so `main` can
//! propagate everything with `?`.

use lockstep_core::SimulationError;

use crate::config::ConfigError;

/// Top-level error for the engine binary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// The configuration named an unknown balancer strategy.
    #[error("unknown balancer strategy {name:?} (expected \"greedy\" or \"random\")")]
    UnknownStrategy {
        /// The unrecognized strategy name.
        name: String,
    },

    /// The configuration named an unknown store backend.
    #[error("unknown store backend {name:?} (expected \"memory\" or \"jsonl\")")]
    UnknownBackend {
        /// The unrecognized backend name.
        name: String,
    },

    /// The configuration named an unknown conflict policy.
    #[error("unknown conflict policy {name:?} (expected \"last_write_wins\" or \"append\")")]
    UnknownPolicy {
        /// The unrecognized policy name.
        name: String,
    },

    /// A `jsonl` store was configured without an output path.
    #[error("store {store:?} uses the jsonl backend but has no path")]
    MissingPath {
        /// The store missing its path.
        store: String,
    },

    /// The configuration named an unknown fabric mode.
    #[error("unknown fabric mode {name:?} (expected \"local\" or \"nats\")")]
    UnknownFabric {
        /// The unrecognized mode name.
        name: String,
    },

    /// The simulation run failed.
    #[error("simulation error: {source}")]
    Simulation {
        /// The underlying simulation error.
        #[from]
        source: SimulationError,
    },
}
