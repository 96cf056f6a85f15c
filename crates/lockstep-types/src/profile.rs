//! Per-agent step telemetry.
//!
//! Runners report one [`StepProfile`] per agent per step to the
//! coordinator. Profiles are advisory: they feed the load ledger that
//! drives rebalancing and the per-step summary, but they never affect
//! protocol correctness.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunnerRank};

/// Telemetry for one agent's execution of one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepProfile {
    /// The agent that was stepped.
    pub agent_id: AgentId,
    /// The runner that executed the step.
    pub rank: RunnerRank,
    /// Wall-clock time the agent's step took, in seconds.
    pub step_seconds: f64,
    /// The agent's reported memory usage, in bytes.
    pub memory_bytes: f64,
    /// Number of state updates the step produced.
    pub n_updates: u32,
    /// Whether the agent will produce further steps. Dead agents are
    /// dropped by their runner and retired from the load ledger.
    pub is_alive: bool,
}
