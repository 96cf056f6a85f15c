//! Error types for placement policies.

use lockstep_types::{AgentId, RunnerRank};

/// Errors a placement policy can produce.
///
/// Both variants are configuration errors: they are detected before any
/// message is sent and abort the step.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    /// The load snapshot contained no runners to place agents on.
    #[error("cannot place agents: load snapshot contains no runners")]
    NoRunners,

    /// A rebalancing request named a current runner outside the known set.
    #[error("agent {agent_id} claims current runner {rank} which is not in the snapshot")]
    UnknownRunner {
        /// The agent whose request was inconsistent.
        agent_id: AgentId,
        /// The rank that is not part of the snapshot.
        rank: RunnerRank,
    },
}
