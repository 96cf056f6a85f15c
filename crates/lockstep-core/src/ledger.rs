//! Per-agent load accounting.
//!
//! The coordinator tracks a smoothed load estimate for every live agent so
//! the balancer can see both aggregate runner load and per-agent weights.
//! Observed step profiles feed the estimates with exponential smoothing,
//! which keeps one noisy step from whipsawing placements.

use std::collections::BTreeMap;

use lockstep_types::{
    AgentId, LoadEstimate, LoadSnapshot, PlacementRequest, RunnerRank, StepProfile, Timestep,
};

/// Smoothing factor applied to new observations.
const SMOOTHING: f64 = 0.9;

#[derive(Debug, Clone)]
struct AgentLoad {
    rank: RunnerRank,
    step_seconds: f64,
    memory_bytes: f64,
}

/// Inputs the coordinator hands to the balancer each placement phase.
#[derive(Debug)]
pub struct DecisionInputs {
    /// Aggregate per-runner load built from the ledger.
    pub snapshot: LoadSnapshot,
    /// Existing agents, eligible for rebalancing.
    pub rebalance: Vec<PlacementRequest>,
    /// Agents spawned this step, awaiting first placement.
    pub newborn: Vec<PlacementRequest>,
}

/// Tracks which runner owns each agent and how expensive it is.
#[derive(Debug)]
pub struct LoadLedger {
    ranks: Vec<RunnerRank>,
    agents: BTreeMap<AgentId, AgentLoad>,
}

impl LoadLedger {
    /// Create an empty ledger over the given runner ranks.
    pub fn new(ranks: Vec<RunnerRank>) -> Self {
        Self {
            ranks,
            agents: BTreeMap::new(),
        }
    }

    /// Record a newly created agent and its initial load estimate.
    pub fn admit(&mut self, agent_id: AgentId, rank: RunnerRank, load: &LoadEstimate) {
        self.agents.insert(
            agent_id,
            AgentLoad {
                rank,
                step_seconds: load.step_seconds,
                memory_bytes: load.memory_bytes,
            },
        );
    }

    /// Record that an agent now lives on a different runner.
    pub fn relocate(&mut self, agent_id: &AgentId, rank: RunnerRank) {
        if let Some(entry) = self.agents.get_mut(agent_id) {
            entry.rank = rank;
        }
    }

    /// Drop an agent from the ledger.
    pub fn retire(&mut self, agent_id: &AgentId) {
        self.agents.remove(agent_id);
    }

    /// Fold an observed step profile into the agent's smoothed estimates.
    ///
    /// Step time is scaled by the timestep period so estimates stay
    /// comparable across variable-width steps.
    pub fn observe(&mut self, profile: &StepProfile, timestep: &Timestep) {
        let Some(entry) = self.agents.get_mut(&profile.agent_id) else {
            return;
        };
        let per_unit = profile.step_seconds / timestep.period();
        entry.step_seconds = (1.0 - SMOOTHING) * entry.step_seconds + SMOOTHING * per_unit;
        entry.memory_bytes =
            (1.0 - SMOOTHING) * entry.memory_bytes + SMOOTHING * profile.memory_bytes;
    }

    /// The runner currently recorded as owning the agent, if any.
    pub fn rank_of(&self, agent_id: &AgentId) -> Option<RunnerRank> {
        self.agents.get(agent_id).map(|entry| entry.rank)
    }

    /// Number of agents recorded on the given runner.
    pub fn count(&self, rank: RunnerRank) -> usize {
        self.agents
            .values()
            .filter(|entry| entry.rank == rank)
            .count()
    }

    /// Total number of live agents in the ledger.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// True when no agents are recorded.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Build the snapshot and placement requests for one balancing pass.
    ///
    /// Weights blend normalized cpu and memory cost. When every recorded
    /// cost is zero the normalized component degrades to 1.0, so weights
    /// reduce to plain agent counts.
    pub fn decision_inputs(&self, pending: &[(AgentId, LoadEstimate)]) -> DecisionInputs {
        let max_cpu = self
            .agents
            .values()
            .map(|entry| entry.step_seconds)
            .chain(pending.iter().map(|(_, load)| load.step_seconds))
            .fold(0.0_f64, f64::max);
        let max_mem = self
            .agents
            .values()
            .map(|entry| entry.memory_bytes)
            .chain(pending.iter().map(|(_, load)| load.memory_bytes))
            .fold(0.0_f64, f64::max);

        let weigh = |step_seconds: f64, memory_bytes: f64| {
            let cpu = if max_cpu > 0.0 {
                step_seconds / max_cpu
            } else {
                1.0
            };
            let mem = if max_mem > 0.0 {
                memory_bytes / max_mem
            } else {
                1.0
            };
            (1.0 - SMOOTHING) * cpu + SMOOTHING * mem
        };

        let mut snapshot = LoadSnapshot::zeroed(self.ranks.iter().copied());
        let mut rebalance = Vec::with_capacity(self.agents.len());
        for (agent_id, entry) in &self.agents {
            let weight = weigh(entry.step_seconds, entry.memory_bytes);
            snapshot.add(entry.rank, weight);
            rebalance.push(PlacementRequest {
                agent_id: *agent_id,
                current: Some(entry.rank),
                weight,
            });
        }

        let newborn = pending
            .iter()
            .map(|(agent_id, load)| PlacementRequest {
                agent_id: *agent_id,
                current: None,
                weight: weigh(load.step_seconds, load.memory_bytes),
            })
            .collect();

        DecisionInputs {
            snapshot,
            rebalance,
            newborn,
        }
    }
}
