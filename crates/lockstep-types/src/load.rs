//! Load snapshots and placement decisions.
//!
//! A [`LoadSnapshot`] is the transient per-runner load picture the
//! coordinator assembles before invoking the load balancer; a
//! [`PlacementDecision`] is the balancer's output, consumed within the
//! same step and never persisted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunnerRank};

/// Initial load estimate for a newborn agent.
///
/// Supplied by the population alongside the constructor; replaced by
/// observed figures once the agent has stepped.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadEstimate {
    /// Estimated step time per unit simulated real time, in seconds.
    pub step_seconds: f64,
    /// Estimated memory usage, in bytes.
    pub memory_bytes: f64,
}

/// Per-runner load at decision time.
///
/// Assembled fresh by the coordinator before each balancer invocation.
/// The weight is an abstract cost; with no profile history it degrades to
/// a plain agent count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSnapshot {
    weights: BTreeMap<RunnerRank, f64>,
}

impl LoadSnapshot {
    /// Create a snapshot with zero load on each of the given ranks.
    pub fn zeroed(ranks: impl IntoIterator<Item = RunnerRank>) -> Self {
        Self {
            weights: ranks.into_iter().map(|r| (r, 0.0)).collect(),
        }
    }

    /// Number of runners in the snapshot.
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// True if the snapshot contains no runners.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// True if the given rank is part of the snapshot.
    pub fn contains(&self, rank: RunnerRank) -> bool {
        self.weights.contains_key(&rank)
    }

    /// The ranks covered by this snapshot, in ascending order.
    pub fn ranks(&self) -> impl Iterator<Item = RunnerRank> + '_ {
        self.weights.keys().copied()
    }

    /// Current weight of the given rank, if known.
    pub fn weight(&self, rank: RunnerRank) -> Option<f64> {
        self.weights.get(&rank).copied()
    }

    /// Add weight to a rank. Ranks not already in the snapshot are ignored;
    /// the known runner set is fixed at wiring time.
    pub fn add(&mut self, rank: RunnerRank, weight: f64) {
        if let Some(w) = self.weights.get_mut(&rank) {
            *w += weight;
        }
    }

    /// The least-loaded rank, ties broken by lowest rank.
    ///
    /// Iteration order of the underlying map is ascending by rank, and the
    /// strict comparison keeps the first (lowest) rank on ties.
    pub fn least_loaded(&self) -> Option<RunnerRank> {
        let mut best: Option<(RunnerRank, f64)> = None;
        for (&rank, &w) in &self.weights {
            match best {
                Some((_, best_w)) if w >= best_w => {}
                _ => best = Some((rank, w)),
            }
        }
        best.map(|(rank, _)| rank)
    }
}

/// One agent the balancer is asked to place.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacementRequest {
    /// The agent to place.
    pub agent_id: AgentId,
    /// The runner currently owning the agent, or `None` for a newborn.
    pub current: Option<RunnerRank>,
    /// The agent's load weight, on the same scale as the snapshot.
    pub weight: f64,
}

/// The balancer's output: agent to assigned runner.
///
/// For rebalancing requests the assigned runner may equal the current one,
/// meaning "no change"; the coordinator only issues migrations for agents
/// whose assignment actually changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlacementDecision {
    assignments: BTreeMap<AgentId, RunnerRank>,
}

impl PlacementDecision {
    /// Record an assignment.
    pub fn assign(&mut self, agent_id: AgentId, rank: RunnerRank) {
        self.assignments.insert(agent_id, rank);
    }

    /// Look up the assignment for an agent.
    pub fn rank_of(&self, agent_id: AgentId) -> Option<RunnerRank> {
        self.assignments.get(&agent_id).copied()
    }

    /// Number of assignments in the decision.
    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    /// True if the decision holds no assignments.
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    /// Iterate over assignments in ascending agent order.
    pub fn iter(&self) -> impl Iterator<Item = (AgentId, RunnerRank)> + '_ {
        self.assignments.iter().map(|(&a, &r)| (a, r))
    }

    /// Merge another decision into this one.
    ///
    /// Later assignments win; the coordinator merges the new-agent and
    /// rebalancing decisions of a step into one combined decision with
    /// disjoint agent sets, so in practice nothing is overwritten.
    pub fn merge(&mut self, other: Self) {
        self.assignments.extend(other.assignments);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn least_loaded_breaks_ties_by_lowest_rank() {
        let snapshot = LoadSnapshot::zeroed([RunnerRank(2), RunnerRank(0), RunnerRank(1)]);
        assert_eq!(snapshot.least_loaded(), Some(RunnerRank(0)));
    }

    #[test]
    fn add_shifts_least_loaded() {
        let mut snapshot = LoadSnapshot::zeroed([RunnerRank(0), RunnerRank(1)]);
        snapshot.add(RunnerRank(0), 2.0);
        assert_eq!(snapshot.least_loaded(), Some(RunnerRank(1)));
    }

    #[test]
    fn add_ignores_unknown_ranks() {
        let mut snapshot = LoadSnapshot::zeroed([RunnerRank(0)]);
        snapshot.add(RunnerRank(9), 1.0);
        assert!(!snapshot.contains(RunnerRank(9)));
    }

    #[test]
    fn decisions_merge_disjoint_sets() {
        let a = AgentId::new();
        let b = AgentId::new();
        let mut first = PlacementDecision::default();
        first.assign(a, RunnerRank(0));
        let mut second = PlacementDecision::default();
        second.assign(b, RunnerRank(1));
        first.merge(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.rank_of(b), Some(RunnerRank(1)));
    }
}
