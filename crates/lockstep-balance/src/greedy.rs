//! Greedy least-loaded placement.

use lockstep_types::{LoadSnapshot, PlacementDecision, PlacementRequest};
use tracing::debug;

use crate::error::BalanceError;
use crate::{in_decision_order, LoadBalancer};

/// Deterministic least-loaded placement strategy.
///
/// Candidates are processed in stable agent-ID order. Each newborn goes to
/// the currently least-loaded runner in a *local copy* of the snapshot,
/// and the copy is charged with the agent's weight after every assignment,
/// so one call spreads a batch evenly instead of piling it all onto the
/// runner that happened to be lightest when the snapshot was taken. Ties
/// break toward the lowest rank.
///
/// Rebalancing requests move an agent only when doing so does not invert
/// the imbalance: the source must remain at least as loaded as the
/// destination becomes. Otherwise the agent stays put -- migration has a
/// cost, and oscillating an agent between equally loaded runners every
/// step buys nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyBalancer;

impl GreedyBalancer {
    /// Create a greedy balancer.
    pub const fn new() -> Self {
        Self
    }
}

impl LoadBalancer for GreedyBalancer {
    fn decide(
        &mut self,
        requests: &[PlacementRequest],
        snapshot: &LoadSnapshot,
    ) -> Result<PlacementDecision, BalanceError> {
        if snapshot.is_empty() {
            return Err(BalanceError::NoRunners);
        }

        let mut local = snapshot.clone();
        let mut decision = PlacementDecision::default();

        for request in in_decision_order(requests) {
            match request.current {
                None => {
                    let Some(target) = local.least_loaded() else {
                        return Err(BalanceError::NoRunners);
                    };
                    local.add(target, request.weight);
                    decision.assign(request.agent_id, target);
                }
                Some(current) => {
                    let Some(current_load) = local.weight(current) else {
                        return Err(BalanceError::UnknownRunner {
                            agent_id: request.agent_id,
                            rank: current,
                        });
                    };
                    let Some(target) = local.least_loaded() else {
                        return Err(BalanceError::NoRunners);
                    };
                    let target_load = local.weight(target).unwrap_or(0.0);

                    // Move only if the source stays at least as loaded as
                    // the destination becomes; anything less would just
                    // swap the imbalance around.
                    let w = request.weight;
                    if target != current && current_load - w >= target_load + w {
                        debug!(
                            agent_id = %request.agent_id,
                            from = %current,
                            to = %target,
                            weight = w,
                            "greedy rebalance move"
                        );
                        local.add(current, -w);
                        local.add(target, w);
                        decision.assign(request.agent_id, target);
                    } else {
                        decision.assign(request.agent_id, current);
                    }
                }
            }
        }

        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "greedy"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::collections::BTreeMap;

    use lockstep_types::{AgentId, RunnerRank};

    use super::*;

    fn newborn(weight: f64) -> PlacementRequest {
        PlacementRequest {
            agent_id: AgentId::new(),
            current: None,
            weight,
        }
    }

    fn count_per_rank(decision: &PlacementDecision) -> BTreeMap<RunnerRank, usize> {
        let mut counts = BTreeMap::new();
        for (_, rank) in decision.iter() {
            *counts.entry(rank).or_insert(0usize) += 1;
        }
        counts
    }

    #[test]
    fn spreads_uniform_newborns_within_one() {
        let snapshot = LoadSnapshot::zeroed((0..3).map(RunnerRank));
        let requests: Vec<PlacementRequest> = (0..10).map(|_| newborn(1.0)).collect();

        let decision = GreedyBalancer::new().decide(&requests, &snapshot).unwrap();

        let counts = count_per_rank(&decision);
        let max = counts.values().max().copied().unwrap();
        let min = counts.values().min().copied().unwrap();
        assert_eq!(decision.len(), 10);
        assert!(max - min <= 1, "counts {counts:?} differ by more than 1");
    }

    #[test]
    fn prefers_the_least_loaded_runner() {
        let mut snapshot = LoadSnapshot::zeroed([RunnerRank(0), RunnerRank(1)]);
        snapshot.add(RunnerRank(0), 5.0);

        let request = newborn(1.0);
        let decision = GreedyBalancer::new()
            .decide(std::slice::from_ref(&request), &snapshot)
            .unwrap();
        assert_eq!(decision.rank_of(request.agent_id), Some(RunnerRank(1)));
    }

    #[test]
    fn ties_break_to_lowest_rank() {
        let snapshot = LoadSnapshot::zeroed([RunnerRank(2), RunnerRank(1), RunnerRank(0)]);
        let request = newborn(1.0);
        let decision = GreedyBalancer::new()
            .decide(std::slice::from_ref(&request), &snapshot)
            .unwrap();
        assert_eq!(decision.rank_of(request.agent_id), Some(RunnerRank(0)));
    }

    #[test]
    fn balanced_agents_stay_put() {
        let mut snapshot = LoadSnapshot::zeroed([RunnerRank(0), RunnerRank(1)]);
        snapshot.add(RunnerRank(0), 1.0);
        snapshot.add(RunnerRank(1), 1.0);

        let request = PlacementRequest {
            agent_id: AgentId::new(),
            current: Some(RunnerRank(0)),
            weight: 1.0,
        };
        let decision = GreedyBalancer::new()
            .decide(std::slice::from_ref(&request), &snapshot)
            .unwrap();
        assert_eq!(decision.rank_of(request.agent_id), Some(RunnerRank(0)));
    }

    #[test]
    fn heavy_imbalance_triggers_a_move() {
        let mut snapshot = LoadSnapshot::zeroed([RunnerRank(0), RunnerRank(1)]);
        snapshot.add(RunnerRank(0), 10.0);

        let request = PlacementRequest {
            agent_id: AgentId::new(),
            current: Some(RunnerRank(0)),
            weight: 1.0,
        };
        let decision = GreedyBalancer::new()
            .decide(std::slice::from_ref(&request), &snapshot)
            .unwrap();
        assert_eq!(decision.rank_of(request.agent_id), Some(RunnerRank(1)));
    }

    #[test]
    fn unknown_current_runner_is_rejected() {
        let snapshot = LoadSnapshot::zeroed([RunnerRank(0)]);
        let request = PlacementRequest {
            agent_id: AgentId::new(),
            current: Some(RunnerRank(5)),
            weight: 1.0,
        };
        let err = GreedyBalancer::new()
            .decide(std::slice::from_ref(&request), &snapshot)
            .unwrap_err();
        assert!(matches!(err, BalanceError::UnknownRunner { .. }));
    }

    #[test]
    fn empty_snapshot_is_rejected() {
        let err = GreedyBalancer::new()
            .decide(&[newborn(1.0)], &LoadSnapshot::default())
            .unwrap_err();
        assert!(matches!(err, BalanceError::NoRunners));
    }
}
