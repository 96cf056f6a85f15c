//! Seeded uniform-random placement.

use lockstep_types::{LoadSnapshot, PlacementDecision, PlacementRequest};
use rand::rngs::StdRng;
use rand::seq::IndexedRandom as _;
use rand::SeedableRng as _;

use crate::error::BalanceError;
use crate::{in_decision_order, LoadBalancer};

/// Load-oblivious uniform-random placement strategy.
///
/// Each newborn is assigned to a runner drawn uniformly at random from the
/// snapshot's runner set. Existing agents always stay where they are:
/// without load awareness there is no justification for paying migration
/// cost, so rebalancing requests come back as "no change".
///
/// The RNG is seeded explicitly, so a fixed seed reproduces the same
/// placements for the same request sequence. This strategy exists as a
/// baseline to compare the greedy strategy against.
#[derive(Debug)]
pub struct RandomBalancer {
    rng: StdRng,
}

impl RandomBalancer {
    /// Create a random balancer from a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl LoadBalancer for RandomBalancer {
    fn decide(
        &mut self,
        requests: &[PlacementRequest],
        snapshot: &LoadSnapshot,
    ) -> Result<PlacementDecision, BalanceError> {
        if snapshot.is_empty() {
            return Err(BalanceError::NoRunners);
        }

        let ranks: Vec<_> = snapshot.ranks().collect();
        let mut decision = PlacementDecision::default();

        for request in in_decision_order(requests) {
            match request.current {
                None => {
                    let target = ranks
                        .choose(&mut self.rng)
                        .copied()
                        .ok_or(BalanceError::NoRunners)?;
                    decision.assign(request.agent_id, target);
                }
                Some(current) => {
                    if !snapshot.contains(current) {
                        return Err(BalanceError::UnknownRunner {
                            agent_id: request.agent_id,
                            rank: current,
                        });
                    }
                    decision.assign(request.agent_id, current);
                }
            }
        }

        Ok(decision)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
