//! Placement and rebalancing policies.
//!
//! A [`LoadBalancer`] is a pure placement policy: given a set of placement
//! requests and a fresh per-runner [`LoadSnapshot`], it maps each agent to
//! a runner. It holds no state about the population between calls (the
//! random strategy carries only its RNG), and it never sends messages --
//! the coordinator owns the load ledger, takes the snapshot, and turns the
//! returned [`PlacementDecision`] into creation and migration commands.
//!
//! Two baseline strategies ship with the runtime:
//!
//! - [`GreedyBalancer`] -- deterministic least-loaded placement
//! - [`RandomBalancer`] -- seeded uniform-random placement, the
//!   load-oblivious control strategy
//!
//! [`LoadSnapshot`]: lockstep_types::LoadSnapshot
//! [`PlacementDecision`]: lockstep_types::PlacementDecision

pub mod error;
pub mod greedy;
pub mod random;

pub use error::BalanceError;
pub use greedy::GreedyBalancer;
pub use random::RandomBalancer;

use lockstep_types::{LoadSnapshot, PlacementDecision, PlacementRequest};

/// A placement and rebalancing policy.
///
/// `decide` is called with newborn agents (`current == None`) for initial
/// placement and with existing agents (`current == Some(rank)`) for
/// rebalancing. For rebalancing requests the returned assignment may equal
/// the current rank, meaning "no change"; migration has a cost and must
/// not be triggered gratuitously.
pub trait LoadBalancer: Send {
    /// Map each requested agent to a runner.
    ///
    /// Every rank in the returned decision must come from the snapshot's
    /// runner set; the coordinator rejects anything else before any
    /// message is sent.
    ///
    /// # Errors
    ///
    /// Returns [`BalanceError::NoRunners`] if the snapshot is empty, or
    /// [`BalanceError::UnknownRunner`] if a request names a current runner
    /// outside the snapshot.
    fn decide(
        &mut self,
        requests: &[PlacementRequest],
        snapshot: &LoadSnapshot,
    ) -> Result<PlacementDecision, BalanceError>;

    /// Short strategy name, for logs and configuration.
    fn name(&self) -> &'static str;
}

/// Sort requests into the stable, deterministic order both strategies use.
///
/// Ordering by agent ID makes a decision a pure function of its inputs:
/// two coordinators with the same requests and snapshot produce the same
/// assignment regardless of how the request set was assembled.
pub(crate) fn in_decision_order(requests: &[PlacementRequest]) -> Vec<&PlacementRequest> {
    let mut ordered: Vec<&PlacementRequest> = requests.iter().collect();
    ordered.sort_by_key(|r| r.agent_id);
    ordered
}
