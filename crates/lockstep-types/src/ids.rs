//! Typed identifiers for simulation participants and entities.
//!
//! Agents are identified by UUID v7 (time-ordered) wrapped in a newtype so
//! they cannot be confused with other identifiers at compile time. Runner
//! ranks are small dense integers assigned at wiring time, mirroring the
//! rank addressing of the underlying message fabric. Stores are identified
//! by their configured name.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an agent in the simulation.
///
/// Created once when the agent is born and carried through creation,
/// migration, and every state update the agent produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AgentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for AgentId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<AgentId> for Uuid {
    fn from(id: AgentId) -> Self {
        id.0
    }
}

/// Rank of a runner process on the message fabric.
///
/// Ranks are dense, starting at 0, and fixed for the lifetime of a run.
/// The set of known ranks is established at wiring time and never grows.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RunnerRank(pub u32);

impl RunnerRank {
    /// Return the inner rank number.
    pub const fn into_inner(self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for RunnerRank {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for RunnerRank {
    fn from(rank: u32) -> Self {
        Self(rank)
    }
}

/// Name of a state store.
///
/// Every store in a simulation has a unique configured name; updates carry
/// the name of the store they target.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StoreId(pub String);

impl StoreId {
    /// Create a store identifier from a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Return the store name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for StoreId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StoreId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn agent_ids_are_unique_and_ordered() {
        let a = AgentId::new();
        let b = AgentId::new();
        assert_ne!(a, b);
        // UUID v7 is time-ordered, so later IDs sort after earlier ones.
        assert!(a < b);
    }

    #[test]
    fn ids_round_trip_through_json() {
        let rank = RunnerRank(3);
        let json = serde_json::to_string(&rank).unwrap();
        assert_eq!(serde_json::from_str::<RunnerRank>(&json).unwrap(), rank);

        let store = StoreId::new("position");
        let json = serde_json::to_string(&store).unwrap();
        assert_eq!(serde_json::from_str::<StoreId>(&json).unwrap(), store);
    }
}
