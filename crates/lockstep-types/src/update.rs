//! State updates routed from agent steps to stores.

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, StoreId};

/// A fact an agent's step produced for a store.
///
/// Created by an agent step inside a runner, delivered to the target
/// store over the fabric, buffered there, and consumed at flush. Within
/// one step an update is never lost or duplicated between production and
/// flush; that guarantee is enforced by the step barrier protocol, not by
/// anything on this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateUpdate {
    /// Name of the store this update targets.
    pub store: StoreId,
    /// Key within the store; same-key conflicts within a step are resolved
    /// by the store's conflict policy.
    pub key: String,
    /// The update payload.
    pub value: serde_json::Value,
    /// The agent whose step produced this update.
    pub agent_id: AgentId,
    /// Logical step number the update belongs to.
    pub step: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn update_round_trips_through_json() {
        let update = StateUpdate {
            store: StoreId::new("position"),
            key: "agent-1".to_owned(),
            value: serde_json::json!({ "x": 1, "y": 2 }),
            agent_id: AgentId::new(),
            step: 7,
        };
        let json = serde_json::to_string(&update).unwrap();
        let back: StateUpdate = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
