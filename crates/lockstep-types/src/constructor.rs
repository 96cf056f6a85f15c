//! Serializable agent construction descriptors.
//!
//! An [`AgentConstructor`] carries everything needed to instantiate an
//! agent inside a runner: the agent's identity, a type tag resolved
//! against the runner's agent registry, and an opaque state blob the
//! registered builder deserializes. The same form is used for newborn
//! agents (produced by the population) and for migration transfers
//! (produced by the source runner from the live agent).

use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// A descriptor sufficient to instantiate an agent.
///
/// Consumed exactly once: the receiving runner turns it into a live agent
/// and discards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConstructor {
    /// Identity of the agent to be constructed.
    pub agent_id: AgentId,
    /// Type tag resolved against the runner's agent registry.
    pub kind: String,
    /// Opaque initial state, interpreted by the registered builder.
    pub state: serde_json::Value,
}

impl AgentConstructor {
    /// Create a constructor for the given agent.
    pub fn new(agent_id: AgentId, kind: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            agent_id,
            kind: kind.into(),
            state,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn constructor_round_trips_through_json() {
        let ctor = AgentConstructor::new(
            AgentId::new(),
            "walker",
            serde_json::json!({ "x": 3, "y": -1 }),
        );
        let json = serde_json::to_string(&ctor).unwrap();
        let back: AgentConstructor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctor);
    }
}
