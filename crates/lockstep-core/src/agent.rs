//! The agent seam and the registry that instantiates agents.
//!
//! Agents are not participants: they live inside a runner, which calls
//! their [`step`], [`is_alive`], and [`memory_usage`] methods. The domain
//! behavior executed inside a step is opaque to the protocol core; all
//! the core requires is that an agent can report the updates its step
//! produced and can serialize itself back into a constructor for
//! migration.
//!
//! [`step`]: Agent::step
//! [`is_alive`]: Agent::is_alive
//! [`memory_usage`]: Agent::memory_usage

use std::collections::BTreeMap;

use lockstep_types::{AgentConstructor, StateUpdate, Timestep};

/// Errors from agent construction and serialization.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// A constructor named a type tag with no registered builder.
    #[error("no builder registered for agent kind {kind:?}")]
    UnknownKind {
        /// The unregistered type tag.
        kind: String,
    },

    /// A registered builder rejected a constructor's state blob.
    #[error("failed to build agent of kind {kind:?}: {message}")]
    Build {
        /// The type tag being built.
        kind: String,
        /// Description of the builder failure.
        message: String,
    },

    /// A live agent could not be serialized into transfer form.
    #[error("failed to snapshot agent for transfer: {message}")]
    Snapshot {
        /// Description of the serialization failure.
        message: String,
    },
}

/// A single agent in the simulation.
///
/// Mutated only by its owning runner during step execution; the runtime
/// never touches agent state between steps.
pub trait Agent: Send {
    /// Execute one step and return the state updates it produced.
    fn step(&mut self, timestep: &Timestep) -> Vec<StateUpdate>;

    /// Whether the agent will produce further steps. Runners drop agents
    /// that report `false` after stepping them.
    fn is_alive(&self) -> bool {
        true
    }

    /// The agent's memory footprint in bytes, for the load ledger.
    /// Estimates are fine; this only steers rebalancing.
    fn memory_usage(&self) -> f64 {
        0.0
    }

    /// Serialize the agent into a constructor a peer runner can rebuild
    /// it from. Used for migration transfer.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Snapshot`] if the agent's state cannot be
    /// serialized.
    fn snapshot(&self) -> Result<AgentConstructor, AgentError>;
}

/// Builder function registered per agent type tag.
type Builder = Box<dyn Fn(&AgentConstructor) -> Result<Box<dyn Agent>, AgentError> + Send + Sync>;

/// Registry mapping agent type tags to builder functions.
///
/// Every runner holds (a shared reference to) the same registry, so an
/// agent constructed on one rank can be reconstructed on any other after
/// migration.
#[derive(Default)]
pub struct AgentRegistry {
    builders: BTreeMap<String, Builder>,
}

impl AgentRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder for a type tag. Replaces any previous builder
    /// for the same tag.
    pub fn register<F>(&mut self, kind: impl Into<String>, builder: F)
    where
        F: Fn(&AgentConstructor) -> Result<Box<dyn Agent>, AgentError> + Send + Sync + 'static,
    {
        self.builders.insert(kind.into(), Box::new(builder));
    }

    /// Instantiate an agent from a constructor.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownKind`] for an unregistered tag, or
    /// whatever the builder itself returns.
    pub fn construct(&self, constructor: &AgentConstructor) -> Result<Box<dyn Agent>, AgentError> {
        let builder =
            self.builders
                .get(&constructor.kind)
                .ok_or_else(|| AgentError::UnknownKind {
                    kind: constructor.kind.clone(),
                })?;
        builder(constructor)
    }
}

impl core::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Agent").finish_non_exhaustive()
    }
}

impl core::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("kinds", &self.builders.keys().collect::<Vec<_>>())
            .finish()
    }
}
