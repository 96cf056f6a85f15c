//! The source of newborn agents.
//!
//! A population produces agent construction descriptors: a batch at
//! bootstrap (step 0), and optionally more on any later step if the
//! simulation supports dynamic spawning. The driver pumps the batch to
//! the coordinator as `new_agent` messages terminated by an explicit
//! `new_agents_done`, so the coordinator never has to guess when the
//! batch is complete.

use lockstep_types::{AgentConstructor, LoadEstimate, Timestep};

/// One newborn agent: its constructor plus the initial load estimate the
/// coordinator seeds its ledger entry with.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnRequest {
    /// Descriptor for the agent to create.
    pub constructor: AgentConstructor,
    /// Initial load estimate, replaced by observed profiles after the
    /// first step.
    pub load: LoadEstimate,
}

/// Produces the newborn agents for each step.
///
/// Returning an empty batch is the normal case for every step after
/// bootstrap in a simulation without dynamic spawning.
pub trait Population: Send {
    /// The agents to create on the given step.
    fn spawn_agents(&mut self, timestep: &Timestep) -> Vec<SpawnRequest>;
}

/// Closures can serve as populations directly; handy for tests and small
/// simulations.
impl<F> Population for F
where
    F: FnMut(&Timestep) -> Vec<SpawnRequest> + Send,
{
    fn spawn_agents(&mut self, timestep: &Timestep) -> Vec<SpawnRequest> {
        self(timestep)
    }
}
