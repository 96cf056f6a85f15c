//! The demo population: seeded random walkers.
//!
//! Each walker holds a 2D position and a private RNG. Every step it takes
//! one uniform step in each axis and writes its position to the
//! `position` store. Walkers are cheap, deterministic given the run seed,
//! and serialize completely, so they exercise placement, migration, and
//! store routing without any domain machinery.

use rand::rngs::StdRng;
use rand::{Rng as _, SeedableRng as _};
use serde::{Deserialize, Serialize};

use lockstep_core::{Agent, AgentError, AgentRegistry, Population, SpawnRequest};
use lockstep_types::{AgentConstructor, AgentId, LoadEstimate, StateUpdate, StoreId, Timestep};

use crate::config::SimulationSettings;

/// Type tag walkers register under.
pub const WALKER_KIND: &str = "walker";

/// Serialized walker state, carried in constructors and transfers.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalkerState {
    x: f64,
    y: f64,
    seed: u64,
}

/// A 2D random walker.
pub struct Walker {
    agent_id: AgentId,
    x: f64,
    y: f64,
    seed: u64,
    rng: StdRng,
}

impl Walker {
    fn from_state(agent_id: AgentId, state: WalkerState) -> Self {
        Self {
            agent_id,
            x: state.x,
            y: state.y,
            seed: state.seed,
            rng: StdRng::seed_from_u64(state.seed),
        }
    }
}

impl Agent for Walker {
    fn step(&mut self, timestep: &Timestep) -> Vec<StateUpdate> {
        let period = timestep.period();
        self.x += self.rng.random_range(-1.0..=1.0) * period;
        self.y += self.rng.random_range(-1.0..=1.0) * period;
        vec![StateUpdate {
            store: StoreId::new("position"),
            key: self.agent_id.to_string(),
            value: serde_json::json!({ "x": self.x, "y": self.y }),
            agent_id: self.agent_id,
            step: timestep.step,
        }]
    }

    fn memory_usage(&self) -> f64 {
        // Flat estimate; walkers are all the same size.
        128.0
    }

    fn snapshot(&self) -> Result<AgentConstructor, AgentError> {
        let state = WalkerState {
            x: self.x,
            y: self.y,
            seed: self.seed,
        };
        let value = serde_json::to_value(&state).map_err(|e| AgentError::Snapshot {
            message: e.to_string(),
        })?;
        Ok(AgentConstructor::new(self.agent_id, WALKER_KIND, value))
    }
}

/// Registry with the walker builder registered.
pub fn registry() -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(WALKER_KIND, |constructor: &AgentConstructor| {
        let state: WalkerState =
            serde_json::from_value(constructor.state.clone()).map_err(|e| AgentError::Build {
                kind: WALKER_KIND.to_owned(),
                message: e.to_string(),
            })?;
        Ok(Box::new(Walker::from_state(constructor.agent_id, state)) as Box<dyn Agent>)
    });
    registry
}

/// Population spawning the configured walker count at bootstrap.
pub fn population(settings: &SimulationSettings) -> impl Population + 'static {
    let count = settings.agents;
    let seed = settings.seed;
    let mut spawned = false;
    move |timestep: &Timestep| {
        if spawned || timestep.step != 0 {
            return Vec::new();
        }
        spawned = true;
        (0..count)
            .map(|i| {
                let state = WalkerState {
                    x: 0.0,
                    y: 0.0,
                    seed: seed.wrapping_add(i),
                };
                SpawnRequest {
                    constructor: AgentConstructor::new(
                        AgentId::new(),
                        WALKER_KIND,
                        serde_json::json!(state),
                    ),
                    load: LoadEstimate {
                        step_seconds: 1.0,
                        memory_bytes: 128.0,
                    },
                }
            })
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockstep_core::Population as _;

    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn timestep(step: u64) -> Timestep {
        Timestep {
            step,
            start: step as f64,
            end: (step as f64) + 1.0,
        }
    }

    #[test]
    fn walkers_write_their_position_each_step() {
        let registry = registry();
        let ctor = AgentConstructor::new(
            AgentId::new(),
            WALKER_KIND,
            serde_json::json!({ "x": 0.0, "y": 0.0, "seed": 7 }),
        );
        let mut walker = registry.construct(&ctor).unwrap();
        let updates = walker.step(&timestep(0));
        assert_eq!(updates.len(), 1);
        let update = updates.first().unwrap();
        assert_eq!(update.store, StoreId::new("position"));
        assert!(update.value.get("x").is_some());
    }

    #[test]
    fn snapshot_round_trips_through_the_registry() {
        let registry = registry();
        let ctor = AgentConstructor::new(
            AgentId::new(),
            WALKER_KIND,
            serde_json::json!({ "x": 1.5, "y": -2.0, "seed": 7 }),
        );
        let walker = registry.construct(&ctor).unwrap();
        let transfer = walker.snapshot().unwrap();
        assert_eq!(transfer.agent_id, ctor.agent_id);
        assert_eq!(transfer.kind, WALKER_KIND);
        assert!(registry.construct(&transfer).is_ok());
    }

    #[test]
    fn population_spawns_once_at_bootstrap() {
        let settings = SimulationSettings {
            steps: 2,
            runners: 1,
            agents: 5,
            seed: 42,
        };
        let mut population = population(&settings);
        assert_eq!(population.spawn_agents(&timestep(0)).len(), 5);
        assert!(population.spawn_agents(&timestep(1)).is_empty());
    }
}
