//! Simulation engine binary for the Lockstep runtime.
//!
//! This is the main entry point that wires the step-loop driver to a
//! concrete run: it loads configuration, registers the demo walker
//! population, selects the balancer, stores, and fabric, runs the
//! simulation to completion, and logs the per-step timing report.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `lockstep-config.yaml`
//! 3. Build the agent registry and bootstrap population
//! 4. Select the placement strategy and fabric mode
//! 5. Run the step loop until the schedule is exhausted
//! 6. Log the result

mod config;
mod error;
mod walker;

use std::path::Path;

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use lockstep_balance::{GreedyBalancer, LoadBalancer, RandomBalancer};
use lockstep_core::{FabricMode, RangeTimestepGenerator, Simulation, StoreSpec};
use lockstep_store::{ConflictPolicy, JsonlBackend, MemoryBackend, StoreBackend};

use crate::config::{BalancerSettings, EngineConfig, FabricSettings, StoreSettings};
use crate::error::EngineError;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration loading or the run itself fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("lockstep-engine starting");

    let config = load_config()?;
    info!(
        steps = config.simulation.steps,
        runners = config.simulation.runners,
        agents = config.simulation.agents,
        seed = config.simulation.seed,
        balancer = config.balancer.strategy,
        stores = config.stores.len(),
        fabric = config.fabric.mode,
        "configuration loaded"
    );

    let registry = walker::registry();
    let population = walker::population(&config.simulation);
    let schedule = RangeTimestepGenerator::new(config.simulation.steps);
    let balancer = build_balancer(&config.balancer, config.simulation.seed)?;
    let fabric = build_fabric(&config.fabric)?;

    let mut simulation = Simulation::new(registry, population, schedule)
        .runners(config.simulation.runners)
        .balancer(balancer)
        .fabric(fabric);
    for store in &config.stores {
        simulation = simulation.store(build_store(store)?);
    }

    let report = simulation.run().await.map_err(EngineError::from)?;

    for summary in &report.steps {
        debug!(
            step = summary.step,
            round_seconds = summary.round_seconds,
            "step timing"
        );
    }
    info!(steps = report.steps.len(), "run complete");

    Ok(())
}

/// Load the engine configuration from `lockstep-config.yaml`.
///
/// Looks for the config file relative to the current working directory.
fn load_config() -> Result<EngineConfig, EngineError> {
    let config_path = Path::new("lockstep-config.yaml");
    if config_path.exists() {
        Ok(EngineConfig::from_file(config_path)?)
    } else {
        info!("config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}

/// Build the configured placement strategy.
fn build_balancer(
    settings: &BalancerSettings,
    seed: u64,
) -> Result<Box<dyn LoadBalancer>, EngineError> {
    match settings.strategy.as_str() {
        "greedy" => Ok(Box::new(GreedyBalancer::new())),
        "random" => Ok(Box::new(RandomBalancer::new(seed))),
        other => Err(EngineError::UnknownStrategy {
            name: other.to_owned(),
        }),
    }
}

/// Build one configured store participant.
fn build_store(settings: &StoreSettings) -> Result<StoreSpec, EngineError> {
    let policy =
        ConflictPolicy::from_name(&settings.policy).ok_or_else(|| EngineError::UnknownPolicy {
            name: settings.policy.clone(),
        })?;
    let backend: Box<dyn StoreBackend> = match settings.backend.as_str() {
        "memory" => Box::new(MemoryBackend::new()),
        "jsonl" => {
            let path = settings.path.as_ref().ok_or_else(|| EngineError::MissingPath {
                store: settings.name.clone(),
            })?;
            Box::new(JsonlBackend::new(path))
        }
        other => {
            return Err(EngineError::UnknownBackend {
                name: other.to_owned(),
            });
        }
    };
    Ok(StoreSpec::new(settings.name.clone(), backend, policy))
}

/// Build the configured fabric mode.
fn build_fabric(settings: &FabricSettings) -> Result<FabricMode, EngineError> {
    match settings.mode.as_str() {
        "local" => Ok(FabricMode::Local),
        "nats" => Ok(FabricMode::Nats {
            url: settings.nats_url.clone(),
            prefix: settings.prefix.clone(),
        }),
        other => Err(EngineError::UnknownFabric {
            name: other.to_owned(),
        }),
    }
}
