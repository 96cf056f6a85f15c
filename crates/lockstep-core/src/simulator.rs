//! The driver: wires participants over a fabric and sequences timesteps.
//!
//! The driver owns the outer loop of a run. For each timestep it
//! announces the step to the coordinator and every runner, pumps the
//! population's newborn batch to the coordinator, waits for
//! `coordinator_done`, and then commands every store to flush before the
//! next step starts. Any `fault` from any participant aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use lockstep_balance::{GreedyBalancer, LoadBalancer};
use lockstep_fabric::{
    Address, Barrier, BarrierError, Envelope, Fabric, FabricError, LocalFabric, Message,
    NatsFabric,
};
use lockstep_store::{ConflictPolicy, MemoryBackend, StateStore, StoreBackend, StoreError};
use lockstep_types::{RunnerRank, StoreId};

use crate::agent::AgentRegistry;
use crate::coordinator::{Coordinator, CoordinatorError};
use crate::population::Population;
use crate::runner::{Runner, RunnerError};
use crate::schedule::TimestepGenerator;

/// Errors that abort a run.
#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    /// The simulation was configured with zero runners.
    #[error("simulation requires at least one runner")]
    NoRunners,

    /// A participant reported a fatal error.
    #[error("participant {participant} faulted: {detail}")]
    Fault {
        /// The failing participant.
        participant: Address,
        /// Rendered error description.
        detail: String,
    },

    /// The driver received a message it has no business handling.
    #[error("unexpected {kind} from {from} at the driver")]
    Protocol {
        /// Kind of the offending message.
        kind: &'static str,
        /// Its sender.
        from: Address,
    },

    /// The driver's inbox closed before the run completed.
    #[error("fabric closed before the run completed")]
    FabricClosed,

    /// A send or registration over the fabric failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// The flush barrier recorded an arrival that violates the protocol.
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    /// A participant task panicked or was cancelled.
    #[error("participant task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The coordinator task failed.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),

    /// A runner task failed.
    #[error(transparent)]
    Runner(#[from] RunnerError),

    /// A store task failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Which transport the participants communicate over.
#[derive(Debug, Clone)]
pub enum FabricMode {
    /// In-process channels; every participant is a task in this process.
    Local,
    /// NATS subjects; participants may be spread across processes.
    Nats {
        /// NATS server URL.
        url: String,
        /// Subject prefix isolating this run.
        prefix: String,
    },
}

/// One state store to run as a participant.
pub struct StoreSpec {
    /// The store's name, matched against `StateUpdate::store`.
    pub id: StoreId,
    /// Where flushed batches are committed.
    pub backend: Box<dyn StoreBackend>,
    /// How buffered writes to the same key are resolved at flush.
    pub policy: ConflictPolicy,
}

impl StoreSpec {
    /// A store with an explicit backend and policy.
    pub fn new(
        id: impl Into<String>,
        backend: Box<dyn StoreBackend>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            id: StoreId::new(id),
            backend,
            policy,
        }
    }

    /// A last-write-wins store over an in-memory backend.
    pub fn in_memory(id: impl Into<String>) -> Self {
        Self::new(id, Box::new(MemoryBackend::new()), ConflictPolicy::LastWriteWins)
    }
}

impl core::fmt::Debug for StoreSpec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreSpec")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Timing record for one completed step.
#[derive(Debug, Clone)]
pub struct StepSummary {
    /// The completed logical step.
    pub step: u64,
    /// Wall-clock seconds from step announcement to the last flush ack.
    pub round_seconds: f64,
    /// Per-store flush durations reported with `store_flush_done`.
    pub flush_seconds: BTreeMap<StoreId, f64>,
    /// When the step completed.
    pub completed_at: DateTime<Utc>,
}

/// The outcome of a completed run.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One summary per completed step, in step order.
    pub steps: Vec<StepSummary>,
}

/// A configured simulation, ready to run.
///
/// Construction is builder-style: start from [`Simulation::new`] with the
/// required components, then layer runners, stores, balancer, and fabric
/// mode on top. Defaults are one runner, no stores, greedy balancing, and
/// the local fabric.
pub struct Simulation {
    registry: Arc<AgentRegistry>,
    population: Box<dyn Population>,
    schedule: Box<dyn TimestepGenerator>,
    runners: u32,
    stores: Vec<StoreSpec>,
    balancer: Box<dyn LoadBalancer>,
    fabric_mode: FabricMode,
}

impl Simulation {
    /// A simulation over the given agent registry, population, and
    /// timestep schedule.
    pub fn new(
        registry: AgentRegistry,
        population: impl Population + 'static,
        schedule: impl TimestepGenerator + 'static,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            population: Box::new(population),
            schedule: Box::new(schedule),
            runners: 1,
            stores: Vec::new(),
            balancer: Box::new(GreedyBalancer::new()),
            fabric_mode: FabricMode::Local,
        }
    }

    /// Set the number of runner participants.
    #[must_use]
    pub fn runners(mut self, runners: u32) -> Self {
        self.runners = runners;
        self
    }

    /// Add a state store participant.
    #[must_use]
    pub fn store(mut self, spec: StoreSpec) -> Self {
        self.stores.push(spec);
        self
    }

    /// Replace the placement strategy.
    #[must_use]
    pub fn balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    /// Select the transport participants communicate over.
    #[must_use]
    pub fn fabric(mut self, mode: FabricMode) -> Self {
        self.fabric_mode = mode;
        self
    }

    /// Run the simulation to completion.
    ///
    /// Spawns one task per participant, drives the step loop, and joins
    /// every task before returning. A fault from any participant aborts
    /// the run; shutdown is still broadcast so the remaining tasks exit.
    ///
    /// # Errors
    ///
    /// Returns the first [`SimulationError`] encountered, after a
    /// best-effort shutdown of the remaining participants.
    pub async fn run(self) -> Result<RunReport, SimulationError> {
        if self.runners == 0 {
            return Err(SimulationError::NoRunners);
        }
        let ranks: Vec<RunnerRank> = (0..self.runners).map(RunnerRank).collect();
        let store_ids: Vec<StoreId> = self.stores.iter().map(|s| s.id.clone()).collect();

        let mut addresses = vec![Address::Driver, Address::Coordinator];
        addresses.extend(ranks.iter().map(|&r| Address::Runner(r)));
        addresses.extend(store_ids.iter().map(|id| Address::Store(id.clone())));

        let (fabric, mut inboxes) = wire(&self.fabric_mode, &addresses).await?;
        let mut driver_inbox = inboxes
            .remove(&Address::Driver)
            .ok_or(SimulationError::FabricClosed)?;

        info!(
            runners = ranks.len(),
            stores = store_ids.len(),
            balancer = self.balancer.name(),
            fabric = ?self.fabric_mode,
            "simulation starting"
        );

        let mut handles: Vec<(Address, JoinHandle<Result<(), SimulationError>>)> = Vec::new();

        let coordinator = Coordinator::new(Arc::clone(&fabric), ranks.clone(), self.balancer);
        let inbox = inboxes
            .remove(&Address::Coordinator)
            .ok_or(SimulationError::FabricClosed)?;
        handles.push((
            Address::Coordinator,
            tokio::spawn(async move { coordinator.run(inbox).await.map_err(Into::into) }),
        ));

        for &rank in &ranks {
            let runner = Runner::new(rank, Arc::clone(&fabric), Arc::clone(&self.registry));
            let inbox = inboxes
                .remove(&Address::Runner(rank))
                .ok_or(SimulationError::FabricClosed)?;
            handles.push((
                Address::Runner(rank),
                tokio::spawn(async move { runner.run(inbox).await.map_err(Into::into) }),
            ));
        }

        for spec in self.stores {
            let address = Address::Store(spec.id.clone());
            let store = StateStore::new(spec.id, Arc::clone(&fabric), spec.backend, spec.policy);
            let inbox = inboxes
                .remove(&address)
                .ok_or(SimulationError::FabricClosed)?;
            handles.push((
                address,
                tokio::spawn(async move { store.run(inbox).await.map_err(Into::into) }),
            ));
        }

        let outcome = drive(
            &fabric,
            &mut driver_inbox,
            &ranks,
            &store_ids,
            self.schedule,
            self.population,
        )
        .await;

        // Shutdown is broadcast even after a fault, so surviving tasks
        // exit instead of waiting forever on a barrier.
        for address in addresses.iter().filter(|a| **a != Address::Driver) {
            let _ = fabric.send(Address::Driver, address, Message::Shutdown);
        }

        let mut first_task_error: Option<SimulationError> = None;
        for (address, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(participant = %address, error = %e, "participant failed");
                    if first_task_error.is_none() {
                        first_task_error = Some(e);
                    }
                }
                Err(join) => {
                    error!(participant = %address, error = %join, "participant task lost");
                    if first_task_error.is_none() {
                        first_task_error = Some(join.into());
                    }
                }
            }
        }

        match outcome {
            Ok(steps) => {
                if let Some(e) = first_task_error {
                    return Err(e);
                }
                info!(steps = steps.len(), "simulation complete");
                Ok(RunReport { steps })
            }
            Err(e) => Err(e),
        }
    }
}

/// Construct the selected fabric and register every participant address.
async fn wire(
    mode: &FabricMode,
    addresses: &[Address],
) -> Result<
    (
        Arc<dyn Fabric>,
        BTreeMap<Address, mpsc::UnboundedReceiver<Envelope>>,
    ),
    SimulationError,
> {
    let mut inboxes = BTreeMap::new();
    match mode {
        FabricMode::Local => {
            let fabric = Arc::new(LocalFabric::new());
            for address in addresses {
                inboxes.insert(address.clone(), fabric.register(address.clone())?);
            }
            Ok((fabric as Arc<dyn Fabric>, inboxes))
        }
        FabricMode::Nats { url, prefix } => {
            let fabric = Arc::new(NatsFabric::connect(url, prefix).await?);
            for address in addresses {
                inboxes.insert(address.clone(), fabric.register(address.clone()).await?);
            }
            Ok((fabric as Arc<dyn Fabric>, inboxes))
        }
    }
}

/// The driver's step loop.
async fn drive(
    fabric: &Arc<dyn Fabric>,
    driver_inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    ranks: &[RunnerRank],
    store_ids: &[StoreId],
    mut schedule: Box<dyn TimestepGenerator>,
    mut population: Box<dyn Population>,
) -> Result<Vec<StepSummary>, SimulationError> {
    let mut steps = Vec::new();
    while let Some(timestep) = schedule.next_timestep() {
        let round_started = Instant::now();

        fabric.send(
            Address::Driver,
            &Address::Coordinator,
            Message::Step { timestep },
        )?;
        for &rank in ranks {
            fabric.send(
                Address::Driver,
                &Address::Runner(rank),
                Message::Step { timestep },
            )?;
        }

        for spawn in population.spawn_agents(&timestep) {
            fabric.send(
                Address::Driver,
                &Address::Coordinator,
                Message::NewAgent {
                    constructor: spawn.constructor,
                    load: spawn.load,
                },
            )?;
        }
        fabric.send(Address::Driver, &Address::Coordinator, Message::NewAgentsDone)?;

        await_coordinator(driver_inbox, timestep.step).await?;
        let flush_seconds = flush_stores(fabric, driver_inbox, store_ids, timestep.step).await?;

        let summary = StepSummary {
            step: timestep.step,
            round_seconds: round_started.elapsed().as_secs_f64(),
            flush_seconds,
            completed_at: Utc::now(),
        };
        info!(
            step = summary.step,
            round_seconds = summary.round_seconds,
            "step completed"
        );
        steps.push(summary);
    }
    Ok(steps)
}

/// Wait for the coordinator to report the step complete.
async fn await_coordinator(
    driver_inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    step: u64,
) -> Result<(), SimulationError> {
    let Envelope { from, message } = driver_inbox
        .recv()
        .await
        .ok_or(SimulationError::FabricClosed)?;
    match message {
        Message::CoordinatorDone { step: done } if done == step => Ok(()),
        Message::Fault {
            participant,
            detail,
        } => Err(SimulationError::Fault {
            participant,
            detail,
        }),
        other => Err(SimulationError::Protocol {
            kind: other.kind(),
            from,
        }),
    }
}

/// Command every store to flush and wait for all acknowledgments.
async fn flush_stores(
    fabric: &Arc<dyn Fabric>,
    driver_inbox: &mut mpsc::UnboundedReceiver<Envelope>,
    store_ids: &[StoreId],
    step: u64,
) -> Result<BTreeMap<StoreId, f64>, SimulationError> {
    let mut barrier = Barrier::expecting(store_ids.iter().cloned());
    let mut flush_seconds = BTreeMap::new();
    for id in store_ids {
        fabric.send(
            Address::Driver,
            &Address::Store(id.clone()),
            Message::Flush { step },
        )?;
    }
    while !barrier.is_closed() {
        let Envelope { from, message } = driver_inbox
            .recv()
            .await
            .ok_or(SimulationError::FabricClosed)?;
        match message {
            Message::StoreFlushDone {
                store,
                flush_seconds: seconds,
            } => {
                // The barrier slot belongs to the store the payload names,
                // so the envelope sender must be that store.
                if from != Address::Store(store.clone()) {
                    return Err(SimulationError::Protocol {
                        kind: "store_flush_done",
                        from,
                    });
                }
                barrier.arrive(&store)?;
                flush_seconds.insert(store, seconds);
            }
            Message::Fault {
                participant,
                detail,
            } => {
                return Err(SimulationError::Fault {
                    participant,
                    detail,
                });
            }
            other => {
                return Err(SimulationError::Protocol {
                    kind: other.kind(),
                    from,
                });
            }
        }
    }
    Ok(flush_seconds)
}
