//! The runner participant owning a shard of live agents.
//!
//! A runner instantiates agents on the coordinator's command, hands them
//! to peers during migration, and steps every local agent once the
//! coordinator releases the step. Updates produced by stepping are routed
//! to their stores immediately; the runner's own fan-in barrier over
//! store acknowledgments decides when its step is complete.
//!
//! The driver's `step` and the coordinator's `begin_step` arrive on
//! independent sender-pair channels, so their relative order is not
//! guaranteed. The runner buffers whichever arrives first and executes
//! once it holds both.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use lockstep_fabric::{Address, Barrier, BarrierError, Envelope, Fabric, FabricError, Message};
use lockstep_types::{AgentConstructor, AgentId, RunnerRank, StepProfile, StoreId, Timestep};

use crate::agent::{Agent, AgentError, AgentRegistry};

/// Errors that abort a runner, and with it the run.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// A message arrived that this runner cannot act on.
    #[error("runner {rank}: unexpected {kind} from {from}")]
    Protocol {
        /// The receiving runner.
        rank: RunnerRank,
        /// Kind of the offending message.
        kind: &'static str,
        /// Its sender.
        from: Address,
    },

    /// A creation or transfer named an agent this runner already holds.
    #[error("agent {agent_id} already exists on this runner")]
    DuplicateAgent {
        /// The doubly-created agent.
        agent_id: AgentId,
    },

    /// A migration command named an agent this runner does not hold.
    #[error("agent {agent_id} is not local to this runner")]
    AgentNotLocal {
        /// The missing agent.
        agent_id: AgentId,
    },

    /// A migration command named an agent already in transfer.
    #[error("agent {agent_id} is already being migrated")]
    DuplicateMigration {
        /// The doubly-migrated agent.
        agent_id: AgentId,
    },

    /// A transfer acknowledgment named an agent with no transfer open.
    #[error("no open transfer for agent {agent_id}")]
    UnknownTransfer {
        /// The unexpected acknowledgment's agent.
        agent_id: AgentId,
    },

    /// An acknowledgment whose sender does not match the participant it
    /// speaks for.
    #[error("runner {rank}: {kind} from {from} claims to be {claimed}")]
    AckSenderMismatch {
        /// The receiving runner.
        rank: RunnerRank,
        /// Kind of the offending acknowledgment.
        kind: &'static str,
        /// The envelope's actual sender.
        from: Address,
        /// The identity the payload implies.
        claimed: Address,
    },

    /// The coordinator released a step the driver never announced, or
    /// the step numbers disagree.
    #[error("begin_step for step {got} but driver announced step {expected}")]
    StepMismatch {
        /// The step the driver announced.
        expected: u64,
        /// The step the coordinator released.
        got: u64,
    },

    /// Stepping started while a migration transfer was still open.
    #[error("step released with {count} migration(s) still in flight")]
    MigrationInFlight {
        /// Open transfer count.
        count: usize,
    },

    /// Agent construction or serialization failed.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// A barrier recorded an arrival that violates the protocol.
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    /// A send over the fabric failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),
}

/// A runner participant holding one shard of the agent population.
pub struct Runner {
    rank: RunnerRank,
    fabric: Arc<dyn Fabric>,
    registry: Arc<AgentRegistry>,
    agents: BTreeMap<AgentId, Box<dyn Agent>>,
    /// The driver's step announcement, held until the coordinator
    /// releases stepping.
    timestep: Option<Timestep>,
    /// The coordinator's release, held until the driver's announcement
    /// arrives (the two channels are not mutually ordered).
    begin: Option<Timestep>,
    /// In-flight outbound migrations, agent to destination rank.
    outbound: BTreeMap<AgentId, RunnerRank>,
    /// Store acknowledgments outstanding for the current step.
    update_barrier: Barrier<StoreId>,
    /// Profiles accumulated while the update barrier is open.
    profiles: Vec<StepProfile>,
    /// Agents that reported dead this step, dropped at step end.
    dead: Vec<AgentId>,
}

impl Runner {
    /// Create a runner with the given rank and agent registry.
    pub fn new(rank: RunnerRank, fabric: Arc<dyn Fabric>, registry: Arc<AgentRegistry>) -> Self {
        Self {
            rank,
            fabric,
            registry,
            agents: BTreeMap::new(),
            timestep: None,
            begin: None,
            outbound: BTreeMap::new(),
            update_barrier: Barrier::default(),
            profiles: Vec::new(),
            dead: Vec::new(),
        }
    }

    fn address(&self) -> Address {
        Address::Runner(self.rank)
    }

    /// Run the runner until shutdown.
    ///
    /// On a fatal error a `fault` is sent to the driver before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`RunnerError`] after reporting it.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<(), RunnerError> {
        info!(rank = %self.rank, "runner started");
        while let Some(envelope) = inbox.recv().await {
            match self.handle(envelope) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    let _ = self.fabric.send(
                        self.address(),
                        &Address::Driver,
                        Message::Fault {
                            participant: self.address(),
                            detail: e.to_string(),
                        },
                    );
                    return Err(e);
                }
            }
        }
        info!(rank = %self.rank, agents = self.agents.len(), "runner stopped");
        Ok(())
    }

    /// Dispatch one envelope. Returns `Ok(false)` on shutdown.
    fn handle(&mut self, envelope: Envelope) -> Result<bool, RunnerError> {
        let Envelope { from, message } = envelope;
        match message {
            Message::Step { timestep } => {
                self.timestep = Some(timestep);
                self.try_start()?;
            }
            Message::CreateAgent { constructor } => self.on_create(constructor)?,
            Message::MoveAgent { agent_id, dest } => self.on_move(agent_id, dest)?,
            Message::ReceiveAgent { transfer } => self.on_receive(&from, transfer)?,
            Message::ReceiveAgentDone { agent_id } => self.on_receive_done(&from, agent_id)?,
            Message::BeginStep { timestep } => {
                self.begin = Some(timestep);
                self.try_start()?;
            }
            Message::HandleUpdateDone { store } => {
                let claimed = Address::Store(store.clone());
                if from != claimed {
                    return Err(RunnerError::AckSenderMismatch {
                        rank: self.rank,
                        kind: "handle_update_done",
                        from,
                        claimed,
                    });
                }
                if self.update_barrier.arrive(&store)? {
                    self.finish_step()?;
                }
            }
            Message::Shutdown => return Ok(false),
            other => {
                return Err(RunnerError::Protocol {
                    rank: self.rank,
                    kind: other.kind(),
                    from,
                });
            }
        }
        Ok(true)
    }

    /// Instantiate a newborn agent and acknowledge to the coordinator.
    fn on_create(&mut self, constructor: AgentConstructor) -> Result<(), RunnerError> {
        let agent_id = constructor.agent_id;
        if self.agents.contains_key(&agent_id) || self.outbound.contains_key(&agent_id) {
            return Err(RunnerError::DuplicateAgent { agent_id });
        }
        let agent = self.registry.construct(&constructor)?;
        self.agents.insert(agent_id, agent);
        self.fabric.send(
            self.address(),
            &Address::Coordinator,
            Message::CreateAgentDone { rank: self.rank },
        )?;
        Ok(())
    }

    /// Open an outbound transfer: serialize the agent and offer it to the
    /// destination. The local copy stays alive until the destination
    /// acknowledges ownership.
    fn on_move(&mut self, agent_id: AgentId, dest: RunnerRank) -> Result<(), RunnerError> {
        if self.outbound.contains_key(&agent_id) {
            return Err(RunnerError::DuplicateMigration { agent_id });
        }
        let agent = self
            .agents
            .get(&agent_id)
            .ok_or(RunnerError::AgentNotLocal { agent_id })?;
        let transfer = agent.snapshot()?;
        debug!(rank = %self.rank, agent = %agent_id, dest = %dest, "transfer opened");
        self.fabric.send(
            self.address(),
            &Address::Runner(dest),
            Message::ReceiveAgent { transfer },
        )?;
        self.outbound.insert(agent_id, dest);
        Ok(())
    }

    /// Reconstruct a transferred agent and acknowledge ownership to the
    /// source.
    fn on_receive(&mut self, from: &Address, transfer: AgentConstructor) -> Result<(), RunnerError> {
        let agent_id = transfer.agent_id;
        if self.agents.contains_key(&agent_id) || self.outbound.contains_key(&agent_id) {
            return Err(RunnerError::DuplicateAgent { agent_id });
        }
        let agent = self.registry.construct(&transfer)?;
        self.agents.insert(agent_id, agent);
        self.fabric.send(
            self.address(),
            from,
            Message::ReceiveAgentDone { agent_id },
        )?;
        Ok(())
    }

    /// Close an outbound transfer: drop the local copy and report the
    /// completed migration to the coordinator.
    fn on_receive_done(&mut self, from: &Address, agent_id: AgentId) -> Result<(), RunnerError> {
        let Some(dest) = self.outbound.get(&agent_id).copied() else {
            return Err(RunnerError::UnknownTransfer { agent_id });
        };
        let claimed = Address::Runner(dest);
        if *from != claimed {
            return Err(RunnerError::AckSenderMismatch {
                rank: self.rank,
                kind: "receive_agent_done",
                from: from.clone(),
                claimed,
            });
        }
        self.outbound.remove(&agent_id);
        if self.agents.remove(&agent_id).is_none() {
            return Err(RunnerError::AgentNotLocal { agent_id });
        }
        debug!(rank = %self.rank, agent = %agent_id, "transfer closed");
        self.fabric.send(
            self.address(),
            &Address::Coordinator,
            Message::MoveAgentDone { rank: self.rank },
        )?;
        Ok(())
    }

    /// Execute the step if both the driver's announcement and the
    /// coordinator's release are present.
    fn try_start(&mut self) -> Result<(), RunnerError> {
        let (Some(timestep), Some(begin)) = (self.timestep, self.begin) else {
            return Ok(());
        };
        if timestep.step != begin.step {
            return Err(RunnerError::StepMismatch {
                expected: timestep.step,
                got: begin.step,
            });
        }
        if !self.outbound.is_empty() {
            return Err(RunnerError::MigrationInFlight {
                count: self.outbound.len(),
            });
        }
        self.begin = None;
        self.execute_step(&timestep)
    }

    /// Step every local agent, routing updates to their stores as they
    /// are produced. Per-store FIFO order is preserved because each
    /// update is sent before the next agent steps.
    fn execute_step(&mut self, timestep: &Timestep) -> Result<(), RunnerError> {
        let mut counts: BTreeMap<StoreId, usize> = BTreeMap::new();
        self.profiles.clear();
        self.dead.clear();

        for (agent_id, agent) in &mut self.agents {
            let started = Instant::now();
            let updates = agent.step(timestep);
            let step_seconds = started.elapsed().as_secs_f64();
            let n_updates = u32::try_from(updates.len()).unwrap_or(u32::MAX);

            for update in updates {
                let store = update.store.clone();
                let slot = counts.entry(store.clone()).or_insert(0);
                *slot = slot.saturating_add(1);
                self.fabric.send(
                    Address::Runner(self.rank),
                    &Address::Store(store),
                    Message::HandleUpdate { update },
                )?;
            }

            let is_alive = agent.is_alive();
            if !is_alive {
                self.dead.push(*agent_id);
            }
            self.profiles.push(StepProfile {
                agent_id: *agent_id,
                rank: self.rank,
                step_seconds,
                memory_bytes: agent.memory_usage(),
                n_updates,
                is_alive,
            });
        }

        debug!(
            rank = %self.rank,
            step = timestep.step,
            agents = self.profiles.len(),
            updates = counts.values().sum::<usize>(),
            "shard stepped"
        );

        self.update_barrier = Barrier::new(counts);
        if self.update_barrier.is_closed() {
            self.finish_step()?;
        }
        Ok(())
    }

    /// Report profiles to the coordinator and reset per-step state.
    fn finish_step(&mut self) -> Result<(), RunnerError> {
        for profile in std::mem::take(&mut self.profiles) {
            self.fabric.send(
                self.address(),
                &Address::Coordinator,
                Message::AgentStepProfile { profile },
            )?;
        }
        self.fabric.send(
            self.address(),
            &Address::Coordinator,
            Message::AgentStepProfileDone { rank: self.rank },
        )?;
        for agent_id in std::mem::take(&mut self.dead) {
            self.agents.remove(&agent_id);
        }
        self.timestep = None;
        self.update_barrier = Barrier::default();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockstep_fabric::LocalFabric;
    use lockstep_types::StateUpdate;

    use super::*;

    /// Test agent that writes one value per step and can be born dying.
    struct Probe {
        agent_id: AgentId,
        store: StoreId,
        steps: u64,
        lifespan: u64,
    }

    impl Agent for Probe {
        fn step(&mut self, timestep: &Timestep) -> Vec<StateUpdate> {
            self.steps = self.steps.saturating_add(1);
            vec![StateUpdate {
                store: self.store.clone(),
                key: self.agent_id.to_string(),
                value: serde_json::json!(self.steps),
                agent_id: self.agent_id,
                step: timestep.step,
            }]
        }

        fn is_alive(&self) -> bool {
            self.steps < self.lifespan
        }

        fn snapshot(&self) -> Result<AgentConstructor, AgentError> {
            Ok(AgentConstructor::new(
                self.agent_id,
                "probe",
                serde_json::json!({ "steps": self.steps, "lifespan": self.lifespan }),
            ))
        }
    }

    fn registry() -> Arc<AgentRegistry> {
        let mut registry = AgentRegistry::new();
        registry.register("probe", |ctor: &AgentConstructor| {
            let steps = ctor.state.get("steps").and_then(serde_json::Value::as_u64);
            let lifespan = ctor
                .state
                .get("lifespan")
                .and_then(serde_json::Value::as_u64);
            Ok(Box::new(Probe {
                agent_id: ctor.agent_id,
                store: StoreId::new("s"),
                steps: steps.unwrap_or(0),
                lifespan: lifespan.unwrap_or(u64::MAX),
            }) as Box<dyn Agent>)
        });
        Arc::new(registry)
    }

    #[allow(clippy::cast_precision_loss)]
    fn timestep(step: u64) -> Timestep {
        Timestep {
            step,
            start: step as f64,
            end: (step as f64) + 1.0,
        }
    }

    fn constructor(lifespan: u64) -> AgentConstructor {
        AgentConstructor::new(
            AgentId::new(),
            "probe",
            serde_json::json!({ "steps": 0, "lifespan": lifespan }),
        )
    }

    struct Rig {
        runner: Runner,
        coordinator: mpsc::UnboundedReceiver<Envelope>,
        store: mpsc::UnboundedReceiver<Envelope>,
    }

    fn rig() -> Rig {
        let fabric = Arc::new(LocalFabric::new());
        let _driver = fabric.register(Address::Driver).unwrap();
        let coordinator = fabric.register(Address::Coordinator).unwrap();
        let store = fabric.register(Address::Store(StoreId::new("s"))).unwrap();
        let runner = Runner::new(
            RunnerRank(0),
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            registry(),
        );
        Rig {
            runner,
            coordinator,
            store,
        }
    }

    fn feed(rig: &mut Rig, from: Address, message: Message) {
        rig.runner.handle(Envelope { from, message }).unwrap();
    }

    fn drain(inbox: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(envelope) = inbox.try_recv() {
            out.push(envelope.message);
        }
        out
    }

    #[tokio::test]
    async fn steps_agents_and_reports_profiles() {
        let mut rig = rig();
        feed(
            &mut rig,
            Address::Coordinator,
            Message::CreateAgent { constructor: constructor(u64::MAX) },
        );
        assert!(matches!(
            drain(&mut rig.coordinator).as_slice(),
            [Message::CreateAgentDone { .. }]
        ));

        feed(&mut rig, Address::Driver, Message::Step { timestep: timestep(0) });
        feed(
            &mut rig,
            Address::Coordinator,
            Message::BeginStep { timestep: timestep(0) },
        );

        // Stepping produced one update, routed immediately.
        let to_store = drain(&mut rig.store);
        assert!(matches!(to_store.as_slice(), [Message::HandleUpdate { .. }]));
        // The runner's step is not complete until the store acknowledges.
        assert!(drain(&mut rig.coordinator).is_empty());

        feed(
            &mut rig,
            Address::Store(StoreId::new("s")),
            Message::HandleUpdateDone { store: StoreId::new("s") },
        );
        let messages = drain(&mut rig.coordinator);
        assert!(matches!(
            messages.as_slice(),
            [
                Message::AgentStepProfile { .. },
                Message::AgentStepProfileDone { .. }
            ]
        ));
    }

    #[tokio::test]
    async fn begin_step_arriving_first_is_buffered() {
        let mut rig = rig();
        feed(
            &mut rig,
            Address::Coordinator,
            Message::BeginStep { timestep: timestep(0) },
        );
        // Nothing happens until the driver's announcement lands.
        assert!(drain(&mut rig.coordinator).is_empty());

        feed(&mut rig, Address::Driver, Message::Step { timestep: timestep(0) });
        // No agents, no updates: the step completes immediately.
        let messages = drain(&mut rig.coordinator);
        assert!(matches!(
            messages.as_slice(),
            [Message::AgentStepProfileDone { .. }]
        ));
    }

    #[tokio::test]
    async fn dead_agents_are_dropped_after_their_last_step() {
        let mut rig = rig();
        feed(
            &mut rig,
            Address::Coordinator,
            Message::CreateAgent { constructor: constructor(1) },
        );
        let _ = drain(&mut rig.coordinator);

        feed(&mut rig, Address::Driver, Message::Step { timestep: timestep(0) });
        feed(
            &mut rig,
            Address::Coordinator,
            Message::BeginStep { timestep: timestep(0) },
        );
        feed(
            &mut rig,
            Address::Store(StoreId::new("s")),
            Message::HandleUpdateDone { store: StoreId::new("s") },
        );
        let messages = drain(&mut rig.coordinator);
        let dead_profile = messages.iter().any(|m| {
            matches!(m, Message::AgentStepProfile { profile } if !profile.is_alive)
        });
        assert!(dead_profile);
        assert!(rig.runner.agents.is_empty());
    }

    #[tokio::test]
    async fn duplicate_create_is_fatal() {
        let mut rig = rig();
        let ctor = constructor(u64::MAX);
        feed(
            &mut rig,
            Address::Coordinator,
            Message::CreateAgent { constructor: ctor.clone() },
        );
        let err = rig
            .runner
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::CreateAgent { constructor: ctor },
            })
            .unwrap_err();
        assert!(matches!(err, RunnerError::DuplicateAgent { .. }));
    }

    #[tokio::test]
    async fn migration_handshake_moves_ownership() {
        let fabric = Arc::new(LocalFabric::new());
        let _driver = fabric.register(Address::Driver).unwrap();
        let mut coordinator = fabric.register(Address::Coordinator).unwrap();
        let mut source_inbox = fabric.register(Address::Runner(RunnerRank(0))).unwrap();
        let mut dest_inbox = fabric.register(Address::Runner(RunnerRank(1))).unwrap();

        let shared = registry();
        let mut source = Runner::new(
            RunnerRank(0),
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            Arc::clone(&shared),
        );
        let mut dest = Runner::new(
            RunnerRank(1),
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            shared,
        );

        let ctor = constructor(u64::MAX);
        let agent_id = ctor.agent_id;
        source
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::CreateAgent { constructor: ctor },
            })
            .unwrap();
        let _ = coordinator.try_recv().unwrap();

        // Command the move; the source opens the transfer but keeps its
        // copy until the destination acknowledges.
        source
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::MoveAgent { agent_id, dest: RunnerRank(1) },
            })
            .unwrap();
        assert!(source.agents.contains_key(&agent_id));

        let offer = dest_inbox.try_recv().unwrap();
        assert!(matches!(offer.message, Message::ReceiveAgent { .. }));
        dest.handle(offer).unwrap();
        assert!(dest.agents.contains_key(&agent_id));

        let ack = source_inbox.try_recv().unwrap();
        assert!(matches!(ack.message, Message::ReceiveAgentDone { .. }));
        source.handle(ack).unwrap();

        // Ownership has moved and the coordinator has been told.
        assert!(!source.agents.contains_key(&agent_id));
        let done = coordinator.try_recv().unwrap();
        assert!(matches!(done.message, Message::MoveAgentDone { rank: RunnerRank(0) }));
    }

    #[tokio::test]
    async fn store_ack_from_the_wrong_sender_is_fatal() {
        let mut rig = rig();
        let err = rig
            .runner
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::HandleUpdateDone { store: StoreId::new("s") },
            })
            .unwrap_err();
        assert!(matches!(err, RunnerError::AckSenderMismatch { .. }));
    }

    #[tokio::test]
    async fn transfer_ack_from_the_wrong_peer_is_fatal() {
        let fabric = Arc::new(LocalFabric::new());
        let _driver = fabric.register(Address::Driver).unwrap();
        let mut coordinator = fabric.register(Address::Coordinator).unwrap();
        let _dest = fabric.register(Address::Runner(RunnerRank(1))).unwrap();
        let mut source = Runner::new(
            RunnerRank(0),
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            registry(),
        );

        let ctor = constructor(u64::MAX);
        let agent_id = ctor.agent_id;
        source
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::CreateAgent { constructor: ctor },
            })
            .unwrap();
        let _ = coordinator.try_recv().unwrap();
        source
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::MoveAgent { agent_id, dest: RunnerRank(1) },
            })
            .unwrap();

        // Only the destination of the open transfer may acknowledge it.
        let err = source
            .handle(Envelope {
                from: Address::Runner(RunnerRank(2)),
                message: Message::ReceiveAgentDone { agent_id },
            })
            .unwrap_err();
        assert!(matches!(err, RunnerError::AckSenderMismatch { .. }));
        assert!(source.agents.contains_key(&agent_id));
    }

    #[tokio::test]
    async fn move_of_unknown_agent_is_fatal() {
        let mut rig = rig();
        let err = rig
            .runner
            .handle(Envelope {
                from: Address::Coordinator,
                message: Message::MoveAgent {
                    agent_id: AgentId::new(),
                    dest: RunnerRank(1),
                },
            })
            .unwrap_err();
        assert!(matches!(err, RunnerError::AgentNotLocal { .. }));
    }
}
