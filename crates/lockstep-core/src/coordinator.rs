//! The per-step orchestrator.
//!
//! The coordinator owns no agents. It collects the step's newborn
//! constructors, asks the balancer for newborn placement and migrations,
//! fans out creation and migration commands, releases the runners into
//! local stepping once both barriers close, and absorbs step profiles
//! into the load ledger. When the last profile barrier closes it reports
//! `coordinator_done` to the driver and returns to idle for the next
//! step.
//!
//! Every handler is synchronous; the async surface is only the inbox
//! loop. A message that is illegal in the current phase is a protocol
//! violation and aborts the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use lockstep_balance::{BalanceError, LoadBalancer};
use lockstep_fabric::{Address, Barrier, BarrierError, Envelope, Fabric, FabricError, Message};
use lockstep_types::{
    AgentConstructor, AgentId, LoadEstimate, RunnerRank, StepProfile, Timestep,
};

use crate::ledger::LoadLedger;

/// Where the coordinator is within the step protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Between steps, waiting for the driver's `step`.
    Idle,
    /// Collecting the step's newborn constructors.
    CollectingConstructors,
    /// Running the balancer over the collected batch.
    Placing,
    /// Waiting for the creation barrier to close.
    Creating,
    /// Waiting for the migration barrier to close.
    Migrating,
    /// Runners are stepping; waiting for the profile barrier to close.
    AwaitingCompletion,
    /// Shut down; no further messages are legal.
    Done,
}

impl core::fmt::Display for Phase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CollectingConstructors => "collecting_constructors",
            Self::Placing => "placing",
            Self::Creating => "creating",
            Self::Migrating => "migrating",
            Self::AwaitingCompletion => "awaiting_completion",
            Self::Done => "done",
        };
        write!(f, "{name}")
    }
}

/// Errors that abort the coordinator, and with it the run.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// A message arrived that is not legal in the current phase.
    #[error("unexpected {kind} from {from} in phase {phase}")]
    Protocol {
        /// Kind of the offending message.
        kind: &'static str,
        /// Its sender.
        from: Address,
        /// The phase the coordinator was in.
        phase: Phase,
    },

    /// An acknowledgment whose sender does not match the rank it names.
    #[error("{kind} from {from} claims to be {claimed}")]
    AckSenderMismatch {
        /// Kind of the offending acknowledgment.
        kind: &'static str,
        /// The envelope's actual sender.
        from: Address,
        /// The identity the payload claims.
        claimed: Address,
    },

    /// A barrier recorded an arrival that violates the protocol.
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    /// The balancer rejected its inputs.
    #[error(transparent)]
    Balance(#[from] BalanceError),

    /// The balancer assigned an agent to a rank outside the runner set.
    #[error("balancer assigned agent {agent_id} to unknown runner {rank}")]
    UnknownPlacement {
        /// The misplaced agent.
        agent_id: AgentId,
        /// The rank that does not exist.
        rank: RunnerRank,
    },

    /// The balancer's decision omitted a requested agent.
    #[error("balancer returned no placement for agent {agent_id}")]
    UnplacedAgent {
        /// The agent the decision skipped.
        agent_id: AgentId,
    },

    /// A handler needed the active timestep but no step is in progress.
    #[error("no active timestep in phase {phase}")]
    NoActiveStep {
        /// The phase the coordinator was in.
        phase: Phase,
    },

    /// A send over the fabric failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),
}

/// Per-step counters reported in the completion log line.
#[derive(Debug, Default, Clone, Copy)]
struct StepStats {
    created: usize,
    moved: usize,
    died: usize,
    balancing_seconds: f64,
}

/// The per-step orchestrator state machine.
pub struct Coordinator {
    fabric: Arc<dyn Fabric>,
    runners: Vec<RunnerRank>,
    balancer: Box<dyn LoadBalancer>,
    ledger: LoadLedger,
    phase: Phase,
    timestep: Option<Timestep>,
    /// Constructors collected this step, awaiting placement.
    pending: Vec<(AgentConstructor, LoadEstimate)>,
    /// Migrations decided this step, fanned out after creation closes.
    planned_moves: Vec<(AgentId, RunnerRank, RunnerRank)>,
    create_barrier: Barrier<RunnerRank>,
    migrate_barrier: Barrier<RunnerRank>,
    profile_barrier: Barrier<RunnerRank>,
    stats: StepStats,
    created_total: u64,
    died_total: u64,
}

impl Coordinator {
    /// Create a coordinator over the given runner ranks.
    pub fn new(
        fabric: Arc<dyn Fabric>,
        runners: Vec<RunnerRank>,
        balancer: Box<dyn LoadBalancer>,
    ) -> Self {
        let ledger = LoadLedger::new(runners.clone());
        Self {
            fabric,
            runners,
            balancer,
            ledger,
            phase: Phase::Idle,
            timestep: None,
            pending: Vec::new(),
            planned_moves: Vec::new(),
            create_barrier: Barrier::default(),
            migrate_barrier: Barrier::default(),
            profile_barrier: Barrier::default(),
            stats: StepStats::default(),
            created_total: 0,
            died_total: 0,
        }
    }

    /// Run the coordinator until shutdown.
    ///
    /// On a fatal error a `fault` is sent to the driver before the error
    /// is returned, so the driver never stalls silently.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`CoordinatorError`] after reporting it.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<(), CoordinatorError> {
        info!(
            runners = self.runners.len(),
            balancer = self.balancer.name(),
            "coordinator started"
        );
        while let Some(envelope) = inbox.recv().await {
            match self.handle(envelope) {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    let _ = self.fabric.send(
                        Address::Coordinator,
                        &Address::Driver,
                        Message::Fault {
                            participant: Address::Coordinator,
                            detail: e.to_string(),
                        },
                    );
                    return Err(e);
                }
            }
        }
        info!(
            created = self.created_total,
            died = self.died_total,
            "coordinator stopped"
        );
        Ok(())
    }

    /// Dispatch one envelope. Returns `Ok(false)` on shutdown.
    fn handle(&mut self, envelope: Envelope) -> Result<bool, CoordinatorError> {
        let Envelope { from, message } = envelope;
        match (self.phase, message) {
            (Phase::Idle, Message::Step { timestep }) => self.on_step(timestep),
            (Phase::CollectingConstructors, Message::NewAgent { constructor, load }) => {
                self.pending.push((constructor, load));
                Ok(())
            }
            (Phase::CollectingConstructors, Message::NewAgentsDone) => self.place(),
            (Phase::Creating, Message::CreateAgentDone { rank }) => {
                verify_runner_ack("create_agent_done", &from, rank)?;
                if self.create_barrier.arrive(&rank)? {
                    self.start_migrations()?;
                }
                Ok(())
            }
            (Phase::Migrating, Message::MoveAgentDone { rank }) => {
                verify_runner_ack("move_agent_done", &from, rank)?;
                if self.migrate_barrier.arrive(&rank)? {
                    self.begin_stepping()?;
                }
                Ok(())
            }
            (Phase::AwaitingCompletion, Message::AgentStepProfile { profile }) => {
                verify_runner_ack("agent_step_profile", &from, profile.rank)?;
                self.on_profile(&profile)
            }
            (Phase::AwaitingCompletion, Message::AgentStepProfileDone { rank }) => {
                verify_runner_ack("agent_step_profile_done", &from, rank)?;
                if self.profile_barrier.arrive(&rank)? {
                    self.finish_step()?;
                }
                Ok(())
            }
            (_, Message::Shutdown) => {
                self.phase = Phase::Done;
                return Ok(false);
            }
            (phase, other) => {
                return Err(CoordinatorError::Protocol {
                    kind: other.kind(),
                    from,
                    phase,
                });
            }
        }?;
        Ok(true)
    }

    /// Open a new step and start collecting constructors.
    fn on_step(&mut self, timestep: Timestep) -> Result<(), CoordinatorError> {
        debug!(step = timestep.step, "step opened");
        self.timestep = Some(timestep);
        self.stats = StepStats::default();
        self.phase = Phase::CollectingConstructors;
        Ok(())
    }

    /// Run the balancer over the collected batch and fan out creation.
    ///
    /// Newborns are placed first against the ledger snapshot; their
    /// assignments are charged onto a working copy before the rebalancing
    /// pass, so migrations account for the load just added.
    fn place(&mut self) -> Result<(), CoordinatorError> {
        self.phase = Phase::Placing;
        let started = Instant::now();

        let pending_loads: Vec<(AgentId, LoadEstimate)> = self
            .pending
            .iter()
            .map(|(constructor, load)| (constructor.agent_id, *load))
            .collect();
        let inputs = self.ledger.decision_inputs(&pending_loads);

        let newborn_decision = self.balancer.decide(&inputs.newborn, &inputs.snapshot)?;
        let mut charged = inputs.snapshot;
        for request in &inputs.newborn {
            let rank = newborn_decision
                .rank_of(request.agent_id)
                .ok_or(CoordinatorError::UnplacedAgent {
                    agent_id: request.agent_id,
                })?;
            if !self.runners.contains(&rank) {
                return Err(CoordinatorError::UnknownPlacement {
                    agent_id: request.agent_id,
                    rank,
                });
            }
            charged.add(rank, request.weight);
        }

        let rebalance_decision = self.balancer.decide(&inputs.rebalance, &charged)?;
        self.planned_moves.clear();
        for request in &inputs.rebalance {
            let target = rebalance_decision
                .rank_of(request.agent_id)
                .ok_or(CoordinatorError::UnplacedAgent {
                    agent_id: request.agent_id,
                })?;
            if !self.runners.contains(&target) {
                return Err(CoordinatorError::UnknownPlacement {
                    agent_id: request.agent_id,
                    rank: target,
                });
            }
            if let Some(current) = request.current
                && current != target
            {
                self.planned_moves.push((request.agent_id, current, target));
            }
        }
        self.stats.balancing_seconds = started.elapsed().as_secs_f64();
        self.stats.created = self.pending.len();
        self.stats.moved = self.planned_moves.len();
        let batch = u64::try_from(self.pending.len()).unwrap_or(u64::MAX);
        self.created_total = self.created_total.saturating_add(batch);

        let mut counts: BTreeMap<RunnerRank, usize> = BTreeMap::new();
        for (constructor, load) in std::mem::take(&mut self.pending) {
            let rank = newborn_decision
                .rank_of(constructor.agent_id)
                .ok_or(CoordinatorError::UnplacedAgent {
                    agent_id: constructor.agent_id,
                })?;
            self.ledger.admit(constructor.agent_id, rank, &load);
            let slot = counts.entry(rank).or_insert(0);
            *slot = slot.saturating_add(1);
            self.fabric.send(
                Address::Coordinator,
                &Address::Runner(rank),
                Message::CreateAgent { constructor },
            )?;
        }
        self.create_barrier = Barrier::new(counts);
        self.phase = Phase::Creating;
        if self.create_barrier.is_closed() {
            self.start_migrations()?;
        }
        Ok(())
    }

    /// Fan out the planned migrations to their source runners.
    fn start_migrations(&mut self) -> Result<(), CoordinatorError> {
        self.phase = Phase::Migrating;
        let mut counts: BTreeMap<RunnerRank, usize> = BTreeMap::new();
        for (agent_id, source, dest) in std::mem::take(&mut self.planned_moves) {
            self.ledger.relocate(&agent_id, dest);
            let slot = counts.entry(source).or_insert(0);
            *slot = slot.saturating_add(1);
            self.fabric.send(
                Address::Coordinator,
                &Address::Runner(source),
                Message::MoveAgent { agent_id, dest },
            )?;
        }
        self.migrate_barrier = Barrier::new(counts);
        if self.migrate_barrier.is_closed() {
            self.begin_stepping()?;
        }
        Ok(())
    }

    /// Release every runner into local stepping.
    ///
    /// Runners cannot observe the global creation and migration barriers,
    /// so the coordinator tells them explicitly that the shard layout for
    /// this step is final.
    fn begin_stepping(&mut self) -> Result<(), CoordinatorError> {
        let timestep = *self.current_timestep()?;
        for &rank in &self.runners {
            self.fabric.send(
                Address::Coordinator,
                &Address::Runner(rank),
                Message::BeginStep { timestep },
            )?;
        }
        self.profile_barrier = Barrier::expecting(self.runners.iter().copied());
        self.phase = Phase::AwaitingCompletion;
        Ok(())
    }

    /// Absorb one step profile into the ledger.
    ///
    /// Dead agents are retired so the next step's snapshot no longer
    /// carries their load; the owning runner drops them locally.
    fn on_profile(&mut self, profile: &StepProfile) -> Result<(), CoordinatorError> {
        if profile.is_alive {
            let timestep = *self.current_timestep()?;
            self.ledger.observe(profile, &timestep);
        } else {
            self.ledger.retire(&profile.agent_id);
            self.stats.died = self.stats.died.saturating_add(1);
            self.died_total = self.died_total.saturating_add(1);
        }
        Ok(())
    }

    /// Close out the step and report completion to the driver.
    fn finish_step(&mut self) -> Result<(), CoordinatorError> {
        let timestep = *self.current_timestep()?;
        info!(
            step = timestep.step,
            agents = self.ledger.len(),
            created = self.stats.created,
            moved = self.stats.moved,
            died = self.stats.died,
            balancing_seconds = self.stats.balancing_seconds,
            "step coordinated"
        );
        self.fabric.send(
            Address::Coordinator,
            &Address::Driver,
            Message::CoordinatorDone {
                step: timestep.step,
            },
        )?;
        self.timestep = None;
        self.phase = Phase::Idle;
        Ok(())
    }

    fn current_timestep(&self) -> Result<&Timestep, CoordinatorError> {
        self.timestep
            .as_ref()
            .ok_or(CoordinatorError::NoActiveStep { phase: self.phase })
    }
}

/// Reject acknowledgments whose envelope sender is not the runner the
/// payload names. Barrier bookkeeping is keyed by the payload's rank, so
/// an impersonated ack would otherwise close another runner's slot.
fn verify_runner_ack(
    kind: &'static str,
    from: &Address,
    rank: RunnerRank,
) -> Result<(), CoordinatorError> {
    let claimed = Address::Runner(rank);
    if *from == claimed {
        Ok(())
    } else {
        Err(CoordinatorError::AckSenderMismatch {
            kind,
            from: from.clone(),
            claimed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockstep_balance::GreedyBalancer;
    use lockstep_fabric::LocalFabric;

    use super::*;

    #[allow(clippy::cast_precision_loss)]
    fn timestep(step: u64) -> Timestep {
        Timestep {
            step,
            start: step as f64,
            end: (step as f64) + 1.0,
        }
    }

    fn constructor() -> AgentConstructor {
        AgentConstructor::new(AgentId::new(), "walker", serde_json::json!({}))
    }

    fn estimate() -> LoadEstimate {
        LoadEstimate {
            step_seconds: 1.0,
            memory_bytes: 1.0,
        }
    }

    struct Rig {
        coordinator: Coordinator,
        driver: mpsc::UnboundedReceiver<Envelope>,
        runners: Vec<mpsc::UnboundedReceiver<Envelope>>,
    }

    /// Wire a coordinator plus `n` runner inboxes on a local fabric, and
    /// drive its handlers synchronously from the test body.
    fn rig(n: u32) -> Rig {
        let fabric = Arc::new(LocalFabric::new());
        let driver = fabric.register(Address::Driver).unwrap();
        let mut runners = Vec::new();
        let mut ranks = Vec::new();
        for rank in 0..n {
            runners.push(fabric.register(Address::Runner(RunnerRank(rank))).unwrap());
            ranks.push(RunnerRank(rank));
        }
        let coordinator = Coordinator::new(
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            ranks,
            Box::new(GreedyBalancer::new()),
        );
        Rig {
            coordinator,
            driver,
            runners,
        }
    }

    fn feed(rig: &mut Rig, from: Address, message: Message) {
        rig.coordinator
            .handle(Envelope { from, message })
            .unwrap();
    }

    fn drain(inbox: &mut mpsc::UnboundedReceiver<Envelope>) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(envelope) = inbox.try_recv() {
            out.push(envelope.message);
        }
        out
    }

    #[tokio::test]
    async fn places_newborns_and_walks_the_barriers() {
        let mut rig = rig(2);

        feed(
            &mut rig,
            Address::Driver,
            Message::Step { timestep: timestep(0) },
        );
        for _ in 0..4 {
            feed(
                &mut rig,
                Address::Driver,
                Message::NewAgent {
                    constructor: constructor(),
                    load: estimate(),
                },
            );
        }
        feed(&mut rig, Address::Driver, Message::NewAgentsDone);

        // Greedy placement spreads equal-weight newborns evenly.
        let mut per_rank = Vec::new();
        for (rank, inbox) in rig.runners.iter_mut().enumerate() {
            let creates = drain(inbox)
                .into_iter()
                .filter(|m| matches!(m, Message::CreateAgent { .. }))
                .count();
            per_rank.push((u32::try_from(rank).unwrap(), creates));
        }
        assert_eq!(per_rank.iter().map(|(_, n)| n).sum::<usize>(), 4);
        assert!(per_rank.iter().all(|&(_, n)| n == 2));
        for &(rank, creates) in &per_rank {
            for _ in 0..creates {
                feed(
                    &mut rig,
                    Address::Runner(RunnerRank(rank)),
                    Message::CreateAgentDone { rank: RunnerRank(rank) },
                );
            }
        }

        // First step has no prior load, so no migrations: the creation
        // barrier closing releases the runners straight into stepping.
        for inbox in &mut rig.runners {
            let messages = drain(inbox);
            assert!(messages
                .iter()
                .any(|m| matches!(m, Message::BeginStep { .. })));
            assert!(!messages.iter().any(|m| matches!(m, Message::MoveAgent { .. })));
        }

        // Profiles fan in; the last done closes the step.
        for rank in 0..2u32 {
            feed(
                &mut rig,
                Address::Runner(RunnerRank(rank)),
                Message::AgentStepProfileDone {
                    rank: RunnerRank(rank),
                },
            );
        }
        let done = drain(&mut rig.driver);
        assert!(done
            .iter()
            .any(|m| matches!(m, Message::CoordinatorDone { step: 0 })));
    }

    #[tokio::test]
    async fn empty_batch_skips_straight_to_stepping() {
        let mut rig = rig(1);
        feed(
            &mut rig,
            Address::Driver,
            Message::Step { timestep: timestep(0) },
        );
        feed(&mut rig, Address::Driver, Message::NewAgentsDone);

        let messages = drain(rig.runners.get_mut(0).unwrap());
        assert!(messages
            .iter()
            .any(|m| matches!(m, Message::BeginStep { .. })));
    }

    #[tokio::test]
    async fn dead_profile_retires_the_agent() {
        let mut rig = rig(1);
        let ctor = constructor();
        let agent_id = ctor.agent_id;

        feed(
            &mut rig,
            Address::Driver,
            Message::Step { timestep: timestep(0) },
        );
        feed(
            &mut rig,
            Address::Driver,
            Message::NewAgent {
                constructor: ctor,
                load: estimate(),
            },
        );
        feed(&mut rig, Address::Driver, Message::NewAgentsDone);
        feed(
            &mut rig,
            Address::Runner(RunnerRank(0)),
            Message::CreateAgentDone { rank: RunnerRank(0) },
        );
        feed(
            &mut rig,
            Address::Runner(RunnerRank(0)),
            Message::AgentStepProfile {
                profile: StepProfile {
                    agent_id,
                    rank: RunnerRank(0),
                    step_seconds: 0.0,
                    memory_bytes: 0.0,
                    n_updates: 0,
                    is_alive: false,
                },
            },
        );
        feed(
            &mut rig,
            Address::Runner(RunnerRank(0)),
            Message::AgentStepProfileDone { rank: RunnerRank(0) },
        );

        assert!(rig.coordinator.ledger.is_empty());
        let _ = drain(&mut rig.driver);

        // The next step's placement sees no residual load from the dead
        // agent, so a fresh newborn lands without migrations.
        feed(
            &mut rig,
            Address::Driver,
            Message::Step { timestep: timestep(1) },
        );
        feed(
            &mut rig,
            Address::Driver,
            Message::NewAgent {
                constructor: constructor(),
                load: estimate(),
            },
        );
        feed(&mut rig, Address::Driver, Message::NewAgentsDone);
        let messages = drain(rig.runners.get_mut(0).unwrap());
        assert!(!messages.iter().any(|m| matches!(m, Message::MoveAgent { .. })));
    }

    #[tokio::test]
    async fn out_of_phase_message_is_a_protocol_violation() {
        let mut rig = rig(1);
        let err = rig
            .coordinator
            .handle(Envelope {
                from: Address::Runner(RunnerRank(0)),
                message: Message::CreateAgentDone { rank: RunnerRank(0) },
            })
            .unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Protocol { phase: Phase::Idle, .. }
        ));
    }

    #[tokio::test]
    async fn ack_claiming_another_runner_is_rejected() {
        let mut rig = rig(2);
        feed(
            &mut rig,
            Address::Driver,
            Message::Step { timestep: timestep(0) },
        );
        feed(
            &mut rig,
            Address::Driver,
            Message::NewAgent {
                constructor: constructor(),
                load: estimate(),
            },
        );
        feed(&mut rig, Address::Driver, Message::NewAgentsDone);

        // Barrier slots are keyed by the rank in the payload, so an ack
        // relayed under another runner's name must not close them.
        let err = rig
            .coordinator
            .handle(Envelope {
                from: Address::Runner(RunnerRank(1)),
                message: Message::CreateAgentDone { rank: RunnerRank(0) },
            })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::AckSenderMismatch { .. }));
    }

    #[tokio::test]
    async fn fault_reaches_the_driver_before_the_task_fails() {
        // Drive the run loop with one illegal message and observe the
        // fault on the driver inbox.
        let fabric = Arc::new(LocalFabric::new());
        let mut driver = fabric.register(Address::Driver).unwrap();
        let coordinator_rx = fabric.register(Address::Coordinator).unwrap();
        let coordinator = Coordinator::new(
            Arc::clone(&fabric) as Arc<dyn Fabric>,
            vec![RunnerRank(0)],
            Box::new(GreedyBalancer::new()),
        );
        let handle = tokio::spawn(coordinator.run(coordinator_rx));
        fabric
            .send(
                Address::Runner(RunnerRank(0)),
                &Address::Coordinator,
                Message::MoveAgentDone { rank: RunnerRank(0) },
            )
            .unwrap();

        let fault = driver.recv().await.unwrap();
        assert!(matches!(fault.message, Message::Fault { .. }));
        assert!(handle.await.unwrap().is_err());
    }
}
