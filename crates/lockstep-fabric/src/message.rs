//! Protocol addresses, messages, and envelopes.
//!
//! All coordination in a step travels as [`Message`] values between
//! [`Address`]es. Each command/acknowledgment pair below forms one
//! fan-out/fan-in exchange closed by a [`Barrier`]; the barrier ordering
//! per step is:
//!
//! 1. creation barrier (`CreateAgent` / `CreateAgentDone`)
//! 2. migration barrier (`MoveAgent` / `MoveAgentDone`, with the
//!    peer-to-peer `ReceiveAgent` / `ReceiveAgentDone` handshake inside)
//! 3. step barrier (`HandleUpdate` / `HandleUpdateDone` per runner, then
//!    `AgentStepProfile` / `AgentStepProfileDone` at the coordinator)
//! 4. flush barrier (`Flush` / `StoreFlushDone` at the driver)
//!
//! [`Barrier`]: crate::barrier::Barrier

use serde::{Deserialize, Serialize};

use lockstep_types::{
    AgentConstructor, AgentId, LoadEstimate, RunnerRank, StateUpdate, StepProfile, StoreId,
    Timestep,
};

/// Address of a participant on the fabric.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Address {
    /// The outer driver that sequences timesteps.
    Driver,
    /// The per-step orchestrator.
    Coordinator,
    /// A runner process, by rank.
    Runner(RunnerRank),
    /// A state store, by name.
    Store(StoreId),
}

impl Address {
    /// Render the address as a transport subject fragment, e.g. for NATS
    /// subjects (`runner.3`, `store.position`).
    pub fn subject(&self) -> String {
        match self {
            Self::Driver => "driver".to_owned(),
            Self::Coordinator => "coordinator".to_owned(),
            Self::Runner(rank) => format!("runner.{rank}"),
            Self::Store(store) => format!("store.{store}"),
        }
    }
}

impl core::fmt::Display for Address {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.subject())
    }
}

/// A protocol message.
///
/// The doc comment on each variant names its sender and receiver. Every
/// variant is serializable; on a real transport the whole envelope goes
/// over the wire as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// Driver to coordinator and to every runner: a new step begins.
    Step {
        /// The timestep being started.
        timestep: Timestep,
    },

    /// Population to coordinator: an agent to be placed this step.
    NewAgent {
        /// Descriptor for the newborn agent.
        constructor: AgentConstructor,
        /// Initial load estimate used until real profiles arrive.
        load: LoadEstimate,
    },

    /// Population to coordinator: the constructor batch for this step is
    /// complete.
    NewAgentsDone,

    /// Coordinator to a runner: instantiate this agent locally.
    CreateAgent {
        /// Descriptor for the agent to instantiate.
        constructor: AgentConstructor,
    },

    /// Runner to coordinator: one `CreateAgent` command has been applied.
    CreateAgentDone {
        /// The acknowledging runner.
        rank: RunnerRank,
    },

    /// Coordinator to the source runner: hand this agent to another rank.
    MoveAgent {
        /// The agent to relinquish.
        agent_id: AgentId,
        /// The destination runner.
        dest: RunnerRank,
    },

    /// Source runner to coordinator: one commanded migration has fully
    /// completed (the destination acknowledged and the local copy is gone).
    MoveAgentDone {
        /// The acknowledging source runner.
        rank: RunnerRank,
    },

    /// Source runner to destination runner: an agent in transfer form.
    ReceiveAgent {
        /// Reconstruction descriptor serialized from the live agent.
        transfer: AgentConstructor,
    },

    /// Destination runner to source runner: the agent has been
    /// reconstructed and is now owned by the destination.
    ReceiveAgentDone {
        /// The agent whose transfer completed.
        agent_id: AgentId,
    },

    /// Coordinator to every runner: all creation and migration barriers
    /// for the step have closed; begin local agent stepping.
    BeginStep {
        /// The timestep being executed.
        timestep: Timestep,
    },

    /// Runner to a store: buffer this update.
    HandleUpdate {
        /// The update to buffer.
        update: StateUpdate,
    },

    /// Store to a runner: one update has been received and buffered.
    /// Acknowledges receipt, not persistence.
    HandleUpdateDone {
        /// The acknowledging store.
        store: StoreId,
    },

    /// Runner to coordinator: telemetry for one agent's step.
    AgentStepProfile {
        /// The profile record.
        profile: StepProfile,
    },

    /// Runner to coordinator: local stepping and update routing for this
    /// step are complete.
    AgentStepProfileDone {
        /// The reporting runner.
        rank: RunnerRank,
    },

    /// Coordinator to driver: every coordinator barrier for the step has
    /// closed.
    CoordinatorDone {
        /// The completed logical step.
        step: u64,
    },

    /// Driver to a store: the update set for this step is closed; commit
    /// the buffered cache durably.
    Flush {
        /// The logical step being flushed.
        step: u64,
    },

    /// Store to driver: the flush has durably committed.
    StoreFlushDone {
        /// The acknowledging store.
        store: StoreId,
        /// Wall-clock seconds the flush took.
        flush_seconds: f64,
    },

    /// Any participant to the driver: a fatal error occurred. The current
    /// step cannot complete and the run must abort.
    Fault {
        /// The failing participant.
        participant: Address,
        /// Rendered error description.
        detail: String,
    },

    /// Driver to every participant: the run is over, exit the task loop.
    Shutdown,
}

impl Message {
    /// Short name of the message kind, for logging.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Step { .. } => "step",
            Self::NewAgent { .. } => "new_agent",
            Self::NewAgentsDone => "new_agents_done",
            Self::CreateAgent { .. } => "create_agent",
            Self::CreateAgentDone { .. } => "create_agent_done",
            Self::MoveAgent { .. } => "move_agent",
            Self::MoveAgentDone { .. } => "move_agent_done",
            Self::ReceiveAgent { .. } => "receive_agent",
            Self::ReceiveAgentDone { .. } => "receive_agent_done",
            Self::BeginStep { .. } => "begin_step",
            Self::HandleUpdate { .. } => "handle_update",
            Self::HandleUpdateDone { .. } => "handle_update_done",
            Self::AgentStepProfile { .. } => "agent_step_profile",
            Self::AgentStepProfileDone { .. } => "agent_step_profile_done",
            Self::CoordinatorDone { .. } => "coordinator_done",
            Self::Flush { .. } => "flush",
            Self::StoreFlushDone { .. } => "store_flush_done",
            Self::Fault { .. } => "fault",
            Self::Shutdown => "shutdown",
        }
    }
}

/// A message paired with its sender address.
///
/// Receivers dispatch on both: the same message kind can be legal from one
/// sender and a protocol violation from another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Who sent the message.
    pub from: Address,
    /// The message itself.
    pub message: Message,
}
