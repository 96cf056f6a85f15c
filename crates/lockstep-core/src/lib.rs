//! Step orchestration for the Lockstep runtime.
//!
//! This crate implements the per-step distributed coordination protocol:
//! a population of agents sharded across runner tasks, stepped in
//! lockstep rounds, with every state update durably flushed before the
//! next round starts.
//!
//! # Modules
//!
//! - [`agent`] -- the [`Agent`] trait and the registry that turns
//!   constructors into live agents
//! - [`population`] -- the source of newborn agent constructors
//! - [`schedule`] -- timestep generation
//! - [`ledger`] -- the coordinator-owned load ledger feeding placement
//! - [`coordinator`] -- the per-step orchestrator state machine
//! - [`runner`] -- the participant owning a shard of live agents
//! - [`simulator`] -- the driver that wires participants over a fabric
//!   and sequences timesteps
//!
//! The protocol's barrier order within a step is: creation, migration,
//! local stepping plus update routing, step profiles, store flush. Every
//! fan-in closes only on a complete acknowledgment count -- a missing
//! participant stalls the step, and any fault aborts the run.
//!
//! [`Agent`]: agent::Agent

pub mod agent;
pub mod coordinator;
pub mod ledger;
pub mod population;
pub mod runner;
pub mod schedule;
pub mod simulator;

pub use agent::{Agent, AgentError, AgentRegistry};
pub use coordinator::{Coordinator, CoordinatorError, Phase};
pub use ledger::LoadLedger;
pub use population::{Population, SpawnRequest};
pub use runner::{Runner, RunnerError};
pub use schedule::{RangeTimestepGenerator, TimestepGenerator};
pub use simulator::{FabricMode, RunReport, Simulation, SimulationError, StepSummary, StoreSpec};
