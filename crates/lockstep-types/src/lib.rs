//! Shared type definitions for the Lockstep simulation runtime.
//!
//! This crate is the single source of truth for the datatypes that cross
//! participant boundaries: everything here travels over the message fabric
//! or is consumed by more than one participant, so it all carries `serde`
//! derives.
//!
//! # Modules
//!
//! - [`ids`] -- Typed identifiers for agents, runner ranks, and stores
//! - [`timestep`] -- The [`Timestep`] unit of simulation progress
//! - [`constructor`] -- Serializable agent construction descriptors
//! - [`update`] -- State updates routed from agent steps to stores
//! - [`profile`] -- Per-agent step telemetry
//! - [`load`] -- Load snapshots and placement decisions

pub mod constructor;
pub mod ids;
pub mod load;
pub mod profile;
pub mod timestep;
pub mod update;

// Re-export all public types at crate root for convenience.
pub use constructor::AgentConstructor;
pub use ids::{AgentId, RunnerRank, StoreId};
pub use load::{LoadEstimate, LoadSnapshot, PlacementDecision, PlacementRequest};
pub use profile::StepProfile;
pub use timestep::Timestep;
pub use update::StateUpdate;
