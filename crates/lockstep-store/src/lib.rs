//! Write-buffering state stores.
//!
//! A store is the durability endpoint for agent-produced state updates.
//! During a step it only buffers: every [`handle_update`] appends to an
//! in-memory cache and acknowledges *receipt*, not persistence. Once the
//! driver has observed that all runners finished routing updates, it
//! commands a flush; the store resolves same-key conflicts through its
//! [`ConflictPolicy`], commits the batch through its pluggable
//! [`StoreBackend`], clears the cache, and acknowledges with
//! `store_flush_done`.
//!
//! The store cannot know on its own when the update set for a step is
//! closed; it trusts the driver to command the flush at the right point in
//! the barrier order.
//!
//! [`handle_update`]: StateStore
//!
//! # Modules
//!
//! - [`store`] -- the [`StateStore`] participant task
//! - [`backend`] -- the [`StoreBackend`] commit trait, with in-memory and
//!   JSON-lines implementations
//! - [`policy`] -- same-key conflict resolution within a step

pub mod backend;
pub mod error;
pub mod policy;
pub mod store;

pub use backend::{JsonlBackend, MemoryBackend, MemoryView, StoreBackend};
pub use error::StoreError;
pub use policy::ConflictPolicy;
pub use store::StateStore;
