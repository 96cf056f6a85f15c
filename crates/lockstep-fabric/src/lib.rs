//! Message fabric seam for the Lockstep runtime.
//!
//! Every participant in a simulation (driver, coordinator, runners,
//! stores) is a single-threaded task that owns its state and talks to the
//! others exclusively through rank-addressed, ordered, reliable
//! point-to-point message delivery. This crate defines that seam:
//!
//! - [`message`] -- the [`Address`] space, the protocol [`Message`] enum,
//!   and the [`Envelope`] pairing a message with its sender
//! - [`Fabric`] -- the send-side trait participants hold as a trait object
//! - [`local`] -- an in-process fabric over tokio mpsc channels
//! - [`nats`] -- a NATS-backed fabric with one subject per address
//! - [`barrier`] -- the reusable fan-in counting barrier used by every
//!   fan-out/fan-in exchange in the protocol
//!
//! The concrete transport is deliberately swappable; the protocol only
//! assumes that messages between any ordered pair of addresses arrive in
//! the order they were sent, and that nothing is lost or duplicated.

pub mod barrier;
pub mod error;
pub mod local;
pub mod message;
pub mod nats;

pub use barrier::Barrier;
pub use error::{BarrierError, FabricError};
pub use local::LocalFabric;
pub use message::{Address, Envelope, Message};
pub use nats::NatsFabric;

/// Send side of the message fabric.
///
/// Participants hold this as `Arc<dyn Fabric>`. Sending is fire-and-forget:
/// delivery is reliable and ordered per (sender, receiver) pair, and the
/// fan-in side tracks completion via [`Barrier`]s, never via send results.
///
/// `send` is synchronous so a participant can fan out from inside its
/// message handler without yielding; transports that need async I/O queue
/// internally.
pub trait Fabric: Send + Sync {
    /// Deliver a message from `from` to `to`.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::UnknownAddress`] if `to` was never wired, or
    /// [`FabricError::Disconnected`] if the receiving participant is gone.
    fn send(&self, from: Address, to: &Address, message: Message) -> Result<(), FabricError>;
}
