//! In-process message fabric over tokio mpsc channels.
//!
//! Each registered address owns an unbounded receiver; senders look the
//! destination up in a shared routing table. Tokio's mpsc channel gives
//! exactly the guarantees the protocol assumes from a fabric: reliable,
//! non-duplicating, FIFO-per-sender delivery.
//!
//! This is the default transport for tests and single-process runs; the
//! NATS fabric covers multi-process deployments.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::trace;

use crate::error::FabricError;
use crate::message::{Address, Envelope, Message};
use crate::Fabric;

/// An in-process fabric.
///
/// All participant inboxes must be registered before the simulation
/// starts; sending to an unregistered address is an error, never a silent
/// drop.
#[derive(Debug, Default)]
pub struct LocalFabric {
    routes: Mutex<BTreeMap<Address, mpsc::UnboundedSender<Envelope>>>,
}

impl LocalFabric {
    /// Create an empty fabric.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an address and return its inbox.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::AlreadyRegistered`] if the address has an
    /// inbox already, and [`FabricError::Transport`] if the routing table
    /// lock is poisoned.
    pub fn register(
        &self,
        address: Address,
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, FabricError> {
        let mut routes = self.routes.lock().map_err(|e| FabricError::Transport {
            message: format!("routing table lock poisoned: {e}"),
        })?;
        if routes.contains_key(&address) {
            return Err(FabricError::AlreadyRegistered {
                address: address.subject(),
            });
        }
        let (tx, rx) = mpsc::unbounded_channel();
        routes.insert(address, tx);
        Ok(rx)
    }
}

impl Fabric for LocalFabric {
    fn send(&self, from: Address, to: &Address, message: Message) -> Result<(), FabricError> {
        trace!(from = %from, to = %to, kind = message.kind(), "fabric send");
        let routes = self.routes.lock().map_err(|e| FabricError::Transport {
            message: format!("routing table lock poisoned: {e}"),
        })?;
        let tx = routes.get(to).ok_or_else(|| FabricError::UnknownAddress {
            address: to.subject(),
        })?;
        tx.send(Envelope { from, message })
            .map_err(|_| FabricError::Disconnected {
                address: to.subject(),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lockstep_types::RunnerRank;

    use super::*;

    #[tokio::test]
    async fn delivers_in_send_order() {
        let fabric = LocalFabric::new();
        let mut inbox = fabric.register(Address::Coordinator).unwrap();

        let from = Address::Runner(RunnerRank(0));
        fabric
            .send(from.clone(), &Address::Coordinator, Message::NewAgentsDone)
            .unwrap();
        fabric
            .send(from.clone(), &Address::Coordinator, Message::Shutdown)
            .unwrap();

        let first = inbox.recv().await.unwrap();
        let second = inbox.recv().await.unwrap();
        assert_eq!(first.message, Message::NewAgentsDone);
        assert_eq!(second.message, Message::Shutdown);
        assert_eq!(first.from, from);
    }

    #[test]
    fn unknown_address_is_an_error() {
        let fabric = LocalFabric::new();
        let err = fabric
            .send(Address::Driver, &Address::Coordinator, Message::Shutdown)
            .unwrap_err();
        assert!(matches!(err, FabricError::UnknownAddress { .. }));
    }

    #[test]
    fn duplicate_registration_is_an_error() {
        let fabric = LocalFabric::new();
        let _inbox = fabric.register(Address::Driver).unwrap();
        let err = fabric.register(Address::Driver).unwrap_err();
        assert!(matches!(err, FabricError::AlreadyRegistered { .. }));
    }

    #[test]
    fn dropped_inbox_reports_disconnected() {
        let fabric = LocalFabric::new();
        let inbox = fabric.register(Address::Driver).unwrap();
        drop(inbox);
        let err = fabric
            .send(Address::Coordinator, &Address::Driver, Message::Shutdown)
            .unwrap_err();
        assert!(matches!(err, FabricError::Disconnected { .. }));
    }
}
