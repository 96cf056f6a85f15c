//! NATS-backed message fabric.
//!
//! Each participant address maps to one subject under a configurable
//! prefix (`lockstep.runner.3`, `lockstep.store.position`, ...), and
//! envelopes travel as JSON payloads. NATS preserves publish order per
//! connection, and all sends from a process go through a single publisher
//! task, so the fabric's per-pair ordering guarantee holds.
//!
//! [`Fabric::send`] is synchronous while NATS publishing is async, so
//! sends are queued to the publisher task through an unbounded channel.
//! A publish failure is logged and surfaces as a stalled step barrier at
//! the fan-in side; the baseline protocol treats a missing message as
//! fatal rather than retrying.

use futures::StreamExt as _;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace};

use crate::error::FabricError;
use crate::message::{Address, Envelope, Message};
use crate::Fabric;

/// A NATS-backed fabric.
pub struct NatsFabric {
    client: async_nats::Client,
    prefix: String,
    publish_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
}

impl NatsFabric {
    /// Connect to a NATS server and start the publisher task.
    ///
    /// `prefix` namespaces all subjects so independent simulations can
    /// share a server.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Transport`] if the connection cannot be
    /// established.
    pub async fn connect(url: &str, prefix: &str) -> Result<Self, FabricError> {
        info!(url = url, prefix = prefix, "connecting to NATS fabric");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| FabricError::Transport {
                message: format!("failed to connect to {url}: {e}"),
            })?;
        info!("NATS fabric connection established");

        let (publish_tx, mut publish_rx) = mpsc::unbounded_channel::<(String, Vec<u8>)>();
        let publisher = client.clone();
        tokio::spawn(async move {
            while let Some((subject, payload)) = publish_rx.recv().await {
                if let Err(e) = publisher.publish(subject.clone(), payload.into()).await {
                    error!(subject = subject, error = %e, "fabric publish failed");
                }
            }
        });

        Ok(Self {
            client,
            prefix: prefix.to_owned(),
            publish_tx,
        })
    }

    /// Full NATS subject for an address.
    fn subject_for(&self, address: &Address) -> String {
        format!("{}.{}", self.prefix, address.subject())
    }

    /// Subscribe to an address and return its inbox.
    ///
    /// Spawns a task that deserializes incoming payloads into envelopes.
    /// Payloads that do not parse are logged and dropped; a malformed
    /// protocol message cannot be attributed to a sender, so it surfaces
    /// as a stalled barrier rather than a decoded fault.
    ///
    /// # Errors
    ///
    /// Returns [`FabricError::Transport`] if the subscription fails.
    pub async fn register(
        &self,
        address: Address,
    ) -> Result<mpsc::UnboundedReceiver<Envelope>, FabricError> {
        let subject = self.subject_for(&address);
        debug!(subject = subject, "subscribing fabric address");
        let mut subscriber =
            self.client
                .subscribe(subject.clone())
                .await
                .map_err(|e| FabricError::Transport {
                    message: format!("failed to subscribe to {subject}: {e}"),
                })?;

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(msg) = subscriber.next().await {
                match serde_json::from_slice::<Envelope>(&msg.payload) {
                    Ok(envelope) => {
                        if tx.send(envelope).is_err() {
                            // Inbox dropped: the participant has exited.
                            break;
                        }
                    }
                    Err(e) => {
                        error!(subject = subject, error = %e, "malformed fabric payload");
                    }
                }
            }
        });
        Ok(rx)
    }
}

impl Fabric for NatsFabric {
    fn send(&self, from: Address, to: &Address, message: Message) -> Result<(), FabricError> {
        trace!(from = %from, to = %to, kind = message.kind(), "fabric send");
        let subject = self.subject_for(to);
        let payload = serde_json::to_vec(&Envelope { from, message })?;
        self.publish_tx
            .send((subject, payload))
            .map_err(|_| FabricError::Transport {
                message: "publisher task has exited".to_owned(),
            })
    }
}
