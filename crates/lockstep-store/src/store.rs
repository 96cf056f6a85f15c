//! The state store participant task.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, info};

use lockstep_fabric::{Address, Envelope, Fabric, Message};
use lockstep_types::{StateUpdate, StoreId};

use crate::backend::StoreBackend;
use crate::error::StoreError;
use crate::policy::ConflictPolicy;

/// A write-buffering store participant.
///
/// Receives `handle_update` from runners and `flush` from the driver;
/// sends `handle_update_done` acknowledgments back to the producing runner
/// and `store_flush_done` to the driver. Runs as a single task owning all
/// of its state.
pub struct StateStore {
    id: StoreId,
    fabric: Arc<dyn Fabric>,
    backend: Box<dyn StoreBackend>,
    policy: ConflictPolicy,
    /// Updates buffered since the last flush, in arrival order.
    cache: Vec<StateUpdate>,
    /// Highest step flushed so far. An update tagged at or below this
    /// watermark arrived after its step closed, which the protocol
    /// forbids.
    flushed_through: Option<u64>,
}

impl StateStore {
    /// Create a store participant.
    pub fn new(
        id: StoreId,
        fabric: Arc<dyn Fabric>,
        backend: Box<dyn StoreBackend>,
        policy: ConflictPolicy,
    ) -> Self {
        Self {
            id,
            fabric,
            backend,
            policy,
            cache: Vec::new(),
            flushed_through: None,
        }
    }

    /// This store's fabric address.
    fn address(&self) -> Address {
        Address::Store(self.id.clone())
    }

    /// Run the store until shutdown.
    ///
    /// On a fatal error a `fault` message is sent to the driver before the
    /// error is returned, so the driver never stalls on a barrier silently.
    ///
    /// # Errors
    ///
    /// Returns the underlying [`StoreError`] after reporting it.
    pub async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Envelope>,
    ) -> Result<(), StoreError> {
        info!(store = %self.id, policy = ?self.policy, "store started");
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
        info!(store = %self.id, "store stopped");
        Ok(())
    }

    /// Dispatch one envelope. Returns `Ok(false)` on shutdown.
    fn handle(&mut self, envelope: Envelope) -> Result<bool, StoreError> {
        let Envelope { from, message } = envelope;
        match message {
            Message::HandleUpdate { update } => self.on_update(&from, update)?,
            Message::Flush { step } => self.on_flush(step)?,
            Message::Shutdown => return Ok(false),
            other => {
                return Err(StoreError::Protocol {
                    kind: other.kind(),
                    from,
                });
            }
        }
        Ok(true)
    }

    /// Buffer an incoming update and acknowledge receipt to its producer.
    fn on_update(&mut self, from: &Address, update: StateUpdate) -> Result<(), StoreError> {
        if update.store != self.id {
            return Err(StoreError::MisroutedUpdate {
                expected: self.id.clone(),
                got: update.store,
            });
        }
        if let Some(flushed) = self.flushed_through
            && update.step <= flushed
        {
            return Err(StoreError::StaleUpdate {
                step: update.step,
                flushed,
            });
        }
        self.cache.push(update);
        self.fabric.send(
            self.address(),
            from,
            Message::HandleUpdateDone {
                store: self.id.clone(),
            },
        )?;
        Ok(())
    }

    /// Commit the buffered cache and acknowledge the flush to the driver.
    fn on_flush(&mut self, step: u64) -> Result<(), StoreError> {
        let started = Instant::now();
        let buffered = self.cache.len();
        let batch = self.policy.resolve(std::mem::take(&mut self.cache));
        self.backend.commit(&batch)?;
        let flush_seconds = started.elapsed().as_secs_f64();
        self.flushed_through = Some(self.flushed_through.map_or(step, |s| s.max(step)));

        debug!(
            store = %self.id,
            step,
            buffered,
            committed = batch.len(),
            flush_seconds,
            "store flushed"
        );

        self.fabric.send(
            self.address(),
            &Address::Driver,
            Message::StoreFlushDone {
                store: self.id.clone(),
                flush_seconds,
            },
        )?;
        Ok(())
    }
}
