//! Error types for state stores.

use lockstep_fabric::{Address, FabricError};
use lockstep_types::StoreId;

/// Errors a store participant can produce.
///
/// All variants are fatal to the run: the store's buffered step state
/// cannot be trusted after any of them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A message arrived that the store protocol does not expect.
    #[error("protocol violation: unexpected {kind} from {from}")]
    Protocol {
        /// Kind of the offending message.
        kind: &'static str,
        /// Sender of the offending message.
        from: Address,
    },

    /// An update addressed to a different store was delivered here.
    #[error("misrouted update: store {expected} received update for {got}")]
    MisroutedUpdate {
        /// This store's identity.
        expected: StoreId,
        /// The store the update actually targets.
        got: StoreId,
    },

    /// An update arrived tagged with a step that was already flushed.
    #[error("late update for step {step}: flushed through step {flushed}")]
    StaleUpdate {
        /// The step the update claims to belong to.
        step: u64,
        /// The highest step this store has flushed.
        flushed: u64,
    },

    /// The backing medium failed to commit.
    #[error("backend commit failed: {message}")]
    Backend {
        /// Description of the backend failure.
        message: String,
    },

    /// Reading or writing the backing file failed.
    #[error("store I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// An update could not be serialized for persistence.
    #[error("store codec error: {source}")]
    Codec {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },

    /// Sending an acknowledgment over the fabric failed.
    #[error("store fabric error: {source}")]
    Fabric {
        /// The underlying fabric error.
        #[from]
        source: FabricError,
    },
}
