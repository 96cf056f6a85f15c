//! Error types for the message fabric and barrier primitive.

/// Errors produced by a fabric transport.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// The destination address was never registered with the fabric.
    #[error("unknown fabric address: {address}")]
    UnknownAddress {
        /// The unregistered destination.
        address: String,
    },

    /// The destination participant has shut down its inbox.
    #[error("fabric address disconnected: {address}")]
    Disconnected {
        /// The disconnected destination.
        address: String,
    },

    /// The same address was registered twice.
    #[error("fabric address already registered: {address}")]
    AlreadyRegistered {
        /// The duplicated address.
        address: String,
    },

    /// The underlying transport failed.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A message could not be serialized or deserialized for the wire.
    #[error("codec error: {source}")]
    Codec {
        /// The underlying JSON error.
        #[from]
        source: serde_json::Error,
    },
}

/// Errors produced by the counting barrier.
///
/// Both variants indicate a protocol violation: the expected-sender set of
/// a barrier is fixed when the fan-out is issued, so an arrival that does
/// not fit it means the fabric or a participant is misbehaving. Barrier
/// errors are fatal to the current step.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// An arrival from a sender that is not part of the expected set.
    #[error("barrier arrival from unexpected sender {sender}")]
    UnexpectedSender {
        /// The offending sender, rendered for diagnostics.
        sender: String,
    },

    /// More arrivals from a sender than the barrier expected of it.
    #[error("surplus barrier arrival from {sender}: expected {expected}")]
    SurplusArrival {
        /// The offending sender, rendered for diagnostics.
        sender: String,
        /// How many arrivals were expected from that sender.
        expected: usize,
    },
}
