//! Error types for the transport layer.
//!
//! Nothing in this crate propagates an error up to the host: every failure
//! ends in a logged message plus a status update or a silent drop. These
//! types exist so the connection task can tell a transient failure (keep
//! retrying silently) from a fatal one (park with `Error` status until the
//! user asks for an explicit reconnect).

/// Failure modes of the companion-process channel.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The endpoint itself is unusable (malformed URL, unsupported scheme).
    /// Fatal: retrying the same endpoint cannot succeed.
    #[error("invalid endpoint: {0}")]
    Endpoint(String),

    /// A connection attempt failed (refused, unreachable, handshake error).
    /// Transient: the reconnect policy keeps trying.
    #[error("connect failed: {0:#}")]
    Connect(anyhow::Error),

    /// A frame could not be handed to the writer because the channel is
    /// already down. Transient.
    #[error("send failed: channel is down")]
    Send,
}

impl TransportError {
    /// Fatal errors surface as `ConnectionStatus::Error` and stop the
    /// automatic retry loop; transient ones are absorbed into
    /// `Disconnected` with silent retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Endpoint(_))
    }
}
