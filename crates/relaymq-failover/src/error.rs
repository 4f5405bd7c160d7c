//! Error types shared across the failover transport.

use thiserror::Error;

/// Errors surfaced by the failover transport and its physical transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote endpoint refused the connection.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Endpoint that refused.
        addr: String,
    },

    /// Connecting to the remote endpoint took too long.
    #[error("connection timeout after {timeout_ms}ms to {addr}")]
    ConnectionTimeout {
        /// Endpoint that timed out.
        addr: String,
        /// Configured connect timeout.
        timeout_ms: u64,
    },

    /// The established connection was dropped by the peer.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// A send blocked for the configured failover timeout without any
    /// connection becoming usable.
    #[error("failover timeout of {timeout_ms}ms reached")]
    FailoverTimeout {
        /// Configured block timeout.
        timeout_ms: u64,
    },

    /// No connection was usable and the caller asked not to wait.
    #[error("not connected")]
    NotConnected,

    /// The transport was closed by the application.
    #[error("transport closed")]
    TransportClosed,

    /// The reconnect budget was exhausted; the transport failed permanently.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        /// Description of the final connect failure.
        reason: String,
    },

    /// A broker or composite URI could not be parsed.
    #[error("invalid uri '{uri}': {reason}")]
    InvalidUri {
        /// The offending input.
        uri: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A configuration value was malformed or inconsistent.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong.
        reason: String,
    },

    /// An I/O error from the underlying connection.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TransportError>;
