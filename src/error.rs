//! Crate-wide error types.

use thiserror::Error;

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the notification agent.
///
/// Nothing in this crate lets one of these interrupt the host UI: transport
/// errors are retried, per-message and per-surface errors are logged and
/// contained, and state-invariant violations are corrected by a recompute.
#[derive(Error, Debug)]
pub enum Error {
    /// Event channel transport errors (connect, send, receive).
    #[error("Channel error: {0}")]
    Channel(String),

    /// Malformed or unparseable wire messages.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Durable storage errors (queue, install state).
    #[error("Storage error: {0}")]
    Storage(String),

    /// Alert surface / platform API errors.
    #[error("Surface error: {0}")]
    Surface(String),

    /// Illegal lifecycle transition.
    #[error("Invalid state transition: cannot transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a surface error.
    pub fn surface(msg: impl Into<String>) -> Self {
        Self::Surface(msg.into())
    }

    /// Create a generic error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }
}
