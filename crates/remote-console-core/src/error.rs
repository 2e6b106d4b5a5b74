//! Error taxonomy.

use thiserror::Error;

use crate::ConfigError;

/// Failure of the underlying channel (connection refused, DNS, bad status).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("Request failed: {0}")]
    Request(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Disconnected: {0}")]
    Disconnected(String),
}

/// Error yielded by an open frame stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Malformed frame. Dropped; the connection stays open.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// The connection broke. Triggers reconnection.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Console error.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Command failed: {0}")]
    Command(String),
    #[error("Timed out")]
    Timeout,
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("Session closed")]
    SessionClosed,
    #[error("Already open")]
    AlreadyOpen,
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl From<StreamError> for ConsoleError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Protocol(reason) => Self::Protocol(reason),
            StreamError::Transport(e) => Self::Transport(e),
        }
    }
}
