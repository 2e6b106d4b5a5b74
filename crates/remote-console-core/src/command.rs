//! Commands dispatched to the controlled device.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ConsoleError, now_millis};

/// Command identifier.
pub type CommandId = Uuid;

/// A one-shot instruction sent over the request/response channel.
///
/// The payload is opaque: the device owns the command grammar and is the
/// only authority on whether a payload is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Unique command identifier.
    pub id: CommandId,
    /// Raw command text, forwarded as-is.
    pub payload: String,
    /// Dispatch timestamp (Unix epoch milliseconds).
    pub issued_at: i64,
}

impl Command {
    /// Create a command stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload: payload.into(),
            issued_at: now_millis(),
        }
    }

    /// `MR,<duration_ms>,<magnitude>`: move relative.
    #[must_use]
    pub fn move_relative(duration_ms: u32, magnitude: i32) -> String {
        format!("MR,{duration_ms},{magnitude}")
    }

    /// `STP`: stop motion.
    #[must_use]
    pub fn stop() -> String {
        "STP".to_string()
    }

    /// `MH`: move home.
    #[must_use]
    pub fn home() -> String {
        "MH".to_string()
    }
}

/// Result of a dispatched command. Produced exactly once per command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The server replied; the reply body is opaque text.
    Ok(String),
    /// The request failed at the transport level.
    Failed(String),
    /// No reply arrived before the deadline.
    TimedOut,
    /// The session was closed before the outcome could be delivered.
    SessionClosed,
}

impl CommandOutcome {
    /// Whether the server produced a reply.
    #[must_use]
    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    /// The reply text, if any.
    #[must_use]
    pub fn reply(&self) -> Option<&str> {
        match self {
            Self::Ok(reply) => Some(reply),
            _ => None,
        }
    }

    /// The reply, or the failure as a `ConsoleError`.
    ///
    /// # Errors
    /// Returns `Command` for a transport failure, `Timeout` for a missed
    /// deadline, and `SessionClosed` for a dispatch cut short by `close()`.
    pub fn into_result(self) -> Result<String, ConsoleError> {
        match self {
            Self::Ok(reply) => Ok(reply),
            Self::Failed(reason) => Err(ConsoleError::Command(reason)),
            Self::TimedOut => Err(ConsoleError::Timeout),
            Self::SessionClosed => Err(ConsoleError::SessionClosed),
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok(reply) => f.write_str(reply),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
            Self::TimedOut => f.write_str("timed out"),
            Self::SessionClosed => f.write_str("session closed"),
        }
    }
}
