//! Core abstractions for the remote control console.
//!
//! This crate provides the fundamental building blocks:
//! - `Command` / `CommandOutcome` - One-shot instructions and their results
//! - `Event` / `StreamSignal` - Pushed state and stream lifecycle
//! - `EventLog` - Bounded history + observers for rendering
//! - `ReconnectPolicy` - Backoff decisions for the event stream
//! - `ConsoleConfig` - Endpoint and tuning configuration
//! - Transport traits

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod event_log;
pub mod reconnect;
pub mod traits;

pub use command::{Command, CommandId, CommandOutcome};
pub use config::{BackoffConfig, ConfigError, ConsoleConfig};
pub use error::{ConsoleError, StreamError, TransportError};
pub use event::{ConnectionState, Event, EventKind, RawFrame, StreamSignal};
pub use event_log::{EventLog, LogEntry, ObserverError, Subscription};
pub use reconnect::{ExponentialBackoff, Reconnect, ReconnectPolicy};
pub use traits::{CommandTransport, EventTransport, FrameStream};

/// Milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
