//! Pushed events, stream lifecycle signals and connection state.

use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

/// Logical channel an event was pushed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The unnamed/default channel.
    Message,
    /// The `cmd` channel, used by the device to echo command progress.
    Cmd,
    /// Any other named channel.
    Other(String),
}

impl EventKind {
    /// Normalize a channel tag as carried by a frame.
    ///
    /// An empty tag and `message` both denote the default channel.
    #[must_use]
    pub fn from_channel(tag: &str) -> Self {
        match tag {
            "" | "message" => Self::Message,
            "cmd" => Self::Cmd,
            other => Self::Other(other.to_string()),
        }
    }

    /// The channel name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Message => "message",
            Self::Cmd => "cmd",
            Self::Other(name) => name,
        }
    }
}

/// A single frame as read off the push connection, before sequencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// Channel tag (`event:` field); empty for the default channel.
    pub channel: String,
    /// Opaque payload.
    pub data: String,
    /// Server-assigned event id, if the server sent one.
    pub id: Option<String>,
}

impl RawFrame {
    /// Frame on the default channel.
    #[must_use]
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            channel: String::new(),
            data: data.into(),
            id: None,
        }
    }

    /// Frame on a named channel.
    #[must_use]
    pub fn named(channel: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// A typed, sequenced event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Channel the event arrived on.
    pub kind: EventKind,
    /// Opaque payload.
    pub data: String,
    /// Receive timestamp (Unix epoch milliseconds).
    pub received_at: i64,
    /// Locally assigned, strictly increasing, starting at 1.
    pub sequence: u64,
    /// 1-based number of the connection the event arrived on.
    pub connection: u64,
}

/// Lifecycle signal emitted by the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum StreamSignal {
    /// A connection reached `Open`.
    Opened { connection: u64 },
    /// An open connection was lost or closed.
    Closed { connection: u64 },
    /// Waiting before the next connection attempt.
    Reconnecting { attempt: u32, delay_ms: u64 },
    /// The reconnect policy gave up; the stream is terminated.
    GaveUp { attempts: u32 },
}

/// Connection state of the event stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected; initial and terminal state.
    #[default]
    Closed,
    /// A connection attempt is in flight.
    Connecting,
    /// Frames are being received.
    Open,
    /// Sleeping before the next attempt.
    Reconnecting { attempt: u32, next_delay: Duration },
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => f.write_str("closed"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Reconnecting {
                attempt,
                next_delay,
            } => write!(
                f,
                "reconnecting (attempt {attempt}, in {}ms)",
                next_delay.as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_normalization() {
        assert_eq!(EventKind::from_channel(""), EventKind::Message);
        assert_eq!(EventKind::from_channel("message"), EventKind::Message);
        assert_eq!(EventKind::from_channel("cmd"), EventKind::Cmd);
        assert_eq!(
            EventKind::from_channel("status"),
            EventKind::Other("status".into())
        );
        assert_eq!(EventKind::Other("status".into()).as_str(), "status");
    }

    #[test]
    fn test_signal_serialization() {
        let json = serde_json::to_string(&StreamSignal::Reconnecting {
            attempt: 2,
            delay_ms: 1000,
        })
        .unwrap();
        assert!(json.contains(r#""signal":"reconnecting""#));
        assert!(json.contains(r#""delay_ms":1000"#));
    }

    #[test]
    fn test_state_display() {
        let state = ConnectionState::Reconnecting {
            attempt: 3,
            next_delay: Duration::from_millis(2000),
        };
        assert_eq!(state.to_string(), "reconnecting (attempt 3, in 2000ms)");
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
    }
}
