//! Wire protocol for device communication.
//!
//! Commands go out as a form-encoded POST with a single `cmd` field; the
//! reply body is plain text. Events come back as server-sent events where
//! the `event:` field is the channel tag.

use std::fmt::Display;

use eventsource_stream::EventStreamError;
use remote_console_core::{RawFrame, StreamError, TransportError};
use serde::{Deserialize, Serialize};

/// Content type of the push stream.
pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Header carrying the last seen event id on reconnect.
pub const LAST_EVENT_ID_HEADER: &str = "Last-Event-ID";

/// Form body of a command request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandForm {
    /// Raw command text.
    pub cmd: String,
}

impl CommandForm {
    /// Create a form for a payload.
    #[must_use]
    pub fn new(payload: &str) -> Self {
        Self {
            cmd: payload.to_string(),
        }
    }
}

/// Map one parsed SSE event to a raw frame.
#[must_use]
pub fn frame_from_sse(event: eventsource_stream::Event) -> RawFrame {
    RawFrame {
        channel: event.event,
        data: event.data,
        id: (!event.id.is_empty()).then_some(event.id),
    }
}

/// Classify an SSE stream error.
///
/// Decoding failures concern one frame and are protocol errors; anything
/// from the byte stream underneath means the connection is gone.
pub fn map_sse_error<E: Display>(err: EventStreamError<E>) -> StreamError {
    match err {
        EventStreamError::Utf8(e) => StreamError::Protocol(format!("invalid UTF-8 in frame: {e}")),
        EventStreamError::Parser(e) => StreamError::Protocol(format!("malformed frame: {e}")),
        EventStreamError::Transport(e) => {
            StreamError::Transport(TransportError::Disconnected(e.to_string()))
        }
    }
}

/// Turn a non-success reply into a transport error.
#[must_use]
pub fn status_error(status: u16, body: &str) -> TransportError {
    TransportError::Status {
        status,
        body: body.trim().to_string(),
    }
}
