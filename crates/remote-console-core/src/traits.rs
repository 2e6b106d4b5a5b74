//! Core traits for the command and event transports.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{RawFrame, StreamError, TransportError};

/// Frames read from one push connection. Ends when the server closes it.
pub type FrameStream = BoxStream<'static, Result<RawFrame, StreamError>>;

/// Trait for request/response command transports.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send one payload and wait for exactly one reply.
    ///
    /// The payload is forwarded as-is, including the empty string.
    async fn send(&self, payload: &str) -> Result<String, TransportError>;
}

/// Trait for server-push event transports.
#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Open one push connection.
    ///
    /// `last_event_id` is the id of the last frame seen on a previous
    /// connection, if the server assigned ids.
    async fn connect(&self, last_event_id: Option<&str>) -> Result<FrameStream, TransportError>;
}
