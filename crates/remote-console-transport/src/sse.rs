//! Server-sent events transport.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use remote_console_core::{
    ConsoleConfig, ConsoleError, EventTransport, FrameStream, TransportError,
};
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use url::Url;

use crate::protocol::{
    EVENT_STREAM_CONTENT_TYPE, LAST_EVENT_ID_HEADER, frame_from_sse, map_sse_error, status_error,
};

/// Opens one long-lived GET per connection and parses the body as SSE.
///
/// Reconnection is not handled here: a broken body simply ends the frame
/// stream, and the caller decides what to do next.
#[derive(Debug, Clone)]
pub struct SseEventTransport {
    client: reqwest::Client,
    url: Url,
}

impl SseEventTransport {
    /// Create a transport subscribing to `url`.
    #[must_use]
    pub const fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }

    /// Create a transport for the configured event endpoint.
    ///
    /// # Errors
    /// Returns error if the endpoint URL cannot be built.
    pub fn from_config(
        client: reqwest::Client,
        config: &ConsoleConfig,
    ) -> Result<Self, ConsoleError> {
        Ok(Self::new(client, config.events_url()?))
    }

    /// Endpoint this transport subscribes to.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl EventTransport for SseEventTransport {
    async fn connect(&self, last_event_id: Option<&str>) -> Result<FrameStream, TransportError> {
        let mut request = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = last_event_id {
            request = request.header(LAST_EVENT_ID_HEADER, id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM_CONTENT_TYPE) {
            return Err(TransportError::Request(format!(
                "unexpected content type: {content_type:?}"
            )));
        }

        tracing::debug!(url = %self.url, ?last_event_id, "Event stream connected");

        let frames = response
            .bytes_stream()
            .eventsource()
            .map(|res| res.map(frame_from_sse).map_err(map_sse_error));

        Ok(frames.boxed())
    }
}
