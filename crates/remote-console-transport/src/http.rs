//! HTTP command transport.

use std::time::Duration;

use async_trait::async_trait;
use remote_console_core::{CommandTransport, ConsoleConfig, ConsoleError, TransportError};
use url::Url;

use crate::protocol::{CommandForm, status_error};

/// Sends each command as its own form-encoded POST.
///
/// With a request timeout set, a device that never answers still releases
/// the request, even after the caller stopped waiting for it.
#[derive(Debug, Clone)]
pub struct HttpCommandTransport {
    client: reqwest::Client,
    url: Url,
    timeout: Option<Duration>,
}

impl HttpCommandTransport {
    /// Create a transport posting to `url`.
    #[must_use]
    pub const fn new(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            timeout: None,
        }
    }

    /// Abort each request that has not completed within `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Create a transport for the configured command endpoint, with the
    /// command timeout as request timeout.
    ///
    /// # Errors
    /// Returns error if the endpoint URL cannot be built.
    pub fn from_config(
        client: reqwest::Client,
        config: &ConsoleConfig,
    ) -> Result<Self, ConsoleError> {
        Ok(Self::new(client, config.command_url()?).with_timeout(config.command_timeout()))
    }

    /// Endpoint this transport posts to.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl CommandTransport for HttpCommandTransport {
    async fn send(&self, payload: &str) -> Result<String, TransportError> {
        tracing::debug!(url = %self.url, payload, "Posting command");

        let mut request = self
            .client
            .post(self.url.clone())
            .form(&CommandForm::new(payload));
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Connect(e.to_string())
            } else {
                TransportError::Request(e.to_string())
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Request(e.to_string()))?;

        if status.is_success() {
            Ok(body)
        } else {
            Err(status_error(status.as_u16(), &body))
        }
    }
}
