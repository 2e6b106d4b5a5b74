//! Transport layer for the remote console.
//!
//! Provides:
//! - Wire protocol (form-encoded commands, SSE frame mapping)
//! - HTTP command transport
//! - SSE event transport

pub mod http;
pub mod protocol;
pub mod sse;

pub use http::HttpCommandTransport;
pub use protocol::CommandForm;
pub use sse::SseEventTransport;

/// Build the shared HTTP client.
///
/// # Errors
/// Returns error if the TLS backend cannot be initialised.
pub fn build_client(
    connect_timeout: std::time::Duration,
) -> Result<reqwest::Client, remote_console_core::TransportError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| remote_console_core::TransportError::Connect(e.to_string()))
}
