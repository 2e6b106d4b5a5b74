//! Request/response command channel.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use remote_console_core::{CommandOutcome, CommandTransport};
use tokio::sync::oneshot;

/// Sends commands one request at a time, with no queuing or retries.
///
/// Calls are independent: any number may be in flight, and they resolve in
/// whatever order the server answers. A request that outlives its timeout
/// keeps running in the background and its reply is dropped.
#[derive(Clone)]
pub struct CommandChannel {
    transport: Arc<dyn CommandTransport>,
    in_flight: Arc<AtomicUsize>,
}

impl CommandChannel {
    /// Create a channel over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn CommandTransport>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Send one payload and wait at most `timeout` for the reply.
    pub async fn send(&self, payload: &str, timeout: Duration) -> CommandOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let transport = Arc::clone(&self.transport);
        let guard = InFlight::enter(&self.in_flight);
        let owned = payload.to_string();

        tokio::spawn(async move {
            let _guard = guard;
            let result = transport.send(&owned).await;
            if reply_tx.send(result).is_err() {
                tracing::debug!(payload = %owned, "Discarding late reply");
            }
        });

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(Ok(reply))) => CommandOutcome::Ok(reply),
            Ok(Ok(Err(e))) => {
                tracing::warn!(payload, error = %e, "Command failed");
                CommandOutcome::Failed(e.to_string())
            }
            Ok(Err(_)) => CommandOutcome::Failed("request aborted".to_string()),
            Err(_) => {
                tracing::warn!(
                    payload,
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Command timed out"
                );
                CommandOutcome::TimedOut
            }
        }
    }

    /// Requests not yet finished at the transport, abandoned ones included.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
