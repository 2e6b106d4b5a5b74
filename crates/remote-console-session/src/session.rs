//! Control session facade.

use std::{
    sync::{
        Arc, Mutex, PoisonError, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::StreamExt;
use remote_console_core::{
    Command, CommandOutcome, CommandTransport, ConnectionState, ConsoleConfig, ConsoleError,
    EventLog, EventTransport, LogEntry, ObserverError, ReconnectPolicy, Subscription, now_millis,
    config::{DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_LOG_CAPACITY},
};
use tokio::{sync::watch, task::JoinHandle};

use crate::{
    channel::CommandChannel,
    stream::{EventItems, EventStream, StreamItem},
};

/// Session tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Timeout used by `dispatch`.
    pub command_timeout: Duration,
    /// Event log capacity.
    pub log_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            log_capacity: DEFAULT_LOG_CAPACITY,
        }
    }
}

impl From<&ConsoleConfig> for SessionOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            log_capacity: config.log_capacity,
        }
    }
}

/// Control session: command dispatch, one event subscription, and the log
/// both feed.
///
/// Commands and events are not correlated; the device never echoes a
/// command id on the push channel.
pub struct ControlSession {
    channel: CommandChannel,
    stream: EventStream,
    log: Arc<EventLog>,
    closed: AtomicBool,
    // Shared while an outcome is logged, exclusive while closing, so nothing
    // is logged once `close()` has returned.
    close_gate: RwLock<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
    command_timeout: Duration,
}

impl ControlSession {
    /// Create a session over explicit transports.
    #[must_use]
    pub fn new(
        commands: Arc<dyn CommandTransport>,
        events: Arc<dyn EventTransport>,
        policy: Arc<dyn ReconnectPolicy>,
        options: SessionOptions,
    ) -> Self {
        Self {
            channel: CommandChannel::new(commands),
            stream: EventStream::new(events, policy),
            log: Arc::new(EventLog::with_capacity(options.log_capacity)),
            closed: AtomicBool::new(false),
            close_gate: RwLock::new(()),
            pump: Mutex::new(None),
            command_timeout: options.command_timeout,
        }
    }

    /// Create a session talking HTTP/SSE to the configured device.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the HTTP client
    /// cannot be built.
    #[cfg(feature = "http")]
    pub fn connect(config: &ConsoleConfig) -> Result<Self, ConsoleError> {
        use remote_console_core::ExponentialBackoff;
        use remote_console_transport::{HttpCommandTransport, SseEventTransport, build_client};

        config.validate()?;
        let client = build_client(config.connect_timeout())?;
        let commands = HttpCommandTransport::from_config(client.clone(), config)?;
        let events = SseEventTransport::from_config(client, config)?;
        tracing::info!(
            commands = %commands.url(),
            events = %events.url(),
            "Console session configured"
        );

        Ok(Self::new(
            Arc::new(commands),
            Arc::new(events),
            Arc::new(ExponentialBackoff::new(config.reconnect.clone())),
            SessionOptions::from(config),
        ))
    }

    /// Start the event subscription.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `SessionClosed` after `close()`, `AlreadyOpen` if already
    /// started.
    pub fn open(&self) -> Result<(), ConsoleError> {
        if self.is_closed() {
            return Err(ConsoleError::SessionClosed);
        }

        let items = self.stream.open()?;
        let handle = tokio::spawn(pump_items(items, Arc::clone(&self.log)));
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        tracing::info!("Console session opened");
        Ok(())
    }

    /// Dispatch a command with the session's default timeout.
    pub async fn dispatch(&self, payload: &str) -> CommandOutcome {
        self.dispatch_with_timeout(payload, self.command_timeout).await
    }

    /// Dispatch a command and record it with its outcome.
    ///
    /// Resolves `SessionClosed` without sending if the session is closed,
    /// and also when the session closes while the request is in flight; in
    /// that case the outcome is not logged.
    pub async fn dispatch_with_timeout(&self, payload: &str, timeout: Duration) -> CommandOutcome {
        if self.is_closed() {
            tracing::debug!(payload, "Dispatch rejected, session closed");
            return CommandOutcome::SessionClosed;
        }

        let command = Command::new(payload);
        tracing::debug!(command_id = %command.id, payload, "Dispatching command");
        let outcome = self.channel.send(&command.payload, timeout).await;

        let gate = self.close_gate.read().unwrap_or_else(PoisonError::into_inner);
        if self.is_closed() {
            tracing::debug!(command_id = %command.id, "Dropping outcome, session closed");
            return CommandOutcome::SessionClosed;
        }
        self.log.append(LogEntry::Command {
            command,
            outcome: outcome.clone(),
        });
        drop(gate);

        outcome
    }

    /// Stop the event stream and reject further dispatches.
    ///
    /// Idempotent. Returns once the final lifecycle entries are logged.
    pub async fn close(&self) {
        {
            let _gate = self.close_gate.write().unwrap_or_else(PoisonError::into_inner);
            if self.closed.swap(true, Ordering::SeqCst) {
                return;
            }
        }

        self.stream.close().await;

        let pump = self.pump.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::error!(error = %e, "Event pump failed");
            }
        }

        tracing::info!("Console session closed");
    }

    /// Whether `close()` has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// The shared event log.
    #[must_use]
    pub const fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    /// Copy of the log.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.log.snapshot()
    }

    /// Observe log entries as they are appended.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&LogEntry) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        self.log.subscribe(observer)
    }

    /// Current event stream state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.stream.state()
    }

    /// Receiver for event stream state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.stream.state_changes()
    }

    /// Commands still running at the transport.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.channel.in_flight()
    }
}

async fn pump_items(mut items: EventItems, log: Arc<EventLog>) {
    while let Some(item) = items.next().await {
        let entry = match item {
            StreamItem::Event(event) => LogEntry::Event(event),
            StreamItem::Signal(signal) => LogEntry::Lifecycle {
                signal,
                at: now_millis(),
            },
        };
        log.append(entry);
    }
}
