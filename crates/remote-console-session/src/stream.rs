//! Reconnecting event stream.
//!
//! One spawned driver task owns the connection and walks the state machine:
//!
//! ```text
//! Closed --open()--> Connecting --ok--> Open --frame--> Open
//!                        |                 |
//!                        | fail            | error / eof (emits Closed)
//!                        v                 v
//!                    Reconnecting(n, d) <--+
//!                        | timer               | policy gives up
//!                        v                     v
//!                    Connecting             Closed (emits GaveUp)
//! ```
//!
//! `close()` moves any state to `Closed`, cancelling the timer or the
//! connect in flight.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use futures::StreamExt;
use remote_console_core::{
    ConnectionState, ConsoleError, Event, EventKind, EventTransport, FrameStream, RawFrame,
    ReconnectPolicy, StreamError, StreamSignal, now_millis,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;

/// Item produced by an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    /// A sequenced event.
    Event(Event),
    /// A lifecycle change.
    Signal(StreamSignal),
}

/// Items of one logical subscription, in wire order.
///
/// Ends after `close()` or once the reconnect policy gives up.
pub type EventItems = ReceiverStream<StreamItem>;

/// Items buffered between the driver and the consumer. A full buffer stops
/// the driver from reading further frames.
pub(crate) const ITEM_BUFFER: usize = 256;

enum Lifecycle {
    Idle,
    Running {
        shutdown: oneshot::Sender<()>,
        task: JoinHandle<()>,
    },
    Terminated,
}

/// Single persistent subscription to the server's push channel.
pub struct EventStream {
    transport: Arc<dyn EventTransport>,
    policy: Arc<dyn ReconnectPolicy>,
    state: Arc<watch::Sender<ConnectionState>>,
    lifecycle: Mutex<Lifecycle>,
}

impl EventStream {
    /// Create a closed stream.
    #[must_use]
    pub fn new(transport: Arc<dyn EventTransport>, policy: Arc<dyn ReconnectPolicy>) -> Self {
        Self {
            transport,
            policy,
            state: Arc::new(watch::Sender::new(ConnectionState::Closed)),
            lifecycle: Mutex::new(Lifecycle::Idle),
        }
    }

    /// Start connecting and return the item stream.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// Returns `AlreadyOpen` if the stream was opened before; a stream is
    /// never restarted.
    pub fn open(&self) -> Result<EventItems, ConsoleError> {
        let mut lifecycle = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if !matches!(*lifecycle, Lifecycle::Idle) {
            return Err(ConsoleError::AlreadyOpen);
        }

        let (items_tx, items_rx) = mpsc::channel(ITEM_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let driver = Driver {
            transport: Arc::clone(&self.transport),
            policy: Arc::clone(&self.policy),
            state: Arc::clone(&self.state),
            items: items_tx,
            shutdown: shutdown_rx,
            sequence: 0,
            connection: 0,
            last_event_id: None,
        };
        let task = tokio::spawn(driver.run());

        *lifecycle = Lifecycle::Running {
            shutdown: shutdown_tx,
            task,
        };
        Ok(ReceiverStream::new(items_rx))
    }

    /// Stop the stream. Safe to call any number of times.
    pub async fn close(&self) {
        let previous = std::mem::replace(
            &mut *self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner),
            Lifecycle::Terminated,
        );

        match previous {
            Lifecycle::Running { shutdown, task } => {
                let _ = shutdown.send(());
                if let Err(e) = task.await {
                    tracing::error!(error = %e, "Event stream task failed");
                    self.state.send_replace(ConnectionState::Closed);
                }
            }
            Lifecycle::Idle | Lifecycle::Terminated => {}
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum PumpEnd {
    Shutdown,
    Lost(String),
}

struct Driver {
    transport: Arc<dyn EventTransport>,
    policy: Arc<dyn ReconnectPolicy>,
    state: Arc<watch::Sender<ConnectionState>>,
    items: mpsc::Sender<StreamItem>,
    // Never polled again once it has fired.
    shutdown: oneshot::Receiver<()>,
    sequence: u64,
    connection: u64,
    last_event_id: Option<String>,
}

impl Driver {
    async fn run(mut self) {
        // Consecutive failures. Only a connection that delivered an event
        // resets the count, so a server that accepts and drops still backs
        // off and eventually gives up.
        let mut failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);

            let transport = Arc::clone(&self.transport);
            let last_event_id = self.last_event_id.clone();
            let connected = tokio::select! {
                _ = &mut self.shutdown => None,
                res = transport.connect(last_event_id.as_deref()) => Some(res),
            };
            let Some(connected) = connected else {
                return self.terminate(false);
            };

            match connected {
                Ok(frames) => {
                    self.connection += 1;
                    self.set_state(ConnectionState::Open);
                    tracing::info!(connection = self.connection, "Event stream opened");
                    let opened = StreamSignal::Opened {
                        connection: self.connection,
                    };
                    if !self.emit(StreamItem::Signal(opened)).await {
                        return self.terminate(true);
                    }

                    let delivered_before = self.sequence;
                    match self.pump(frames).await {
                        PumpEnd::Shutdown => return self.terminate(true),
                        PumpEnd::Lost(reason) => {
                            tracing::warn!(
                                connection = self.connection,
                                %reason,
                                "Event stream lost"
                            );
                            if self.sequence > delivered_before {
                                failures = 0;
                            }
                            let closed = StreamSignal::Closed {
                                connection: self.connection,
                            };
                            if !self.emit(StreamItem::Signal(closed)).await {
                                return self.terminate(false);
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Event stream connect failed"),
            }

            failures = failures.saturating_add(1);
            let decision = self.policy.decide(failures);
            if !decision.should_retry {
                tracing::warn!(attempts = failures, "Event stream giving up");
                self.set_state(ConnectionState::Closed);
                let gave_up = StreamSignal::GaveUp { attempts: failures };
                let _ = self.emit(StreamItem::Signal(gave_up)).await;
                return;
            }

            let delay_ms = u64::try_from(decision.delay.as_millis()).unwrap_or(u64::MAX);
            tracing::info!(attempt = failures, delay_ms, "Event stream reconnecting");
            self.set_state(ConnectionState::Reconnecting {
                attempt: failures,
                next_delay: decision.delay,
            });
            let reconnecting = StreamSignal::Reconnecting {
                attempt: failures,
                delay_ms,
            };
            if !self.emit(StreamItem::Signal(reconnecting)).await {
                return self.terminate(false);
            }

            let cancelled = tokio::select! {
                _ = &mut self.shutdown => true,
                () = tokio::time::sleep(decision.delay) => false,
            };
            if cancelled {
                return self.terminate(false);
            }
        }
    }

    async fn pump(&mut self, mut frames: FrameStream) -> PumpEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = &mut self.shutdown => return PumpEnd::Shutdown,
                next = frames.next() => next,
            };

            match next {
                Some(Ok(frame)) => {
                    if !self.deliver(frame).await {
                        return PumpEnd::Shutdown;
                    }
                }
                Some(Err(err @ StreamError::Protocol(_))) => {
                    tracing::warn!(
                        connection = self.connection,
                        error = %ConsoleError::from(err),
                        "Dropping malformed frame"
                    );
                }
                Some(Err(StreamError::Transport(e))) => return PumpEnd::Lost(e.to_string()),
                None => return PumpEnd::Lost("stream ended by server".to_string()),
            }
        }
    }

    async fn deliver(&mut self, frame: RawFrame) -> bool {
        self.sequence += 1;
        if frame.id.is_some() {
            self.last_event_id = frame.id;
        }

        let event = Event {
            kind: EventKind::from_channel(&frame.channel),
            data: frame.data,
            received_at: now_millis(),
            sequence: self.sequence,
            connection: self.connection,
        };
        tracing::debug!(sequence = event.sequence, kind = event.kind.as_str(), "Event received");
        self.emit(StreamItem::Event(event)).await
    }

    /// Queue an item, waiting for buffer room. Returns `false` if shutdown
    /// was requested while waiting.
    async fn emit(&mut self, item: StreamItem) -> bool {
        tokio::select! {
            biased;
            _ = &mut self.shutdown => false,
            sent = self.items.send(item) => {
                if sent.is_err() {
                    tracing::debug!("Event consumer gone");
                }
                true
            }
        }
    }

    fn terminate(&self, was_open: bool) {
        if was_open {
            let closed = StreamItem::Signal(StreamSignal::Closed {
                connection: self.connection,
            });
            if self.items.try_send(closed).is_err() {
                tracing::debug!("Closed signal not queued, consumer full or gone");
            }
        }
        self.set_state(ConnectionState::Closed);
        tracing::info!("Event stream closed");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}
