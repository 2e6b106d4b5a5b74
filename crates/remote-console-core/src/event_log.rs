//! Bounded history + observers for console rendering.

use std::{
    collections::VecDeque,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, Mutex, PoisonError, RwLock, Weak},
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    Command, CommandOutcome, Event, EventKind, StreamSignal, config::DEFAULT_LOG_CAPACITY,
};

/// Live fan-out buffer for `EventLog::stream` receivers.
const LIVE_BUFFER: usize = 1024;

/// One entry of the console log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// A dispatched command and its resolved outcome.
    Command {
        command: Command,
        outcome: CommandOutcome,
    },
    /// An event received on the push stream.
    Event(Event),
    /// A stream lifecycle change.
    Lifecycle { signal: StreamSignal, at: i64 },
}

impl LogEntry {
    /// The event, if this entry is one.
    #[must_use]
    pub const fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(event) => Some(event),
            _ => None,
        }
    }

    /// The command and outcome, if this entry is one.
    #[must_use]
    pub const fn as_command(&self) -> Option<(&Command, &CommandOutcome)> {
        match self {
            Self::Command { command, outcome } => Some((command, outcome)),
            _ => None,
        }
    }

    /// The lifecycle signal, if this entry is one.
    #[must_use]
    pub const fn as_signal(&self) -> Option<&StreamSignal> {
        match self {
            Self::Lifecycle { signal, .. } => Some(signal),
            _ => None,
        }
    }
}

/// Renders the line shown on the console.
impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command {
                outcome: CommandOutcome::Ok(reply),
                ..
            } => write!(f, "Cmd: {reply}"),
            Self::Command { command, outcome } => write!(f, "Cmd {}: {outcome}", command.payload),
            Self::Event(event) => match &event.kind {
                EventKind::Message => write!(f, "Event: {}", event.data),
                kind => write!(f, "Event[{}]: {}", kind.as_str(), event.data),
            },
            Self::Lifecycle { signal, .. } => match signal {
                StreamSignal::Opened { .. } => f.write_str("Events Opened"),
                StreamSignal::Closed { .. } => f.write_str("Events Closed"),
                StreamSignal::Reconnecting { attempt, delay_ms } => {
                    write!(f, "Events Reconnecting (attempt {attempt}, in {delay_ms}ms)")
                }
                StreamSignal::GaveUp { attempts } => {
                    write!(f, "Events Gave Up after {attempts} attempts")
                }
            },
        }
    }
}

/// Error reported by an observer. Logged, never propagated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    /// Create an observer error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

type Observer = Arc<dyn Fn(&LogEntry) -> Result<(), ObserverError> + Send + Sync>;

#[derive(Default)]
struct Observers {
    next_id: u64,
    list: Vec<(u64, Observer)>,
}

struct Inner {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    appended: u64,
    evicted: u64,
}

/// Entries waiting for observers, in log order.
#[derive(Default)]
struct Pending {
    queue: VecDeque<LogEntry>,
    draining: bool,
}

/// Bounded, ordered log with observers.
///
/// Oldest entries are dropped silently once `capacity` is reached.
/// Observers run in registration order and see entries in log order. An
/// observer that fails or panics is logged and skipped; it never affects
/// other observers or the log itself.
///
/// No lock is held while observers run, so an observer may read the log or
/// append to it. Entries appended while another call is notifying are
/// delivered by that call, after the entry it is working on.
pub struct EventLog {
    inner: RwLock<Inner>,
    observers: Arc<Mutex<Observers>>,
    pending: Mutex<Pending>,
    sender: broadcast::Sender<LogEntry>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create a log with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a log holding at most `capacity` entries (at least 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(LIVE_BUFFER);
        Self {
            inner: RwLock::new(Inner {
                entries: VecDeque::with_capacity(capacity.min(256)),
                capacity,
                appended: 0,
                evicted: 0,
            }),
            observers: Arc::new(Mutex::new(Observers::default())),
            pending: Mutex::new(Pending::default()),
            sender,
        }
    }

    /// Append an entry, evicting the oldest if full, then notify observers.
    pub fn append(&self, entry: LogEntry) {
        {
            let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            if inner.entries.len() >= inner.capacity {
                inner.entries.pop_front();
                inner.evicted += 1;
            }
            inner.entries.push_back(entry.clone());
            inner.appended += 1;

            // Still under the write lock: live listeners and observers get
            // entries in the order they entered the log.
            let _ = self.sender.send(entry.clone());
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .queue
                .push_back(entry);
        }

        self.drain();
    }

    fn drain(&self) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            if pending.draining {
                return;
            }
            pending.draining = true;
        }

        loop {
            let next = {
                let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
                let next = pending.queue.pop_front();
                if next.is_none() {
                    pending.draining = false;
                }
                next
            };
            let Some(entry) = next else {
                return;
            };
            self.notify(&entry);
        }
    }

    fn notify(&self, entry: &LogEntry) {
        // Copy out so observers may (un)subscribe while being notified.
        let observers: Vec<(u64, Observer)> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .list
            .clone();

        for (id, observer) in observers {
            match catch_unwind(AssertUnwindSafe(|| observer(entry))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(observer = id, error = %e, "Log observer failed"),
                Err(_) => tracing::error!(observer = id, "Log observer panicked"),
            }
        }
    }

    /// Copy of the current entries, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .cloned()
            .collect()
    }

    /// Register an observer. It stays registered until the returned
    /// handle is dropped or `unsubscribe` is called.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&LogEntry) -> Result<(), ObserverError> + Send + Sync + 'static,
    {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let id = observers.next_id;
        observers.next_id += 1;
        observers.list.push((id, Arc::new(observer)));

        Subscription {
            id,
            observers: Arc::downgrade(&self.observers),
        }
    }

    /// Stream that yields the current history, then live entries.
    ///
    /// A receiver that falls too far behind skips the entries it missed.
    #[must_use]
    pub fn stream(&self) -> futures::stream::BoxStream<'static, LogEntry> {
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<LogEntry> = inner.entries.iter().cloned().collect();
            (history, self.sender.subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx)
            .filter_map(|res: Result<LogEntry, _>| async move { res.ok() });

        Box::pin(hist.chain(live))
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).entries.len()
    }

    /// Whether the log holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).capacity
    }

    /// Number of entries dropped by eviction so far.
    #[must_use]
    pub fn evicted(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).evicted
    }

    /// Number of entries ever appended.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).appended
    }
}

/// Observer registration handle.
pub struct Subscription {
    id: u64,
    observers: Weak<Mutex<Observers>>,
}

impl Subscription {
    /// Remove the observer.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(observers) = self.observers.upgrade() {
            observers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .list
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::now_millis;

    fn event(sequence: u64) -> LogEntry {
        LogEntry::Event(Event {
            kind: EventKind::Message,
            data: format!("e{sequence}"),
            received_at: now_millis(),
            sequence,
            connection: 1,
        })
    }

    fn sequences(log: &EventLog) -> Vec<u64> {
        log.snapshot()
            .iter()
            .filter_map(|e| e.as_event().map(|ev| ev.sequence))
            .collect()
    }

    #[test]
    fn test_eviction_capacity_one() {
        let log = EventLog::with_capacity(1);
        log.append(event(1));
        log.append(event(2));
        assert_eq!(sequences(&log), vec![2]);
        assert_eq!(log.evicted(), 1);
    }

    #[test]
    fn test_eviction_capacity_two() {
        let log = EventLog::with_capacity(2);
        for n in 1..=3 {
            log.append(event(n));
        }
        assert_eq!(sequences(&log), vec![2, 3]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_eviction_large_capacity() {
        let capacity = 5000;
        let log = EventLog::with_capacity(capacity);
        for n in 1..=(capacity as u64 + 1) {
            log.append(event(n));
        }
        let seqs = sequences(&log);
        assert_eq!(seqs.len(), capacity);
        assert_eq!(seqs.first(), Some(&2));
        assert_eq!(seqs.last(), Some(&(capacity as u64 + 1)));
        assert_eq!(log.appended(), capacity as u64 + 1);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = EventLog::with_capacity(0);
        assert_eq!(log.capacity(), 1);
        log.append(event(1));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let log = EventLog::new();
        log.append(event(1));
        let snap = log.snapshot();
        log.append(event(2));
        assert_eq!(snap.len(), 1);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_observers_in_registration_order() {
        let log = EventLog::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        let c1 = Arc::clone(&calls);
        let _a = log.subscribe(move |_| {
            c1.lock().unwrap().push("a");
            Ok(())
        });
        let c2 = Arc::clone(&calls);
        let _b = log.subscribe(move |_| {
            c2.lock().unwrap().push("b");
            Ok(())
        });

        log.append(event(1));
        log.append(event(2));
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b", "a", "b"]);
    }

    #[test]
    fn test_failing_observers_are_isolated() {
        let log = EventLog::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let _err = log.subscribe(|_| Err(ObserverError::new("render failed")));
        let _panic = log.subscribe(|_| panic!("widget crashed"));
        let counter = Arc::clone(&seen);
        let _ok = log.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        log.append(event(1));
        log.append(event(2));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(sequences(&log), vec![1, 2]);
    }

    #[test]
    fn test_observer_may_reenter_the_log() {
        let log = Arc::new(EventLog::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&log);
        let sink = Arc::clone(&seen);
        let _sub = log.subscribe(move |entry| {
            let Some(log) = weak.upgrade() else {
                return Ok(());
            };
            let sequence = entry.as_event().map(|e| e.sequence);
            sink.lock().unwrap().push((sequence, log.len()));
            if sequence == Some(1) {
                let _live = log.stream();
                log.append(event(10));
            }
            Ok(())
        });

        log.append(event(1));
        log.append(event(2));

        assert_eq!(sequences(&log), vec![1, 10, 2]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![(Some(1), 1), (Some(10), 2), (Some(2), 3)]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let log = EventLog::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&seen);
        let sub = log.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        log.append(event(1));
        sub.unsubscribe();
        log.append(event(2));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outliving_log() {
        let log = EventLog::new();
        let sub = log.subscribe(|_| Ok(()));
        drop(log);
        drop(sub);
    }

    #[test]
    fn test_console_lines() {
        let cmd = Command::new("STP");
        let ok = LogEntry::Command {
            command: cmd.clone(),
            outcome: CommandOutcome::Ok("OK".into()),
        };
        assert_eq!(ok.to_string(), "Cmd: OK");

        let timed_out = LogEntry::Command {
            command: cmd,
            outcome: CommandOutcome::TimedOut,
        };
        assert_eq!(timed_out.to_string(), "Cmd STP: timed out");

        let cmd_event = LogEntry::Event(Event {
            kind: EventKind::Cmd,
            data: "OK".into(),
            received_at: 0,
            sequence: 1,
            connection: 1,
        });
        assert_eq!(cmd_event.to_string(), "Event[cmd]: OK");
        assert_eq!(event(7).to_string(), "Event: e7");

        let opened = LogEntry::Lifecycle {
            signal: StreamSignal::Opened { connection: 1 },
            at: 0,
        };
        assert_eq!(opened.to_string(), "Events Opened");
        let closed = LogEntry::Lifecycle {
            signal: StreamSignal::Closed { connection: 1 },
            at: 0,
        };
        assert_eq!(closed.to_string(), "Events Closed");
    }

    #[tokio::test]
    async fn test_stream_history_then_live() {
        let log = EventLog::new();
        log.append(event(1));
        log.append(event(2));

        let mut stream = log.stream();
        log.append(event(3));

        let mut got = Vec::new();
        for _ in 0..3 {
            let entry = tokio_test::assert_ok!(
                tokio::time::timeout(std::time::Duration::from_secs(1), stream.next()).await
            );
            got.push(entry.and_then(|e| e.as_event().map(|ev| ev.sequence)));
        }
        assert_eq!(got, vec![Some(1), Some(2), Some(3)]);
    }
}
