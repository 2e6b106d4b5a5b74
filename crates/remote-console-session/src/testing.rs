//! Scripted in-memory transports for tests.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream};
use remote_console_core::{
    CommandTransport, EventTransport, FrameStream, RawFrame, StreamError, TransportError,
};

use crate::{EventItems, StreamItem};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Next item, or `None` if the stream ended or stayed silent for a minute.
pub(crate) async fn next_item(items: &mut EventItems) -> Option<StreamItem> {
    tokio::time::timeout(Duration::from_secs(60), items.next())
        .await
        .ok()
        .flatten()
}

type Reply = (Duration, Result<String, TransportError>);

/// Command transport answering from a closure after a per-payload delay.
pub(crate) struct FnCommands<F> {
    reply: F,
    sent: Mutex<Vec<String>>,
    completed: Mutex<Vec<String>>,
    count: AtomicUsize,
}

impl<F> FnCommands<F>
where
    F: Fn(&str) -> Reply + Send + Sync,
{
    pub(crate) fn new(reply: F) -> Self {
        Self {
            reply,
            sent: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub(crate) fn completion_order(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub(crate) fn completed(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> CommandTransport for FnCommands<F>
where
    F: Fn(&str) -> Reply + Send + Sync,
{
    async fn send(&self, payload: &str) -> Result<String, TransportError> {
        self.sent.lock().unwrap().push(payload.to_string());
        let (delay, result) = (self.reply)(payload);
        tokio::time::sleep(delay).await;
        self.completed.lock().unwrap().push(payload.to_string());
        self.count.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// What a scripted connection does after its frames.
pub(crate) enum After {
    /// Server closes the stream.
    End,
    /// Connection stays open and silent.
    Hang,
    /// Connection breaks.
    Fail(TransportError),
}

/// One scripted connection attempt.
pub(crate) enum Connect {
    Fail(TransportError),
    Hang,
    Frames(Vec<Result<RawFrame, StreamError>>, After),
}

/// Event transport replaying a script, one entry per `connect`.
/// Fails every attempt once the script runs out.
pub(crate) struct ScriptedEvents {
    script: Mutex<VecDeque<Connect>>,
    last_event_ids: Mutex<Vec<Option<String>>>,
}

impl ScriptedEvents {
    pub(crate) fn new(script: Vec<Connect>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last_event_ids: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn connect_count(&self) -> usize {
        self.last_event_ids.lock().unwrap().len()
    }

    pub(crate) fn last_event_ids(&self) -> Vec<Option<String>> {
        self.last_event_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventTransport for ScriptedEvents {
    async fn connect(&self, last_event_id: Option<&str>) -> Result<FrameStream, TransportError> {
        self.last_event_ids
            .lock()
            .unwrap()
            .push(last_event_id.map(str::to_string));

        let next = self.script.lock().unwrap().pop_front();
        match next {
            None => Err(TransportError::Connect("script exhausted".into())),
            Some(Connect::Fail(e)) => Err(e),
            Some(Connect::Hang) => futures::future::pending().await,
            Some(Connect::Frames(frames, after)) => {
                let tail = match after {
                    After::End => stream::empty().boxed(),
                    After::Hang => stream::pending().boxed(),
                    After::Fail(e) => {
                        stream::once(async move { Err(StreamError::Transport(e)) }).boxed()
                    }
                };
                Ok(stream::iter(frames).chain(tail).boxed())
            }
        }
    }
}
