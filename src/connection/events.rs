//! Connection event stream
//!
//! Events are level state: `Connected` means "active as of now". The emitter
//! suppresses consecutive duplicates before they reach the channel, and the
//! channel is bounded so a stalled consumer applies back-pressure instead of
//! growing memory. Closing the stream releases an emit blocked on that
//! back-pressure, so a stalled consumer never holds up shutdown.

use super::manager::wait_for_shutdown;
use std::fmt;
use std::sync::Mutex as StdMutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

pub(crate) const EVENT_CHANNEL_CAPACITY: usize = 32;

/// High level connection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    ShuttingDown,
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionEvent::Connected => "connected",
            ConnectionEvent::Disconnected => "disconnected",
            ConnectionEvent::ShuttingDown => "shutting_down",
        };
        f.write_str(name)
    }
}

/// Suppresses consecutive identical events
#[derive(Debug, Default, Clone)]
pub struct EventDeduplicator {
    last: Option<ConnectionEvent>,
}

impl EventDeduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `event` differs from the last admitted event
    pub fn admit(&mut self, event: ConnectionEvent) -> bool {
        if self.last == Some(event) {
            return false;
        }
        self.last = Some(event);
        true
    }

    pub fn last(&self) -> Option<ConnectionEvent> {
        self.last
    }
}

/// Single-consumer stream of connection events
#[derive(Debug)]
pub struct ConnectionEvents {
    receiver: mpsc::Receiver<ConnectionEvent>,
}

impl ConnectionEvents {
    /// Raw event stream fed by the returned sender, without deduplication
    pub fn channel(capacity: usize) -> (mpsc::Sender<ConnectionEvent>, Self) {
        let (sender, receiver) = mpsc::channel(capacity);
        (sender, Self { receiver })
    }

    /// Next event; `None` once the manager shut down and the buffer drained
    pub async fn next(&mut self) -> Option<ConnectionEvent> {
        self.receiver.recv().await
    }
}

struct EmitterState {
    sender: Option<mpsc::Sender<ConnectionEvent>>,
    dedup: EventDeduplicator,
}

/// Sending side shared by the manager and its supervisor task
pub(crate) struct EventEmitter {
    state: Mutex<EmitterState>,
    last: StdMutex<Option<ConnectionEvent>>,
    closing: watch::Sender<bool>,
}

impl EventEmitter {
    pub(crate) fn channel(capacity: usize) -> (Self, ConnectionEvents) {
        let (sender, events) = ConnectionEvents::channel(capacity);
        let (closing, _) = watch::channel(false);
        let emitter = Self {
            state: Mutex::new(EmitterState {
                sender: Some(sender),
                dedup: EventDeduplicator::new(),
            }),
            last: StdMutex::new(None),
            closing,
        };
        (emitter, events)
    }

    /// Emit an event, waiting for buffer space if the consumer is behind
    ///
    /// The wait ends early, dropping the event, once [`EventEmitter::finish`]
    /// starts closing the stream.
    pub(crate) async fn emit(&self, event: ConnectionEvent) {
        let mut state = self.state.lock().await;
        let Some(sender) = state.sender.clone() else {
            return;
        };
        if !state.dedup.admit(event) {
            debug!(%event, "Suppressed duplicate connection event");
            return;
        }
        self.record(event);

        let mut closing = self.closing.subscribe();
        tokio::select! {
            biased;
            result = sender.send(event) => {
                if result.is_err() {
                    debug!(%event, "Connection event consumer gone");
                    state.sender = None;
                }
            }
            _ = wait_for_shutdown(&mut closing) => {
                warn!(%event, "Connection event stream closing, dropped event blocked on full buffer");
            }
        }
    }

    /// Emit a final event without waiting and close the stream
    pub(crate) async fn finish(&self, event: ConnectionEvent) {
        self.closing.send_replace(true);
        let mut state = self.state.lock().await;
        let Some(sender) = state.sender.take() else {
            return;
        };
        if !state.dedup.admit(event) {
            return;
        }
        self.record(event);

        match sender.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(_)) => {
                warn!(%event, "Connection event buffer full, closing stream without final event");
            }
        }
    }

    /// Last event admitted by the deduplicator
    pub(crate) fn last(&self) -> Option<ConnectionEvent> {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: ConnectionEvent) {
        *self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(event);
    }
}
