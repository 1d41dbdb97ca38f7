//! RAII listener registration
//!
//! A [`ListenerSet`] fans items out to every registered [`Listener`]. Each
//! listener owns a bounded channel and a unique id; dropping the listener
//! removes it from the set, so registrations can never leak or collide.
//!
//! Delivery never blocks the notifier. A listener whose buffer is full loses
//! the item and a warning is logged.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

type Registry<T> = Mutex<HashMap<Uuid, mpsc::Sender<T>>>;

fn lock<T>(registry: &Registry<T>) -> MutexGuard<'_, HashMap<Uuid, mpsc::Sender<T>>> {
    registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Set of listeners for one kind of notification
pub struct ListenerSet<T> {
    kind: &'static str,
    capacity: usize,
    registry: Arc<Registry<T>>,
}

impl<T> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            kind: self.kind,
            capacity: self.capacity,
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T> std::fmt::Debug for ListenerSet<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("kind", &self.kind)
            .field("listeners", &lock(&self.registry).len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> ListenerSet<T> {
    pub fn new(kind: &'static str, capacity: usize) -> Self {
        Self {
            kind,
            capacity: capacity.max(1),
            registry: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a new listener
    pub fn register(&self) -> Listener<T> {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        lock(&self.registry).insert(id, sender);
        debug!(kind = self.kind, listener_id = %id, "Registered listener");

        Listener {
            id,
            receiver,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver an item to every listener, returning how many accepted it
    pub fn notify(&self, item: T) -> usize {
        let mut registry = lock(&self.registry);
        let mut delivered = 0;

        registry.retain(|id, sender| match sender.try_send(item.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!(
                    kind = self.kind,
                    listener_id = %id,
                    "Listener buffer full, dropping notification"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });

        delivered
    }

    /// Drop every registration, ending all listener streams
    pub fn clear(&self) {
        lock(&self.registry).clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.registry).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving side of a registration
pub struct Listener<T> {
    id: Uuid,
    receiver: mpsc::Receiver<T>,
    registry: Weak<Registry<T>>,
}

impl<T> Listener<T> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next item; `None` once the set was cleared or dropped
    pub async fn recv(&mut self) -> Option<T> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }
}

impl<T> Drop for Listener<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).remove(&self.id);
        }
    }
}

impl<T> std::fmt::Debug for Listener<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener").field("id", &self.id).finish()
    }
}
