//! Fan-out of published values to observers.
//!
//! Both the session router (routing states) and the sync engine
//! (notification events) publish through a [`Broadcaster`]. Each observer
//! owns a bounded queue; an observer whose queue is full is dropped rather
//! than blocking the publisher.

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

/// Unique identifier for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Handle held by an observer.
pub struct Observer<T> {
    pub id: ObserverId,
    /// Channel to receive published values.
    pub receiver: Receiver<T>,
}

impl<T> Observer<T> {
    /// Receive the next value (blocking).
    pub fn recv(&self) -> Result<T, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a value (non-blocking).
    pub fn try_recv(&self) -> Result<T, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<T, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Publishes values to every registered observer.
pub struct Broadcaster<T> {
    observers: RwLock<HashMap<ObserverId, Sender<T>>>,
    next_id: AtomicU64,
    buffer_size: usize,
}

impl<T: Clone> Broadcaster<T> {
    pub fn new(buffer_size: usize) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> Observer<T> {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(self.buffer_size);
        self.observers.write().insert(id, sender);
        Observer { id, receiver }
    }

    /// Register an observer whose queue starts with `initial`.
    pub fn subscribe_with(&self, initial: T) -> Observer<T> {
        let observer = self.subscribe();
        if let Some(sender) = self.observers.read().get(&observer.id) {
            let _ = sender.try_send(initial);
        }
        observer
    }

    pub fn unsubscribe(&self, id: ObserverId) {
        self.observers.write().remove(&id);
    }

    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver `value` to every observer. Drops observers that are full or gone.
    pub fn publish(&self, value: T) {
        let mut to_remove = Vec::new();

        {
            let observers = self.observers.read();
            for (id, sender) in observers.iter() {
                if sender.try_send(value.clone()).is_err() {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut observers = self.observers.write();
            for id in to_remove {
                debug!(observer = id.0, "dropping observer");
                observers.remove(&id);
            }
        }
    }
}
