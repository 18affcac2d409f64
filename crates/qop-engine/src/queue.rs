//! Keyed work queue with per-key serialization.
//!
//! The queue deduplicates keys and guarantees that no two workers ever
//! process the same key concurrently: a key added while it is being
//! processed is parked in the dirty set and re-queued when the worker calls
//! [`WorkQueue::done`]. This is the core correctness property of the
//! reconciliation loop.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::sync::{Mutex, Notify};

use qop_api::NamespacedName;

#[derive(Default)]
struct State {
    queue: VecDeque<NamespacedName>,
    /// Keys needing processing (queued or re-added mid-processing).
    dirty: FxHashSet<NamespacedName>,
    /// Keys currently held by a worker.
    processing: FxHashSet<NamespacedName>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
}

/// Deduplicating, per-key-serialized work queue.
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl WorkQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    /// Add a key for processing. Duplicate adds collapse; a key under
    /// processing is deferred until its worker finishes.
    pub async fn add(&self, key: NamespacedName) {
        let mut state = self.inner.state.lock().await;
        if state.shutting_down || state.dirty.contains(&key) {
            return;
        }
        state.dirty.insert(key.clone());
        if state.processing.contains(&key) {
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Add a key after a delay.
    pub fn add_after(&self, key: NamespacedName, delay: Duration) {
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key).await;
        });
    }

    /// Take the next key, waiting until one is available. Returns `None`
    /// once the queue is shutting down and drained.
    pub async fn next(&self) -> Option<NamespacedName> {
        loop {
            // Register interest before checking state so a notification
            // landing in between is not lost.
            let mut notified = std::pin::pin!(self.inner.notify.notified());
            notified.as_mut().enable();
            {
                let mut state = self.inner.state.lock().await;
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark a key's processing pass finished. If the key was re-added in
    /// the meantime it goes back on the queue.
    pub async fn done(&self, key: &NamespacedName) {
        let mut state = self.inner.state.lock().await;
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting new keys and wake idle workers. Queued keys are
    /// still served so workers can drain.
    pub async fn shut_down(&self) {
        let mut state = self.inner.state.lock().await;
        state.shutting_down = true;
        drop(state);
        self.inner.notify.notify_waiters();
    }

    /// Number of keys waiting (excluding keys under processing).
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.queue.len()
    }

    /// Whether no keys are waiting.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}
