//! Per-job progress listener registry.
//!
//! Each listener gets its own bounded channel; delivery to one listener can
//! never block delivery to another or the worker message pump. A listener
//! whose channel is closed or full is silently dropped from the set.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use domain_jobs::ListenerEvent;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Events buffered per listener before the slowest one is dropped
const LISTENER_BUFFER: usize = 32;

/// Handle identifying one subscription within a job's set.
pub type ListenerId = u64;

#[derive(Default)]
pub struct SubscriberRegistry {
    inner: Mutex<HashMap<Uuid, HashMap<ListenerId, mpsc::Sender<ListenerEvent>>>>,
    next_id: AtomicU64,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for a job. The set is created on first insert.
    pub fn subscribe(&self, job_id: Uuid) -> (ListenerId, mpsc::Receiver<ListenerEvent>) {
        let (tx, rx) = mpsc::channel(LISTENER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock().expect("subscriber map poisoned");
        inner.entry(job_id).or_default().insert(id, tx);

        debug!(%job_id, listener = id, "Listener subscribed");
        (id, rx)
    }

    /// Remove a listener; the job's set is deleted when it empties.
    pub fn unsubscribe(&self, job_id: Uuid, listener: ListenerId) {
        let mut inner = self.inner.lock().expect("subscriber map poisoned");
        if let Some(set) = inner.get_mut(&job_id) {
            set.remove(&listener);
            if set.is_empty() {
                inner.remove(&job_id);
            }
        }
        debug!(%job_id, listener, "Listener unsubscribed");
    }

    /// Point-in-time copy of a job's listener senders.
    ///
    /// Fan-out iterates the copy so the map is never locked across a send.
    pub fn snapshot(&self, job_id: Uuid) -> Vec<(ListenerId, mpsc::Sender<ListenerEvent>)> {
        let inner = self.inner.lock().expect("subscriber map poisoned");
        inner
            .get(&job_id)
            .map(|set| set.iter().map(|(id, tx)| (*id, tx.clone())).collect())
            .unwrap_or_default()
    }

    /// Total listeners across all jobs.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("subscriber map poisoned");
        inner.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every listener of a job.
    ///
    /// Uses `try_send`: a closed receiver or a full buffer (too-slow
    /// listener) drops that subscription. Never blocks.
    pub fn fan_out(&self, job_id: Uuid, event: ListenerEvent) {
        let listeners = self.snapshot(job_id);
        for (id, tx) in listeners {
            if tx.try_send(event.clone()).is_err() {
                debug!(%job_id, listener = id, "Dropping unreachable or lagging listener");
                self.unsubscribe(job_id, id);
            }
        }
    }
}
