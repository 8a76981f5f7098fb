//! In-process backend for tests and offline demos.
//!
//! A [`LoopbackBackend`] is a cheap handle to shared state; clone it to hand
//! the same backend to several engines and they will see each other's
//! writes just like devices sharing a hosted service. Every upsert is
//! broadcast to all subscribers of that identity, the writer included.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use todosync_proto::task::RemoteRecord;

use super::{Backend, BackendError, LatestRecord, Subscription};
use crate::auth::Identity;

#[derive(Debug)]
struct Subscriber {
    identity: Identity,
    updates: LatestRecord,
}

#[derive(Debug)]
struct Shared {
    records: Mutex<HashMap<Identity, RemoteRecord>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_subscription: AtomicU64,
    fetch_calls: AtomicUsize,
    upsert_calls: AtomicUsize,
    subscribe_calls: AtomicUsize,
    fail_next_fetch: AtomicBool,
    fail_next_upsert: AtomicBool,
    fail_next_subscribe: AtomicBool,
    /// Fetches wait while this is `false`.
    fetch_gate: watch::Sender<bool>,
}

impl Shared {
    fn broadcast(&self, identity: &Identity, record: &RemoteRecord) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|id, sub| {
            if sub.identity != *identity {
                return true;
            }
            if sub.updates.is_closed() {
                tracing::debug!(subscription = id, "dropping closed loopback subscriber");
                return false;
            }
            sub.updates.offer(record.clone());
            true
        });
    }
}

/// Shared in-memory [`Backend`] with call counters and failure injection.
#[derive(Debug, Clone)]
pub struct LoopbackBackend {
    shared: Arc<Shared>,
}

impl LoopbackBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        let (fetch_gate, _) = watch::channel(true);
        Self {
            shared: Arc::new(Shared {
                records: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscription: AtomicU64::new(1),
                fetch_calls: AtomicUsize::new(0),
                upsert_calls: AtomicUsize::new(0),
                subscribe_calls: AtomicUsize::new(0),
                fail_next_fetch: AtomicBool::new(false),
                fail_next_upsert: AtomicBool::new(false),
                fail_next_subscribe: AtomicBool::new(false),
                fetch_gate,
            }),
        }
    }

    /// Stores `record` for `identity` and notifies its subscribers, as if
    /// another device had pushed it. Not counted as an upsert call.
    pub fn push_remote(&self, identity: &Identity, record: RemoteRecord) {
        // Notify under the records lock so subscribers see writes in store order.
        let mut records = self.shared.records.lock();
        records.insert(identity.clone(), record.clone());
        self.shared.broadcast(identity, &record);
    }

    /// The record currently stored for `identity`.
    #[must_use]
    pub fn stored(&self, identity: &Identity) -> Option<RemoteRecord> {
        self.shared.records.lock().get(identity).cloned()
    }

    /// Number of live subscriptions for `identity`.
    #[must_use]
    pub fn subscriber_count(&self, identity: &Identity) -> usize {
        self.shared
            .subscribers
            .lock()
            .values()
            .filter(|sub| sub.identity == *identity)
            .count()
    }

    /// Number of `fetch_state` calls so far.
    #[must_use]
    pub fn fetch_calls(&self) -> usize {
        self.shared.fetch_calls.load(Ordering::SeqCst)
    }

    /// Number of `upsert_state` calls so far.
    #[must_use]
    pub fn upsert_calls(&self) -> usize {
        self.shared.upsert_calls.load(Ordering::SeqCst)
    }

    /// Number of `subscribe` calls so far.
    #[must_use]
    pub fn subscribe_calls(&self) -> usize {
        self.shared.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Makes the next `fetch_state` fail.
    pub fn fail_next_fetch(&self) {
        self.shared.fail_next_fetch.store(true, Ordering::SeqCst);
    }

    /// Makes the next `upsert_state` fail.
    pub fn fail_next_upsert(&self) {
        self.shared.fail_next_upsert.store(true, Ordering::SeqCst);
    }

    /// Makes the next `subscribe` fail.
    pub fn fail_next_subscribe(&self) {
        self.shared.fail_next_subscribe.store(true, Ordering::SeqCst);
    }

    /// Holds every `fetch_state` call until [`Self::release_fetches`].
    pub fn hold_fetches(&self) {
        self.shared.fetch_gate.send_replace(false);
    }

    /// Lets held and future fetches complete.
    pub fn release_fetches(&self) {
        self.shared.fetch_gate.send_replace(true);
    }
}

impl Default for LoopbackBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for LoopbackBackend {
    async fn fetch_state(&self, identity: &Identity) -> Result<Option<RemoteRecord>, BackendError> {
        self.shared.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.shared.fetch_gate.subscribe();
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| BackendError::ConnectionClosed)?;
        if self.shared.fail_next_fetch.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Unreachable("loopback".into()));
        }
        Ok(self.stored(identity))
    }

    async fn upsert_state(
        &self,
        identity: &Identity,
        record: &RemoteRecord,
    ) -> Result<(), BackendError> {
        self.shared.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_next_upsert.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Unreachable("loopback".into()));
        }
        self.push_remote(identity, record.clone());
        Ok(())
    }

    async fn subscribe(
        &self,
        identity: &Identity,
        updates: mpsc::Sender<RemoteRecord>,
    ) -> Result<Subscription, BackendError> {
        self.shared.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_next_subscribe.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Rejected("subscription refused".into()));
        }
        let id = self.shared.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.shared.subscribers.lock().insert(
            id,
            Subscriber {
                identity: identity.clone(),
                updates: LatestRecord::spawn(updates),
            },
        );
        tracing::debug!(subscription = id, identity = %identity, "loopback subscription added");

        let shared = Arc::clone(&self.shared);
        Ok(Subscription::new(move || {
            shared.subscribers.lock().remove(&id);
            tracing::debug!(subscription = id, "loopback subscription released");
        }))
    }
}
