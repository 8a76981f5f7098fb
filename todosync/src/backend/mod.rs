//! Remote persistence and notification backend.
//!
//! Defines the [`Backend`] capability consumed by the sync engine and its
//! implementations:
//! - [`loopback::LoopbackBackend`]: in-process backend shared by several
//!   engines, for tests and offline demos
//! - [`relay::RelayBackend`]: WebSocket client for `todosync-relay`

pub mod loopback;
pub mod relay;

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use todosync_proto::task::RemoteRecord;

use crate::auth::Identity;

pub use loopback::LoopbackBackend;
pub use relay::RelayBackend;

/// Errors that can occur while talking to the backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The connection to the backend has been closed.
    #[error("connection to the sync server closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("sync server timed out")]
    Timeout,

    /// The backend at the given address cannot be reached.
    #[error("sync server {0} is unreachable")]
    Unreachable(String),

    /// The backend refused the request.
    #[error("sync server rejected the request: {0}")]
    Rejected(String),

    /// The backend sent data that could not be decoded.
    #[error("malformed data from sync server: {0}")]
    Malformed(String),

    /// An underlying I/O error occurred.
    #[error("sync I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle to a live change subscription.
///
/// Delivery stops when the handle is released or dropped; the release hook
/// runs exactly once either way.
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a handle that runs `release` when the subscription ends.
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    /// Stops delivery now.
    pub fn release(mut self) {
        self.run_release();
    }

    /// Returns `true` until the handle has been released.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.release.is_some()
    }

    fn run_release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Delivers records to one subscriber, keeping only the newest while the
/// subscriber is behind.
///
/// Every record is a full snapshot, so skipping intermediate ones loses
/// nothing; the newest is always delivered. A forwarder task moves records
/// into the subscriber's channel in arrival order and exits once either
/// side is gone.
#[derive(Debug)]
struct LatestRecord {
    latest: watch::Sender<Option<RemoteRecord>>,
}

impl LatestRecord {
    fn spawn(updates: mpsc::Sender<RemoteRecord>) -> Self {
        let (latest, mut pending) = watch::channel(None);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    changed = pending.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    () = updates.closed() => break,
                }
                let Some(record) = pending.borrow_and_update().clone() else {
                    continue;
                };
                if updates.send(record).await.is_err() {
                    break;
                }
            }
        });
        Self { latest }
    }

    /// Replaces any record not yet handed to the subscriber.
    fn offer(&self, record: RemoteRecord) {
        self.latest.send_replace(Some(record));
    }

    /// Whether the subscriber has gone away.
    fn is_closed(&self) -> bool {
        self.latest.is_closed()
    }
}

/// Async backend storing one [`RemoteRecord`] per identity and notifying
/// subscribers when it changes.
///
/// Records are full replacement snapshots; the backend never merges.
pub trait Backend: Send + Sync {
    /// Fetches the stored record for `identity`. `Ok(None)` means the user
    /// has never stored anything.
    fn fetch_state(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<Option<RemoteRecord>, BackendError>> + Send;

    /// Replaces the stored record for `identity`.
    fn upsert_state(
        &self,
        identity: &Identity,
        record: &RemoteRecord,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Starts delivering every newly stored record for `identity` into
    /// `updates` until the returned [`Subscription`] is released.
    fn subscribe(
        &self,
        identity: &Identity,
        updates: mpsc::Sender<RemoteRecord>,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send;
}

impl<B: Backend + ?Sized> Backend for Arc<B> {
    fn fetch_state(
        &self,
        identity: &Identity,
    ) -> impl Future<Output = Result<Option<RemoteRecord>, BackendError>> + Send {
        (**self).fetch_state(identity)
    }

    fn upsert_state(
        &self,
        identity: &Identity,
        record: &RemoteRecord,
    ) -> impl Future<Output = Result<(), BackendError>> + Send {
        (**self).upsert_state(identity, record)
    }

    fn subscribe(
        &self,
        identity: &Identity,
        updates: mpsc::Sender<RemoteRecord>,
    ) -> impl Future<Output = Result<Subscription, BackendError>> + Send {
        (**self).subscribe(identity, updates)
    }
}
