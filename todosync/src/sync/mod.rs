//! Remote sync engine.
//!
//! [`SyncEngine`] owns the [`TaskBoard`] and keeps it in step with the local
//! cache and, while an identity is signed in, with the backend:
//!
//! ```text
//! Idle --start--> Loading --load done--> Synced <--> PushingLocal
//!   ^                                      |  <--> ReceivingRemote
//!   +---------------stop-------------------+
//! ```
//!
//! User actions enter through [`SyncEngine::dispatch`], which persists
//! locally and pushes the whole collection upstream. Backend work
//! (the initial load, subscription setup, inbound notifications) is driven
//! by [`SyncEngine::next_event`]. Every backend failure ends up in
//! [`SyncEngine::sync_error`]; nothing is returned to the caller.
//!
//! Each push is tagged with this engine's [`SessionId`] and a local
//! revision. Inbound records carrying our own session id and a revision not
//! newer than the last push are echoes and are skipped, unless a record from
//! another session was applied after that push: then the echo of the last
//! push is the newest state the backend holds and is adopted again.
//! Applying a remote record never pushes.

pub mod revision;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use todosync_proto::task::{Category, RemoteRecord, SessionId, Snapshot};

use crate::auth::Identity;
use crate::backend::{Backend, BackendError, Subscription};
use crate::store::{KeyValueStore, LocalCache};
use crate::tasks::{Change, TaskAction, TaskBoard, TaskError};

pub use revision::{Inbound, RevisionTracker};

/// Why [`SyncEngine::dispatch`] refused an action.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The initial load is outstanding; its result would overwrite the edit.
    #[error("still syncing, try again in a moment")]
    Syncing,

    /// The task collection rejected the action.
    #[error(transparent)]
    Task(#[from] TaskError),
}

/// Default capacity of the inbound notification channel.
pub const DEFAULT_UPDATE_BUFFER: usize = 64;

/// Where the engine is in its per-session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No remote session: signed out or no backend configured.
    Idle,
    /// Waiting for the initial fetch.
    Loading,
    /// Remote copy adopted; local changes are pushed.
    Synced,
    /// An upsert is in flight.
    PushingLocal,
    /// An inbound record is being applied.
    ReceivingRemote,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::Synced => "synced",
            Self::PushingLocal => "pushing",
            Self::ReceivingRemote => "receiving",
        };
        f.write_str(name)
    }
}

/// What [`SyncEngine::next_event`] observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The initial fetch completed and its result was adopted.
    Loaded {
        /// `false` when the backend had nothing stored for the identity.
        found: bool,
    },
    /// The initial fetch failed; local state is kept.
    LoadFailed,
    /// Change notifications are now being delivered.
    Subscribed,
    /// The subscription could not be established.
    SubscribeFailed,
    /// A record pushed by another session replaced the collection.
    RemoteApplied,
    /// Our latest push came back after a record from another session had
    /// been applied, and was adopted again.
    Resynced {
        /// Revision carried by the adopted record.
        revision: u64,
    },
    /// One of our own pushes came back and was skipped.
    EchoIgnored {
        /// Revision carried by the skipped record.
        revision: u64,
    },
    /// The backend stopped delivering notifications.
    SubscriptionClosed,
}

/// What the interface should render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardView<'a> {
    /// The initial load is outstanding.
    Syncing,
    /// The collection is ready to show.
    Ready(&'a Snapshot),
}

/// Aborts the wrapped task when dropped, so a result that arrives after
/// teardown is never observed.
#[derive(Debug)]
struct OwnedTask<T>(JoinHandle<T>);

impl<T> Drop for OwnedTask<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[derive(Debug)]
enum Phase {
    /// No backend: the identity is recorded but nothing syncs.
    LocalOnly,
    Loading(OwnedTask<Result<Option<RemoteRecord>, BackendError>>),
    Subscribing {
        task: OwnedTask<Result<Subscription, BackendError>>,
        updates: mpsc::Receiver<RemoteRecord>,
    },
    Listening {
        updates: mpsc::Receiver<RemoteRecord>,
        // Released when the phase is dropped.
        _subscription: Subscription,
    },
    /// Synced without live notifications.
    Detached,
}

#[derive(Debug)]
struct ActiveSession {
    identity: Identity,
    phase: Phase,
}

/// Result of the single await inside [`SyncEngine::next_event`].
enum Step {
    Loaded(Result<Option<RemoteRecord>, BackendError>),
    Subscribed(Result<Subscription, BackendError>),
    Received(Option<RemoteRecord>),
}

/// Keeps the task collection, the local cache and the backend in step.
pub struct SyncEngine<B, K> {
    backend: Option<Arc<B>>,
    cache: LocalCache<K>,
    board: TaskBoard,
    state: SyncState,
    sync_error: Option<String>,
    session_id: SessionId,
    revisions: RevisionTracker,
    session: Option<ActiveSession>,
    update_buffer: usize,
}

impl<B, K> fmt::Debug for SyncEngine<B, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncEngine")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("identity", &self.session.as_ref().map(|s| &s.identity))
            .field("tasks", &self.board.len())
            .field("sync_error", &self.sync_error)
            .finish_non_exhaustive()
    }
}

impl<B, K> SyncEngine<B, K>
where
    B: Backend + 'static,
    K: KeyValueStore,
{
    /// Creates an idle engine populated from the local cache.
    ///
    /// With `backend` set to `None` the engine runs local-only: identities
    /// are accepted but nothing is fetched or pushed.
    pub fn new(backend: Option<B>, cache: LocalCache<K>) -> Self {
        let board = TaskBoard::from_snapshot(cache.load());
        tracing::debug!(tasks = board.len(), "task board restored from local cache");
        Self {
            backend: backend.map(Arc::new),
            cache,
            board,
            state: SyncState::Idle,
            sync_error: None,
            session_id: SessionId::new(),
            revisions: RevisionTracker::new(),
            session: None,
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }

    /// Sets the capacity of the inbound notification channel used by
    /// subsequent sessions.
    #[must_use]
    pub fn with_update_buffer(mut self, update_buffer: usize) -> Self {
        self.update_buffer = update_buffer.max(1);
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SyncState {
        self.state
    }

    /// Identity of the current session, if any.
    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        self.session.as_ref().map(|s| &s.identity)
    }

    /// Most recent sync failure, cleared by the next successful load or push.
    #[must_use]
    pub fn sync_error(&self) -> Option<&str> {
        self.sync_error.as_deref()
    }

    /// Id stamped on every record this engine pushes.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Whether a backend is configured.
    #[must_use]
    pub const fn has_backend(&self) -> bool {
        self.backend.is_some()
    }

    /// The task collection.
    #[must_use]
    pub const fn board(&self) -> &TaskBoard {
        &self.board
    }

    /// What to render: nothing but a syncing notice while the initial load
    /// is outstanding.
    #[must_use]
    pub fn view(&self) -> BoardView<'_> {
        if self.state == SyncState::Loading {
            BoardView::Syncing
        } else {
            BoardView::Ready(self.board.snapshot())
        }
    }

    /// Remembers `category` as the default for creates without one.
    pub const fn select_category(&mut self, category: Category) {
        self.board.select_category(category);
    }

    /// Begins a session for `identity`, ending any previous one first.
    pub fn start(&mut self, identity: Identity) {
        self.stop();
        let Some(backend) = self.backend.clone() else {
            tracing::info!(identity = %identity, "no backend configured, staying local-only");
            self.session = Some(ActiveSession {
                identity,
                phase: Phase::LocalOnly,
            });
            return;
        };

        tracing::info!(identity = %identity, session = %self.session_id, "sync session starting");
        let fetch_identity = identity.clone();
        let load = tokio::spawn(async move { backend.fetch_state(&fetch_identity).await });
        self.session = Some(ActiveSession {
            identity,
            phase: Phase::Loading(OwnedTask(load)),
        });
        self.transition(SyncState::Loading);
    }

    /// Ends the current session. Any outstanding load is abandoned and the
    /// subscription, if one was established, is released. Safe to call at
    /// any time, any number of times.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        drop(session.phase);
        self.sync_error = None;
        self.transition(SyncState::Idle);
        tracing::info!(identity = %session.identity, "sync session stopped");
    }

    /// Starts, restarts or stops the session so it matches `identity`.
    pub fn follow_identity(&mut self, identity: Option<Identity>) {
        match identity {
            Some(identity) if self.identity() == Some(&identity) => {}
            Some(identity) => self.start(identity),
            None => self.stop(),
        }
    }

    /// Waits for the next piece of backend work and applies it.
    ///
    /// Never resolves while there is nothing to wait for (no session, a
    /// local-only session, or a session without live notifications).
    /// Cancel-safe: dropping the future before it resolves loses nothing.
    pub async fn next_event(&mut self) -> SyncEvent {
        let step = match self.session.as_mut().map(|s| &mut s.phase) {
            Some(Phase::Loading(load)) => Step::Loaded(joined(&mut load.0).await),
            Some(Phase::Subscribing { task, .. }) => Step::Subscribed(joined(&mut task.0).await),
            Some(Phase::Listening { updates, .. }) => Step::Received(updates.recv().await),
            Some(Phase::LocalOnly | Phase::Detached) | None => {
                return std::future::pending().await;
            }
        };

        match step {
            Step::Loaded(result) => {
                let event = self.finish_load(result);
                self.begin_subscription();
                event
            }
            Step::Subscribed(result) => self.finish_subscription(result),
            Step::Received(Some(record)) => self.apply_remote(record),
            Step::Received(None) => {
                tracing::warn!("change notifications stopped");
                self.set_phase(Phase::Detached);
                self.sync_error = Some(BackendError::ConnectionClosed.to_string());
                SyncEvent::SubscriptionClosed
            }
        }
    }

    /// Applies a user action, persists the result locally and, when synced,
    /// pushes the whole collection upstream.
    ///
    /// Actions that change nothing are neither persisted nor pushed. A
    /// failed push is recorded in [`Self::sync_error`] and retried with the
    /// next change.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::Syncing`] while the initial load is outstanding.
    /// - [`DispatchError::Task`] when the board rejects the action.
    ///
    /// Nothing is persisted or pushed in either case.
    pub async fn dispatch(&mut self, action: TaskAction) -> Result<Change, DispatchError> {
        if self.state == SyncState::Loading {
            tracing::debug!("action refused while the initial load is outstanding");
            return Err(DispatchError::Syncing);
        }
        let change = self.board.apply(action)?;
        if !change.is_change() {
            return Ok(change);
        }
        let revision = self.revisions.bump();
        self.persist_local();
        if self.can_push() {
            self.push(revision).await;
        } else {
            tracing::debug!(revision, state = %self.state, "local change kept local");
        }
        Ok(change)
    }

    fn can_push(&self) -> bool {
        matches!(
            self.state,
            SyncState::Synced | SyncState::PushingLocal | SyncState::ReceivingRemote
        )
    }

    async fn push(&mut self, revision: u64) {
        let (Some(backend), Some(session)) = (self.backend.clone(), self.session.as_ref()) else {
            return;
        };
        let identity = session.identity.clone();
        let record = RemoteRecord::new(
            self.session_id.clone(),
            revision,
            self.board.snapshot().clone(),
        );
        self.revisions.mark_pushed(revision);
        self.transition(SyncState::PushingLocal);
        let result = backend.upsert_state(&identity, &record).await;
        self.transition(SyncState::Synced);
        match result {
            Ok(()) => {
                tracing::debug!(identity = %identity, revision, "pushed local changes");
                self.sync_error = None;
            }
            Err(e) => {
                tracing::warn!(identity = %identity, revision, error = %e, "push failed");
                self.sync_error = Some(e.to_string());
            }
        }
    }

    fn finish_load(&mut self, result: Result<Option<RemoteRecord>, BackendError>) -> SyncEvent {
        let event = match result {
            Ok(Some(record)) => {
                tracing::info!(
                    revision = record.revision,
                    tasks = record.tasks.len(),
                    "adopted remote tasks"
                );
                self.board.replace_all(record.tasks);
                self.persist_local();
                self.sync_error = None;
                SyncEvent::Loaded { found: true }
            }
            Ok(None) => {
                tracing::info!("no remote tasks stored yet, starting empty");
                self.board.replace_all(Snapshot::new());
                self.persist_local();
                self.sync_error = None;
                SyncEvent::Loaded { found: false }
            }
            Err(e) => {
                tracing::warn!(error = %e, "initial load failed, keeping local tasks");
                self.sync_error = Some(e.to_string());
                SyncEvent::LoadFailed
            }
        };
        self.transition(SyncState::Synced);
        event
    }

    fn begin_subscription(&mut self) {
        let (Some(backend), Some(session)) = (self.backend.clone(), self.session.as_ref()) else {
            return;
        };
        let identity = session.identity.clone();
        let (tx, updates) = mpsc::channel(self.update_buffer);
        let task = tokio::spawn(async move { backend.subscribe(&identity, tx).await });
        self.set_phase(Phase::Subscribing {
            task: OwnedTask(task),
            updates,
        });
    }

    fn finish_subscription(&mut self, result: Result<Subscription, BackendError>) -> SyncEvent {
        let Some(session) = self.session.as_mut() else {
            return SyncEvent::SubscribeFailed;
        };
        match (result, std::mem::replace(&mut session.phase, Phase::Detached)) {
            (Ok(subscription), Phase::Subscribing { updates, .. }) => {
                tracing::debug!(identity = %session.identity, "listening for remote changes");
                session.phase = Phase::Listening {
                    updates,
                    _subscription: subscription,
                };
                SyncEvent::Subscribed
            }
            (Ok(_), _) => SyncEvent::SubscribeFailed,
            (Err(e), _) => {
                tracing::warn!(identity = %session.identity, error = %e, "subscribe failed");
                self.sync_error = Some(e.to_string());
                SyncEvent::SubscribeFailed
            }
        }
    }

    fn apply_remote(&mut self, record: RemoteRecord) -> SyncEvent {
        let event = match self.revisions.classify(&record, &self.session_id) {
            Inbound::Echo => {
                tracing::debug!(revision = record.revision, "ignoring echo of own push");
                return SyncEvent::EchoIgnored {
                    revision: record.revision,
                };
            }
            Inbound::Foreign => {
                self.revisions.mark_foreign_applied();
                SyncEvent::RemoteApplied
            }
            Inbound::OwnLatest => {
                tracing::debug!(
                    revision = record.revision,
                    "own push landed after a foreign record, adopting it again"
                );
                self.revisions.mark_in_step();
                SyncEvent::Resynced {
                    revision: record.revision,
                }
            }
        };
        self.transition(SyncState::ReceivingRemote);
        tracing::debug!(
            origin = record.origin.as_ref().map_or("unknown", SessionId::as_str),
            revision = record.revision,
            tasks = record.tasks.len(),
            "applying remote tasks"
        );
        self.board.replace_all(record.tasks);
        self.persist_local();
        self.transition(SyncState::Synced);
        event
    }

    fn set_phase(&mut self, phase: Phase) {
        if let Some(session) = self.session.as_mut() {
            session.phase = phase;
        }
    }

    fn persist_local(&self) {
        // Failures are logged by the cache; the in-memory board stays authoritative.
        let _ = self.cache.save(self.board.snapshot());
    }

    fn transition(&mut self, next: SyncState) {
        if self.state != next {
            tracing::trace!(from = %self.state, to = %next, "sync state");
            self.state = next;
        }
    }
}

/// Flattens a spawned backend call's result.
async fn joined<T>(
    task: &mut JoinHandle<Result<T, BackendError>>,
) -> Result<T, BackendError> {
    task.await
        .unwrap_or_else(|e: JoinError| Err(BackendError::Io(std::io::Error::other(e.to_string()))))
}
