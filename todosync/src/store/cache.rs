//! Snapshot cache on top of a [`KeyValueStore`].
//!
//! The cache never fails from the caller's point of view: unreadable or
//! malformed data loads as an empty snapshot, and write failures are logged
//! and reported back so the caller can decide whether to surface them.

use todosync_proto::codec;
use todosync_proto::task::Snapshot;

use super::{KeyValueStore, StoreError};

/// Key under which the snapshot is stored by default.
pub const DEFAULT_KEY: &str = "tasks";

/// Loads and saves the whole task collection under one storage key.
#[derive(Debug)]
pub struct LocalCache<K> {
    store: K,
    key: String,
}

impl<K: KeyValueStore> LocalCache<K> {
    /// Creates a cache using [`DEFAULT_KEY`].
    pub fn new(store: K) -> Self {
        Self::with_key(store, DEFAULT_KEY)
    }

    /// Creates a cache storing the snapshot under `key`.
    pub fn with_key(store: K, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// The storage key in use.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The underlying store.
    pub const fn store(&self) -> &K {
        &self.store
    }

    /// Reads the cached snapshot.
    ///
    /// A missing entry, a read error, or a malformed document all yield an
    /// empty snapshot.
    pub fn load(&self) -> Snapshot {
        let text = match self.store.get(&self.key) {
            Ok(Some(text)) => text,
            Ok(None) => return Snapshot::new(),
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to read cached tasks");
                return Snapshot::new();
            }
        };
        match codec::decode_snapshot(&text) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "discarding malformed cached tasks");
                Snapshot::new()
            }
        }
    }

    /// Writes `snapshot` to the store, replacing the previous entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or writing fails. The failure is
    /// also logged.
    pub fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let text = codec::encode_snapshot(snapshot)
            .map_err(|e| StoreError::WriteFailed(e.to_string()))?;
        self.store.set(&self.key, &text).inspect_err(|e| {
            tracing::warn!(key = %self.key, error = %e, "failed to write cached tasks");
        })?;
        tracing::trace!(key = %self.key, tasks = snapshot.len(), "cached tasks saved");
        Ok(())
    }
}
