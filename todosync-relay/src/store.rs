//! In-memory record store keyed by identity.
//!
//! The relay never looks inside a record: it keeps whatever bytes the last
//! upsert carried and hands them back on fetch.

use std::collections::HashMap;

use tokio::sync::RwLock;

/// Latest record bytes per identity.
#[derive(Debug, Default)]
pub struct StateStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
}

impl StateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored bytes for `user`, or `None` for a first-time user.
    pub async fn get(&self, user: &str) -> Option<Vec<u8>> {
        self.records.read().await.get(user).cloned()
    }

    /// Replaces the stored bytes for `user`.
    pub async fn put(&self, user: &str, payload: Vec<u8>) {
        self.records.write().await.insert(user.to_string(), payload);
    }

    /// Number of identities with a stored record.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns `true` if nothing has been stored yet.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
