//! Durable snapshot collaborator.
//!
//! The snapshot is a last-resort fallback across full in-memory misses, e.g.
//! after a reload. It is written after every committed fetch and read only
//! when memory has nothing at all.

pub mod lmdb;

pub use lmdb::{LmdbSnapshotError, LmdbSnapshotStore};

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use resync_core::{Resource, StorageError, SyncResult, Timestamp};

/// A persisted resource and when it was stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot<R> {
    pub resource: R,
    pub stored_at: Timestamp,
}

/// Durable key/value store for resource snapshots.
#[async_trait]
pub trait SnapshotStore<R: Resource>: Send + Sync {
    /// Read the snapshot stored under `key`, if any.
    async fn read(&self, key: &str) -> SyncResult<Option<Snapshot<R>>>;

    /// Persist `resource` under `key`, replacing any previous snapshot.
    async fn write(&self, key: &str, resource: &R) -> SyncResult<()>;

    /// Remove the snapshot under `key`. Returns whether one existed.
    async fn remove(&self, key: &str) -> SyncResult<bool>;
}

/// Snapshot store kept in memory, for tests and single-session use.
#[derive(Debug)]
pub struct InMemorySnapshotStore<R> {
    entries: RwLock<HashMap<String, (Vec<u8>, Timestamp)>>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> InMemorySnapshotStore<R> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            _resource: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R> Default for InMemorySnapshotStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: Resource> SnapshotStore<R> for InMemorySnapshotStore<R> {
    async fn read(&self, key: &str) -> SyncResult<Option<Snapshot<R>>> {
        let entries = self.entries.read().map_err(|_| StorageError::LockPoisoned)?;
        match entries.get(key) {
            Some((bytes, stored_at)) => {
                let resource = serde_json::from_slice(bytes).map_err(|e| StorageError::Snapshot {
                    reason: e.to_string(),
                })?;
                Ok(Some(Snapshot {
                    resource,
                    stored_at: *stored_at,
                }))
            }
            None => Ok(None),
        }
    }

    async fn write(&self, key: &str, resource: &R) -> SyncResult<()> {
        let bytes = serde_json::to_vec(resource).map_err(|e| StorageError::Snapshot {
            reason: e.to_string(),
        })?;
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), (bytes, Utc::now()));
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<bool> {
        let mut entries = self.entries.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries.remove(key).is_some())
    }
}
