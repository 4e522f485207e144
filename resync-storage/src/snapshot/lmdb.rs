//! LMDB-backed snapshot store.
//!
//! Uses the heed crate (Rust bindings for LMDB) so the last known resource
//! survives a process restart.
//!
//! # Value Format
//!
//! `[stored_at millis: 8 bytes LE][json value]`

use std::marker::PhantomData;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use resync_core::{Resource, StorageError, SyncError, SyncResult};

use super::{Snapshot, SnapshotStore};

/// Why an LMDB snapshot operation failed.
#[derive(Debug, thiserror::Error)]
pub enum LmdbSnapshotError {
    #[error("cannot create snapshot directory: {0}")]
    Directory(#[from] std::io::Error),

    /// The environment or its unnamed database could not be opened.
    #[error("cannot open snapshot environment: {0}")]
    Open(String),

    #[error("snapshot transaction failed: {0}")]
    Txn(String),

    /// Stored bytes are not `[stored_at][json]`, or the resource would not
    /// serialize.
    #[error("malformed snapshot value: {0}")]
    Codec(String),
}

fn txn(e: heed::Error) -> LmdbSnapshotError {
    LmdbSnapshotError::Txn(e.to_string())
}

impl From<LmdbSnapshotError> for SyncError {
    fn from(e: LmdbSnapshotError) -> Self {
        SyncError::Storage(StorageError::Snapshot {
            reason: e.to_string(),
        })
    }
}

/// LMDB-backed durable snapshot store.
///
/// # Example
///
/// ```ignore
/// let store = LmdbSnapshotStore::<UserProfile>::new("/var/lib/app/snapshots", 16)?;
/// store.write("me", &profile).await?;
/// let snapshot = store.read("me").await?;
/// ```
pub struct LmdbSnapshotStore<R> {
    env: Env,
    db: Database<Bytes, Bytes>,
    _resource: PhantomData<fn() -> R>,
}

impl<R> LmdbSnapshotStore<R> {
    /// Open the store at `path`, creating the directory if needed. The map
    /// is capped at `max_size_mb` megabytes.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbSnapshotError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbSnapshotError::Open(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbSnapshotError::Open(e.to_string()))?;

        wtxn.commit().map_err(txn)?;

        Ok(Self {
            env,
            db,
            _resource: PhantomData,
        })
    }
}

fn encode<R: Resource>(resource: &R, stored_at: DateTime<Utc>) -> Result<Vec<u8>, LmdbSnapshotError> {
    let value_bytes = serde_json::to_vec(resource)
        .map_err(|e| LmdbSnapshotError::Codec(e.to_string()))?;

    let mut full_bytes = Vec::with_capacity(8 + value_bytes.len());
    full_bytes.extend_from_slice(&stored_at.timestamp_millis().to_le_bytes());
    full_bytes.extend_from_slice(&value_bytes);
    Ok(full_bytes)
}

fn decode<R: Resource>(bytes: &[u8]) -> Result<Snapshot<R>, LmdbSnapshotError> {
    let Some((stamp, json)) = bytes.split_first_chunk::<8>() else {
        return Err(LmdbSnapshotError::Codec(format!(
            "value too short: {} bytes",
            bytes.len()
        )));
    };
    let stored_at = DateTime::from_timestamp_millis(i64::from_le_bytes(*stamp))
        .ok_or_else(|| LmdbSnapshotError::Codec("timestamp out of range".into()))?;
    let resource: R =
        serde_json::from_slice(json).map_err(|e| LmdbSnapshotError::Codec(e.to_string()))?;

    Ok(Snapshot {
        resource,
        stored_at,
    })
}

#[async_trait]
impl<R: Resource> SnapshotStore<R> for LmdbSnapshotStore<R> {
    async fn read(&self, key: &str) -> SyncResult<Option<Snapshot<R>>> {
        let rtxn = self.env.read_txn().map_err(txn)?;

        match self.db.get(&rtxn, key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(decode(bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(txn(e).into()),
        }
    }

    async fn write(&self, key: &str, resource: &R) -> SyncResult<()> {
        let full_bytes = encode(resource, Utc::now())?;

        let mut wtxn = self.env.write_txn().map_err(txn)?;

        self.db.put(&mut wtxn, key.as_bytes(), &full_bytes).map_err(txn)?;

        wtxn.commit().map_err(txn)?;

        tracing::debug!(key, bytes = full_bytes.len(), "Snapshot written");
        Ok(())
    }

    async fn remove(&self, key: &str) -> SyncResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn)?;

        let deleted = self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn)?;

        wtxn.commit().map_err(txn)?;

        Ok(deleted)
    }
}
