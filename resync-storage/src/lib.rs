//! resync Storage - Cache Store and Durable Snapshots
//!
//! Holds the one in-memory cache entry the coordinator owns, plus the
//! durable snapshot backends used as a last-resort fallback.

pub mod cache;
pub mod snapshot;

pub use cache::{CacheRead, CacheStats, CacheStore, CommitOutcome, Freshness, FreshnessPolicy};
pub use snapshot::{
    InMemorySnapshotStore, LmdbSnapshotError, LmdbSnapshotStore, Snapshot, SnapshotStore,
};
