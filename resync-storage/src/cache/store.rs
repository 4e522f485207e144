//! In-memory cache entries, one per route.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use resync_core::{Generation, Instant, Resource, RouteKey, SyncConfig};

use super::freshness::{CacheRead, Freshness, FreshnessPolicy};
use crate::snapshot::SnapshotStore;

/// Outcome of a generation-guarded commit.
#[derive(Debug, Clone)]
pub enum CommitOutcome<R> {
    /// The response was the newest seen and now backs the route's entry.
    Committed(Arc<R>),
    /// A newer fetch already committed. Carries the data that won.
    Superseded {
        current: Arc<R>,
        committed_generation: Generation,
    },
    /// The response predates a full clear and nothing is cached.
    Discarded { committed_generation: Generation },
}

impl<R> CommitOutcome<R> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }

    /// The data that backs the entry after the commit attempt.
    pub fn current(&self) -> Option<&Arc<R>> {
        match self {
            Self::Committed(data) => Some(data),
            Self::Superseded { current, .. } => Some(current),
            Self::Discarded { .. } => None,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fresh reads served from memory.
    pub hits: u64,
    /// Reads that found nothing fresh.
    pub misses: u64,
    /// Generation-guarded commits that won.
    pub commits: u64,
    /// Responses rejected by the generation guard.
    pub superseded: u64,
    /// Reads answered by the durable snapshot.
    pub snapshot_hits: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug)]
struct EntryInner<R> {
    data: Option<Arc<R>>,
    fetched_at: Option<Instant>,
    committed_generation: Generation,
}

impl<R> Default for EntryInner<R> {
    fn default() -> Self {
        Self {
            data: None,
            fetched_at: None,
            committed_generation: 0,
        }
    }
}

#[derive(Debug)]
struct Entries<R> {
    by_route: HashMap<RouteKey, EntryInner<R>>,
    /// Generations at or below this were started before the last clear.
    floor: Generation,
}

impl<R> Entries<R> {
    fn guard(&self, route: &RouteKey) -> Generation {
        let committed = self
            .by_route
            .get(route)
            .map(|entry| entry.committed_generation)
            .unwrap_or(0);
        committed.max(self.floor)
    }
}

#[derive(Debug, Default)]
struct StatsInner {
    hits: AtomicU64,
    misses: AtomicU64,
    commits: AtomicU64,
    superseded: AtomicU64,
    snapshot_hits: AtomicU64,
}

/// Holds each route's resource, its fetch time and freshness accounting.
///
/// Entries never leak across routes. The lock is never held across an await
/// point.
#[derive(Debug)]
pub struct CacheStore<R> {
    entries: RwLock<Entries<R>>,
    policy: FreshnessPolicy,
    stats: StatsInner,
}

impl<R: Resource> CacheStore<R> {
    pub fn new(policy: FreshnessPolicy) -> Self {
        Self {
            entries: RwLock::new(Entries {
                by_route: HashMap::new(),
                floor: 0,
            }),
            policy,
            stats: StatsInner::default(),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(FreshnessPolicy::new(
            config.freshness_duration,
            config.max_age_duration,
        ))
    }

    pub fn policy(&self) -> FreshnessPolicy {
        self.policy
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, Entries<R>> {
        self.entries.read().unwrap_or_else(|poisoned| {
            tracing::warn!("cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, Entries<R>> {
        self.entries.write().unwrap_or_else(|poisoned| {
            tracing::warn!("cache lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Current in-memory value for `route` with its freshness, regardless of age.
    pub fn read(&self, route: &RouteKey, now: Instant) -> Option<CacheRead<R>> {
        let entries = self.read_guard();
        let entry = entries.by_route.get(route)?;
        entry.data.as_ref().map(|data| {
            CacheRead::new(
                Arc::clone(data),
                entry.fetched_at,
                self.policy.classify(entry.fetched_at, now),
            )
        })
    }

    /// Fresh in-memory value, counted as a hit or a miss.
    pub fn read_fresh(&self, route: &RouteKey, now: Instant) -> Option<Arc<R>> {
        match self.read(route, now) {
            Some(read) if read.freshness().is_fresh() => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(read.into_value())
            }
            _ => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn freshness(&self, route: &RouteKey, now: Instant) -> Freshness {
        let entries = self.read_guard();
        match entries.by_route.get(route) {
            Some(entry) if entry.data.is_some() => self.policy.classify(entry.fetched_at, now),
            _ => Freshness::Unknown,
        }
    }

    pub fn is_fresh(&self, route: &RouteKey, now: Instant) -> bool {
        self.freshness(route, now).is_fresh()
    }

    pub fn is_expired(&self, route: &RouteKey, now: Instant) -> bool {
        matches!(self.freshness(route, now), Freshness::Expired)
    }

    pub fn fetched_at(&self, route: &RouteKey) -> Option<Instant> {
        self.read_guard()
            .by_route
            .get(route)
            .and_then(|entry| entry.fetched_at)
    }

    pub fn has_data(&self, route: &RouteKey) -> bool {
        self.read_guard()
            .by_route
            .get(route)
            .is_some_and(|entry| entry.data.is_some())
    }

    /// Newest generation `route` will refuse: its last commit or the clear floor.
    pub fn committed_generation(&self, route: &RouteKey) -> Generation {
        self.read_guard().guard(route)
    }

    /// Routes that currently hold data.
    pub fn routes(&self) -> Vec<RouteKey> {
        self.read_guard()
            .by_route
            .iter()
            .filter(|(_, entry)| entry.data.is_some())
            .map(|(route, _)| route.clone())
            .collect()
    }

    /// Unconditionally replace `route`'s value and mark it fetched at `now`.
    pub fn write(&self, route: &RouteKey, resource: R, now: Instant) -> Arc<R> {
        let data = Arc::new(resource);
        let mut entries = self.write_guard();
        let entry = entries.by_route.entry(route.clone()).or_default();
        entry.data = Some(Arc::clone(&data));
        entry.fetched_at = Some(now);
        data
    }

    /// What a settlement under `generation` would lose to, if anything.
    ///
    /// `None` means `generation` is still the newest for `route`.
    pub fn outdated(&self, route: &RouteKey, generation: Generation) -> Option<CommitOutcome<R>> {
        let entries = self.read_guard();
        Self::outdated_locked(&entries, route, generation)
    }

    fn outdated_locked(
        entries: &Entries<R>,
        route: &RouteKey,
        generation: Generation,
    ) -> Option<CommitOutcome<R>> {
        let committed_generation = entries.guard(route);
        if generation > committed_generation {
            return None;
        }
        let current = entries
            .by_route
            .get(route)
            .and_then(|entry| entry.data.as_ref());
        Some(match current {
            Some(current) => CommitOutcome::Superseded {
                current: Arc::clone(current),
                committed_generation,
            },
            None => CommitOutcome::Discarded {
                committed_generation,
            },
        })
    }

    /// Commit a fetched value only if its generation is the newest seen for `route`.
    pub fn commit(
        &self,
        route: &RouteKey,
        resource: R,
        generation: Generation,
        now: Instant,
    ) -> CommitOutcome<R> {
        let mut entries = self.write_guard();
        if let Some(outcome) = Self::outdated_locked(&entries, route, generation) {
            self.stats.superseded.fetch_add(1, Ordering::Relaxed);
            return outcome;
        }

        let data = Arc::new(resource);
        let entry = entries.by_route.entry(route.clone()).or_default();
        entry.data = Some(Arc::clone(&data));
        entry.fetched_at = Some(now);
        entry.committed_generation = generation;
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        CommitOutcome::Committed(data)
    }

    /// Clear `route`'s freshness while keeping its data for fallback.
    ///
    /// Returns whether the entry was fresh-trackable before the call.
    pub fn invalidate(&self, route: &RouteKey) -> bool {
        self.write_guard()
            .by_route
            .get_mut(route)
            .is_some_and(|entry| entry.fetched_at.take().is_some())
    }

    /// Drop every route's data, as on logout.
    ///
    /// `floor` is the newest generation started so far; responses at or below
    /// it are discarded so a fetch started before the clear cannot resurrect
    /// the old data.
    pub fn clear(&self, floor: Generation) {
        let mut entries = self.write_guard();
        entries.by_route.clear();
        entries.floor = entries.floor.max(floor);
    }

    /// Seed an empty entry from a durable snapshot without marking it fresh.
    pub fn hydrate(&self, route: &RouteKey, resource: R) -> Arc<R> {
        let mut entries = self.write_guard();
        let entry = entries.by_route.entry(route.clone()).or_default();
        match entry.data.as_ref() {
            Some(existing) => Arc::clone(existing),
            None => {
                let data = Arc::new(resource);
                entry.data = Some(Arc::clone(&data));
                data
            }
        }
    }

    /// Best data available for `route` at any age: memory first, then the
    /// durable snapshot stored under `key`.
    ///
    /// A snapshot hit hydrates the route's entry. Snapshot read failures are
    /// logged and treated as a miss.
    pub async fn read_or_snapshot(
        &self,
        route: &RouteKey,
        snapshots: &dyn SnapshotStore<R>,
        key: &str,
        now: Instant,
    ) -> Option<(CacheRead<R>, bool)> {
        if let Some(read) = self.read(route, now) {
            return Some((read, false));
        }

        match snapshots.read(key).await {
            Ok(Some(snapshot)) => {
                self.stats.snapshot_hits.fetch_add(1, Ordering::Relaxed);
                let data = self.hydrate(route, snapshot.resource);
                Some((CacheRead::new(data, None, Freshness::Unknown), true))
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(route = %route, key, error = %e, "Durable snapshot read failed");
                None
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            commits: self.stats.commits.load(Ordering::Relaxed),
            superseded: self.stats.superseded.load(Ordering::Relaxed),
            snapshot_hits: self.stats.snapshot_hits.load(Ordering::Relaxed),
        }
    }
}
