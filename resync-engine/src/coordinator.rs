//! The façade every consumer talks to.
//!
//! # Read path
//!
//! 1. fresh in-memory hit (unless `force_refresh`): return immediately
//! 2. register the consumer, consult the breaker, then the throttle
//! 3. join the in-flight fetch or start a new one
//! 4. on settlement commit through the generation guard, write the snapshot,
//!    emit `LOADED`/`UPDATED` or `ERROR`, and settle the registry
//!
//! Every error is resolved fallback-first: memory of any age, then the
//! durable snapshot, and only then a rejection.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use resync_core::{
    CacheEntry, ConfigError, ConsumerId, FetchOptions, GetOptions, Generation, Instant,
    InvalidateOptions, ReadSource, Resource, ResourceState, RouteClass, RouteKey, SyncConfig,
    SyncError, SyncResult,
};
use resync_events::{BusConfig, EventBus, EventKind, Subscription, SyncEvent};
use resync_storage::{CacheStats, CacheStore, CommitOutcome, SnapshotStore};
use tracing::{debug, info, warn};

use crate::breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::registry::{Coordination, RegistryConfig, RequestRegistry};
use crate::transport::Transport;

/// Settled outcome shared by every caller joined on one fetch.
pub type FetchOutcome<R> = Result<Arc<R>, SyncError>;

/// Joinable handle of one in-flight fetch.
pub type SharedFetch<R> = Shared<BoxFuture<'static, FetchOutcome<R>>>;

/// Counters describing coordinator traffic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CoordinatorStats {
    /// Calls answered by a fresh in-memory hit.
    pub cache_hits: u64,
    /// Network fetches started.
    pub fetches: u64,
    /// Calls that joined an in-flight fetch.
    pub coalesced: u64,
    /// Calls answered from cache because the route was throttled.
    pub throttled: u64,
    /// Calls refused by the open circuit.
    pub refused: u64,
    /// Calls answered with fallback data after an error.
    pub fallbacks: u64,
    pub cache: CacheStats,
}

#[derive(Debug, Default)]
struct StatsInner {
    cache_hits: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    throttled: AtomicU64,
    refused: AtomicU64,
    fallbacks: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// What a call does once admission has been decided.
enum Plan<R> {
    Await(SharedFetch<R>),
    Serve(ResourceState<R>),
}

struct Inner<R: Resource> {
    config: SyncConfig,
    primary_route: RouteKey,
    cache: CacheStore<R>,
    breaker: CircuitBreaker,
    registry: RequestRegistry<SharedFetch<R>>,
    events: EventBus<SyncEvent<R>>,
    transport: Arc<dyn Transport>,
    snapshots: Arc<dyn SnapshotStore<R>>,
    stats: StatsInner,
}

/// Synchronization engine for one logical resource.
///
/// Cloning is cheap; every clone shares the same cache, breaker, registry
/// and event bus.
pub struct Coordinator<R: Resource> {
    inner: Arc<Inner<R>>,
}

impl<R: Resource> Clone for Coordinator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R: Resource> Coordinator<R> {
    /// Build a coordinator.
    ///
    /// Fails with [`ConfigError::Runtime`] when called outside a Tokio
    /// runtime, since fetches and event delivery are spawned on it.
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        snapshots: Arc<dyn SnapshotStore<R>>,
        primary_route: impl Into<RouteKey>,
    ) -> SyncResult<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|e| ConfigError::Runtime {
            reason: e.to_string(),
        })?;
        let inner = Inner {
            cache: CacheStore::from_config(&config),
            breaker: CircuitBreaker::new(CircuitBreakerConfig::from_config(&config)),
            registry: RequestRegistry::new(RegistryConfig::from_config(&config)),
            events: EventBus::new(BusConfig::from_config(&config)),
            primary_route: primary_route.into(),
            transport,
            snapshots,
            stats: StatsInner::default(),
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    pub fn primary_route(&self) -> &RouteKey {
        &self.inner.primary_route
    }

    /// Read the resource, fetching only when nothing fresh is cached.
    pub async fn get_resource(&self, options: GetOptions) -> SyncResult<ResourceState<R>> {
        let inner = &self.inner;
        let route = options
            .route
            .clone()
            .unwrap_or_else(|| inner.primary_route.clone());
        let now = Instant::now();

        if !options.force_refresh && options.use_cache {
            if let Some(data) = inner.cache.read_fresh(&route, now) {
                bump(&inner.stats.cache_hits);
                debug!(route = %route, "Fresh cache hit");
                return Ok(ResourceState::cached(data));
            }
        }

        if let Some(consumer) = options.consumer_id {
            inner.registry.register_consumer(&route, consumer);
        }

        match inner.plan(&route, options.force_refresh, now).await? {
            Plan::Serve(state) => Ok(state),
            Plan::Await(handle) => match handle.await {
                Ok(data) => Ok(ResourceState::fetched(data)),
                Err(error) => inner.fallback(&route, error).await,
            },
        }
    }

    /// Read the primary route with default options.
    pub async fn get(&self) -> SyncResult<ResourceState<R>> {
        self.get_resource(GetOptions::default()).await
    }

    /// Clear the primary route's freshness, keep its data for fallback, and
    /// unless `skip_refresh` start a forced refresh in the background.
    ///
    /// Returns whether a refresh was started. The refresh is registered
    /// before this returns, so a following `get_resource` joins it.
    pub fn invalidate(&self, reason: impl Into<String>, options: InvalidateOptions) -> bool {
        let inner = &self.inner;
        let reason = reason.into();
        let route = inner.primary_route.clone();
        let had_freshness = inner.cache.invalidate(&route);
        info!(route = %route, reason = %reason, had_freshness, "Resource invalidated");
        inner.events.notify(SyncEvent::Invalidated {
            reason: reason.clone(),
        });

        if options.skip_refresh {
            return false;
        }

        let now = Instant::now();
        match inner.breaker.admit(now) {
            Admission::Refused { retry_after } => {
                debug!(
                    route = %route,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "Circuit open, skipping refresh after invalidation"
                );
                false
            }
            Admission::Allowed | Admission::Trial => {
                inner.events.notify(SyncEvent::Updating { reason });
                inner
                    .registry
                    .supersede(&route, now, |generation| inner.spawn_fetch(&route, generation, true));
                bump(&inner.stats.fetches);
                true
            }
        }
    }

    /// Drop all cached state for every route, as on logout.
    ///
    /// In-flight fetches keep running but their responses are discarded.
    pub async fn clear(&self) {
        let inner = &self.inner;
        let mut routes = inner.cache.routes();
        if !routes.contains(&inner.primary_route) {
            routes.push(inner.primary_route.clone());
        }
        let floor = inner.registry.current_generation();
        inner.cache.clear(floor);
        inner.registry.clear_requests();
        inner.breaker.reset();
        for route in &routes {
            if let Err(e) = inner.snapshots.remove(&inner.snapshot_key(route)).await {
                warn!(route = %route, error = %e, "Failed to remove durable snapshot");
            }
        }
        info!(floor, "Resource cleared");
        inner.events.notify(SyncEvent::Invalidated {
            reason: "cleared".to_string(),
        });
    }

    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&SyncEvent<R>) + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, callback)
    }

    pub fn events(&self) -> &EventBus<SyncEvent<R>> {
        &self.inner.events
    }

    /// Select the throttle tier for `route`.
    pub fn classify_route(&self, route: impl Into<RouteKey>, class: RouteClass) {
        self.inner.registry.classify(&route.into(), class);
    }

    /// Stop counting `consumer` toward `route`'s shared status.
    ///
    /// An in-flight fetch is not cancelled.
    pub fn unregister_consumer(&self, route: &RouteKey, consumer: &ConsumerId) -> bool {
        self.inner.registry.unregister_consumer(route, consumer)
    }

    pub fn is_shared(&self, route: &RouteKey) -> bool {
        self.inner.registry.is_shared(route)
    }

    pub fn consumers(&self, route: &RouteKey) -> usize {
        self.inner.registry.consumers(route)
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.inner.breaker.state()
    }

    /// Read-only view of the primary route's entry.
    pub fn entry(&self) -> CacheEntry<R> {
        let inner = &self.inner;
        let now = Instant::now();
        let route = &inner.primary_route;
        CacheEntry {
            data: inner.cache.read(route, now).map(|read| read.into_value()),
            fetched_at: inner.cache.fetched_at(route),
            loading: inner.registry.has_active_request(route, now)
                || inner.registry.is_processing(route, now),
            consecutive_errors: inner.breaker.consecutive_errors(),
            breaker_opened_at: inner.breaker.opened_at(),
        }
    }

    pub fn stats(&self) -> CoordinatorStats {
        let stats = &self.inner.stats;
        CoordinatorStats {
            cache_hits: stats.cache_hits.load(Ordering::Relaxed),
            fetches: stats.fetches.load(Ordering::Relaxed),
            coalesced: stats.coalesced.load(Ordering::Relaxed),
            throttled: stats.throttled.load(Ordering::Relaxed),
            refused: stats.refused.load(Ordering::Relaxed),
            fallbacks: stats.fallbacks.load(Ordering::Relaxed),
            cache: self.inner.cache.stats(),
        }
    }
}

impl<R: Resource> fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("primary_route", &self.inner.primary_route)
            .field("breaker", &self.inner.breaker)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<R: Resource> Inner<R> {
    /// Durable snapshot key for `route`. The primary route owns the bare
    /// configured key; other routes are namespaced under it.
    fn snapshot_key(&self, route: &RouteKey) -> String {
        if *route == self.primary_route {
            self.config.snapshot_key.clone()
        } else {
            format!("{}:{}", self.config.snapshot_key, route)
        }
    }

    /// Decide between serving what is cached and awaiting a fetch.
    async fn plan(
        self: &Arc<Self>,
        route: &RouteKey,
        force: bool,
        now: Instant,
    ) -> SyncResult<Plan<R>> {
        let trial = match self.breaker.admit(now) {
            Admission::Allowed => false,
            Admission::Trial => true,
            Admission::Refused { retry_after } => {
                // A half-open trial is already running; wait for its verdict.
                if self.breaker.state() == CircuitState::HalfOpen {
                    if let Some(handle) = self.registry.active_request(route, now) {
                        bump(&self.stats.coalesced);
                        return Ok(Plan::Await(handle));
                    }
                }
                bump(&self.stats.refused);
                let retry_after_ms = retry_after.as_millis() as u64;
                debug!(route = %route, retry_after_ms, "Circuit open, not fetching");
                let error = SyncError::CircuitOpen {
                    route: route.clone(),
                    retry_after_ms,
                };
                return self.fallback(route, error).await.map(Plan::Serve);
            }
        };

        if !force
            && !trial
            && !self.registry.has_active_request(route, now)
            && self.registry.should_throttle(route, now)
        {
            bump(&self.stats.throttled);
            match self.best_available(route, None, now).await {
                Some(state) => {
                    debug!(route = %route, "Throttled, serving cached data");
                    return Ok(Plan::Serve(state));
                }
                None => debug!(route = %route, "Throttled with nothing cached, fetching anyway"),
            }
        }

        let coordination = if force {
            self.registry
                .supersede(route, now, |generation| self.spawn_fetch(route, generation, true))
        } else {
            self.registry
                .coordinate(route, now, |generation| self.spawn_fetch(route, generation, false))
        };

        match coordination {
            Coordination::Started { handle, .. } => {
                bump(&self.stats.fetches);
                Ok(Plan::Await(handle))
            }
            Coordination::Joined { handle, .. } => {
                bump(&self.stats.coalesced);
                Ok(Plan::Await(handle))
            }
            Coordination::Busy => {
                if trial {
                    self.breaker.abandon_trial();
                }
                let data = self.cache.read(route, now).map(|read| read.into_value());
                Ok(Plan::Serve(ResourceState::pending(data)))
            }
        }
    }

    /// Build the shared fetch for `generation` and drive it on the runtime so
    /// it settles even if every waiter goes away.
    fn spawn_fetch(self: &Arc<Self>, route: &RouteKey, generation: Generation, no_cache: bool) -> SharedFetch<R> {
        let inner = Arc::clone(self);
        let route = route.clone();
        let fetch = async move { inner.run_fetch(route, generation, no_cache).await }
            .boxed()
            .shared();
        tokio::spawn(fetch.clone());
        fetch
    }

    async fn run_fetch(self: Arc<Self>, route: RouteKey, generation: Generation, no_cache: bool) -> FetchOutcome<R> {
        self.events.notify(SyncEvent::Loading {
            route: route.clone(),
        });
        let options = FetchOptions {
            timeout: self.config.fetch_timeout,
            retries: self.config.fetch_retries,
            no_cache,
        };

        let result = match self.transport.fetch(&route, &options).await {
            Ok(payload) => R::from_payload(payload).map_err(SyncError::from),
            Err(e) => Err(SyncError::from(e)),
        };

        let now = Instant::now();
        let outcome = match result {
            Ok(resource) => self.settle_success(&route, generation, resource, now).await,
            Err(error) => self.settle_failure(&route, generation, error, now),
        };
        self.registry.settle(&route, generation);
        outcome
    }

    async fn settle_success(
        &self,
        route: &RouteKey,
        generation: Generation,
        resource: R,
        now: Instant,
    ) -> FetchOutcome<R> {
        self.breaker.record_success();
        match self.cache.commit(route, resource, generation, now) {
            CommitOutcome::Committed(data) => {
                if let Err(e) = self
                    .snapshots
                    .write(&self.snapshot_key(route), data.as_ref())
                    .await
                {
                    warn!(route = %route, error = %e, "Snapshot write failed");
                }
                debug!(route = %route, generation, "Fetch committed");
                self.events.notify(SyncEvent::Loaded {
                    route: route.clone(),
                    resource: Arc::clone(&data),
                });
                self.events.notify(SyncEvent::Updated {
                    resource: Arc::clone(&data),
                });
                Ok(data)
            }
            CommitOutcome::Superseded {
                current,
                committed_generation,
            } => {
                debug!(route = %route, generation, committed_generation, "Response superseded by a newer fetch");
                Ok(current)
            }
            CommitOutcome::Discarded {
                committed_generation,
            } => {
                debug!(route = %route, generation, committed_generation, "Response discarded after clear");
                Err(SyncError::Discarded {
                    route: route.clone(),
                    generation,
                })
            }
        }
    }

    /// A failure whose generation has already been overtaken is not news: the
    /// breaker and `ERROR` subscribers only hear about the newest fetch.
    fn settle_failure(
        &self,
        route: &RouteKey,
        generation: Generation,
        error: SyncError,
        now: Instant,
    ) -> FetchOutcome<R> {
        match self.cache.outdated(route, generation) {
            Some(CommitOutcome::Superseded {
                current,
                committed_generation,
            }) => {
                debug!(route = %route, generation, committed_generation, error = %error, "Failure superseded by a newer fetch");
                return Ok(current);
            }
            Some(CommitOutcome::Discarded {
                committed_generation,
            }) => {
                debug!(route = %route, generation, committed_generation, error = %error, "Failure discarded after clear");
                return Err(SyncError::Discarded {
                    route: route.clone(),
                    generation,
                });
            }
            Some(CommitOutcome::Committed(_)) | None => {}
        }

        let consecutive_errors = if error.counts_as_failure() {
            self.breaker.record_failure(now)
        } else {
            self.breaker.consecutive_errors()
        };
        warn!(route = %route, generation, consecutive_errors, error = %error, "Fetch failed");
        self.events.notify(SyncEvent::Error {
            route: route.clone(),
            error: error.clone(),
            consecutive_errors,
        });
        Err(error)
    }

    /// Serve the best data of any age, or reject with `error`.
    async fn fallback(&self, route: &RouteKey, error: SyncError) -> SyncResult<ResourceState<R>> {
        match self.best_available(route, Some(error.clone()), Instant::now()).await {
            Some(state) => {
                bump(&self.stats.fallbacks);
                debug!(route = %route, source = ?state.source, error = %error, "Serving fallback data");
                Ok(state)
            }
            None => Err(error),
        }
    }

    async fn best_available(
        &self,
        route: &RouteKey,
        error: Option<SyncError>,
        now: Instant,
    ) -> Option<ResourceState<R>> {
        let key = self.snapshot_key(route);
        let (read, from_snapshot) = self
            .cache
            .read_or_snapshot(route, self.snapshots.as_ref(), &key, now)
            .await?;
        let source = if from_snapshot {
            ReadSource::Snapshot
        } else if read.freshness().is_fresh() {
            ReadSource::Cache
        } else {
            ReadSource::Stale
        };
        Some(ResourceState::fallback(read.into_value(), source, error))
    }
}
