//! Consumer-facing result shapes and per-call options.

use crate::{ConsumerId, Instant, RouteKey, SyncError};
use std::sync::Arc;
use std::time::Duration;

/// Read-only view of the cached resource and its accounting.
///
/// `data` is `None` only before the first successful fetch or after a full
/// clear. `fetched_at` moves only on a successful fetch; an invalidation
/// clears it while keeping `data` for fallback.
#[derive(Debug, Clone)]
pub struct CacheEntry<R> {
    pub data: Option<Arc<R>>,
    pub fetched_at: Option<Instant>,
    pub loading: bool,
    pub consecutive_errors: u32,
    pub breaker_opened_at: Option<Instant>,
}

impl<R> Default for CacheEntry<R> {
    fn default() -> Self {
        Self {
            data: None,
            fetched_at: None,
            loading: false,
            consecutive_errors: 0,
            breaker_opened_at: None,
        }
    }
}

impl<R> CacheEntry<R> {
    /// Age of the cached data, or `None` when freshness has been cleared.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.fetched_at.map(|at| now.saturating_duration_since(at))
    }
}

/// Where the data in a [`ResourceState`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadSource {
    /// Fresh in-memory hit, no network involved.
    Cache,
    /// Settled fetch, either started by this call or joined.
    Network,
    /// In-memory data past its freshness window, served as a fallback.
    Stale,
    /// Durable snapshot, served after a full in-memory miss.
    Snapshot,
    /// A fetch is being set up by another caller and no data exists yet.
    Pending,
}

/// What consumers receive from the coordinator.
#[derive(Debug, Clone)]
pub struct ResourceState<R> {
    pub data: Option<Arc<R>>,
    pub loading: bool,
    /// The error that forced a fallback, if any.
    pub error: Option<SyncError>,
    pub source: ReadSource,
}

impl<R> ResourceState<R> {
    pub fn cached(data: Arc<R>) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
            source: ReadSource::Cache,
        }
    }

    pub fn fetched(data: Arc<R>) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error: None,
            source: ReadSource::Network,
        }
    }

    pub fn fallback(data: Arc<R>, source: ReadSource, error: Option<SyncError>) -> Self {
        Self {
            data: Some(data),
            loading: false,
            error,
            source,
        }
    }

    pub fn pending(data: Option<Arc<R>>) -> Self {
        Self {
            data,
            loading: true,
            error: None,
            source: ReadSource::Pending,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self.source, ReadSource::Stale | ReadSource::Snapshot)
    }

    pub fn into_data(self) -> Option<Arc<R>> {
        self.data
    }
}

/// Options for a single `get_resource` call.
#[derive(Debug, Clone)]
pub struct GetOptions {
    /// Skip the freshness check and always go to the network.
    pub force_refresh: bool,
    /// Allow a fresh in-memory hit to short-circuit the call.
    pub use_cache: bool,
    /// Route to fetch; the coordinator's primary route when `None`.
    pub route: Option<RouteKey>,
    /// Call site identity used for shared-route bookkeeping.
    pub consumer_id: Option<ConsumerId>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            force_refresh: false,
            use_cache: true,
            route: None,
            consumer_id: None,
        }
    }
}

impl GetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_route(mut self, route: impl Into<RouteKey>) -> Self {
        self.route = Some(route.into());
        self
    }

    pub fn with_consumer(mut self, consumer: impl Into<ConsumerId>) -> Self {
        self.consumer_id = Some(consumer.into());
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }
}

/// Options for `invalidate`.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidateOptions {
    /// Do not start the background refresh.
    pub skip_refresh: bool,
}

impl InvalidateOptions {
    pub fn skip_refresh() -> Self {
        Self { skip_refresh: true }
    }
}

/// Options handed to the transport for one fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub retries: u32,
    /// Ask intermediaries not to serve a cached response.
    pub no_cache: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(crate::DEFAULT_FETCH_TIMEOUT_MS),
            retries: 0,
            no_cache: false,
        }
    }
}
