//! Freshness classification for cached reads.
//!
//! Staleness is explicit: every read out of the store carries the
//! [`Freshness`] it was classified with, so callers decide what to trust.

use resync_core::Instant;
use std::sync::Arc;
use std::time::Duration;

/// How far a cached value can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Within the freshness window. Serve without touching the network.
    Fresh,
    /// Past the freshness window but inside the max-age bound.
    Stale,
    /// Past the max-age bound. Show it while refreshing, never decide on it.
    Expired,
    /// No fetch timestamp: never fetched, invalidated, or hydrated from a snapshot.
    Unknown,
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh)
    }

    /// Whether the value may back a critical decision (e.g. an access guard).
    pub fn is_trustworthy(&self) -> bool {
        matches!(self, Self::Fresh | Self::Stale)
    }
}

/// The two windows that classify cached data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub freshness_duration: Duration,
    pub max_age_duration: Duration,
}

impl FreshnessPolicy {
    pub fn new(freshness_duration: Duration, max_age_duration: Duration) -> Self {
        Self {
            freshness_duration,
            max_age_duration,
        }
    }

    /// `now - fetched_at < freshness` is fresh, `> max_age` is expired.
    pub fn classify(&self, fetched_at: Option<Instant>, now: Instant) -> Freshness {
        let Some(fetched_at) = fetched_at else {
            return Freshness::Unknown;
        };
        let age = now.saturating_duration_since(fetched_at);
        if age < self.freshness_duration {
            Freshness::Fresh
        } else if age > self.max_age_duration {
            Freshness::Expired
        } else {
            Freshness::Stale
        }
    }
}

/// Result of a cache read, carrying staleness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<R> {
    value: Arc<R>,
    fetched_at: Option<Instant>,
    freshness: Freshness,
}

impl<R> CacheRead<R> {
    pub fn new(value: Arc<R>, fetched_at: Option<Instant>, freshness: Freshness) -> Self {
        Self {
            value,
            fetched_at,
            freshness,
        }
    }

    pub fn value(&self) -> &Arc<R> {
        &self.value
    }

    pub fn into_value(self) -> Arc<R> {
        self.value
    }

    pub fn fetched_at(&self) -> Option<Instant> {
        self.fetched_at
    }

    pub fn freshness(&self) -> Freshness {
        self.freshness
    }

    /// Time since the value was fetched, if the fetch time is still known.
    pub fn staleness(&self, now: Instant) -> Option<Duration> {
        self.fetched_at.map(|at| now.saturating_duration_since(at))
    }
}
