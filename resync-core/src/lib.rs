//! resync Core - Data Types
//!
//! Pure data structures shared by every resync crate: the resource contract,
//! route identity, consumer-facing result shapes, the error taxonomy and the
//! tunable configuration. This crate contains no synchronization logic.

pub mod config;
pub mod error;
pub mod resource;
pub mod route;
pub mod state;

pub use config::*;
pub use error::*;
pub use resource::{Resource, UserProfile};
pub use route::{ConsumerId, RouteClass, RouteKey};
pub use state::{
    CacheEntry, FetchOptions, GetOptions, InvalidateOptions, ReadSource, ResourceState,
};

use chrono::{DateTime, Utc};
use uuid::Uuid;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Resource identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Wall-clock timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Monotonic instant used for freshness, cooldown and throttle windows.
///
/// This is tokio's instant so paused-clock tests can drive every window.
pub type Instant = tokio::time::Instant;

/// Monotonically increasing stamp assigned to each started fetch.
pub type Generation = u64;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}
