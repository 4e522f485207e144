//! resync Engine - Resource Synchronization
//!
//! Mediates every read of one shared resource requested by many independent
//! consumers. The [`Coordinator`] composes the cache store, a circuit breaker,
//! a per-route request registry and a deduplicating event bus so that
//! concurrent reads coalesce into one fetch, staleness stays bounded, and
//! repeated backend failures degrade to serving the best data available.
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(RestTransport::new(&RestTransportConfig::new("https://api.example.com"))?);
//! let snapshots = Arc::new(LmdbSnapshotStore::<UserProfile>::new("/var/lib/app/snapshots", 16)?);
//! let sync = Coordinator::new(SyncConfig::from_env(), transport, snapshots, "/me")?;
//!
//! let state = sync
//!     .get_resource(GetOptions::new().with_consumer("nav-bar"))
//!     .await?;
//! ```

pub mod breaker;
pub mod coordinator;
pub mod registry;
pub mod telemetry;
pub mod transport;

pub use breaker::{Admission, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use coordinator::{Coordinator, CoordinatorStats, FetchOutcome, SharedFetch};
pub use registry::{Coordination, RegistryConfig, RequestRegistry};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
pub use transport::{RestTransport, RestTransportConfig, Transport};

pub use resync_core::*;
pub use resync_events::{BusConfig, BusEvent, EventBus, EventKind, Subscription, SyncEvent};
pub use resync_storage::{
    CacheStore, Freshness, InMemorySnapshotStore, LmdbSnapshotStore, Snapshot, SnapshotStore,
};
