//! In-memory cache with explicit freshness, one entry per route.
//!
//! Traditional caches hide their staleness. Here every read is classified as
//! [`Freshness::Fresh`], [`Freshness::Stale`], [`Freshness::Expired`] or
//! [`Freshness::Unknown`], and commits from the network are guarded by a
//! fetch generation so a slow response cannot overwrite a newer one.
//!
//! # Example
//!
//! ```ignore
//! let store = CacheStore::<UserProfile>::from_config(&config);
//! let me = RouteKey::new("/me");
//! store.commit(&me, profile, generation, Instant::now());
//!
//! if let Some(read) = store.read(&me, Instant::now()) {
//!     if !read.freshness().is_trustworthy() {
//!         tracing::warn!("profile is past its max age");
//!     }
//! }
//! ```

pub mod freshness;
pub mod store;

pub use freshness::{CacheRead, Freshness, FreshnessPolicy};
pub use store::{CacheStats, CacheStore, CommitOutcome};
