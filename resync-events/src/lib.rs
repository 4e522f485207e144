//! resync Events - Lifecycle Notifications
//!
//! A small publish/subscribe bus that fingerprints each notification, drops
//! duplicates inside a short window and delivers on a dispatcher task so
//! publishers never run subscriber code on their own call stack.

pub mod bus;
pub mod event;

pub use bus::{fingerprint, BusConfig, BusStats, EventBus, Subscription};
pub use event::{BusEvent, EventKind, SyncEvent};
