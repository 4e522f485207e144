//! Deduplicating publish/subscribe bus with deferred delivery.
//!
//! ## Architecture
//!
//! - `notify` fingerprints the event as `KIND:digest` where the digest is the
//!   first 8 bytes of a SHA-256 over the payload material
//! - an identical fingerprint seen inside the dedup window is dropped
//! - accepted events go onto an unbounded channel; a dispatcher task drains it
//!   and invokes callbacks, so delivery never happens inside `notify`'s call
//!   stack and callbacks may freely subscribe, unsubscribe or notify
//! - fingerprints older than the cleanup horizon are pruned lazily on `notify`

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use resync_core::{Instant, SyncConfig};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::event::{BusEvent, EventKind};

/// Number of digest bytes kept in a fingerprint.
const FINGERPRINT_DIGEST_BYTES: usize = 8;

/// Timing knobs of the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusConfig {
    pub dedup_window: Duration,
    pub cleanup_horizon: Duration,
}

impl BusConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            dedup_window: config.event_dedup_window,
            cleanup_horizon: config.event_cleanup_horizon,
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Counters describing bus traffic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub accepted: u64,
    pub deduplicated: u64,
    pub delivered: u64,
    pub subscriber_panics: u64,
}

#[derive(Debug, Default)]
struct StatsInner {
    accepted: AtomicU64,
    deduplicated: AtomicU64,
    delivered: AtomicU64,
    subscriber_panics: AtomicU64,
}

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    subscribers: RwLock<HashMap<EventKind, Vec<(u64, Callback<E>)>>>,
    next_id: AtomicU64,
}

impl<E> Registry<E> {
    fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn add(&self, kind: EventKind, callback: Callback<E>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.entry(kind).or_default().push((id, callback));
        id
    }

    fn remove(&self, kind: EventKind, id: u64) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(list) = subscribers.get_mut(&kind) {
            list.retain(|(existing, _)| *existing != id);
            if list.is_empty() {
                subscribers.remove(&kind);
            }
        }
    }

    /// Snapshot of the callbacks for `kind`, taken so no lock is held while
    /// callbacks run.
    fn callbacks_for(&self, kind: EventKind) -> Vec<(u64, Callback<E>)> {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.get(&kind).cloned().unwrap_or_default()
    }

    fn count(&self, kind: EventKind) -> usize {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        subscribers.get(&kind).map(Vec::len).unwrap_or(0)
    }
}

struct FingerprintLog {
    seen: HashMap<String, Instant>,
    last_cleanup: Instant,
}

impl FingerprintLog {
    fn prune_if_due(&mut self, now: Instant, horizon: Duration) {
        if now.saturating_duration_since(self.last_cleanup) < horizon {
            return;
        }
        let before = self.seen.len();
        self.seen
            .retain(|_, at| now.saturating_duration_since(*at) < horizon);
        self.last_cleanup = now;
        trace!(pruned = before - self.seen.len(), "Pruned event fingerprints");
    }
}

enum Dispatch<E> {
    Deliver(E),
    Flush(oneshot::Sender<()>),
}

/// Handle returned by [`EventBus::subscribe`].
///
/// Dropping it unsubscribes. Call [`Subscription::detach`] to keep the
/// callback registered for the lifetime of the bus.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Remove the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the callback registered until the bus itself is dropped.
    pub fn detach(mut self) {
        self.unsubscribe.take();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Deduplicating event bus.
///
/// Cloning is cheap and every clone feeds the same dispatcher.
pub struct EventBus<E: BusEvent> {
    registry: Arc<Registry<E>>,
    fingerprints: Arc<Mutex<FingerprintLog>>,
    stats: Arc<StatsInner>,
    tx: mpsc::UnboundedSender<Dispatch<E>>,
    config: BusConfig,
}

impl<E: BusEvent> EventBus<E> {
    /// Create a bus and spawn its dispatcher.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn new(config: BusConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let registry = Arc::new(Registry::new());
        let stats = Arc::new(StatsInner::default());

        tokio::spawn(dispatch_loop(
            rx,
            Arc::downgrade(&registry),
            Arc::clone(&stats),
        ));

        Self {
            registry,
            fingerprints: Arc::new(Mutex::new(FingerprintLog {
                seen: HashMap::new(),
                last_cleanup: Instant::now(),
            })),
            stats,
            tx,
            config,
        }
    }

    pub fn config(&self) -> BusConfig {
        self.config
    }

    /// Register `callback` for every accepted event of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = self.registry.add(kind, Arc::new(callback));
        debug!(kind = %kind, subscription = id, "Subscribed");

        let registry: Weak<Registry<E>> = Arc::downgrade(&self.registry);
        Subscription::new(move || {
            if let Some(registry) = registry.upgrade() {
                registry.remove(kind, id);
                debug!(kind = %kind, subscription = id, "Unsubscribed");
            }
        })
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.count(kind)
    }

    /// Queue `event` for delivery unless an identical one was accepted
    /// within the dedup window. Returns whether the event was accepted.
    pub fn notify(&self, event: E) -> bool {
        let kind = event.kind();
        let fingerprint = fingerprint(kind, &event.digest_material());
        let now = Instant::now();

        {
            let mut log = self.lock_fingerprints();
            log.prune_if_due(now, self.config.cleanup_horizon);
            if let Some(last) = log.seen.get(&fingerprint) {
                if now.saturating_duration_since(*last) < self.config.dedup_window {
                    self.stats.deduplicated.fetch_add(1, Ordering::Relaxed);
                    trace!(kind = %kind, fingerprint, "Dropped duplicate event");
                    return false;
                }
            }
            log.seen.insert(fingerprint, now);
        }

        if self.tx.send(Dispatch::Deliver(event)).is_err() {
            debug!(kind = %kind, "Event dispatcher stopped, event dropped");
            return false;
        }
        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Resolve once every event accepted before this call has been delivered.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Dispatch::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Number of fingerprints currently remembered.
    pub fn fingerprint_count(&self) -> usize {
        self.lock_fingerprints().seen.len()
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            accepted: self.stats.accepted.load(Ordering::Relaxed),
            deduplicated: self.stats.deduplicated.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            subscriber_panics: self.stats.subscriber_panics.load(Ordering::Relaxed),
        }
    }

    fn lock_fingerprints(&self) -> MutexGuard<'_, FingerprintLog> {
        self.fingerprints
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            fingerprints: Arc::clone(&self.fingerprints),
            stats: Arc::clone(&self.stats),
            tx: self.tx.clone(),
            config: self.config,
        }
    }
}

impl<E: BusEvent> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// `KIND:hex(sha256(material)[..8])`
pub fn fingerprint(kind: EventKind, material: &[u8]) -> String {
    let digest = Sha256::digest(material);
    format!(
        "{}:{}",
        kind,
        hex::encode(&digest[..FINGERPRINT_DIGEST_BYTES])
    )
}

async fn dispatch_loop<E: BusEvent>(
    mut rx: mpsc::UnboundedReceiver<Dispatch<E>>,
    registry: Weak<Registry<E>>,
    stats: Arc<StatsInner>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Dispatch::Deliver(event) => {
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                let kind = event.kind();
                for (id, callback) in registry.callbacks_for(kind) {
                    match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                        Ok(()) => {
                            stats.delivered.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            stats.subscriber_panics.fetch_add(1, Ordering::Relaxed);
                            warn!(kind = %kind, subscription = id, "Event subscriber panicked");
                        }
                    }
                }
            }
            Dispatch::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    trace!("Event dispatcher stopped");
}
