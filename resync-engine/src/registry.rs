//! Per-route request bookkeeping.
//!
//! Tracks four things per [`RouteKey`]:
//!
//! - consumer membership, to tell whether a route is shared
//! - a processing mark with automatic timeout release
//! - throttle counters, tiered by explicit [`RouteClass`]
//! - the in-flight request handle other callers join
//!
//! The registry is generic over the handle type; the coordinator stores a
//! shared future, tests can store anything cloneable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use resync_core::{ConsumerId, Generation, Instant, RouteClass, RouteKey, SyncConfig};
use tracing::{debug, warn};

/// Throttle and timeout knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Minimum spacing between accepted requests on volatile routes.
    pub request_debounce_time: Duration,
    /// Accepted requests per window on standard routes.
    pub request_threshold: u32,
    pub request_count_reset_time: Duration,
    /// Age after which a processing mark or active request is considered stuck.
    pub processing_timeout: Duration,
}

impl RegistryConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            request_debounce_time: config.request_debounce_time,
            request_threshold: config.request_threshold,
            request_count_reset_time: config.request_count_reset_time,
            processing_timeout: config.processing_timeout,
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

/// Result of [`RequestRegistry::coordinate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coordination<H> {
    /// A new request was started under `generation`.
    Started { handle: H, generation: Generation },
    /// An in-flight request already existed and was joined.
    Joined { handle: H, generation: Generation },
    /// The route is marked processing but nothing joinable exists yet.
    Busy,
}

#[derive(Debug, Clone, Copy)]
struct ThrottleCounter {
    count: u32,
    window_start: Instant,
}

#[derive(Debug, Clone)]
struct ActiveRequest<H> {
    handle: H,
    generation: Generation,
    started_at: Instant,
}

#[derive(Debug)]
struct RegistryState<H> {
    consumers: HashMap<RouteKey, HashSet<ConsumerId>>,
    processing: HashMap<RouteKey, Instant>,
    classes: HashMap<RouteKey, RouteClass>,
    counters: HashMap<RouteKey, ThrottleCounter>,
    last_accepted: HashMap<RouteKey, Instant>,
    active: HashMap<RouteKey, ActiveRequest<H>>,
}

impl<H> RegistryState<H> {
    fn new() -> Self {
        Self {
            consumers: HashMap::new(),
            processing: HashMap::new(),
            classes: HashMap::new(),
            counters: HashMap::new(),
            last_accepted: HashMap::new(),
            active: HashMap::new(),
        }
    }

    fn is_processing(&mut self, route: &RouteKey, now: Instant, timeout: Duration) -> bool {
        match self.processing.get(route) {
            Some(marked) if now.saturating_duration_since(*marked) >= timeout => {
                warn!(route = %route, timeout_ms = timeout.as_millis() as u64, "Releasing stuck processing mark");
                self.processing.remove(route);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn live_active(
        &mut self,
        route: &RouteKey,
        now: Instant,
        timeout: Duration,
    ) -> Option<&ActiveRequest<H>> {
        let stuck = match self.active.get(route) {
            Some(active) => now.saturating_duration_since(active.started_at) >= timeout,
            None => return None,
        };
        if stuck {
            warn!(route = %route, timeout_ms = timeout.as_millis() as u64, "Abandoning stuck active request");
            self.active.remove(route);
            self.processing.remove(route);
            return None;
        }
        self.active.get(route)
    }
}

/// Per-route request registry.
#[derive(Debug)]
pub struct RequestRegistry<H> {
    state: Mutex<RegistryState<H>>,
    next_generation: AtomicU64,
    config: RegistryConfig,
}

impl<H: Clone> RequestRegistry<H> {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            state: Mutex::new(RegistryState::new()),
            next_generation: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState<H>> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Request registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    // ------------------------------------------------------------------
    // Consumers
    // ------------------------------------------------------------------

    /// Returns whether `consumer` was newly added.
    pub fn register_consumer(&self, route: &RouteKey, consumer: ConsumerId) -> bool {
        self.lock()
            .consumers
            .entry(route.clone())
            .or_default()
            .insert(consumer)
    }

    /// Returns whether `consumer` was registered. Empty sets are dropped.
    pub fn unregister_consumer(&self, route: &RouteKey, consumer: &ConsumerId) -> bool {
        let mut state = self.lock();
        let Some(members) = state.consumers.get_mut(route) else {
            return false;
        };
        let removed = members.remove(consumer);
        if members.is_empty() {
            state.consumers.remove(route);
        }
        removed
    }

    pub fn consumers(&self, route: &RouteKey) -> usize {
        self.lock().consumers.get(route).map(HashSet::len).unwrap_or(0)
    }

    /// A route is shared once more than one consumer is registered.
    pub fn is_shared(&self, route: &RouteKey) -> bool {
        self.consumers(route) > 1
    }

    // ------------------------------------------------------------------
    // Processing marks
    // ------------------------------------------------------------------

    pub fn mark_processing(&self, route: &RouteKey, now: Instant) {
        self.lock().processing.insert(route.clone(), now);
    }

    /// Marks older than the processing timeout are released and read as idle.
    pub fn is_processing(&self, route: &RouteKey, now: Instant) -> bool {
        self.lock()
            .is_processing(route, now, self.config.processing_timeout)
    }

    pub fn clear_processing(&self, route: &RouteKey) {
        self.lock().processing.remove(route);
    }

    // ------------------------------------------------------------------
    // Throttling
    // ------------------------------------------------------------------

    pub fn classify(&self, route: &RouteKey, class: RouteClass) {
        debug!(route = %route, class = %class, "Route classified");
        self.lock().classes.insert(route.clone(), class);
    }

    pub fn class_of(&self, route: &RouteKey) -> RouteClass {
        self.lock().classes.get(route).copied().unwrap_or_default()
    }

    /// Whether a request on `route` should be suppressed at `now`.
    ///
    /// A `false` answer counts as an accepted request.
    pub fn should_throttle(&self, route: &RouteKey, now: Instant) -> bool {
        let mut state = self.lock();
        match state.classes.get(route).copied().unwrap_or_default() {
            RouteClass::CriticalIdentity => false,
            RouteClass::Volatile => {
                if let Some(last) = state.last_accepted.get(route) {
                    if now.saturating_duration_since(*last) < self.config.request_debounce_time {
                        return true;
                    }
                }
                state.last_accepted.insert(route.clone(), now);
                false
            }
            RouteClass::Standard => {
                let counter = state
                    .counters
                    .entry(route.clone())
                    .or_insert(ThrottleCounter {
                        count: 0,
                        window_start: now,
                    });
                if now.saturating_duration_since(counter.window_start)
                    > self.config.request_count_reset_time
                {
                    counter.count = 0;
                    counter.window_start = now;
                }
                if counter.count >= self.config.request_threshold {
                    return true;
                }
                counter.count += 1;
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Active requests
    // ------------------------------------------------------------------

    /// Allocate the next fetch generation.
    pub fn next_generation(&self) -> Generation {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Newest generation handed out so far.
    pub fn current_generation(&self) -> Generation {
        self.next_generation.load(Ordering::SeqCst)
    }

    pub fn register_active_request(
        &self,
        route: &RouteKey,
        handle: H,
        generation: Generation,
        now: Instant,
    ) {
        self.lock().active.insert(
            route.clone(),
            ActiveRequest {
                handle,
                generation,
                started_at: now,
            },
        );
    }

    /// The joinable in-flight handle, unless it has outlived the processing
    /// timeout.
    pub fn active_request(&self, route: &RouteKey, now: Instant) -> Option<H> {
        let mut state = self.lock();
        state
            .live_active(route, now, self.config.processing_timeout)
            .map(|active| active.handle.clone())
    }

    pub fn has_active_request(&self, route: &RouteKey, now: Instant) -> bool {
        self.active_request(route, now).is_some()
    }

    /// Remove the request started under `generation` once it settles.
    ///
    /// A newer request that replaced it is left untouched.
    pub fn settle(&self, route: &RouteKey, generation: Generation) -> bool {
        let mut state = self.lock();
        let current = state.active.get(route).map(|active| active.generation);
        if current != Some(generation) {
            return false;
        }
        state.active.remove(route);
        state.processing.remove(route);
        true
    }

    /// Drop every in-flight handle and processing mark.
    pub fn clear_requests(&self) {
        let mut state = self.lock();
        state.active.clear();
        state.processing.clear();
    }

    /// Join the in-flight request for `route`, or start one with `start`.
    ///
    /// `start` runs under the registry lock and must not call back into the
    /// registry.
    pub fn coordinate<F>(&self, route: &RouteKey, now: Instant, start: F) -> Coordination<H>
    where
        F: FnOnce(Generation) -> H,
    {
        let timeout = self.config.processing_timeout;
        let mut state = self.lock();

        if let Some(active) = state.live_active(route, now, timeout) {
            debug!(route = %route, generation = active.generation, "Joining in-flight request");
            return Coordination::Joined {
                handle: active.handle.clone(),
                generation: active.generation,
            };
        }
        if state.is_processing(route, now, timeout) {
            debug!(route = %route, "Route busy without a joinable request");
            return Coordination::Busy;
        }

        self.start_locked(&mut state, route, now, start)
    }

    /// Start a new request for `route` even if one is in flight.
    ///
    /// The older request keeps running; the generation guard decides which
    /// response commits.
    pub fn supersede<F>(&self, route: &RouteKey, now: Instant, start: F) -> Coordination<H>
    where
        F: FnOnce(Generation) -> H,
    {
        let mut state = self.lock();
        self.start_locked(&mut state, route, now, start)
    }

    fn start_locked<F>(
        &self,
        state: &mut RegistryState<H>,
        route: &RouteKey,
        now: Instant,
        start: F,
    ) -> Coordination<H>
    where
        F: FnOnce(Generation) -> H,
    {
        state.processing.insert(route.clone(), now);
        let generation = self.next_generation();
        let handle = start(generation);
        state.active.insert(
            route.clone(),
            ActiveRequest {
                handle: handle.clone(),
                generation,
                started_at: now,
            },
        );
        debug!(route = %route, generation, "Started request");
        Coordination::Started { handle, generation }
    }
}

impl<H: Clone> Default for RequestRegistry<H> {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn route() -> RouteKey {
        RouteKey::new("/me")
    }

    fn registry() -> RequestRegistry<&'static str> {
        RequestRegistry::default()
    }

    #[test]
    fn test_consumers_shared_and_removed_when_empty() {
        let reg = registry();
        let r = route();
        assert!(reg.register_consumer(&r, ConsumerId::new("nav")));
        assert!(!reg.register_consumer(&r, ConsumerId::new("nav")));
        assert!(!reg.is_shared(&r));

        reg.register_consumer(&r, ConsumerId::new("dashboard"));
        reg.register_consumer(&r, ConsumerId::new("guard"));
        assert!(reg.is_shared(&r));
        assert_eq!(reg.consumers(&r), 3);

        for id in ["nav", "dashboard", "guard"] {
            assert!(reg.unregister_consumer(&r, &ConsumerId::new(id)));
        }
        assert!(!reg.is_shared(&r));
        assert_eq!(reg.consumers(&r), 0);
        assert!(!reg.unregister_consumer(&r, &ConsumerId::new("nav")));
    }

    #[test]
    fn test_processing_mark_times_out() {
        let reg = registry();
        let r = route();
        let now = Instant::now();
        reg.mark_processing(&r, now);
        assert!(reg.is_processing(&r, now + Duration::from_secs(9)));
        assert!(!reg.is_processing(&r, now + Duration::from_secs(10)));
        // Released marks stay released.
        assert!(!reg.is_processing(&r, now + Duration::from_secs(1)));
    }

    #[test]
    fn test_critical_identity_never_throttles() {
        let reg = registry();
        let r = route();
        reg.classify(&r, RouteClass::CriticalIdentity);
        let now = Instant::now();
        for _ in 0..50 {
            assert!(!reg.should_throttle(&r, now));
        }
    }

    #[test]
    fn test_volatile_route_debounces() {
        let reg = registry();
        let r = RouteKey::new("/notifications");
        reg.classify(&r, RouteClass::Volatile);
        let now = Instant::now();

        assert!(!reg.should_throttle(&r, now));
        assert!(reg.should_throttle(&r, now + Duration::from_secs(1)));
        assert!(reg.should_throttle(&r, now + Duration::from_millis(2_999)));
        assert!(!reg.should_throttle(&r, now + Duration::from_secs(3)));
    }

    #[test]
    fn test_standard_route_counts_per_window() {
        let reg = registry();
        let r = route();
        let now = Instant::now();

        for _ in 0..5 {
            assert!(!reg.should_throttle(&r, now));
        }
        assert!(reg.should_throttle(&r, now + Duration::from_secs(10)));
        assert!(!reg.should_throttle(&r, now + Duration::from_millis(10_001)));
    }

    #[test]
    fn test_unclassified_routes_are_standard() {
        let reg = registry();
        assert_eq!(reg.class_of(&route()), RouteClass::Standard);
    }

    #[test]
    fn test_coordinate_starts_then_joins() {
        let reg = registry();
        let r = route();
        let now = Instant::now();

        let first = reg.coordinate(&r, now, |_| "fetch-1");
        assert_eq!(
            first,
            Coordination::Started {
                handle: "fetch-1",
                generation: 1
            }
        );
        assert!(reg.is_processing(&r, now));

        let second = reg.coordinate(&r, now, |_| "fetch-2");
        assert_eq!(
            second,
            Coordination::Joined {
                handle: "fetch-1",
                generation: 1
            }
        );
    }

    #[test]
    fn test_processing_without_handle_is_busy() {
        let reg = registry();
        let r = route();
        let now = Instant::now();
        reg.mark_processing(&r, now);
        assert_eq!(reg.coordinate(&r, now, |_| "never"), Coordination::Busy);
    }

    #[test]
    fn test_settle_removes_only_matching_generation() {
        let reg = registry();
        let r = route();
        let now = Instant::now();

        reg.coordinate(&r, now, |_| "old");
        let newer = reg.supersede(&r, now, |_| "new");
        assert!(matches!(newer, Coordination::Started { generation: 2, .. }));

        assert!(!reg.settle(&r, 1));
        assert_eq!(reg.active_request(&r, now), Some("new"));

        assert!(reg.settle(&r, 2));
        assert!(!reg.has_active_request(&r, now));
        assert!(!reg.is_processing(&r, now));
    }

    #[test]
    fn test_stuck_active_request_is_replaced() {
        let reg = registry();
        let r = route();
        let start = Instant::now();
        reg.coordinate(&r, start, |_| "stuck");

        let later = start + Duration::from_secs(11);
        let next = reg.coordinate(&r, later, |_| "fresh");
        assert!(matches!(
            next,
            Coordination::Started {
                handle: "fresh",
                generation: 2
            }
        ));
    }

    #[test]
    fn test_register_active_request_is_joinable() {
        let reg = registry();
        let r = route();
        let now = Instant::now();
        let generation = reg.next_generation();
        reg.register_active_request(&r, "manual", generation, now);
        assert!(matches!(
            reg.coordinate(&r, now, |_| "other"),
            Coordination::Joined { handle: "manual", .. }
        ));
    }

    #[test]
    fn test_clear_requests() {
        let reg = registry();
        let r = route();
        let now = Instant::now();
        reg.coordinate(&r, now, |_| "x");
        reg.clear_requests();
        assert!(!reg.has_active_request(&r, now));
        assert!(!reg.is_processing(&r, now));
        assert_eq!(reg.current_generation(), 1);
    }

    proptest! {
        #[test]
        fn standard_throttle_never_exceeds_threshold(
            threshold in 1u32..10,
            calls in 1usize..40,
        ) {
            let reg: RequestRegistry<()> = RequestRegistry::new(RegistryConfig {
                request_threshold: threshold,
                ..RegistryConfig::default()
            });
            let r = route();
            let now = Instant::now();
            let accepted = (0..calls).filter(|_| !reg.should_throttle(&r, now)).count();
            prop_assert_eq!(accepted, calls.min(threshold as usize));
        }

        #[test]
        fn generations_strictly_increase(n in 1usize..50) {
            let reg: RequestRegistry<()> = RequestRegistry::default();
            let mut last = reg.current_generation();
            for _ in 0..n {
                let next = reg.next_generation();
                prop_assert!(next > last);
                last = next;
            }
        }
    }
}
