//! resync Test Utilities
//!
//! Shared test infrastructure for the resync workspace:
//! - A scripted mock transport with per-call latency and call counting
//! - An event recorder that captures everything a bus delivers
//! - Proptest generators for profiles, routes and configurations
//! - Fixtures and a ready-made coordinator harness
//! - Assertions over consumer-facing results

pub use resync_core::{
    ConsumerId, FetchOptions, GetOptions, InvalidateOptions, ReadSource, ResourceState,
    RouteClass, RouteKey, SyncConfig, SyncError, SyncResult, Timestamp, TransportError,
    UserProfile,
};
pub use resync_engine::{Coordinator, Transport};
pub use resync_events::{EventBus, EventKind, Subscription, SyncEvent};
pub use resync_storage::InMemorySnapshotStore;

pub use fixtures::*;

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

#[derive(Debug, Clone)]
struct Scripted {
    outcome: Result<serde_json::Value, TransportError>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<RouteKey, VecDeque<Scripted>>,
    repeating: HashMap<RouteKey, Scripted>,
    calls: HashMap<RouteKey, usize>,
    options: Vec<FetchOptions>,
}

/// Transport double replaying scripted outcomes per route.
///
/// Scripted outcomes are consumed in order; once a route's script is empty
/// its repeating outcome (if any) answers every further call, otherwise the
/// call fails with a network error. Calls are counted when they start, so
/// counts include fetches still sleeping on their latency.
#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latency applied to every call without its own.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, route: impl Into<RouteKey>, scripted: Scripted) {
        self.lock()
            .scripts
            .entry(route.into())
            .or_default()
            .push_back(scripted);
    }

    pub fn push_ok(&self, route: impl Into<RouteKey>, payload: serde_json::Value) {
        self.push(
            route,
            Scripted {
                outcome: Ok(payload),
                latency: None,
            },
        );
    }

    pub fn push_ok_after(&self, route: impl Into<RouteKey>, payload: serde_json::Value, latency: Duration) {
        self.push(
            route,
            Scripted {
                outcome: Ok(payload),
                latency: Some(latency),
            },
        );
    }

    pub fn push_err(&self, route: impl Into<RouteKey>, error: TransportError) {
        self.push(
            route,
            Scripted {
                outcome: Err(error),
                latency: None,
            },
        );
    }

    pub fn push_err_after(&self, route: impl Into<RouteKey>, error: TransportError, latency: Duration) {
        self.push(
            route,
            Scripted {
                outcome: Err(error),
                latency: Some(latency),
            },
        );
    }

    /// Answer every unscripted call on `route` with `payload`.
    pub fn always_ok(&self, route: impl Into<RouteKey>, payload: serde_json::Value) {
        self.lock().repeating.insert(
            route.into(),
            Scripted {
                outcome: Ok(payload),
                latency: None,
            },
        );
    }

    /// Answer every unscripted call on `route` with `error`.
    pub fn always_err(&self, route: impl Into<RouteKey>, error: TransportError) {
        self.lock().repeating.insert(
            route.into(),
            Scripted {
                outcome: Err(error),
                latency: None,
            },
        );
    }

    pub fn calls(&self, route: impl Into<RouteKey>) -> usize {
        self.lock().calls.get(&route.into()).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Options passed to the most recent call.
    pub fn last_options(&self) -> Option<FetchOptions> {
        self.lock().options.last().cloned()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        route: &RouteKey,
        options: &FetchOptions,
    ) -> Result<serde_json::Value, TransportError> {
        let scripted = {
            let mut state = self.lock();
            *state.calls.entry(route.clone()).or_insert(0) += 1;
            state.options.push(options.clone());
            let next = state.scripts.get_mut(route).and_then(VecDeque::pop_front);
            next.or_else(|| state.repeating.get(route).cloned())
        };

        let Some(scripted) = scripted else {
            return Err(TransportError::Network {
                route: route.clone(),
                reason: "no scripted outcome".to_string(),
            });
        };

        let latency = scripted.latency.unwrap_or(self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        scripted.outcome
    }
}

// ============================================================================
// EVENT RECORDER
// ============================================================================

/// Subscribes to every event kind and records deliveries in order.
pub struct EventRecorder<R> {
    events: Arc<Mutex<Vec<SyncEvent<R>>>>,
    _subscriptions: Vec<Subscription>,
}

impl<R: resync_core::Resource> EventRecorder<R> {
    pub fn attach(bus: &EventBus<SyncEvent<R>>) -> Self {
        let events = Arc::new(Mutex::new(Vec::new()));
        let subscriptions = EventKind::ALL
            .iter()
            .map(|kind| {
                let sink = Arc::clone(&events);
                bus.subscribe(*kind, move |event: &SyncEvent<R>| {
                    sink.lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .push(event.clone());
                })
            })
            .collect();
        Self {
            events,
            _subscriptions: subscriptions,
        }
    }

    pub fn events(&self) -> Vec<SyncEvent<R>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        use resync_events::BusEvent;
        self.events().iter().map(BusEvent::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for resync types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a non-nil UUID.
    pub fn arb_entity_id() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>()
            .prop_filter("nil uuid", |bytes| bytes.iter().any(|b| *b != 0))
            .prop_map(Uuid::from_bytes)
    }

    /// Generate a Timestamp (DateTime<Utc>).
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        // 2020-2030
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(chrono::Utc::now)
        })
    }

    pub fn arb_email() -> impl Strategy<Value = String> {
        ("[a-z]{1,12}", "[a-z]{1,10}").prop_map(|(user, domain)| format!("{user}@{domain}.com"))
    }

    pub fn arb_role() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("admin".to_string()),
            Just("editor".to_string()),
            Just("viewer".to_string()),
            Just("support".to_string()),
        ]
    }

    /// Generate a profile that passes validation.
    pub fn arb_user_profile() -> impl Strategy<Value = UserProfile> {
        (
            arb_entity_id(),
            arb_email(),
            "[A-Za-z ]{1,24}",
            prop::collection::vec(arb_role(), 0..4),
            prop::option::of(arb_entity_id()),
            arb_timestamp(),
        )
            .prop_map(|(id, email, display_name, roles, tenant_id, updated_at)| UserProfile {
                id,
                email,
                display_name,
                roles,
                tenant_id,
                updated_at,
            })
    }

    pub fn arb_route_key() -> impl Strategy<Value = RouteKey> {
        "/[a-z]{1,8}(/[a-z]{1,8}){0,2}".prop_map(RouteKey::new)
    }

    pub fn arb_route_class() -> impl Strategy<Value = RouteClass> {
        prop_oneof![
            Just(RouteClass::CriticalIdentity),
            Just(RouteClass::Volatile),
            Just(RouteClass::Standard),
        ]
    }

    /// Generate a configuration that passes `validate()`.
    pub fn arb_valid_config() -> impl Strategy<Value = SyncConfig> {
        (
            1u64..120_000,
            0u64..3_600_000,
            1u32..10,
            1u64..60_000,
            1u32..20,
            1u64..2_000,
        )
            .prop_map(|(freshness, extra_age, threshold, cooldown, requests, dedup)| {
                SyncConfig::default()
                    .with_freshness(Duration::from_millis(freshness))
                    .with_max_age(Duration::from_millis(freshness + extra_age))
                    .with_error_threshold(threshold)
                    .with_circuit_cooldown(Duration::from_millis(cooldown))
                    .with_request_threshold(requests)
                    .with_event_dedup_window(Duration::from_millis(dedup))
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use uuid::Uuid;

    pub const ME: &str = "/me";

    /// Stable identifier shared by every fixture profile.
    pub fn profile_id() -> Uuid {
        Uuid::from_u128(0x0190_b6f4_7c1e_7cc4_9d6e_2f1b_8a4c_5d11)
    }

    pub fn profile(email: &str) -> UserProfile {
        UserProfile {
            id: profile_id(),
            email: email.to_string(),
            display_name: "Test User".to_string(),
            roles: vec!["viewer".to_string()],
            tenant_id: None,
            updated_at: chrono::DateTime::from_timestamp(1_767_225_600, 0)
                .unwrap_or_else(chrono::Utc::now),
        }
    }

    /// Wire payload for [`profile`].
    pub fn profile_payload(email: &str) -> serde_json::Value {
        serde_json::json!({
            "id": profile_id(),
            "email": email,
            "display_name": "Test User",
            "roles": ["viewer"],
            "updated_at": "2026-01-01T00:00:00Z",
        })
    }

    pub fn network_error(route: &str) -> TransportError {
        TransportError::Network {
            route: RouteKey::new(route),
            reason: "connection reset".to_string(),
        }
    }

    pub fn status_error(route: &str, status: u16) -> TransportError {
        TransportError::Status {
            route: RouteKey::new(route),
            status,
            message: "upstream failure".to_string(),
        }
    }

    /// A coordinator wired to a mock transport and in-memory snapshots.
    pub struct Harness {
        pub coordinator: Coordinator<UserProfile>,
        pub transport: Arc<MockTransport>,
        pub snapshots: Arc<InMemorySnapshotStore<UserProfile>>,
    }

    impl Harness {
        /// Must be called within a Tokio runtime.
        pub fn new(config: SyncConfig) -> Self {
            Self::with_transport(config, MockTransport::new())
        }

        pub fn with_transport(config: SyncConfig, transport: MockTransport) -> Self {
            let transport = Arc::new(transport);
            let snapshots = Arc::new(InMemorySnapshotStore::<UserProfile>::new());
            let coordinator = Coordinator::new(
                config,
                Arc::clone(&transport) as Arc<dyn Transport>,
                Arc::clone(&snapshots) as Arc<dyn resync_storage::SnapshotStore<UserProfile>>,
                ME,
            )
            .unwrap_or_else(|e| panic!("invalid test config: {e}"));
            Self {
                coordinator,
                transport,
                snapshots,
            }
        }

        pub fn fetches(&self) -> usize {
            self.transport.calls(ME)
        }

        pub fn recorder(&self) -> EventRecorder<UserProfile> {
            EventRecorder::attach(self.coordinator.events())
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over consumer-facing results.

    use super::*;

    /// Assert that a result carries data from `source`.
    #[track_caller]
    pub fn assert_served_from<R: std::fmt::Debug>(
        result: &SyncResult<ResourceState<R>>,
        source: ReadSource,
    ) {
        match result {
            Ok(state) => {
                assert_eq!(state.source, source, "Wrong source for {:?}", state);
                assert!(state.data.is_some(), "Expected data from {:?}", source);
            }
            Err(e) => panic!("Expected data from {:?}, got Err: {:?}", source, e),
        }
    }

    /// Assert that a result was rejected because the circuit is open.
    #[track_caller]
    pub fn assert_circuit_open<R: std::fmt::Debug>(result: &SyncResult<ResourceState<R>>) {
        match result {
            Err(SyncError::CircuitOpen { .. }) => {}
            other => panic!("Expected CircuitOpen error, got: {:?}", other),
        }
    }

    /// Assert that a result was rejected with a transport error.
    #[track_caller]
    pub fn assert_transport_error<R: std::fmt::Debug>(result: &SyncResult<ResourceState<R>>) {
        match result {
            Err(SyncError::Transport(_)) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }
}
