//! Behavioural properties of the coordinator: coalescing, freshness,
//! breaker gating, invalidation, ordering, throttling and fallbacks.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use proptest::prelude::*;
use resync_engine::{
    CircuitState, EventKind, GetOptions, InvalidateOptions, ReadSource, RouteClass, RouteKey,
    SnapshotStore, SyncConfig, SyncError, SyncEvent,
};
use resync_test_utils::assertions::{assert_circuit_open, assert_served_from, assert_transport_error};
use resync_test_utils::generators::{arb_route_key, arb_user_profile, arb_valid_config};
use resync_test_utils::{network_error, profile, profile_payload, Harness, MockTransport, ME};

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// ============================================================================
// COALESCING
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn concurrent_calls_issue_exactly_one_fetch(n in 1usize..24) {
        let (fetches, all_same) = paused_runtime().block_on(async move {
            let harness = Harness::new(SyncConfig::default());
            harness.transport.push_ok_after(
                ME,
                profile_payload("ada@example.com"),
                Duration::from_millis(25),
            );
            let sync = &harness.coordinator;

            let results = join_all((0..n).map(move |i| {
                sync.get_resource(GetOptions::new().with_consumer(format!("consumer-{i}").as_str()))
            }))
            .await;

            let data: Vec<_> = results
                .into_iter()
                .map(|r| r.unwrap().data.unwrap())
                .collect();
            let all_same = data.iter().all(|d| Arc::ptr_eq(d, &data[0]));
            (harness.fetches(), all_same)
        });
        prop_assert_eq!(fetches, 1);
        prop_assert!(all_same);
    }

    #[test]
    fn coalescing_holds_for_any_valid_config(config in arb_valid_config(), n in 2usize..12) {
        let fetches = paused_runtime().block_on(async move {
            let harness = Harness::new(config);
            harness.transport.push_ok_after(
                ME,
                profile_payload("ada@example.com"),
                Duration::from_millis(25),
            );
            let sync = &harness.coordinator;
            let results = join_all((0..n).map(|_| sync.get())).await;
            assert!(results.iter().all(Result::is_ok));
            harness.fetches()
        });
        prop_assert_eq!(fetches, 1);
    }

    #[test]
    fn any_route_is_served_its_own_payload(route in arb_route_key(), expected in arb_user_profile()) {
        let (served, primary_cached) = paused_runtime().block_on({
            let route = route.clone();
            let payload = serde_json::to_value(&expected).unwrap();
            async move {
                let harness = Harness::new(SyncConfig::default());
                harness.transport.push_ok(route.clone(), payload);
                let state = harness
                    .coordinator
                    .get_resource(GetOptions::new().with_route(route))
                    .await
                    .unwrap();
                (state.data.unwrap(), harness.coordinator.entry().data.is_some())
            }
        });
        prop_assert_eq!(&*served, &expected);
        prop_assert_eq!(primary_cached, route.as_str() == ME);
    }
}

// ============================================================================
// FRESHNESS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn calls_inside_freshness_window_never_fetch() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    for _ in 0..10 {
        tokio::time::advance(Duration::from_secs(5)).await;
        let state = sync.get().await.unwrap();
        assert_eq!(state.source, ReadSource::Cache);
    }
    assert_eq!(harness.fetches(), 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    let state = sync.get().await.unwrap();
    assert_eq!(state.source, ReadSource::Network);
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn use_cache_false_bypasses_fresh_hit() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    let state = sync
        .get_resource(GetOptions::new().without_cache())
        .await
        .unwrap();
    assert_eq!(state.source, ReadSource::Network);
    assert_eq!(harness.fetches(), 2);
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

#[tokio::test(start_paused = true)]
async fn open_circuit_without_data_rejects_without_fetching() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_err(ME, network_error(ME));
    let sync = &harness.coordinator;

    for _ in 0..3 {
        assert_transport_error(&sync.get().await);
    }
    assert_eq!(sync.circuit_state(), CircuitState::Open);
    assert!(sync.entry().breaker_opened_at.is_some());

    for _ in 0..5 {
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_circuit_open(&sync.get().await);
    }
    assert_eq!(harness.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn trial_after_cooldown_closes_circuit_on_success() {
    let harness = Harness::new(SyncConfig::default());
    for _ in 0..3 {
        harness.transport.push_err(ME, network_error(ME));
    }
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    for _ in 0..3 {
        let _ = sync.get().await;
    }
    tokio::time::advance(Duration::from_secs(15)).await;

    let state = sync.get().await.unwrap();
    assert_eq!(state.source, ReadSource::Network);
    assert_eq!(sync.circuit_state(), CircuitState::Closed);
    assert_eq!(sync.entry().consecutive_errors, 0);
    assert!(sync.entry().breaker_opened_at.is_none());
    assert_eq!(harness.fetches(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_trial_reopens_with_fresh_cooldown() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_err(ME, network_error(ME));
    let sync = &harness.coordinator;

    for _ in 0..3 {
        let _ = sync.get().await;
    }
    tokio::time::advance(Duration::from_secs(16)).await;
    assert_transport_error(&sync.get().await);
    assert_eq!(harness.fetches(), 4);
    assert_eq!(sync.circuit_state(), CircuitState::Open);

    tokio::time::advance(Duration::from_secs(10)).await;
    assert_circuit_open(&sync.get().await);
    assert_eq!(harness.fetches(), 4);
}

#[tokio::test(start_paused = true)]
async fn callers_during_trial_join_it() {
    let harness = Harness::new(SyncConfig::default());
    for _ in 0..3 {
        harness.transport.push_err(ME, network_error(ME));
    }
    harness
        .transport
        .push_ok_after(ME, profile_payload("ada@example.com"), Duration::from_millis(100));
    let sync = &harness.coordinator;

    for _ in 0..3 {
        let _ = sync.get().await;
    }
    tokio::time::advance(Duration::from_secs(15)).await;

    let (trial, joined) = tokio::join!(sync.get(), sync.get());
    assert_served_from(&trial, ReadSource::Network);
    assert_served_from(&joined, ReadSource::Network);
    assert_eq!(harness.fetches(), 4);
    assert_eq!(sync.circuit_state(), CircuitState::Closed);
}

// ============================================================================
// INVALIDATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn invalidate_then_get_triggers_exactly_one_fetch() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("old@example.com"));
    harness
        .transport
        .push_ok_after(ME, profile_payload("new@example.com"), Duration::from_millis(20));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    assert!(sync.invalidate("role change", InvalidateOptions::default()));

    let state = sync.get().await.unwrap();
    assert_eq!(state.source, ReadSource::Network);
    assert_eq!(state.data.unwrap().email, "new@example.com");
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidate_with_skip_refresh_waits_for_next_call() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    assert!(!sync.invalidate("logout-pending", InvalidateOptions::skip_refresh()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(harness.fetches(), 1);

    let entry = sync.entry();
    assert!(entry.fetched_at.is_none());
    assert!(entry.data.is_some());

    sync.get().await.unwrap();
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn invalidate_emits_invalidated_then_updating() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;
    sync.get().await.unwrap();
    sync.events().flush().await;
    tokio::time::advance(Duration::from_secs(1)).await;

    let recorder = harness.recorder();
    sync.invalidate("profile edited", InvalidateOptions::default());
    tokio::time::sleep(Duration::from_millis(10)).await;
    sync.events().flush().await;

    let kinds = recorder.kinds();
    assert_eq!(kinds[0], EventKind::Invalidated);
    assert_eq!(kinds[1], EventKind::Updating);
    assert!(kinds.contains(&EventKind::Loading));
}

// ============================================================================
// EVENTS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn successful_fetch_emits_loading_loaded_updated() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let recorder = harness.recorder();

    harness.coordinator.get().await.unwrap();
    harness.coordinator.events().flush().await;

    assert_eq!(
        recorder.kinds(),
        vec![EventKind::Loading, EventKind::Loaded, EventKind::Updated]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_fetch_emits_error_with_counter() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_err(ME, network_error(ME));
    let recorder = harness.recorder();

    let _ = harness.coordinator.get().await;
    harness.coordinator.events().flush().await;

    let events = recorder.events();
    assert_eq!(events.len(), 2);
    match &events[1] {
        SyncEvent::Error {
            consecutive_errors,
            error,
            ..
        } => {
            assert_eq!(*consecutive_errors, 1);
            assert!(error.is_transport());
        }
        other => panic!("expected ERROR, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn identical_updates_inside_dedup_window_deliver_once() {
    let harness = Harness::new(SyncConfig::default());
    let recorder = harness.recorder();
    let bus = harness.coordinator.events();
    let resource = Arc::new(profile("ada@example.com"));

    assert!(bus.notify(SyncEvent::Updated {
        resource: Arc::clone(&resource)
    }));
    assert!(!bus.notify(SyncEvent::Updated {
        resource: Arc::clone(&resource)
    }));
    bus.flush().await;
    assert_eq!(recorder.count(EventKind::Updated), 1);

    tokio::time::advance(Duration::from_millis(600)).await;
    assert!(bus.notify(SyncEvent::Updated { resource }));
    bus.flush().await;
    assert_eq!(recorder.count(EventKind::Updated), 2);
}

#[tokio::test(start_paused = true)]
async fn subscriber_sees_updates_through_coordinator() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = harness
        .coordinator
        .subscribe(EventKind::Updated, move |event| {
            if let Some(resource) = event.resource() {
                sink.lock().unwrap().push(resource.email.clone());
            }
        });

    harness.coordinator.get().await.unwrap();
    harness.coordinator.events().flush().await;
    assert_eq!(*seen.lock().unwrap(), vec!["ada@example.com".to_string()]);
}

// ============================================================================
// ORDERING
// ============================================================================

#[tokio::test(start_paused = true)]
async fn slow_stale_response_cannot_overwrite_newer_refresh() {
    let harness = Harness::new(SyncConfig::default());
    harness
        .transport
        .push_ok_after(ME, profile_payload("old@example.com"), Duration::from_millis(500));
    harness
        .transport
        .push_ok_after(ME, profile_payload("new@example.com"), Duration::from_millis(10));
    let sync = harness.coordinator.clone();

    let slow = tokio::spawn({
        let sync = sync.clone();
        async move { sync.get().await }
    });
    tokio::task::yield_now().await;

    let forced = sync.get_resource(GetOptions::force_refresh()).await.unwrap();
    assert_eq!(forced.data.unwrap().email, "new@example.com");

    let slow = slow.await.unwrap().unwrap();
    assert_eq!(slow.data.unwrap().email, "new@example.com");
    assert_eq!(sync.entry().data.unwrap().email, "new@example.com");
    assert_eq!(sync.stats().cache.superseded, 1);
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn failure_overtaken_by_newer_refresh_is_not_counted() {
    let harness = Harness::new(SyncConfig::default());
    harness
        .transport
        .push_err_after(ME, network_error(ME), Duration::from_millis(500));
    harness
        .transport
        .push_ok_after(ME, profile_payload("new@example.com"), Duration::from_millis(10));
    let sync = harness.coordinator.clone();
    let recorder = harness.recorder();

    let slow = tokio::spawn({
        let sync = sync.clone();
        async move { sync.get().await }
    });
    tokio::task::yield_now().await;

    let forced = sync.get_resource(GetOptions::force_refresh()).await.unwrap();
    assert_eq!(forced.data.unwrap().email, "new@example.com");

    let slow = slow.await.unwrap();
    assert_served_from(&slow, ReadSource::Network);
    assert_eq!(slow.unwrap().data.unwrap().email, "new@example.com");
    sync.events().flush().await;

    assert_eq!(sync.entry().consecutive_errors, 0);
    assert_eq!(sync.circuit_state(), CircuitState::Closed);
    assert_eq!(recorder.count(EventKind::Error), 0);
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn fetch_settles_even_when_every_waiter_is_dropped() {
    let harness = Harness::new(SyncConfig::default());
    harness
        .transport
        .push_ok_after(ME, profile_payload("ada@example.com"), Duration::from_millis(100));
    let sync = &harness.coordinator;

    let gave_up = tokio::time::timeout(Duration::from_millis(10), sync.get()).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sync.entry().data.unwrap().email, "ada@example.com");
    assert!(!sync.entry().loading);
}

#[tokio::test(start_paused = true)]
async fn stuck_request_is_replaced_after_processing_timeout() {
    let harness = Harness::new(SyncConfig::default());
    harness
        .transport
        .push_ok_after(ME, profile_payload("stuck@example.com"), Duration::from_secs(30));
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let sync = harness.coordinator.clone();

    let stuck = tokio::spawn({
        let sync = sync.clone();
        async move { sync.get().await }
    });
    tokio::task::yield_now().await;
    assert!(sync.entry().loading);

    tokio::time::advance(Duration::from_secs(11)).await;
    let state = sync.get().await.unwrap();
    assert_eq!(state.data.unwrap().email, "ada@example.com");
    assert_eq!(harness.fetches(), 2);

    let late = stuck.await.unwrap().unwrap();
    assert_eq!(late.data.unwrap().email, "ada@example.com");
}

// ============================================================================
// THROTTLING
// ============================================================================

fn short_freshness() -> SyncConfig {
    SyncConfig::default()
        .with_freshness(Duration::from_millis(1))
        .with_request_threshold(2)
}

#[tokio::test(start_paused = true)]
async fn standard_route_serves_cache_once_threshold_is_hit() {
    let harness = Harness::new(short_freshness());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    for _ in 0..2 {
        sync.get().await.unwrap();
        tokio::time::advance(Duration::from_millis(5)).await;
    }
    let throttled = sync.get().await.unwrap();
    assert_eq!(throttled.source, ReadSource::Stale);
    assert!(throttled.error.is_none());
    assert_eq!(harness.fetches(), 2);
    assert_eq!(sync.stats().throttled, 1);

    tokio::time::advance(Duration::from_secs(11)).await;
    assert_served_from(&sync.get().await, ReadSource::Network);
    assert_eq!(harness.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn throttled_route_without_data_still_fetches() {
    let harness = Harness::new(short_freshness().with_request_threshold(1));
    harness.transport.push_err(ME, network_error(ME));
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    assert_transport_error(&sync.get().await);
    assert_served_from(&sync.get().await, ReadSource::Network);
    assert_eq!(harness.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn critical_identity_route_is_never_throttled() {
    let harness = Harness::new(short_freshness());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;
    sync.classify_route(ME, RouteClass::CriticalIdentity);

    for _ in 0..6 {
        assert_served_from(&sync.get().await, ReadSource::Network);
        tokio::time::advance(Duration::from_millis(5)).await;
    }
    assert_eq!(harness.fetches(), 6);
}

#[tokio::test(start_paused = true)]
async fn volatile_route_debounces_requests() {
    let harness = Harness::new(short_freshness());
    harness.transport.always_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;
    sync.classify_route(RouteKey::new(ME), RouteClass::Volatile);

    sync.get().await.unwrap();
    tokio::time::advance(Duration::from_secs(1)).await;
    assert_served_from(&sync.get().await, ReadSource::Stale);
    tokio::time::advance(Duration::from_secs(2)).await;
    assert_served_from(&sync.get().await, ReadSource::Network);
    assert_eq!(harness.fetches(), 2);
}

// ============================================================================
// FALLBACKS AND PAYLOADS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn expired_data_is_still_served_on_failure() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    harness.transport.push_err(ME, network_error(ME));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    tokio::time::advance(Duration::from_secs(31 * 60)).await;

    let state = sync.get().await.unwrap();
    assert_eq!(state.source, ReadSource::Stale);
    assert_eq!(state.data.unwrap().email, "ada@example.com");
}

#[tokio::test(start_paused = true)]
async fn durable_snapshot_backs_a_cold_start() {
    let harness = Harness::new(SyncConfig::default());
    harness
        .snapshots
        .write("resource", &profile("snapshot@example.com"))
        .await
        .unwrap();
    harness.transport.push_err(ME, network_error(ME));
    let sync = &harness.coordinator;

    let state = sync.get().await.unwrap();
    assert_eq!(state.source, ReadSource::Snapshot);
    assert_eq!(state.data.unwrap().email, "snapshot@example.com");
    assert!(state.error.unwrap().is_transport());
    // Hydrated into memory, but not fresh.
    assert!(sync.entry().data.is_some());
    assert!(sync.entry().fetched_at.is_none());
}

#[tokio::test(start_paused = true)]
async fn successful_fetch_writes_snapshot() {
    let harness = Harness::new(SyncConfig::default().with_snapshot_key("me"));
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));

    harness.coordinator.get().await.unwrap();
    let snapshot = harness.snapshots.read("me").await.unwrap().unwrap();
    assert_eq!(snapshot.resource.email, "ada@example.com");
}

#[tokio::test(start_paused = true)]
async fn nothing_anywhere_rejects_with_transport_error() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_err(ME, network_error(ME));
    assert_transport_error(&harness.coordinator.get().await);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_rejected_and_counted() {
    let harness = Harness::new(SyncConfig::default());
    let mut payload = profile_payload("ada@example.com");
    payload["email"] = serde_json::json!("   ");
    harness.transport.push_ok(ME, payload);
    let sync = &harness.coordinator;

    let err = sync.get().await.unwrap_err();
    assert!(err.is_invalid_payload());
    assert_eq!(sync.entry().consecutive_errors, 1);
    assert!(sync.entry().data.is_none());
}

#[tokio::test(start_paused = true)]
async fn clear_drops_everything_and_closes_circuit() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    harness.transport.always_err(ME, network_error(ME));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    for _ in 0..3 {
        let _ = sync.get().await;
    }
    assert_eq!(sync.circuit_state(), CircuitState::Open);
    sync.events().flush().await;

    let recorder = harness.recorder();
    sync.clear().await;
    sync.events().flush().await;

    let entry = sync.entry();
    assert!(entry.data.is_none());
    assert_eq!(entry.consecutive_errors, 0);
    assert_eq!(sync.circuit_state(), CircuitState::Closed);
    assert!(harness.snapshots.is_empty());
    assert_eq!(recorder.kinds(), vec![EventKind::Invalidated]);

    let err = sync.get().await.unwrap_err();
    assert!(matches!(err, SyncError::Transport(_)));
}

#[tokio::test(start_paused = true)]
async fn routes_other_than_primary_are_tracked_separately() {
    let transport = MockTransport::new();
    transport.push_ok("/me/preferences", profile_payload("ada@example.com"));
    let harness = Harness::with_transport(SyncConfig::default(), transport);

    let state = harness
        .coordinator
        .get_resource(GetOptions::new().with_route("/me/preferences").with_consumer("settings"))
        .await
        .unwrap();
    assert_eq!(state.source, ReadSource::Network);
    assert_eq!(harness.transport.calls("/me/preferences"), 1);
    assert_eq!(harness.transport.calls(ME), 0);
    assert_eq!(harness.coordinator.consumers(&RouteKey::new("/me/preferences")), 1);
}

#[tokio::test(start_paused = true)]
async fn cached_primary_is_never_served_for_another_route() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    harness.transport.push_ok("/users/42", profile_payload("grace@example.com"));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    let other = sync
        .get_resource(GetOptions::new().with_route("/users/42"))
        .await
        .unwrap();
    assert_eq!(other.source, ReadSource::Network);
    assert_eq!(other.data.unwrap().email, "grace@example.com");
    assert_eq!(harness.transport.calls("/users/42"), 1);

    let primary = sync.get().await.unwrap();
    assert_eq!(primary.source, ReadSource::Cache);
    assert_eq!(primary.data.unwrap().email, "ada@example.com");
    assert_eq!(harness.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn secondary_route_does_not_answer_primary_reads() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok("/users/42", profile_payload("grace@example.com"));
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    let sync = &harness.coordinator;

    sync.get_resource(GetOptions::new().with_route("/users/42"))
        .await
        .unwrap();
    assert!(sync.entry().data.is_none());

    let primary = sync.get().await.unwrap();
    assert_eq!(primary.source, ReadSource::Network);
    assert_eq!(primary.data.unwrap().email, "ada@example.com");
    assert_eq!(harness.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn secondary_route_snapshot_is_namespaced_and_cleared() {
    let harness = Harness::new(SyncConfig::default());
    harness.transport.push_ok(ME, profile_payload("ada@example.com"));
    harness.transport.push_ok("/users/42", profile_payload("grace@example.com"));
    let sync = &harness.coordinator;

    sync.get().await.unwrap();
    sync.get_resource(GetOptions::new().with_route("/users/42"))
        .await
        .unwrap();

    let primary = harness.snapshots.read("resource").await.unwrap().unwrap();
    assert_eq!(primary.resource.email, "ada@example.com");
    let other = harness
        .snapshots
        .read("resource:/users/42")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(other.resource.email, "grace@example.com");

    sync.clear().await;
    assert!(harness.snapshots.is_empty());
}
