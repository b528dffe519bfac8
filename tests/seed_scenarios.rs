//! End-to-end scenarios from spec.md §8 ("Concrete end-to-end scenarios (seed)").

mod common;

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use cyre::{ChannelConfig, Cyre, Payload};

use common::{counting_handler, json, recording_handler, sync_handler};

/// Scenario 1 — Throttle.
#[tokio::test(start_paused = true)]
async fn throttle_rejects_within_window_and_admits_after() {
    common::init_tracing();
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("t").throttle(Duration::from_millis(100)));
    cyre.on("t", sync_handler(|p| p));

    let first = cyre.call("t", Some(json(1.into()))).await;
    assert!(first.ok);
    assert_eq!(first.payload.unwrap().0, 1);

    tokio::time::advance(Duration::from_millis(20)).await;
    let second = cyre.call("t", Some(json(2.into()))).await;
    assert!(!second.ok);
    assert_eq!(second.metadata.error_kind, Some("Throttled"));

    tokio::time::advance(Duration::from_millis(130)).await;
    let third = cyre.call("t", Some(json(3.into()))).await;
    assert!(third.ok);
    assert_eq!(third.payload.unwrap().0, 3);
}

/// Scenario 2 — Debounce collapse.
#[tokio::test(start_paused = true)]
async fn debounce_collapses_a_burst_to_the_last_payload() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("d").debounce(Duration::from_millis(100), None));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    cyre.on("d", recording_handler(Arc::clone(&seen)));

    for payload in ["a", "b", "c", "d", "e"] {
        let response = cyre.call("d", Some(json(payload.into()))).await;
        assert!(response.ok);
        assert_eq!(response.metadata.error_kind, Some("Debounced"));
        tokio::time::advance(Duration::from_millis(10)).await;
    }

    tokio::time::advance(Duration::from_millis(150)).await;
    tokio::task::yield_now().await;

    let recorded = seen.lock().unwrap();
    assert_eq!(recorded.len(), 1, "expected exactly one coalesced execution");
    assert_eq!(recorded[0].0, "e");
}

/// Scenario 3 — Buffer append.
#[tokio::test(start_paused = true)]
async fn buffer_append_dispatches_once_with_the_ordered_list() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("b").buffer(
        Duration::from_millis(200),
        cyre::channel::BufferStrategy::Append,
        None,
    ));
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    cyre.on("b", recording_handler(Arc::clone(&seen)));

    for payload in ["x", "y", "z"] {
        let response = cyre.call("b", Some(json(payload.into()))).await;
        assert!(response.ok);
        assert_eq!(response.metadata.error_kind, Some("Buffered"));
        tokio::time::advance(Duration::from_millis(15)).await;
    }

    tokio::time::advance(Duration::from_millis(220)).await;
    tokio::task::yield_now().await;

    let recorded = seen.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].0, serde_json::json!(["x", "y", "z"]));
}

/// Scenario 4 — Talent pipeline (selector/condition/transform/detectChanges).
#[tokio::test]
async fn talent_pipeline_projects_gates_and_detects_repeats() {
    let cyre = Cyre::new();
    cyre.initialize();
    let mut config = ChannelConfig::new("p");
    config.talents.selector = Some(Arc::new(|payload: &Payload| {
        Payload(payload.0.get("value").cloned().unwrap_or(serde_json::Value::Null))
    }));
    config.talents.condition = Some(Arc::new(|value: &Payload| {
        value.0.as_i64().map(|v| v > 10).unwrap_or(false)
    }));
    config.talents.transform = Some(Arc::new(|value: Payload| {
        Payload(serde_json::json!({ "value": value.0, "processed": true }))
    }));
    config.talents.detect_changes = true;
    cyre.action(config);
    cyre.on("p", sync_handler(|p| p));

    let first = cyre
        .call("p", Some(json(serde_json::json!({"value": 15, "extra": "a"}))))
        .await;
    assert!(first.ok);
    assert_eq!(
        first.payload.unwrap().0,
        serde_json::json!({"value": 15, "processed": true})
    );

    let repeat = cyre
        .call("p", Some(json(serde_json::json!({"value": 15, "extra": "b"}))))
        .await;
    assert!(repeat.ok);
    assert_eq!(repeat.metadata.error_kind, Some("NoChange"));

    let rejected = cyre
        .call("p", Some(json(serde_json::json!({"value": 5}))))
        .await;
    assert!(!rejected.ok);
    assert_eq!(rejected.metadata.error_kind, Some("ConditionNotMet"));
}

/// Scenario 5 — Waterfall dispatch chains handler return values.
#[tokio::test]
async fn waterfall_dispatch_chains_handler_outputs() {
    let cyre = Cyre::new();
    cyre.initialize();
    let mut config = ChannelConfig::new("w");
    config.dispatch = cyre::channel::DispatchStrategy::Waterfall;
    cyre.action(config);

    cyre.on("w", sync_handler(|p| json((p.0.as_i64().unwrap() + 10).into())));
    cyre.on("w", sync_handler(|p| json((p.0.as_i64().unwrap() * 2).into())));
    cyre.on("w", sync_handler(|p| json((p.0.as_i64().unwrap() - 5).into())));

    let response = cyre.call("w", Some(json(5.into()))).await;
    assert!(response.ok);
    assert_eq!(response.payload.unwrap().0, 25);
}

/// Scenario 6 — Interval + repeat triggers N executions from a single call.
#[tokio::test(start_paused = true)]
async fn interval_and_repeat_fire_the_configured_number_of_times() {
    let cyre = Cyre::new();
    cyre.initialize();
    let mut config = ChannelConfig::new("i");
    config.scheduling.interval = Some(Duration::from_millis(100));
    config.scheduling.repeat = Some(cyre::channel::Repeat::Count(3));
    cyre.action(config);

    let count = Arc::new(AtomicUsize::new(0));
    cyre.on("i", counting_handler(Arc::clone(&count)));

    let response = cyre.call("i", None).await;
    assert!(response.ok);

    for _ in 0..3 {
        tokio::time::advance(Duration::from_millis(100)).await;
        tokio::task::yield_now().await;
    }
    assert_eq!(count.load(Ordering::SeqCst), 3);

    tokio::time::advance(Duration::from_millis(300)).await;
    tokio::task::yield_now().await;
    assert_eq!(count.load(Ordering::SeqCst), 3, "no firings after the repeat budget is exhausted");

    assert!(cyre.forget("i"));
}
