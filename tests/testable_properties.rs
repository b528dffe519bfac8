//! Quantified invariants from spec.md §8 not already covered by the seed
//! scenarios or by unit tests colocated with their owning module
//! (`pipeline::tests` covers talent-order invariance and idempotent hashing;
//! `branch::tests` covers pattern matching).

mod common;

use std::{sync::Arc, time::Duration};

use cyre::{ChannelConfig, Cyre, Payload};

use common::{counting_handler, json, sync_handler};

/// Mutual exclusivity is enforced at the type level (`Protection` is a sum
/// type), so two protections literally cannot be set on one `ChannelConfig`.
/// What registration still needs to reject is out-of-bounds values within
/// whichever protection *is* chosen (spec §4.1).
#[test]
fn registration_rejects_out_of_bounds_protection_values() {
    common::init_tracing();
    let cyre = Cyre::new();
    cyre.initialize();

    let zero_throttle = ChannelConfig::new("a").throttle(Duration::from_millis(0));
    assert!(!cyre.action(zero_throttle).ok);

    let zero_debounce = ChannelConfig::new("b").debounce(Duration::from_millis(0), None);
    assert!(!cyre.action(zero_debounce).ok);

    let max_wait_below_debounce = ChannelConfig::new("c").debounce(
        Duration::from_millis(100),
        Some(Duration::from_millis(50)),
    );
    assert!(!cyre.action(max_wait_below_debounce).ok);

    let zero_window = ChannelConfig::new("d").buffer(
        Duration::from_millis(0),
        cyre::channel::BufferStrategy::Append,
        None,
    );
    assert!(!cyre.action(zero_window).ok);

    let empty_id = ChannelConfig::new("");
    assert!(!cyre.action(empty_id).ok);
}

/// spec §8 "Forget cleanup": after `forget(id)`, `call(id, ...)` reports
/// `NoSuchChannel` and no timer associated with `id` fires again.
#[tokio::test(start_paused = true)]
async fn forget_prevents_pending_debounce_from_firing() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("d").debounce(Duration::from_millis(100), None));
    let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let fired_handle = Arc::clone(&fired);
    cyre.on(
        "d",
        sync_handler(move |p| {
            fired_handle.store(true, std::sync::atomic::Ordering::SeqCst);
            p
        }),
    );

    let response = cyre.call("d", Some(json(1.into()))).await;
    assert!(response.ok);
    assert!(cyre.forget("d"));

    tokio::time::advance(Duration::from_millis(200)).await;
    tokio::task::yield_now().await;
    assert!(!fired.load(std::sync::atomic::Ordering::SeqCst));

    let after = cyre.call("d", None).await;
    assert!(!after.ok);
    assert_eq!(after.metadata.error_kind, Some("NoSuchChannel"));
}

/// spec §8 "Link safety": a handler return that keeps linking to the same
/// channel terminates after `MAX_LINK_DEPTH` hops rather than looping forever.
/// The terminal hop's outcome must also be observable (not a silent drop): it
/// counts as a channel error and fires an orchestration notification.
#[tokio::test]
async fn link_chain_cycle_is_cut_at_the_configured_depth() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("loop"));

    let notified_ok = Arc::new(std::sync::Mutex::new(None));
    let notified_handle = Arc::clone(&notified_ok);
    cyre.register_trigger(
        "loop",
        Arc::new(move |event: &cyre::ChannelFireEvent| {
            *notified_handle.lock().unwrap() = Some(event.ok);
        }),
    );

    let hops = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let hops_handle = Arc::clone(&hops);
    cyre.on(
        "loop",
        Arc::new(move |payload: Payload| {
            let hops = Arc::clone(&hops_handle);
            Box::pin(async move {
                hops.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(cyre::HandlerResult::Link {
                    id: "loop".into(),
                    payload,
                })
            })
        }),
    );

    cyre.call("loop", Some(json(0.into()))).await;
    // Linked hops are spawned as background tasks; give them room to unwind.
    for _ in 0..(cyre::dispatch::MAX_LINK_DEPTH as usize + 4) {
        tokio::task::yield_now().await;
    }
    let observed = hops.load(std::sync::atomic::Ordering::SeqCst);
    assert!(
        observed <= cyre::dispatch::MAX_LINK_DEPTH as usize + 1,
        "link cycle ran {observed} hops, expected it to stop at the configured depth"
    );

    let snapshot = cyre.get("loop").expect("channel still registered");
    assert!(
        snapshot.metadata.error_count >= 1,
        "the cut-off terminal hop should count as a channel error"
    );
    assert_eq!(
        *notified_ok.lock().unwrap(),
        Some(false),
        "the cut-off terminal hop should notify orchestration triggers with ok=false"
    );
}

/// spec §3 invariant 2: re-registering the same id replaces the config and
/// invalidates the cached compiled pipeline (observable via a changed
/// `verificationHash`, exercised end to end rather than unit-tested on the
/// bare `ChannelConfig`).
#[tokio::test]
async fn reregistering_a_channel_replaces_its_behavior() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("r"));
    cyre.on("r", sync_handler(|_| json("first".into())));
    let first = cyre.call("r", None).await;
    assert_eq!(first.payload.unwrap().0, "first");

    // Re-registering clears the old config but subscribers are independent of
    // channel config, so the same handler still observes the replacement.
    cyre.action(ChannelConfig::new("r").throttle(Duration::from_millis(50)));
    let second = cyre.call("r", None).await;
    assert!(second.ok);
    let third = cyre.call("r", None).await;
    assert!(!third.ok, "the replaced config's throttle should now apply");
}

/// spec §4.4: "first execution happens n ms after the call" — a standalone
/// `delay` (no `interval`) must defer, not drop, the first dispatch.
#[tokio::test(start_paused = true)]
async fn standalone_delay_defers_the_first_execution() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("delayed").delay(Duration::from_millis(100)));

    let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    cyre.on("delayed", counting_handler(Arc::clone(&count)));

    let response = cyre.call("delayed", Some(json(1.into()))).await;
    assert!(response.ok);
    assert_eq!(response.metadata.scheduled, Some(Duration::from_millis(100)));
    assert_eq!(
        count.load(std::sync::atomic::Ordering::SeqCst),
        0,
        "delay must defer the call, not drop it or run it synchronously"
    );

    tokio::time::advance(Duration::from_millis(100)).await;
    tokio::task::yield_now().await;
    assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_millis(500)).await;
    tokio::task::yield_now().await;
    assert_eq!(
        count.load(std::sync::atomic::Ordering::SeqCst),
        1,
        "a delay with no interval/repeat fires exactly once"
    );
}

/// spec §4.1/§6: `lock()` "freezes registration and subscription" — `on()`
/// must be rejected while the registry is locked, the same as `action()`.
#[tokio::test]
async fn lock_freezes_subscription_as_well_as_registration() {
    let cyre = Cyre::new();
    cyre.initialize();
    cyre.action(ChannelConfig::new("l"));

    cyre.lock();
    assert!(!cyre.action(ChannelConfig::new("other")).ok);
    let result = cyre.on("l", sync_handler(|p| p));
    assert!(!result.ok, "on() should be rejected while the registry is locked");
    assert!(result.unsubscribe.is_none());

    cyre.unlock();
    let result = cyre.on("l", sync_handler(|p| p));
    assert!(result.ok, "on() should succeed again once unlocked");
}
