//! Shared test helpers: handler constructors and small payload utilities.
//! Not a test binary itself — included via `mod common;` in each suite.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use cyre::{HandlerResult, Payload};

/// Initializes a `tracing` subscriber once per test binary so `RUST_LOG=debug
/// cargo test -- --nocapture` shows the dispatcher's stage-transition logs.
/// Safe to call from every test; later calls are no-ops.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Wraps a synchronous `Fn(Payload) -> Payload` into a `HandlerFn`.
pub fn sync_handler<F>(f: F) -> cyre::subscriber::HandlerFn
where
    F: Fn(Payload) -> Payload + Send + Sync + 'static,
{
    Arc::new(move |payload: Payload| {
        let result = f(payload);
        Box::pin(async move { Ok(HandlerResult::Value(result)) })
    })
}

/// A handler that records every payload it sees (cloned into a shared `Vec`)
/// and echoes it back unchanged.
pub fn recording_handler(
    sink: Arc<std::sync::Mutex<Vec<Payload>>>,
) -> cyre::subscriber::HandlerFn {
    Arc::new(move |payload: Payload| {
        let sink = Arc::clone(&sink);
        Box::pin(async move {
            sink.lock().unwrap().push(payload.clone());
            Ok(HandlerResult::Value(payload))
        })
    })
}

/// A counting handler that increments an atomic counter and returns the
/// payload unchanged; useful for asserting exactly-N-invocations properties.
pub fn counting_handler(counter: Arc<AtomicUsize>) -> cyre::subscriber::HandlerFn {
    Arc::new(move |payload: Payload| {
        let counter = Arc::clone(&counter);
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(HandlerResult::Value(payload))
        })
    })
}

pub fn json(value: serde_json::Value) -> Payload {
    Payload(value)
}
