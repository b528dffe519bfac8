//! The top-level runtime object (`Cyre`): spec.md §6's external interface table,
//! wired on top of C1–C10.
//!
//! # Design background (Why)
//! - Design Notes call out "global singletons (`cyre`, registries)" as a pattern
//!   that needs re-architecture: "encapsulate as an explicit runtime object with
//!   an init/shutdown lifecycle; allow multiple isolated instances for testing."
//!   `Cyre` is that object — an `Arc`-backed handle, cheap to `Clone`, with no
//!   process-wide statics anywhere in the crate.
//! - Every operation in spec.md §6's table is a thin method here that forwards
//!   into the component that owns the behavior (registry, dispatcher, subscriber
//!   registry, branch manager); `runtime` itself holds no business logic beyond
//!   lifecycle state (`Uninitialized -> Ready -> ShutdownPending`) and wiring.

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

use crate::{
    branch::{Branch, CreateBranchOptions},
    breathing::BreathingMonitor,
    channel::{registry::ChannelRegistry, ChannelConfig, ChannelSnapshot},
    common::{ChannelId, Payload},
    dispatch::{Dispatcher, Response},
    error::CyreErrorKind,
    metrics::{MetricsView, SystemHealth},
    orchestration::{OrchestrationRouter, Trigger},
    subscriber::{HandlerFn, SubscriberRegistry, Unsubscribe},
    time::{Clock, SystemClock},
    timekeeper::Timekeeper,
};

const UNINITIALIZED: u8 = 0;
const READY: u8 = 1;
const SHUTDOWN: u8 = 2;

/// `initialize()`'s result (spec §6 `{ok, message}`).
#[derive(Clone, Debug)]
pub struct InitResult {
    pub ok: bool,
    pub message: String,
}

/// `action(config)`'s result (spec §6 `{ok, message}`).
#[derive(Clone, Debug)]
pub struct ActionResult {
    pub ok: bool,
    pub message: String,
}

impl ActionResult {
    fn ok() -> Self {
        Self {
            ok: true,
            message: "registered".into(),
        }
    }

    fn err(kind: &CyreErrorKind) -> Self {
        Self {
            ok: false,
            message: kind.to_string(),
        }
    }
}

/// `on(id, handler)`'s result (spec §6 `{ok, unsubscribe?}`).
pub struct OnResult {
    pub ok: bool,
    pub unsubscribe: Option<Unsubscribe>,
}

struct Inner {
    registry: Arc<ChannelRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    timekeeper: Arc<Timekeeper>,
    breathing: Arc<BreathingMonitor>,
    dispatcher: Arc<Dispatcher>,
    orchestration: Arc<OrchestrationRouter>,
    branches: Arc<crate::branch::BranchManager>,
    metrics: MetricsView,
    state: AtomicU8,
}

/// The reactive channel bus. Cheap to `Clone` (internally `Arc`-shared); each
/// clone is a handle onto the same registries, not an independent instance.
#[derive(Clone)]
pub struct Cyre(Arc<Inner>);

impl Cyre {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Construct with an injectable clock, primarily for deterministic tests
    /// driven by `tokio::time::pause`/`advance` (see `time::Clock`).
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let registry = Arc::new(ChannelRegistry::new());
        let subscribers = Arc::new(SubscriberRegistry::new());
        let breathing = Arc::new(BreathingMonitor::new());
        let timekeeper = Arc::new(Timekeeper::with_clock(Arc::clone(&breathing), Arc::clone(&clock)));
        let orchestration = Arc::new(OrchestrationRouter::new());
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&subscribers),
            Arc::clone(&timekeeper),
            Arc::clone(&breathing),
            clock,
            Arc::clone(&orchestration),
        ));
        let metrics = MetricsView::new(
            Arc::clone(&registry),
            Arc::clone(&timekeeper),
            Arc::clone(&breathing),
        );
        Self(Arc::new(Inner {
            registry,
            subscribers,
            timekeeper,
            breathing,
            dispatcher,
            orchestration,
            branches: Arc::new(crate::branch::BranchManager::new()),
            metrics,
            state: AtomicU8::new(UNINITIALIZED),
        }))
    }

    /// Moves the instance to `Ready`. Safe to call again after `shutdown()` to
    /// re-initialize (spec §5: "shutdown() -> frozen ... until re-init").
    pub fn initialize(&self) -> InitResult {
        self.0.state.store(READY, Ordering::Release);
        InitResult {
            ok: true,
            message: "cyre initialized".into(),
        }
    }

    /// Cancels all timers, clears every registry, and rejects further
    /// registration/calls until `initialize()` is called again (spec §5).
    pub fn shutdown(&self) {
        self.0.state.store(SHUTDOWN, Ordering::Release);
        self.0.timekeeper.reset();
        self.0.registry.clear();
        self.0.subscribers.clear();
        self.0.orchestration.clear();
    }

    fn check_ready(&self) -> Result<(), CyreErrorKind> {
        if self.0.state.load(Ordering::Acquire) == READY {
            Ok(())
        } else {
            Err(CyreErrorKind::ShutdownPending)
        }
    }

    /// Freezes registration and subscription (spec §4.1 `lock()`); in-flight
    /// and scheduled system calls are unaffected (spec §4.3.b).
    pub fn lock(&self) {
        self.0.registry.lock();
    }

    pub fn unlock(&self) {
        self.0.registry.unlock();
    }

    /// Attaches a [`Trigger`] to a channel's fire events (SPEC_FULL.md §4.10); the
    /// dispatcher notifies it on every completed dispatch, fire-and-forget.
    pub fn register_trigger(&self, id: impl Into<ChannelId>, trigger: Arc<dyn Trigger>) {
        self.0.orchestration.register(id.into(), trigger);
    }

    /// Registers (or replaces) a single channel (spec §6 `action(config)`).
    pub fn action(&self, config: ChannelConfig) -> ActionResult {
        if let Err(kind) = self.check_ready() {
            return ActionResult::err(&kind);
        }
        match self.0.registry.register(config) {
            Ok(()) => ActionResult::ok(),
            Err(kind) => ActionResult::err(&kind),
        }
    }

    /// Registers a batch of channels; each is validated/compiled independently
    /// (spec §6 `action([configs])`).
    pub fn action_many(&self, configs: Vec<ChannelConfig>) -> Vec<ActionResult> {
        configs.into_iter().map(|c| self.action(c)).collect()
    }

    /// Subscribes a handler to a channel (spec §6 `on(id, handler)`).
    ///
    /// `lock()` "freezes registration and subscription" (spec §4.1/§6), so this is
    /// rejected while the registry is locked, mirroring `registry.register()`'s own
    /// `is_locked()` gate.
    pub fn on(&self, id: impl Into<ChannelId>, handler: HandlerFn) -> OnResult {
        if self.check_ready().is_err() || self.0.registry.is_locked() {
            return OnResult {
                ok: false,
                unsubscribe: None,
            };
        }
        let unsubscribe = self.0.subscribers.on(id.into(), handler);
        OnResult {
            ok: true,
            unsubscribe: Some(unsubscribe),
        }
    }

    /// Invokes a channel's full pipeline (spec §4.3's algorithm a–h).
    pub async fn call(&self, id: impl Into<ChannelId>, payload: Option<Payload>) -> Response {
        let id = id.into();
        if let Err(kind) = self.check_ready() {
            return Response {
                ok: false,
                payload: None,
                message: Some(kind.to_string()),
                error: Some(kind.to_string()),
                metadata: crate::dispatch::ResponseMetadata {
                    error_kind: Some(kind.code()),
                    ..Default::default()
                },
            };
        }
        self.0.dispatcher.call(&id, payload).await
    }

    /// Returns the channel's runtime snapshot, not its config (spec §6 `get(id)`).
    pub fn get(&self, id: impl Into<ChannelId>) -> Option<ChannelSnapshot> {
        self.0.registry.get_snapshot(&id.into())
    }

    /// Removes a channel, its subscribers, pending timers, and orchestration
    /// triggers (spec §3 "Lifecycles", §6 `forget(id) -> bool`).
    pub fn forget(&self, id: impl Into<ChannelId>) -> bool {
        let id = id.into();
        let existed = self.0.registry.forget(&id);
        self.0.subscribers.forget(&id);
        self.0.orchestration.forget(&id);
        self.0.timekeeper.forget(&format!("debounce:{id}"));
        self.0.timekeeper.forget(&format!("buffer:{id}"));
        self.0.timekeeper.forget(&format!("interval:{id}"));
        existed
    }

    /// Whether `payload`'s selector-projected value differs from the channel's
    /// previously accepted projection (spec §6 `hasChanged(id, payload)`).
    ///
    /// Available regardless of whether `detectChanges` is configured on the
    /// channel — it is a pure query over the same projection `detectChanges`
    /// would compare against (SPEC_FULL.md §9.2: post-selector, pre-transform).
    pub fn has_changed(&self, id: impl Into<ChannelId>, payload: Payload) -> bool {
        let id = id.into();
        let Some(entry) = self.0.registry.entry(&id) else {
            return true;
        };
        let projected = match &entry.config.talents.selector {
            Some(selector) => selector(&payload),
            None => payload,
        };
        entry.snapshot.last_projection.as_ref() != Some(&projected)
    }

    /// The channel's last accepted input payload (spec §6 `getPrevious(id)`).
    pub fn get_previous(&self, id: impl Into<ChannelId>) -> Option<Payload> {
        self.0
            .registry
            .get_snapshot(&id.into())
            .and_then(|snapshot| snapshot.req)
    }

    /// Drops every channel, subscriber, and timer, but leaves lifecycle state
    /// untouched (unlike `shutdown()`, `clear()` does not reject further calls).
    pub fn clear(&self) {
        self.0.registry.clear();
        self.0.subscribers.clear();
        self.0.orchestration.clear();
        self.0.timekeeper.reset();
    }

    /// Creates a branch rooted at `opts` and returns a handle that auto-qualifies
    /// `action`/`on`/`call`/`forget` under its path (spec §4.8).
    pub fn create_branch(&self, opts: CreateBranchOptions) -> Result<Branch, CyreErrorKind> {
        let path = self.0.branches.create_branch(opts)?;
        Ok(self.branch_handle(path))
    }

    /// A handle onto the implicit root branch (empty path — channel ids are
    /// used unqualified).
    pub fn root_branch(&self) -> Branch {
        self.branch_handle(String::new())
    }

    fn branch_handle(&self, path: String) -> Branch {
        let this = self.clone();
        let call_this = this.clone();
        let forget_this = this.clone();
        let discover_this = this.clone();
        Branch {
            path,
            manager: Arc::clone(&self.0.branches),
            call: Arc::new(move |id: &ChannelId, payload: Option<Payload>| {
                let this = call_this.clone();
                let id = id.clone();
                Box::pin(async move { this.call(id, payload).await })
            }),
            forget: Arc::new(move |id: &ChannelId| forget_this.forget(id.clone())),
            discover: Arc::new(move || discover_this.0.registry.ids()),
        }
    }

    /// Process-wide health snapshot (SPEC_FULL.md §4.9; ambient, not in the
    /// spec.md's external interface table but carried per the ambient-stack
    /// rule since it is the ungated data source behind any dashboard).
    pub fn health(&self) -> SystemHealth {
        self.0.metrics.snapshot()
    }

    pub fn timekeeper_status(&self) -> crate::timekeeper::TimekeeperStatus {
        self.0.timekeeper.status()
    }
}

impl Default for Cyre {
    fn default() -> Self {
        Self::new()
    }
}
