//! 调用分发器（C7）：`call(id, payload) -> Response` 热路径。
//!
//! # 设计背景（Why）
//! - 实现 spec §4.3 的算法步骤 a–h：查找、锁检查、保护阶段、天赋阶段（固定顺序）、
//!   提交、在所选策略下分发给订阅者、记录结果、链式调用。
//! - 保护阶段与“提交”步骤必须对同一通道保持全序（spec §5），因此二者共享
//!   [`crate::channel::ChannelRegistry`] 条目上的同一把 `tokio::sync::Mutex`
//!   （`ChannelRuntimeState`），但分发阶段（订阅者调用）特意在释放该锁*之后*
//!   才进行，避免慢 handler 阻塞同一通道后续的保护判定。
//! - debounce/buffer 的窗口到期回调直接进入天赋阶段（`dispatch_effective`），
//!   不会重新触发保护判定——这是 spec §4.3.c 的字面意思（"On timer fire ...
//!   proceed to talents"），不同于 §4.4 描述的 interval/repeat 调度（那类回调
//!   以系统调用者身份重新进入完整的 `call()`，因此仍会重新经过保护阶段）。

use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::{
    breathing::BreathingMonitor,
    channel::{
        registry::ChannelRegistry, BufferStrategy, ChannelConfig, CollectResults, DispatchStrategy,
        ErrorStrategy, Protection, RequiredMode, SchemaOutcome,
    },
    common::{ChannelId, HandlerResult, Payload},
    error::CyreErrorKind,
    orchestration::{ChannelFireEvent, OrchestrationRouter},
    pipeline::CompiledPipeline,
    subscriber::{HandlerFn, SubscriberRegistry},
    time::Clock,
    timekeeper::Timekeeper,
};

/// 链式调用的默认最大深度（spec §4.3.h："cycles cut by a depth counter, default 8"）。
pub const MAX_LINK_DEPTH: u32 = 8;

/// 连续 handler 错误达到该阈值后通道被隔离（spec §7 "consecutive errors ... trigger
/// channel quarantine"）；spec 未给出具体数字，此处选用一个保守默认值。
const QUARANTINE_THRESHOLD: u32 = 5;

/// 调用来源：外部调用者受锁检查约束，系统调用者（定时器回调）不受限（spec §4.4）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CallSource {
    External,
    System,
}

/// `call()` 的响应元数据（spec §6 "Response shape"）。
#[derive(Clone, Debug, Default)]
pub struct ResponseMetadata {
    pub execution_time: Option<Duration>,
    pub handler_count: Option<usize>,
    pub source: Option<&'static str>,
    pub buffer_window: Option<Duration>,
    pub debounce: Option<Duration>,
    pub next_allowed: Option<Duration>,
    pub skipped: Option<bool>,
    pub error_kind: Option<&'static str>,
    pub errors: Vec<String>,
    /// Set when a standalone/leading `delay` defers the first execution to a
    /// timer instead of dispatching synchronously (spec §4.4).
    pub scheduled: Option<Duration>,
}

/// `call()` 的响应（spec §4.3, §6）。
#[derive(Clone, Debug)]
pub struct Response {
    pub ok: bool,
    pub payload: Option<Payload>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

impl Response {
    fn rejected(kind: &CyreErrorKind) -> Self {
        Self::rejected_with(kind, ResponseMetadata::default())
    }

    fn rejected_with(kind: &CyreErrorKind, metadata: ResponseMetadata) -> Self {
        Self {
            ok: false,
            payload: None,
            message: Some(kind.to_string()),
            error: Some(kind.to_string()),
            metadata: ResponseMetadata {
                error_kind: Some(kind.code()),
                ..metadata
            },
        }
    }

    fn soft(kind: &CyreErrorKind, metadata: ResponseMetadata) -> Self {
        Self {
            ok: true,
            payload: None,
            message: Some(kind.to_string()),
            error: None,
            metadata: ResponseMetadata {
                error_kind: Some(kind.code()),
                ..metadata
            },
        }
    }

    /// Accepted-but-deferred response for a standalone/leading `delay` (spec
    /// §4.4). Not one of §6's enumerated error kinds — `delay` is a scheduling
    /// concept, not a protection rejection — so `metadata.error_kind` stays
    /// unset and callers distinguish it via `metadata.scheduled`.
    fn scheduled(delay: Duration) -> Self {
        Self {
            ok: true,
            payload: None,
            message: Some(format!("scheduled: first execution in {delay:?}")),
            error: None,
            metadata: ResponseMetadata {
                scheduled: Some(delay),
                ..Default::default()
            },
        }
    }
}

/// 单次分发（d–h 步骤中的 f/g）的内部结果，用于在最终返回值与提交元数据之间转换。
struct DispatchOutcome {
    results: Vec<Payload>,
    errors: Vec<String>,
    links: Vec<(ChannelId, Payload)>,
    handler_count: usize,
}

/// 分发器：持有通道/订阅者注册表、计时器与呼吸监测器的共享引用。
///
/// 每次分发完成（含超时）都会向 [`OrchestrationRouter`] 投递一次
/// [`ChannelFireEvent`]（SPEC_FULL.md §4.10）；核心从不检查编排层的返回值，
/// 这条通知纯粹是旁路观察，不参与 `ok`/`payload` 的计算。
pub struct Dispatcher {
    registry: Arc<ChannelRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    timekeeper: Arc<Timekeeper>,
    breathing: Arc<BreathingMonitor>,
    clock: Arc<dyn Clock>,
    epoch: tokio::time::Instant,
    orchestration: Arc<OrchestrationRouter>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        subscribers: Arc<SubscriberRegistry>,
        timekeeper: Arc<Timekeeper>,
        breathing: Arc<BreathingMonitor>,
        clock: Arc<dyn Clock>,
        orchestration: Arc<OrchestrationRouter>,
    ) -> Self {
        let epoch = clock.now();
        Self {
            registry,
            subscribers,
            timekeeper,
            breathing,
            clock,
            epoch,
            orchestration,
        }
    }

    /// 外部调用入口：spec §4.3 的完整算法 a–h。
    pub async fn call(self: &Arc<Self>, id: &ChannelId, payload: Option<Payload>) -> Response {
        self.call_as(id, payload, CallSource::External, 0).await
    }

    async fn call_as(
        self: &Arc<Self>,
        id: &ChannelId,
        payload: Option<Payload>,
        source: CallSource,
        depth: u32,
    ) -> Response {
        // a. lookup
        let Some(entry) = self.registry.entry(id) else {
            return Response::rejected(&CyreErrorKind::NoSuchChannel(id.clone()));
        };
        let config = entry.config.clone();
        let pipeline = entry.pipeline.clone();
        let runtime = Arc::clone(&entry.runtime);
        let quarantined = entry.snapshot.metadata.quarantined;
        drop(entry);

        // b. lock check — scheduled/link callbacks are system callers and bypass it.
        if source == CallSource::External && self.registry.is_locked() {
            return Response::rejected(&CyreErrorKind::Locked);
        }
        if quarantined {
            return Response::rejected(&CyreErrorKind::HandlerError {
                id: id.clone(),
                detail: "channel quarantined after repeated handler failures".into(),
            });
        }

        let input = payload.unwrap_or_else(Payload::null);

        // c. protection stage, guarded by the per-channel serial lock.
        let mut guard = runtime.lock().await;
        match &config.protection {
            Protection::None => {}
            Protection::Throttle { duration } => {
                let now = self.clock.now();
                if let Some(last) = guard.last_exec {
                    let elapsed = now.saturating_duration_since(last);
                    if elapsed < *duration {
                        let remaining = *duration - elapsed;
                        return Response::rejected_with(
                            &CyreErrorKind::Throttled {
                                id: id.clone(),
                                remaining,
                            },
                            ResponseMetadata {
                                next_allowed: Some(remaining),
                                ..Default::default()
                            },
                        );
                    }
                }
                guard.last_exec = Some(now);
            }
            Protection::Debounce { duration, max_wait } => {
                let first_pending = *guard
                    .debounce_first_pending_at
                    .get_or_insert_with(|| self.clock.now());
                guard.debounce_pending = Some(input.clone());
                // spec §4.7: under stress the breathing monitor stretches the debounce
                // window so coalescing backs off along with everything else.
                let stretched = duration.mul_f64(self.breathing.debounce_stretch());
                let effective_wait = match max_wait {
                    Some(max_wait) => {
                        let elapsed = self.clock.now().saturating_duration_since(first_pending);
                        let remaining_to_max = max_wait.saturating_sub(elapsed);
                        stretched.min(remaining_to_max.max(Duration::from_millis(1)))
                    }
                    None => stretched,
                };
                drop(guard);
                self.arm_debounce(Arc::clone(&runtime), id.clone(), effective_wait);
                return Response::soft(
                    &CyreErrorKind::Debounced(id.clone()),
                    ResponseMetadata {
                        debounce: Some(*duration),
                        ..Default::default()
                    },
                );
            }
            Protection::Buffer {
                window,
                strategy,
                max_size,
            } => {
                match strategy {
                    BufferStrategy::Overwrite => {
                        guard.buffer_items.clear();
                        guard.buffer_items.push(input.clone());
                    }
                    BufferStrategy::Append => {
                        if let Some(max) = max_size {
                            if guard.buffer_items.len() >= *max {
                                guard.buffer_items.remove(0);
                            }
                        }
                        guard.buffer_items.push(input.clone());
                    }
                    BufferStrategy::Ignore => {
                        // Resolved open question (SPEC_FULL.md §9.1): first wins, rest dropped.
                        if guard.buffer_items.is_empty() {
                            guard.buffer_items.push(input.clone());
                        }
                    }
                }
                let already_armed = guard.buffer_armed;
                guard.buffer_armed = true;
                drop(guard);
                if !already_armed {
                    self.arm_buffer(Arc::clone(&runtime), id.clone(), *window);
                }
                return Response::soft(
                    &CyreErrorKind::Buffered(id.clone()),
                    ResponseMetadata {
                        buffer_window: Some(*window),
                        ..Default::default()
                    },
                );
            }
        }
        drop(guard);

        // Interval/repeat scheduling is armed off the first externally-accepted call
        // (seed scenario 6: "a single call('i') triggers 3 executions"), not at
        // registration time.
        if source == CallSource::External && depth == 0 {
            if let Some(deferred) =
                self.maybe_arm_schedule(Arc::clone(&runtime), id.clone(), &config, input.clone())
            {
                return deferred;
            }
        }

        self.dispatch_effective(id, &config, &pipeline, input, depth, source)
            .await
    }

    /// 天赋阶段 + 提交 + 分发 + 记录 + 链式调用（步骤 d–h），供保护阶段放行后的
    /// 调用以及 debounce/buffer 窗口到期回调直接复用。
    async fn dispatch_effective(
        self: &Arc<Self>,
        id: &ChannelId,
        config: &ChannelConfig,
        pipeline: &CompiledPipeline,
        mut input: Payload,
        depth: u32,
        source: CallSource,
    ) -> Response {
        let started = self.clock.now();

        if pipeline.has_processing {
            // Fixed order regardless of declaration order (spec §4.2): required ->
            // schema -> selector -> condition -> transform -> detectChanges.
            if let Some(mode) = config.talents.required {
                let fails = match mode {
                    RequiredMode::Standard => input.0.is_null(),
                    RequiredMode::NonEmpty => input.is_empty(),
                };
                if fails {
                    return Response::rejected(&CyreErrorKind::Required(id.clone()));
                }
            }
            if let Some(schema) = &config.talents.schema {
                match schema(&input) {
                    SchemaOutcome::Ok { data } => input = data,
                    SchemaOutcome::Err { errors } => {
                        return Response::rejected(&CyreErrorKind::SchemaInvalid {
                            id: id.clone(),
                            detail: errors,
                        });
                    }
                }
            }
            if let Some(selector) = &config.talents.selector {
                input = selector(&input);
            }
            // Captured at the fixed "post-selector, pre-transform" position even when
            // no selector is configured (SPEC_FULL.md §9.2).
            let projection = input.clone();
            if let Some(condition) = &config.talents.condition {
                if !condition(&input) {
                    return Response::rejected(&CyreErrorKind::ConditionNotMet(id.clone()));
                }
            }
            if let Some(transform) = &config.talents.transform {
                input = transform(input);
            }
            if config.talents.detect_changes {
                let previous = self.registry.entry(id).and_then(|e| e.snapshot.last_projection.clone());
                if previous.as_ref() == Some(&projection) {
                    return Response::soft(&CyreErrorKind::NoChange(id.clone()), ResponseMetadata {
                        skipped: Some(true),
                        ..Default::default()
                    });
                }
                if let Some(mut entry) = self.registry.entry_mut(id) {
                    entry.snapshot.last_projection = Some(projection);
                }
            }
        }

        // e. commit the effective input ahead of dispatch.
        if let Some(mut entry) = self.registry.entry_mut(id) {
            entry.snapshot.req = Some(input.clone());
        }

        self.invoke_subscribers_and_record(id, config, input, started, depth, source)
            .await
    }

    async fn invoke_subscribers_and_record(
        self: &Arc<Self>,
        id: &ChannelId,
        config: &ChannelConfig,
        input: Payload,
        started: tokio::time::Instant,
        depth: u32,
        source: CallSource,
    ) -> Response {
        let handlers = self.subscribers.handlers_for(id);
        let handler_count = handlers.len();

        let outcome_or_timeout = match config.dispatch_timeout {
            Some(timeout_dur) => {
                tokio::time::timeout(timeout_dur, self.run_strategy(&handlers, input.clone(), config))
                    .await
                    .ok()
            }
            None => Some(self.run_strategy(&handlers, input.clone(), config).await),
        };

        let elapsed = self.clock.now().saturating_duration_since(started);

        let Some(outcome) = outcome_or_timeout else {
            self.breathing.record_call(elapsed, true);
            self.record_outcome(id, true);
            self.orchestration.notify(ChannelFireEvent {
                id: id.clone(),
                from_timer: source == CallSource::System,
                ok: false,
            });
            return Response::rejected_with(
                &CyreErrorKind::Timeout(id.clone()),
                ResponseMetadata {
                    execution_time: Some(elapsed),
                    handler_count: Some(handler_count),
                    ..Default::default()
                },
            );
        };

        let is_error = !outcome.errors.is_empty();
        self.breathing.record_call(elapsed, is_error);
        self.record_outcome(id, is_error);
        self.orchestration.notify(ChannelFireEvent {
            id: id.clone(),
            from_timer: source == CallSource::System,
            ok: !is_error,
        });

        for (link_id, link_payload) in outcome.links.clone() {
            self.spawn_link(link_id, link_payload, depth + 1);
        }

        let ok = match config.error_strategy {
            ErrorStrategy::FailFast => outcome.errors.is_empty(),
            ErrorStrategy::Continue => !outcome.results.is_empty() || outcome.errors.is_empty(),
        };
        let payload = select_payload(&outcome, config);

        if let Some(mut entry) = self.registry.entry_mut(id) {
            entry.snapshot.res = payload.clone();
        }

        Response {
            ok,
            payload,
            message: if ok {
                Some("dispatched".into())
            } else {
                outcome.errors.first().cloned()
            },
            error: if ok { None } else { outcome.errors.first().cloned() },
            metadata: ResponseMetadata {
                execution_time: Some(elapsed),
                handler_count: Some(outcome.handler_count),
                errors: outcome.errors,
                ..Default::default()
            },
        }
    }

    async fn run_strategy(
        &self,
        handlers: &[HandlerFn],
        input: Payload,
        config: &ChannelConfig,
    ) -> DispatchOutcome {
        match config.dispatch {
            DispatchStrategy::Parallel => self.run_parallel(handlers, input).await,
            DispatchStrategy::Sequential => self.run_sequential(handlers, input, config).await,
            DispatchStrategy::Waterfall => self.run_waterfall(handlers, input, config).await,
            DispatchStrategy::Race => self.run_race(handlers, input).await,
        }
    }

    async fn run_parallel(&self, handlers: &[HandlerFn], input: Payload) -> DispatchOutcome {
        let futures = handlers
            .iter()
            .map(|h| wrap_handler(Arc::clone(h), input.clone()));
        let settled = futures::future::join_all(futures).await;
        collect(settled, handlers.len())
    }

    async fn run_sequential(
        &self,
        handlers: &[HandlerFn],
        input: Payload,
        config: &ChannelConfig,
    ) -> DispatchOutcome {
        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut links = Vec::new();
        for handler in handlers {
            match wrap_handler(Arc::clone(handler), input.clone()).await {
                Ok(HandlerResult::Value(p)) => results.push(p),
                Ok(HandlerResult::Link { id, payload }) => {
                    results.push(payload.clone());
                    links.push((id, payload));
                }
                Err(e) => {
                    errors.push(e);
                    if config.error_strategy == ErrorStrategy::FailFast {
                        break;
                    }
                }
            }
        }
        DispatchOutcome {
            results,
            errors,
            links,
            handler_count: handlers.len(),
        }
    }

    async fn run_waterfall(
        &self,
        handlers: &[HandlerFn],
        input: Payload,
        config: &ChannelConfig,
    ) -> DispatchOutcome {
        let mut current = input;
        let mut errors = Vec::new();
        let mut links = Vec::new();
        let mut last = None;
        for handler in handlers {
            match wrap_handler(Arc::clone(handler), current.clone()).await {
                Ok(HandlerResult::Value(p)) => {
                    current = p.clone();
                    last = Some(p);
                }
                Ok(HandlerResult::Link { id, payload }) => {
                    current = payload.clone();
                    last = Some(payload.clone());
                    links.push((id, payload));
                }
                Err(e) => {
                    errors.push(e);
                    if config.error_strategy == ErrorStrategy::FailFast {
                        break;
                    }
                }
            }
        }
        DispatchOutcome {
            results: last.into_iter().collect(),
            errors,
            links,
            handler_count: handlers.len(),
        }
    }

    async fn run_race(&self, handlers: &[HandlerFn], input: Payload) -> DispatchOutcome {
        if handlers.is_empty() {
            return DispatchOutcome {
                results: vec![],
                errors: vec![],
                links: vec![],
                handler_count: 0,
            };
        }
        let futures: Vec<_> = handlers
            .iter()
            .map(|h| Box::pin(wrap_handler(Arc::clone(h), input.clone())))
            .collect();
        let (first, _index, rest) = futures::future::select_all(futures).await;
        // Remaining handlers still run to completion in the background so links they
        // produce are not silently lost, but they no longer influence this response.
        tokio::spawn(async move {
            futures::future::join_all(rest).await;
        });

        let mut results = Vec::new();
        let mut errors = Vec::new();
        let mut links = Vec::new();
        match first {
            Ok(HandlerResult::Value(p)) => results.push(p),
            Ok(HandlerResult::Link { id, payload }) => {
                results.push(payload.clone());
                links.push((id, payload));
            }
            Err(e) => errors.push(e),
        }
        DispatchOutcome {
            results,
            errors,
            links,
            handler_count: handlers.len(),
        }
    }

    fn record_outcome(&self, id: &ChannelId, is_error: bool) {
        let Some(mut entry) = self.registry.entry_mut(id) else {
            return;
        };
        let metadata = &mut entry.snapshot.metadata;
        metadata.exec_count += 1;
        metadata.last_exec_millis = Some(self.clock.now().duration_since(self.epoch).as_millis() as u64);
        if is_error {
            metadata.error_count += 1;
            metadata.consecutive_errors += 1;
            if metadata.consecutive_errors >= QUARANTINE_THRESHOLD {
                metadata.quarantined = true;
                warn!(channel = %id, "channel quarantined after repeated handler failures");
            }
        } else {
            metadata.consecutive_errors = 0;
        }
    }

    fn arm_debounce(self: &Arc<Self>, runtime: Arc<tokio::sync::Mutex<crate::channel::ChannelRuntimeState>>, id: ChannelId, wait: Duration) {
        let dispatcher = Arc::clone(self);
        let timer_id = format!("debounce:{id}");
        let callback_id = id.clone();
        let callback: crate::timekeeper::TimerCallback = Arc::new(move || {
            let dispatcher = Arc::clone(&dispatcher);
            let runtime = Arc::clone(&runtime);
            let id = callback_id.clone();
            Box::pin(async move {
                let pending = {
                    let mut guard = runtime.lock().await;
                    guard.debounce_first_pending_at = None;
                    guard.debounce_pending.take()
                };
                if let Some(payload) = pending {
                    let Some(entry) = dispatcher.registry.entry(&id) else {
                        return;
                    };
                    let config = entry.config.clone();
                    let pipeline = entry.pipeline.clone();
                    drop(entry);
                    dispatcher
                        .dispatch_effective(&id, &config, &pipeline, payload, 0, CallSource::System)
                        .await;
                }
            })
        });
        self.timekeeper.keep(wait, callback, None, timer_id, None);
    }

    fn arm_buffer(self: &Arc<Self>, runtime: Arc<tokio::sync::Mutex<crate::channel::ChannelRuntimeState>>, id: ChannelId, window: Duration) {
        let dispatcher = Arc::clone(self);
        let timer_id = format!("buffer:{id}");
        let callback_id = id.clone();
        let callback: crate::timekeeper::TimerCallback = Arc::new(move || {
            let dispatcher = Arc::clone(&dispatcher);
            let runtime = Arc::clone(&runtime);
            let id = callback_id.clone();
            Box::pin(async move {
                let items = {
                    let mut guard = runtime.lock().await;
                    guard.buffer_armed = false;
                    std::mem::take(&mut guard.buffer_items)
                };
                if items.is_empty() {
                    return;
                }
                let Some(entry) = dispatcher.registry.entry(&id) else {
                    return;
                };
                let config = entry.config.clone();
                let pipeline = entry.pipeline.clone();
                let strategy = match &config.protection {
                    Protection::Buffer { strategy, .. } => *strategy,
                    _ => BufferStrategy::Append,
                };
                drop(entry);
                let aggregated = match strategy {
                    BufferStrategy::Append => {
                        Payload(serde_json::Value::Array(items.into_iter().map(|p| p.0).collect()))
                    }
                    BufferStrategy::Overwrite | BufferStrategy::Ignore => {
                        items.into_iter().last().unwrap_or_else(Payload::null)
                    }
                };
                dispatcher
                    .dispatch_effective(&id, &config, &pipeline, aggregated, 0, CallSource::System)
                    .await;
            })
        });
        self.timekeeper.keep(window, callback, None, timer_id, None);
    }

    /// Arms the delay/interval/repeat schedule off the first accepted external call
    /// for a channel (spec §4.4, seed scenario 6). Re-firings re-enter `call_as` as
    /// a system caller so protections still apply on each tick, as stated in §4.4.
    ///
    /// A standalone/leading `delay` defers the *first* execution to a timer —
    /// `dispatch_effective` is skipped entirely this call and `Some(Response)` is
    /// returned so `call_as` short-circuits. Without `delay`, `interval` keeps its
    /// prior behavior: the first execution runs synchronously below and this only
    /// arms the timer for the remaining repeat budget (`None` is returned).
    fn maybe_arm_schedule(
        self: &Arc<Self>,
        runtime: Arc<tokio::sync::Mutex<crate::channel::ChannelRuntimeState>>,
        id: ChannelId,
        config: &ChannelConfig,
        input: Payload,
    ) -> Option<Response> {
        let delay = config.scheduling.delay;
        let interval = config.scheduling.interval;
        if delay.is_none() && interval.is_none() {
            return None;
        }

        let already_armed = match runtime.try_lock() {
            Ok(mut state) => {
                let was = state.schedule_armed;
                state.schedule_armed = true;
                was
            }
            // Contended: another call is deciding protection/commit right now: assume
            // it (or a prior call) already owns arming the schedule.
            Err(_) => true,
        };
        if already_armed {
            return None;
        }

        match delay {
            Some(delay) => {
                // The timer drives every execution, including the first, so the full
                // repeat budget applies (nothing ran synchronously yet).
                let remaining = Some(config.scheduling.repeat.unwrap_or(crate::channel::Repeat::Count(1)));
                let tick = interval.unwrap_or(delay);
                self.arm_schedule_timer(id, input, tick, remaining, Some(delay));
                Some(Response::scheduled(delay))
            }
            None => {
                let interval = interval.expect("checked above: delay.is_none() implies interval.is_some()");
                let remaining = match config.scheduling.repeat {
                    Some(crate::channel::Repeat::Count(n)) if n <= 1 => return None,
                    Some(crate::channel::Repeat::Count(n)) => Some(crate::channel::Repeat::Count(n - 1)),
                    Some(crate::channel::Repeat::Infinite) => Some(crate::channel::Repeat::Infinite),
                    None => return None,
                };
                // The originating call already produced one execution synchronously;
                // the timer loop's own per-tick wait already spaces each scheduled
                // firing `interval` apart from the previous one.
                self.arm_schedule_timer(id, input, interval, remaining, None);
                None
            }
        }
    }

    /// Shared timer-arming mechanics for `maybe_arm_schedule`'s two branches: builds
    /// the re-entrant `call_as` callback and registers it with the timekeeper.
    fn arm_schedule_timer(
        self: &Arc<Self>,
        id: ChannelId,
        input: Payload,
        tick: Duration,
        remaining: Option<crate::channel::Repeat>,
        delay: Option<Duration>,
    ) {
        let dispatcher = Arc::clone(self);
        let timer_id = format!("interval:{id}");
        let callback: crate::timekeeper::TimerCallback = Arc::new(move || {
            let dispatcher = Arc::clone(&dispatcher);
            let id = id.clone();
            let input = input.clone();
            Box::pin(async move {
                dispatcher
                    .call_as(&id, Some(input), CallSource::System, 0)
                    .await;
            })
        });
        self.timekeeper.keep(tick, callback, remaining, timer_id, delay);
    }

    fn spawn_link(self: &Arc<Self>, id: ChannelId, payload: Payload, depth: u32) {
        if depth > MAX_LINK_DEPTH {
            warn!(channel = %id, "link chain exceeded max depth, dropping hop");
            self.record_outcome(&id, true);
            self.orchestration.notify(ChannelFireEvent {
                id: id.clone(),
                from_timer: false,
                ok: false,
            });
            return;
        }
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            debug!(channel = %id, depth, "following link hop");
            dispatcher
                .call_as(&id, Some(payload), CallSource::System, depth)
                .await;
        });
    }
}

/// Picks the response payload once handlers have settled.
///
/// `waterfall`/`race` always resolve to their single chained/winning result (spec
/// §4.5's literal wording); `parallel`/`sequential` honor `collectResults`.
fn select_payload(outcome: &DispatchOutcome, config: &ChannelConfig) -> Option<Payload> {
    if outcome.results.is_empty() {
        return None;
    }
    if matches!(config.dispatch, DispatchStrategy::Waterfall | DispatchStrategy::Race) {
        return outcome.results.last().cloned();
    }
    match config.collect_results {
        CollectResults::All => Some(Payload(serde_json::Value::Array(
            outcome.results.iter().map(|p| p.0.clone()).collect(),
        ))),
        CollectResults::Last => outcome.results.last().cloned(),
        CollectResults::First => outcome.results.first().cloned(),
    }
}

async fn wrap_handler(handler: HandlerFn, payload: Payload) -> Result<HandlerResult, String> {
    match std::panic::AssertUnwindSafe(handler(payload)).catch_unwind().await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(message)) => Err(message),
        Err(_) => Err("handler panicked".to_string()),
    }
}

fn collect(settled: Vec<Result<HandlerResult, String>>, handler_count: usize) -> DispatchOutcome {
    let mut results = Vec::new();
    let mut errors = Vec::new();
    let mut links = Vec::new();
    for outcome in settled {
        match outcome {
            Ok(HandlerResult::Value(p)) => results.push(p),
            Ok(HandlerResult::Link { id, payload }) => {
                results.push(payload.clone());
                links.push((id, payload));
            }
            Err(e) => errors.push(e),
        }
    }
    DispatchOutcome {
        results,
        errors,
        links,
        handler_count,
    }
}
