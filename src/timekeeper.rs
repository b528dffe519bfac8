//! 时间守护（C3）：命名计时器的生命周期管理（延迟/区间/重复）。
//!
//! # 设计背景（Why）
//! - spec §4.6 要求计时器支持暂停/恢复/冬眠/重置，且在 `isRecuperating` 期间
//!   "callbacks may be deferred (not skipped); durations are scaled by
//!   `currentRate / baseRate`"——因此每个计时器任务在每次真正 `sleep` 前都会
//!   向 [`crate::breathing::BreathingMonitor`] 查询当前建议节律并据此缩放等待时长，
//!   而不是读一次就固定下来。
//! - "drift-correcting"（§4.6）通过让每个计时器用一个长期运行的 `tokio::spawn`
//!   任务自行 `sleep -> fire -> sleep -> fire` 来实现：下一次等待总是从“本次回调
//!   完成”之后重新计时，天然不会累积绝对时间误差。

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::sync::{watch, Notify};
use tracing::{debug, warn};

use crate::{
    breathing::BreathingMonitor,
    future::BoxFuture,
    time::{Clock, SystemClock},
};

use crate::channel::Repeat;

/// 计时器回调：不携带参数，闭包自行捕获需要的上下文（通常是一次 `call(id, payload)`）。
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// `keep()` 的结果种类，对应 spec `{kind: 'ok' | 'error'}`。
#[derive(Debug, Eq, PartialEq)]
pub enum KeepOutcome {
    Ok,
    Error(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerRunState {
    Active,
    Paused,
}

struct TimerHandle {
    original_duration: Duration,
    paused: AtomicBool,
    notify: Notify,
    cancel: watch::Sender<bool>,
    execution_count: AtomicU64,
    target: Option<u64>,
    started_at: std::time::Instant,
}

/// 单个计时器的对外可观察状态（`status()` 的 `formations` 条目）。
#[derive(Clone, Debug)]
pub struct FormationStatus {
    pub id: String,
    pub duration: Duration,
    pub execution_count: u64,
    pub repeat_target: Option<u64>,
    pub run_state: TimerRunState,
}

/// `status()` 的总体快照。
#[derive(Clone, Debug)]
pub struct TimekeeperStatus {
    pub active_formations: usize,
    pub in_recuperation: bool,
    pub formations: Vec<FormationStatus>,
}

/// 时间守护：命名计时器索引 + 呼吸耦合。
pub struct Timekeeper {
    timers: DashMap<String, Arc<TimerHandle>>,
    monitor: Arc<BreathingMonitor>,
    clock: Arc<dyn Clock>,
    hibernating: AtomicBool,
}

impl Timekeeper {
    pub fn new(monitor: Arc<BreathingMonitor>) -> Self {
        Self::with_clock(monitor, Arc::new(SystemClock))
    }

    pub fn with_clock(monitor: Arc<BreathingMonitor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            timers: DashMap::new(),
            monitor,
            clock,
            hibernating: AtomicBool::new(false),
        }
    }

    /// 注册一个命名计时器（§4.6）。`duration = 0` 意味着下一个调度 tick 立即执行。
    /// 重复 id 会替换此前的计时器定义，而非报错。
    pub fn keep(
        &self,
        duration: Duration,
        callback: TimerCallback,
        repeat: Option<Repeat>,
        id: impl Into<String>,
        delay: Option<Duration>,
    ) -> KeepOutcome {
        let id = id.into();
        // Duplicate id replaces the prior timer (§4.6): cancel the old task first.
        if let Some((_, old)) = self.timers.remove(&id) {
            let _ = old.cancel.send(true);
        }

        let target = match repeat {
            Some(Repeat::Count(n)) => Some(n),
            Some(Repeat::Infinite) => None,
            None => Some(1),
        };
        if let Some(0) = target {
            return KeepOutcome::Error("repeat count must be > 0".into());
        }

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let handle = Arc::new(TimerHandle {
            original_duration: duration,
            paused: AtomicBool::new(false),
            notify: Notify::new(),
            cancel: cancel_tx,
            execution_count: AtomicU64::new(0),
            target,
            started_at: std::time::Instant::now(),
        });
        self.timers.insert(id.clone(), Arc::clone(&handle));

        let monitor = Arc::clone(&self.monitor);
        let clock = Arc::clone(&self.clock);
        let timers_map_id = id.clone();
        tokio::spawn(async move {
            // `delay` only governs the wait before the *first* fire (spec §4.4); every
            // fire after that is spaced `duration` (scaled) apart, same as before.
            let mut fired_once = false;

            loop {
                while handle.paused.load(Ordering::Acquire) {
                    tokio::select! {
                        _ = handle.notify.notified() => {}
                        _ = cancel_rx.changed() => {
                            if *cancel_rx.borrow() {
                                return;
                            }
                        }
                    }
                }
                if *cancel_rx.borrow() {
                    return;
                }

                let scaled = if !fired_once {
                    delay.unwrap_or_else(|| scale_for_breathing(duration, &monitor))
                } else {
                    scale_for_breathing(duration, &monitor)
                };
                if wait_or_cancelled(&clock, scaled, &mut cancel_rx).await {
                    return;
                }
                if handle.paused.load(Ordering::Acquire) {
                    continue;
                }

                debug!(timer = %timers_map_id, "timer fired");
                callback().await;
                fired_once = true;
                let fired = handle.execution_count.fetch_add(1, Ordering::AcqRel) + 1;

                if let Some(target) = handle.target {
                    if fired >= target {
                        break;
                    }
                }
                if scaled.is_zero() {
                    // Yield to the scheduler every tick to avoid starving other
                    // channels/timers when interval:0 + repeat:true (open question
                    // resolved in SPEC_FULL.md).
                    tokio::task::yield_now().await;
                }
            }
        });

        KeepOutcome::Ok
    }

    pub fn forget(&self, id: &str) -> bool {
        if let Some((_, handle)) = self.timers.remove(id) {
            let _ = handle.cancel.send(true);
            true
        } else {
            false
        }
    }

    pub fn pause(&self, id: &str) -> bool {
        if let Some(handle) = self.timers.get(id) {
            handle.paused.store(true, Ordering::Release);
            true
        } else {
            false
        }
    }

    pub fn resume(&self, id: &str) -> bool {
        if let Some(handle) = self.timers.get(id) {
            handle.paused.store(false, Ordering::Release);
            handle.notify.notify_waiters();
            true
        } else {
            false
        }
    }

    /// 停止调度但保留定义：所有在册计时器进入暂停态。
    pub fn hibernate(&self) {
        self.hibernating.store(true, Ordering::Release);
        for entry in self.timers.iter() {
            entry.value().paused.store(true, Ordering::Release);
        }
        warn!("timekeeper entering hibernation");
    }

    /// 丢弃全部计时器定义。
    pub fn reset(&self) {
        for entry in self.timers.iter() {
            let _ = entry.value().cancel.send(true);
        }
        self.timers.clear();
        self.hibernating.store(false, Ordering::Release);
    }

    pub fn status(&self) -> TimekeeperStatus {
        let formations: Vec<FormationStatus> = self
            .timers
            .iter()
            .map(|entry| FormationStatus {
                id: entry.key().clone(),
                duration: entry.value().original_duration,
                execution_count: entry.value().execution_count.load(Ordering::Acquire),
                repeat_target: entry.value().target,
                run_state: if entry.value().paused.load(Ordering::Acquire) {
                    TimerRunState::Paused
                } else {
                    TimerRunState::Active
                },
            })
            .collect();
        TimekeeperStatus {
            active_formations: formations
                .iter()
                .filter(|f| f.run_state == TimerRunState::Active)
                .count(),
            in_recuperation: self.monitor.snapshot().is_recuperating,
            formations,
        }
    }

    pub fn len(&self) -> usize {
        self.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

fn scale_for_breathing(duration: Duration, monitor: &BreathingMonitor) -> Duration {
    let snapshot = monitor.snapshot();
    if !snapshot.is_recuperating {
        return duration;
    }
    let base_rate = Duration::from_millis(10);
    let ratio = snapshot.current_rate.as_secs_f64() / base_rate.as_secs_f64().max(0.001);
    Duration::from_secs_f64(duration.as_secs_f64() * ratio.max(1.0))
}

/// 等待指定时长，若期间收到取消信号则提前返回 `true`。
async fn wait_or_cancelled(
    clock: &Arc<dyn Clock>,
    duration: Duration,
    cancel_rx: &mut watch::Receiver<bool>,
) -> bool {
    if *cancel_rx.borrow() {
        return true;
    }
    tokio::select! {
        _ = clock.sleep(duration) => *cancel_rx.borrow(),
        _ = cancel_rx.changed() => *cancel_rx.borrow(),
    }
}
