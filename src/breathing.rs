//! 呼吸监测器（C2）：根据调用速率、错误率与分发延迟推导系统压力，反馈调度节律。
//!
//! # 设计背景（Why）
//! - 沿用 `governance::retry::adaptive` 的手法——用加权、夹紧（clamp）的纯函数把多个
//!   实时信号压缩成一个标量，再映射到离散的节律档位——但这里的输出只允许影响**时机**
//!   （调度 tick、防抖合并窗口），绝不允许跳过 `schema`/`condition`/`required` 等
//!   正确性相关的校验阶段（spec §4.7）。
//! - `stress` 用 EWMA（指数加权移动平均）吸收调用速率、错误率与延迟三个信号，避免
//!   单次抖动造成节律剧烈摆动。
//!
//! # 契约说明（What）
//! - `record_call` 在每次分发完成后调用一次，携带本次分发耗时与是否发生错误；
//! - `snapshot()` 返回当前的 [`BreathingState`]，供 [`crate::timekeeper::Timekeeper`]
//!   与 [`crate::dispatch`] 查询；
//! - `isRecuperating` 的回落使用滞回阈值（`RECOVERY_THRESHOLD` < `CRITICAL_THRESHOLD`），
//!   防止在临界值附近反复切换。

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

/// 压力分级对应的调度节律档位。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BreathingPattern {
    /// 压力低于 `LOW_THRESHOLD`：调度节律维持在基准附近。
    Calm,
    /// 压力介于低/中阈值之间：适度放缓。
    Steady,
    /// 压力介于中/高阈值之间：明显放缓，为恢复争取时间。
    Elevated,
    /// 压力超过 `CRITICAL_THRESHOLD`：进入恢复态，节律拉到上限。
    Critical,
}

/// 呼吸系统的可观察快照。
#[derive(Clone, Copy, Debug)]
pub struct BreathingState {
    /// 归一化压力，`[0, 1]`。
    pub stress: f64,
    /// 当前建议的调度 tick 间隔。
    pub current_rate: Duration,
    /// 是否处于恢复态（高压后的滞回区间）。
    pub is_recuperating: bool,
    pub pattern: BreathingPattern,
}

const LOW_THRESHOLD: f64 = 0.25;
const MEDIUM_THRESHOLD: f64 = 0.5;
const HIGH_THRESHOLD: f64 = 0.75;
const CRITICAL_THRESHOLD: f64 = 0.9;
/// 恢复态回落阈值：低于该值才会退出 `isRecuperating`，避免在临界值附近抖动。
const RECOVERY_THRESHOLD: f64 = 0.6;

const BASE_RATE_MS: f64 = 10.0;
const MAX_RATE_MS: f64 = 250.0;

/// 三个输入信号的 EWMA 平滑系数（越接近 1 越偏向最新样本）。
const EWMA_ALPHA: f64 = 0.2;
const BASELINE_CALL_INTERVAL_MS: f64 = 20.0;
const CALL_RATE_WEIGHT: f64 = 0.45;
const ERROR_RATE_WEIGHT: f64 = 0.35;
const LATENCY_WEIGHT: f64 = 0.2;
const BASELINE_LATENCY_MS: f64 = 25.0;
const MAX_LATENCY_RATIO: f64 = 8.0;

/// 呼吸监测器：以定点表示的 EWMA 原子量，供多线程并发更新。
///
/// 教案式注释：压力相关字段都以 `f64` 位模式存进 `AtomicU64`（`to_bits`/`from_bits`），
/// 这是在不引入额外锁的前提下让多个 `call()` 调用并发累计统计量的常见手法，和
/// `governance::retry::adaptive::compute` 对浮点量纲的处理一脉相承。
pub struct BreathingMonitor {
    call_interval_ewma_ms: AtomicU64,
    error_rate_ewma: AtomicU64,
    latency_ewma_ms: AtomicU64,
    last_call_ms: AtomicU64,
    is_recuperating: AtomicBool,
    epoch: std::time::Instant,
}

impl BreathingMonitor {
    pub fn new() -> Self {
        Self {
            call_interval_ewma_ms: AtomicU64::new(BASELINE_CALL_INTERVAL_MS.to_bits()),
            error_rate_ewma: AtomicU64::new(0u64),
            latency_ewma_ms: AtomicU64::new(BASELINE_LATENCY_MS.to_bits()),
            last_call_ms: AtomicU64::new(0),
            is_recuperating: AtomicBool::new(false),
            epoch: std::time::Instant::now(),
        }
    }

    fn now_ms(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64() * 1000.0
    }

    /// 在一次分发完成后记录观测：耗时与是否出错。
    pub fn record_call(&self, latency: Duration, is_error: bool) {
        let now = self.now_ms();
        let last = f64::from_bits(self.last_call_ms.load(Ordering::Relaxed));
        self.last_call_ms.store(now.to_bits(), Ordering::Relaxed);

        if last > 0.0 {
            let interval = (now - last).max(0.001);
            ewma_update(&self.call_interval_ewma_ms, interval);
        }

        ewma_update(&self.latency_ewma_ms, latency.as_secs_f64() * 1000.0);
        ewma_update(
            &self.error_rate_ewma,
            if is_error { 1.0 } else { 0.0 },
        );

        let stress = self.compute_stress();
        if stress >= CRITICAL_THRESHOLD {
            self.is_recuperating.store(true, Ordering::Relaxed);
        } else if stress <= RECOVERY_THRESHOLD {
            self.is_recuperating.store(false, Ordering::Relaxed);
        }
    }

    fn compute_stress(&self) -> f64 {
        let interval = f64::from_bits(self.call_interval_ewma_ms.load(Ordering::Relaxed));
        let error_rate = f64::from_bits(self.error_rate_ewma.load(Ordering::Relaxed));
        let latency = f64::from_bits(self.latency_ewma_ms.load(Ordering::Relaxed));

        let call_rate_pressure =
            clamp01(1.0 - (interval / BASELINE_CALL_INTERVAL_MS).min(1.0)) * CALL_RATE_WEIGHT;
        let error_pressure = clamp01(error_rate) * ERROR_RATE_WEIGHT;
        let latency_ratio = clamp01(
            ((latency / BASELINE_LATENCY_MS) - 1.0) / (MAX_LATENCY_RATIO - 1.0).max(1e-9),
        );
        let latency_pressure = latency_ratio * LATENCY_WEIGHT;

        clamp01(call_rate_pressure + error_pressure + latency_pressure)
    }

    /// 返回当前呼吸状态快照。
    pub fn snapshot(&self) -> BreathingState {
        let stress = self.compute_stress();
        let pattern = if stress >= CRITICAL_THRESHOLD {
            BreathingPattern::Critical
        } else if stress >= HIGH_THRESHOLD {
            BreathingPattern::Elevated
        } else if stress >= MEDIUM_THRESHOLD {
            BreathingPattern::Steady
        } else {
            let _ = LOW_THRESHOLD;
            BreathingPattern::Calm
        };
        let current_rate_ms = BASE_RATE_MS + stress * (MAX_RATE_MS - BASE_RATE_MS);
        BreathingState {
            stress,
            current_rate: Duration::from_secs_f64(current_rate_ms / 1000.0),
            is_recuperating: self.is_recuperating.load(Ordering::Relaxed),
            pattern,
        }
    }

    /// 压力反馈下的防抖窗口拉伸系数：压力越高，合并窗口越长（spec §4.7 的“降级但不破坏正确性”）。
    pub fn debounce_stretch(&self) -> f64 {
        1.0 + self.compute_stress()
    }
}

impl Default for BreathingMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn ewma_update(slot: &AtomicU64, sample: f64) {
    let previous = f64::from_bits(slot.load(Ordering::Relaxed));
    let updated = previous + EWMA_ALPHA * (sample - previous);
    slot.store(updated.to_bits(), Ordering::Relaxed);
}

#[inline]
fn clamp01(value: f64) -> f64 {
    if value < 0.0 {
        0.0
    } else if value > 1.0 {
        1.0
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_monitor_reports_calm_pattern() {
        let monitor = BreathingMonitor::new();
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.pattern, BreathingPattern::Calm);
        assert!(!snapshot.is_recuperating);
    }

    #[test]
    fn repeated_errors_drive_stress_up_and_trigger_recuperation() {
        let monitor = BreathingMonitor::new();
        for _ in 0..50 {
            monitor.record_call(Duration::from_millis(200), true);
        }
        let snapshot = monitor.snapshot();
        assert!(snapshot.stress > HIGH_THRESHOLD, "stress={}", snapshot.stress);
    }

    #[test]
    fn recovery_uses_hysteresis_not_exact_critical_threshold() {
        let monitor = BreathingMonitor::new();
        for _ in 0..50 {
            monitor.record_call(Duration::from_millis(300), true);
        }
        assert!(monitor.snapshot().is_recuperating);
        for _ in 0..5 {
            monitor.record_call(Duration::from_millis(5), false);
        }
        // A handful of healthy calls should not immediately clear recuperation
        // while stress is still above RECOVERY_THRESHOLD.
        let snapshot = monitor.snapshot();
        if snapshot.stress > RECOVERY_THRESHOLD {
            assert!(snapshot.is_recuperating);
        }
    }
}
