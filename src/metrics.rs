//! 指标与系统健康视图（C9，SPEC_FULL.md §4.9 对 spec.md 一笔带过内容的展开）。
//!
//! # 设计背景（Why）
//! - spec.md 只在数据流描述里提到“记录结果... 更新指标”，未给出具体形状；按照
//!   系统提示词的“环境性关注点即便被 Non-goals 排除在外也要保留”规则，这里把
//!   它展开成一个只读快照视图：每通道计数器沿用
//!   [`crate::channel::ChannelMetadata`] 已经持有的字段，这里只新增一个
//!   跨通道的 `SystemHealth` 聚合视图，不重复存储每通道数据。

use std::sync::Arc;

use crate::{breathing::BreathingMonitor, channel::registry::ChannelRegistry, timekeeper::Timekeeper};

/// 进程级健康快照（`Cyre::health()`）。
#[derive(Clone, Debug)]
pub struct SystemHealth {
    pub stress: f64,
    pub current_rate: std::time::Duration,
    pub is_recuperating: bool,
    pub active_channels: usize,
    pub active_timers: usize,
    pub locked: bool,
}

pub struct MetricsView {
    registry: Arc<ChannelRegistry>,
    timekeeper: Arc<Timekeeper>,
    breathing: Arc<BreathingMonitor>,
}

impl MetricsView {
    pub fn new(
        registry: Arc<ChannelRegistry>,
        timekeeper: Arc<Timekeeper>,
        breathing: Arc<BreathingMonitor>,
    ) -> Self {
        Self {
            registry,
            timekeeper,
            breathing,
        }
    }

    pub fn snapshot(&self) -> SystemHealth {
        let breathing = self.breathing.snapshot();
        SystemHealth {
            stress: breathing.stress,
            current_rate: breathing.current_rate,
            is_recuperating: breathing.is_recuperating,
            active_channels: self.registry.len(),
            active_timers: self.timekeeper.len(),
            locked: self.registry.is_locked(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_system_reports_zero_activity() {
        let registry = Arc::new(ChannelRegistry::new());
        let breathing = Arc::new(BreathingMonitor::new());
        let timekeeper = Arc::new(Timekeeper::new(Arc::clone(&breathing)));
        let metrics = MetricsView::new(registry, timekeeper, breathing);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.active_channels, 0);
        assert_eq!(snapshot.active_timers, 0);
        assert!(!snapshot.locked);
    }
}
