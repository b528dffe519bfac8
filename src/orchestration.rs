//! 编排垫片（C10）：通道触发/定时器到期后的最小外部触发器路由。
//!
//! # 设计背景（Why）
//! - spec.md 把编排 DSL 明确列为 out-of-scope 的外部协作者，"an external engine
//!   whose only coupling is calling channels and subscribing to channel
//!   events"；核心只需要提供一个触发点，不理解也不关心触发器的返回值
//!   （SPEC_FULL.md §4.10）。
//! - 形状上比 C5 的订阅者注册表更薄：不需要退订句柄、不需要保证顺序，因为
//!   编排层被期望是一个旁路观察者，而不是 `call()` 结果的一部分。

use std::sync::Arc;

use dashmap::DashMap;

use crate::common::ChannelId;

/// 一次通道触发事件：通道 id、是否来自定时器、本次分发是否成功。
#[derive(Clone, Debug)]
pub struct ChannelFireEvent {
    pub id: ChannelId,
    pub from_timer: bool,
    pub ok: bool,
}

/// 外部编排层注册的触发器；核心调用后忽略其返回值。
pub trait Trigger: Send + Sync {
    fn on_fire(&self, event: &ChannelFireEvent);
}

impl<F: Fn(&ChannelFireEvent) + Send + Sync> Trigger for F {
    fn on_fire(&self, event: &ChannelFireEvent) {
        (self)(event)
    }
}

/// 触发器路由：通道 id -> 已注册的触发器列表。
#[derive(Default)]
pub struct OrchestrationRouter {
    triggers: DashMap<ChannelId, Vec<Arc<dyn Trigger>>>,
}

impl OrchestrationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: ChannelId, trigger: Arc<dyn Trigger>) {
        self.triggers.entry(id).or_default().push(trigger);
    }

    /// 核心在通道触发或定时器到期后调用；从不检查或传播触发器的返回值。
    pub fn notify(&self, event: ChannelFireEvent) {
        if let Some(triggers) = self.triggers.get(&event.id) {
            for trigger in triggers.iter() {
                trigger.on_fire(&event);
            }
        }
    }

    pub fn forget(&self, id: &ChannelId) {
        self.triggers.remove(id);
    }

    pub fn clear(&self) {
        self.triggers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn registered_trigger_observes_fire_events_without_influencing_them() {
        let router = OrchestrationRouter::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        router.register(
            ChannelId::new("t"),
            Arc::new(move |_event: &ChannelFireEvent| {
                counter.fetch_add(1, Ordering::Relaxed);
            }),
        );
        router.notify(ChannelFireEvent {
            id: ChannelId::new("t"),
            from_timer: false,
            ok: true,
        });
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
