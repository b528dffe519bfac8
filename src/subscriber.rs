//! 订阅者注册表（C5）：通道 id 到有序处理器列表的映射。
//!
//! # 设计背景（Why）
//! - 同一通道允许挂载多个处理器（spec §3 "Subscriber"），且 `parallel` 分发要求
//!   "subscribers fire in the order they were registered"（spec §5），因此内部用
//!   `Vec` 而非无序集合维护处理器，退订仅移除对应 token，不打乱其余顺序。
//! - 与 [`crate::channel::registry::ChannelRegistry`] 同样基于 `DashMap` 分片存储，
//!   保持两个注册表一致的并发模型。

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;

use crate::{
    common::{ChannelId, HandlerResult, Payload},
    future::BoxFuture,
};

/// 订阅者签名：接收当前生效载荷，返回 [`HandlerResult`] 或人类可读错误详情。
///
/// handler 的返回值可以是普通值，也可以是链式调用请求（§4.3.h），错误以
/// `Result::Err(String)` 表达，由分发器转译为 [`crate::error::CyreErrorKind::HandlerError`]。
pub type HandlerFn = Arc<dyn Fn(Payload) -> BoxFuture<'static, Result<HandlerResult, String>> + Send + Sync>;

struct Subscription {
    token: u64,
    handler: HandlerFn,
}

/// 订阅者注册表。
#[derive(Default)]
pub struct SubscriberRegistry {
    subs: DashMap<ChannelId, Vec<Subscription>>,
    next_token: AtomicU64,
}

/// 退订句柄，持有创建它的注册表引用，`unsubscribe()` 消费自身。
pub struct Unsubscribe {
    registry: Arc<SubscriberRegistry>,
    id: ChannelId,
    token: u64,
}

impl Unsubscribe {
    pub fn unsubscribe(self) -> bool {
        self.registry.remove(&self.id, self.token)
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册一个处理器，返回可用于退订的句柄（spec §6 `on(id, handler) -> {ok, unsubscribe?}`）。
    pub fn on(self: &Arc<Self>, id: ChannelId, handler: HandlerFn) -> Unsubscribe {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subs
            .entry(id.clone())
            .or_default()
            .push(Subscription { token, handler });
        Unsubscribe {
            registry: Arc::clone(self),
            id,
            token,
        }
    }

    fn remove(&self, id: &ChannelId, token: u64) -> bool {
        if let Some(mut entry) = self.subs.get_mut(id) {
            let before = entry.len();
            entry.retain(|sub| sub.token != token);
            return entry.len() != before;
        }
        false
    }

    /// 按注册顺序返回当前通道的处理器克隆列表。
    pub fn handlers_for(&self, id: &ChannelId) -> Vec<HandlerFn> {
        self.subs
            .get(id)
            .map(|entry| entry.iter().map(|s| Arc::clone(&s.handler)).collect())
            .unwrap_or_default()
    }

    pub fn handler_count(&self, id: &ChannelId) -> usize {
        self.subs.get(id).map(|e| e.len()).unwrap_or(0)
    }

    pub fn forget(&self, id: &ChannelId) {
        self.subs.remove(id);
    }

    pub fn clear(&self) {
        self.subs.clear();
    }
}
