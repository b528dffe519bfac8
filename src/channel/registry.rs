//! 通道注册表（C4）：配置、快照与编译后管线的并发安全存储。
//!
//! # 设计背景（Why）
//! - 沿用 `spark-switch::core::session_manager::SessionManager` 的做法：用
//!   `DashMap` 提供分片级别的并发安全存取，避免为整张注册表引入全局锁造成的
//!   热路径串行化。
//! - 每个条目内部另有一把 `tokio::sync::Mutex`，专门串行化该通道的保护/提交
//!   步骤（throttle 计时、debounce 合并、buffer 聚合），以满足 spec §5
//!   “单通道内已接受的执行全序”的排序保证——`DashMap` 本身只保证单次操作的
//!   原子性，不保证跨操作的顺序。

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as AsyncMutex;

use crate::{
    channel::{ChannelConfig, ChannelRuntimeState, ChannelSnapshot},
    common::ChannelId,
    error::CyreErrorKind,
    pipeline::CompiledPipeline,
};

/// 单个通道的仓储条目：配置 + 编译结果 + 快照，均在一把 `Arc` 后面共享。
pub struct ChannelEntry {
    pub config: ChannelConfig,
    pub pipeline: CompiledPipeline,
    pub snapshot: ChannelSnapshot,
    /// 串行化该通道保护/提交步骤的逻辑锁（spec §5 的单通道排序保证），同时承载
    /// 节流/防抖/缓冲的运行时状态。
    pub runtime: Arc<AsyncMutex<ChannelRuntimeState>>,
}

/// 通道注册表：`register`/`get`/`forget`/`lock`/`unlock`（spec §4.1）。
#[derive(Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, ChannelEntry>,
    locked: std::sync::atomic::AtomicBool,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn lock(&self) {
        self.locked.store(true, std::sync::atomic::Ordering::Release);
    }

    pub fn unlock(&self) {
        self.locked.store(false, std::sync::atomic::Ordering::Release);
    }

    /// 注册（或替换）一个通道：校验配置、编译管线、写入快照。
    ///
    /// 重新注册同一 id 会替换配置并使旧的编译管线失效（spec §3 不变式 2）。
    pub fn register(&self, config: ChannelConfig) -> Result<(), CyreErrorKind> {
        if self.is_locked() {
            return Err(CyreErrorKind::Locked);
        }
        config.validate()?;
        let pipeline = CompiledPipeline::compile(&config);
        let initial_payload = config.initial_payload.clone();
        let entry = ChannelEntry {
            snapshot: ChannelSnapshot {
                req: initial_payload,
                ..ChannelSnapshot::default()
            },
            runtime: Arc::new(AsyncMutex::new(ChannelRuntimeState::default())),
            config,
            pipeline,
        };
        self.channels.insert(entry.config.id.clone(), entry);
        Ok(())
    }

    pub fn contains(&self, id: &ChannelId) -> bool {
        self.channels.contains_key(id)
    }

    pub fn get_snapshot(&self, id: &ChannelId) -> Option<ChannelSnapshot> {
        self.channels.get(id).map(|entry| entry.snapshot.clone())
    }

    pub fn entry(&self, id: &ChannelId) -> Option<dashmap::mapref::one::Ref<'_, ChannelId, ChannelEntry>> {
        self.channels.get(id)
    }

    pub fn entry_mut(
        &self,
        id: &ChannelId,
    ) -> Option<dashmap::mapref::one::RefMut<'_, ChannelId, ChannelEntry>> {
        self.channels.get_mut(id)
    }

    /// 移除通道，返回是否存在（spec §6 `forget(id) -> bool`）。
    pub fn forget(&self, id: &ChannelId) -> bool {
        self.channels.remove(id).is_some()
    }

    pub fn ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn clear(&self) {
        self.channels.clear();
    }
}
