//! 通道数据模型（§3 of spec.md）：配置、保护、天赋（talent）管线字段与运行时快照。
//!
//! # 设计背景（Why）
//! - 源实现里保护/天赋都是config对象上的可选动态字段；这里把互斥的保护收敛成一个
//!   求和类型 [`Protection`]（设计笔记中点名的重构方向：
//!   `Protection = None | Throttle(t) | Debounce(d, maxWait?) | Buffer(window, strategy, maxSize?)`），
//!   在构造时而非运行时消灭“throttle 和 debounce 都设置了”这一类非法状态。
//! - 函数值字段（`schema`/`condition`/`selector`/`transform`）抽象为能力 trait 的对象安全
//!   包装（`Arc<dyn Fn...>`），调用方以闭包形式提供，核心只要求其满足指定签名。

pub mod registry;

use std::{sync::Arc, time::Duration};

use crate::{
    common::{ChannelId, Payload},
    error::CyreErrorKind,
};

/// 互斥的保护策略（spec §3 不变式 4：至多一个生效）。
#[derive(Clone)]
pub enum Protection {
    None,
    Throttle {
        duration: Duration,
    },
    Debounce {
        duration: Duration,
        max_wait: Option<Duration>,
    },
    Buffer {
        window: Duration,
        strategy: BufferStrategy,
        max_size: Option<usize>,
    },
}

/// 缓冲聚合策略。`Ignore` 按 spec 的开放问题解析为“首个胜出，窗口内其余丢弃”。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferStrategy {
    Overwrite,
    Append,
    Ignore,
}

/// `required` 天赋的判定模式。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RequiredMode {
    /// `required: true` —— 拒绝 `null`/`undefined` 等价物。
    Standard,
    /// `required: 'non-empty'` —— 额外拒绝空字符串/空数组/空对象。
    NonEmpty,
}

/// 重复策略：有限次数或无限。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Repeat {
    Count(u64),
    Infinite,
}

/// 调度配置（§4.4）。
#[derive(Clone, Copy, Debug, Default)]
pub struct Scheduling {
    pub delay: Option<Duration>,
    pub interval: Option<Duration>,
    pub repeat: Option<Repeat>,
}

/// 分发策略（§4.5）。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DispatchStrategy {
    Parallel,
    Sequential,
    Waterfall,
    Race,
}

impl Default for DispatchStrategy {
    fn default() -> Self {
        Self::Parallel
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorStrategy {
    FailFast,
    Continue,
}

impl Default for ErrorStrategy {
    fn default() -> Self {
        Self::FailFast
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollectResults {
    All,
    Last,
    First,
}

impl Default for CollectResults {
    fn default() -> Self {
        Self::Last
    }
}

/// Schema 校验器的返回契约：`(payload) -> {ok, data, errors}`（spec §1，"out of scope"黑盒）。
pub enum SchemaOutcome {
    Ok { data: Payload },
    Err { errors: String },
}

pub type SchemaFn = Arc<dyn Fn(&Payload) -> SchemaOutcome + Send + Sync>;
pub type ConditionFn = Arc<dyn Fn(&Payload) -> bool + Send + Sync>;
pub type SelectorFn = Arc<dyn Fn(&Payload) -> Payload + Send + Sync>;
pub type TransformFn = Arc<dyn Fn(Payload) -> Payload + Send + Sync>;

/// 天赋管线字段（§3/§4.2），顺序由编译器固定，与此结构体的字段声明顺序无关。
#[derive(Clone, Default)]
pub struct Talents {
    pub required: Option<RequiredMode>,
    pub schema: Option<SchemaFn>,
    pub selector: Option<SelectorFn>,
    pub condition: Option<ConditionFn>,
    pub transform: Option<TransformFn>,
    pub detect_changes: bool,
}

impl Talents {
    pub fn is_empty(&self) -> bool {
        self.required.is_none()
            && self.schema.is_none()
            && self.selector.is_none()
            && self.condition.is_none()
            && self.transform.is_none()
            && !self.detect_changes
    }
}

/// 通道配置：注册后不可变（除非重新 `register`），编译出 [`crate::pipeline::CompiledPipeline`]。
#[derive(Clone)]
pub struct ChannelConfig {
    pub id: ChannelId,
    pub type_: Option<String>,
    pub name: Option<String>,
    pub group: Option<String>,
    pub protection: Protection,
    pub talents: Talents,
    pub scheduling: Scheduling,
    pub dispatch: DispatchStrategy,
    pub error_strategy: ErrorStrategy,
    pub dispatch_timeout: Option<Duration>,
    pub collect_results: CollectResults,
    pub initial_payload: Option<Payload>,
}

impl ChannelConfig {
    pub fn new(id: impl Into<ChannelId>) -> Self {
        Self {
            id: id.into(),
            type_: None,
            name: None,
            group: None,
            protection: Protection::None,
            talents: Talents::default(),
            scheduling: Scheduling::default(),
            dispatch: DispatchStrategy::default(),
            error_strategy: ErrorStrategy::default(),
            dispatch_timeout: None,
            collect_results: CollectResults::default(),
            initial_payload: None,
        }
    }

    pub fn throttle(mut self, duration: Duration) -> Self {
        self.protection = Protection::Throttle { duration };
        self
    }

    pub fn debounce(mut self, duration: Duration, max_wait: Option<Duration>) -> Self {
        self.protection = Protection::Debounce { duration, max_wait };
        self
    }

    pub fn buffer(mut self, window: Duration, strategy: BufferStrategy, max_size: Option<usize>) -> Self {
        self.protection = Protection::Buffer {
            window,
            strategy,
            max_size,
        };
        self
    }

    pub fn interval(mut self, duration: Duration, repeat: Repeat) -> Self {
        self.scheduling.interval = Some(duration);
        self.scheduling.repeat = Some(repeat);
        self
    }

    pub fn delay(mut self, duration: Duration) -> Self {
        self.scheduling.delay = Some(duration);
        self
    }

    /// 校验配置是否满足 spec §4.1 的注册约束，返回规范化错误。
    ///
    /// - id 不能为空；
    /// - throttle/debounce/buffer 互斥（类型上已经保证，此处只做数值边界校验）；
    /// - `throttle/debounce >= 1ms`；`buffer.window > 0`；`maxWait >= debounce`；
    /// - 若设置了 `interval` 但未设置 `repeat`，默认视为单次执行（不是错误）。
    pub fn validate(&self) -> Result<(), CyreErrorKind> {
        if self.id.as_str().trim().is_empty() {
            return Err(CyreErrorKind::InvalidConfig {
                id: self.id.to_string(),
                reason: "channel id must not be empty".into(),
            });
        }
        match &self.protection {
            Protection::None => {}
            Protection::Throttle { duration } => {
                if duration.as_millis() < 1 {
                    return Err(self.invalid("throttle must be >= 1ms"));
                }
            }
            Protection::Debounce { duration, max_wait } => {
                if duration.as_millis() < 1 {
                    return Err(self.invalid("debounce must be >= 1ms"));
                }
                if let Some(max_wait) = max_wait {
                    if max_wait < duration {
                        return Err(self.invalid("maxWait must be >= debounce"));
                    }
                }
            }
            Protection::Buffer { window, max_size, .. } => {
                if window.is_zero() {
                    return Err(self.invalid("buffer.window must be > 0"));
                }
                if matches!(max_size, Some(0)) {
                    return Err(self.invalid("buffer.maxSize must be > 0 when set"));
                }
            }
        }
        if let Some(interval) = self.scheduling.interval {
            if interval.as_millis() == 0 && matches!(self.scheduling.repeat, Some(Repeat::Infinite)) {
                // interval:0 + repeat:true is explicitly allowed (§4.4), degenerates to
                // per-tick immediate execution; nothing to reject here.
            }
        }
        Ok(())
    }

    fn invalid(&self, reason: &str) -> CyreErrorKind {
        CyreErrorKind::InvalidConfig {
            id: self.id.to_string(),
            reason: reason.to_string(),
        }
    }

    /// 配置的规范化指纹（§4.2 `verificationHash`），用于缓存失效判断。
    ///
    /// 只对可序列化的数据字段做摘要；函数值字段（schema/condition/selector/transform）
    /// 不参与哈希，但其“是否存在”这一位信息会被纳入摘要，足以让
    /// “重新注册同一形状的配置产生相同哈希”这一幂等性质成立（spec §8 Idempotent registration）。
    pub fn verification_hash(&self) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_str().as_bytes());
        hasher.update([protection_tag(&self.protection)]);
        hasher.update(protection_bytes(&self.protection));
        hasher.update([
            self.talents.required.is_some() as u8,
            self.talents.schema.is_some() as u8,
            self.talents.selector.is_some() as u8,
            self.talents.condition.is_some() as u8,
            self.talents.transform.is_some() as u8,
            self.talents.detect_changes as u8,
        ]);
        if let Some(delay) = self.scheduling.delay {
            hasher.update(delay.as_millis().to_le_bytes());
        }
        if let Some(interval) = self.scheduling.interval {
            hasher.update(interval.as_millis().to_le_bytes());
        }
        hasher.update([self.dispatch as u8, self.error_strategy as u8, self.collect_results as u8]);
        format!("{:x}", hasher.finalize())
    }
}

fn protection_tag(protection: &Protection) -> u8 {
    match protection {
        Protection::None => 0,
        Protection::Throttle { .. } => 1,
        Protection::Debounce { .. } => 2,
        Protection::Buffer { .. } => 3,
    }
}

fn protection_bytes(protection: &Protection) -> Vec<u8> {
    match protection {
        Protection::None => vec![],
        Protection::Throttle { duration } => duration.as_millis().to_le_bytes().to_vec(),
        Protection::Debounce { duration, max_wait } => {
            let mut bytes = duration.as_millis().to_le_bytes().to_vec();
            bytes.extend(max_wait.map(|d| d.as_millis()).unwrap_or(0).to_le_bytes());
            bytes
        }
        Protection::Buffer { window, max_size, strategy } => {
            let mut bytes = window.as_millis().to_le_bytes().to_vec();
            bytes.push(*strategy as u8);
            bytes.extend(max_size.unwrap_or(0).to_le_bytes());
            bytes
        }
    }
}

/// 通道的运行时可变快照（§3 "Snapshot"）。
#[derive(Clone, Default)]
pub struct ChannelSnapshot {
    pub req: Option<Payload>,
    pub res: Option<Payload>,
    pub metadata: ChannelMetadata,
    /// Post-selector, pre-transform projection of the last accepted execution;
    /// compared against for `detectChanges` (spec §3 invariant 6, §9 open question 2).
    pub last_projection: Option<Payload>,
}

#[derive(Clone, Default)]
pub struct ChannelMetadata {
    pub status: ChannelStatus,
    pub last_exec_millis: Option<u64>,
    pub exec_count: u64,
    pub error_count: u64,
    /// 连续 handler 错误计数；达到隔离阈值后通道被隔离（spec §7）。
    pub consecutive_errors: u32,
    pub quarantined: bool,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ChannelStatus {
    #[default]
    Idle,
    Active,
    Quarantined,
}

/// Per-channel mutable state consulted only by the dispatcher (§4.3.c, §4.4).
///
/// Lives behind the registry entry's serial lock so that protection decisions
/// (throttle/debounce/buffer) and the commit step stay totally ordered for a
/// single channel (spec §5), without needing a second lock.
#[derive(Default)]
pub struct ChannelRuntimeState {
    pub last_exec: Option<tokio::time::Instant>,
    pub debounce_pending: Option<Payload>,
    pub debounce_first_pending_at: Option<tokio::time::Instant>,
    pub buffer_items: Vec<Payload>,
    pub buffer_armed: bool,
    /// Set once an interval/repeat schedule has been armed for this channel so a
    /// second external call doesn't stack a duplicate timer (spec §4.4).
    pub schedule_armed: bool,
}
