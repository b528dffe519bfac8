//! 错误域：统一描述通道注册、保护管线与分发过程中的拒绝原因。
//!
//! # 设计背景（Why）
//! - `call()` 的返回值必须能区分“被推迟但已接受”（Debounced/Buffered/NoChange）与
//!   “当前被拒绝”（InvalidConfig/Throttled/…）两类结果；集中枚举便于上层按
//!   `metadata.errorKind` 做精确的遥测与告警归类。
//! - 沿用 `spark-switch::SwitchError` 的两层结构：内部用 `thiserror` 派生的强类型
//!   枚举表达根因，外部通过 `Response` 暴露 `ok/message/error` 三元组。
//!
//! # 契约说明（What）
//! - 每个变体对应 spec 中 §6 的错误枚举之一，外加 `MaxDepth`（链式调用深度耗尽，
//!   §8 "Link safety" 要求但 §6 表格未列出，属于对测试性质的补充）。
//! - 所有变体均为 `Clone + Debug + Eq`，可安全地在 `Response` 中重复出现而不分配。

use std::time::Duration;

use thiserror::Error;

use crate::common::ChannelId;

/// `CyreErrorKind` 是核心对外暴露的稳定错误码集合。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CyreErrorKind {
    /// 注册时配置非法：id 为空、互斥保护同时设置、数值边界被违反等。
    #[error("invalid channel config for `{id}`: {reason}")]
    InvalidConfig { id: String, reason: String },

    /// 调用了未注册（或已被 `forget`）的通道。
    #[error("no such channel: `{0}`")]
    NoSuchChannel(ChannelId),

    /// 系统处于 `lock()` 状态，调用方非系统调用者。
    #[error("cyre instance is locked")]
    Locked,

    /// `required` 校验未通过。
    #[error("payload required for `{0}` but was empty")]
    Required(ChannelId),

    /// `schema` 校验返回 `ok:false`。
    #[error("schema validation failed for `{0}`: {detail}")]
    SchemaInvalid { id: ChannelId, detail: String },

    /// `condition` 断言为假。
    #[error("condition not met for `{0}`")]
    ConditionNotMet(ChannelId),

    /// 节流窗口内的调用被拒绝。
    #[error("throttled: `{id}` next allowed in {remaining:?}")]
    Throttled { id: ChannelId, remaining: Duration },

    /// 调用被折叠进防抖窗口（soft outcome，通常以 `ok:true` 呈现）。
    #[error("debounced: `{0}` execution scheduled")]
    Debounced(ChannelId),

    /// 调用被收纳进缓冲窗口（soft outcome）。
    #[error("buffered: `{0}` awaiting window flush")]
    Buffered(ChannelId),

    /// `detectChanges` 命中且未发生变化（soft outcome）。
    #[error("no changes detected for `{0}`")]
    NoChange(ChannelId),

    /// 整体分发超过 `dispatchTimeout`。
    #[error("dispatch timeout for `{0}`")]
    Timeout(ChannelId),

    /// 订阅者执行失败（含 panic 捕获后的转译）。
    #[error("handler error for `{id}`: {detail}")]
    HandlerError { id: ChannelId, detail: String },

    /// 实例已经（或正在）关闭，拒绝新的注册/调用。
    #[error("shutdown pending or completed")]
    ShutdownPending,

    /// 链式调用（`{id, payload}` 返回值）超过最大深度。
    #[error("link chain for `{0}` exceeded max depth")]
    MaxDepth(ChannelId),
}

impl CyreErrorKind {
    /// 机读错误码，写入 `metadata.errorKind`。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "InvalidConfig",
            Self::NoSuchChannel(_) => "NoSuchChannel",
            Self::Locked => "Locked",
            Self::Required(_) => "Required",
            Self::SchemaInvalid { .. } => "SchemaInvalid",
            Self::ConditionNotMet(_) => "ConditionNotMet",
            Self::Throttled { .. } => "Throttled",
            Self::Debounced(_) => "Debounced",
            Self::Buffered(_) => "Buffered",
            Self::NoChange(_) => "NoChange",
            Self::Timeout(_) => "Timeout",
            Self::HandlerError { .. } => "HandlerError",
            Self::ShutdownPending => "ShutdownPending",
            Self::MaxDepth(_) => "MaxDepth",
        }
    }

    /// 软结果：协议允许 `ok:true` 但携带推迟/跳过语义（spec §7.1）。
    pub fn is_soft_outcome(&self) -> bool {
        matches!(self, Self::Debounced(_) | Self::Buffered(_) | Self::NoChange(_))
    }
}
