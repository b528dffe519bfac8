//! 公共基础类型：通道标识、载荷包装与处理器返回值契约。
//!
//! # 设计背景（Why）
//! - 源语言里载荷是任意的动态值；为避免把“任意类型”泄漏进核心的静态类型系统，这里把载荷
//!   收敛为一个不透明信封 [`Payload`]，内部用 `serde_json::Value` 承载结构化数据，既能做
//!   深度结构相等比较（`detectChanges`），又能被 `schema`/`selector`/`transform` 这些
//!   调用方提供的函数对象自由处理。
//! - 链式调用（handler 返回 `{id, payload}`）不再依赖“鸭子类型”，而是显式的
//!   [`HandlerResult`] 枚举，对应设计笔记中 "Link chaining via return value convention"
//!   的重构建议。

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

/// 通道标识：分支限定后的完整路径字符串，采用 `Arc<str>` 便于零拷贝共享。
///
/// 教案式注释：沿用 `spark-core::ids` 用新类型约束裸字符串的做法，但省去该 crate
/// 的非空校验分支——通道 id 的空值检查属于 `register()` 的配置校验职责（见
/// [`crate::channel::ChannelConfig::validate`]），不应在标识类型构造时重复。
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Arc<str>);

impl ChannelId {
    pub fn new(value: impl Into<Arc<str>>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({:?})", self.0)
    }
}

impl<S: Into<Arc<str>>> From<S> for ChannelId {
    fn from(value: S) -> Self {
        Self::new(value)
    }
}

/// 不透明的载荷信封。
///
/// `detectChanges`（spec §4.2/§4.3.d）依赖深度结构相等：`serde_json::Value` 的
/// `PartialEq` 实现天然满足这一点，无需引入单独的哈希回退路径——核心的载荷规模
/// 预期以控制消息为主，而非大体积二进制负载（属于 Non-goals 的隐含边界）。
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Payload(pub serde_json::Value);

impl Payload {
    pub fn null() -> Self {
        Self(serde_json::Value::Null)
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            serde_json::Value::Null => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    pub fn into_inner(self) -> serde_json::Value {
        self.0
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl Eq for Payload {}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// 处理器（subscriber）的返回值契约。
///
/// 替代源实现里 `{id, payload}` 形状的返回值鸭子类型：这里用求和类型显式区分
/// “普通结果”与“链式调用请求”，分发器（[`crate::dispatch`]）据此决定是否发起
/// 下一跳调用。
#[derive(Clone, Debug)]
pub enum HandlerResult {
    /// 常规结果，原样向上传播。
    Value(Payload),
    /// 请求分发器向 `id` 发起一次新的 `call(id, payload)`（深度受限，见 §4.3.h）。
    Link { id: ChannelId, payload: Payload },
}

impl HandlerResult {
    pub fn value(payload: impl Into<Payload>) -> Self {
        Self::Value(payload.into())
    }
}

impl From<Payload> for HandlerResult {
    fn from(payload: Payload) -> Self {
        Self::Value(payload)
    }
}

impl From<serde_json::Value> for HandlerResult {
    fn from(value: serde_json::Value) -> Self {
        Self::Value(Payload(value))
    }
}
