//! 统一的 Future 包装类型，沿用 `spark-core::future::BoxFuture` 的命名与形状。

use std::{future::Future, pin::Pin};

/// 对象安全的装箱 Future，要求 `Send`，供订阅者签名与分发器内部使用。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
