use std::{future::Future, pin::Pin, time::Duration};

use tokio::time::Instant;

/// 统一的延迟 Future 类型，参照 `spark-core::future::BoxFuture` 的对象安全包装风格。
pub type Sleep = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// 可注入的时钟抽象：为节流/防抖/缓冲窗口与计时器提供统一的时间来源。
///
/// # 设计背景（Why）
/// - `throttle`/`debounce`/`buffer`/`interval` 全部依赖可靠的单调时间；通过 trait
///   注入，生产环境使用 [`SystemClock`]，测试环境借助 `tokio::time` 的暂停/推进能力
///   获得确定性的时间线，而无需更换实现类型。
pub trait Clock: Send + Sync + 'static {
    /// 返回当前的单调时间点（`tokio` 时间域，遵循 `tokio::time::pause` 语义）。
    fn now(&self) -> Instant;

    /// 返回一个在指定持续时间后完成的睡眠 Future。
    fn sleep(&self, duration: Duration) -> Sleep;
}

/// 基于 `tokio::time` 的系统时钟。生产环境默认实现。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> Sleep {
        Box::pin(tokio::time::sleep(duration))
    }
}
