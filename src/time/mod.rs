//! 时间子系统：`Clock` 抽象（C1）。
//!
//! 教案式说明：`spark-core` 的原始实现为了保持运行时中立，手写了基于线程睡眠的
//! `SystemClock`。本 crate 已经明确选择 `tokio` 作为调度基座（见 `SPEC_FULL.md`
//! 的并发小节），因此没有理由再重复造轮子：`SystemClock` 直接委托给
//! `tokio::time`，测试则通过 `#[tokio::test(start_paused = true)]` 搭配
//! `tokio::time::advance` 驱动虚拟时间——这正是 `tokio` 生态下的标准做法，而非
//! 手写一个平行的虚拟时钟实现。

mod clock;

pub use clock::{Clock, Sleep, SystemClock};
