//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use thiserror::Error;

/// The primary error type for the timer service library.
/// 定时器服务库的主要错误类型。
///
/// Only caller-side misuse is surfaced here. Backend conditions (stale
/// commands, rejected dispatches) are absorbed and counted instead; the
/// timer service is designed to lose stale work, never to unwind.
///
/// 这里只暴露调用方的误用。后端的各种情况（过期命令、被拒绝的派发）会被
/// 吸收并计数；定时器服务被设计为丢弃过期工作，而不是展开错误。
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// An operation was attempted on a handle that has already been released.
    /// 在已释放的句柄上尝试操作。
    #[error("timer handle has been released")]
    InvalidHandle,

    /// A zero-tick duration was rejected; the shortest run is one tick.
    /// 零滴答的时长被拒绝；最短的运行时长为一个滴答。
    #[error("timer duration must be at least one tick")]
    ZeroDuration,
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;
