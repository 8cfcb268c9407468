//! 到期派发的执行器抽象
//! Executor abstraction for expiry dispatch
//!
//! 后端从不直接调用用户回调。每当一个定时器到期，后端将一个完成闭包派发到
//! 该定时器创建时绑定的执行器上，由执行器在拥有该句柄的上下文中运行闭包。
//!
//! The backend never invokes user callbacks directly. Whenever a timer
//! expires, the backend dispatches a completion closure onto the executor
//! the timer was bound to at creation time; the executor runs the closure
//! on the context that owns the handle.

use tokio::sync::mpsc;
use tracing::warn;

/// A unit of work dispatched by the timer backend.
/// 定时器后端派发的工作单元。
pub type TaskClosure = Box<dyn FnOnce() + Send>;

/// Capability to run a closure on a named execution context.
/// 在指定执行上下文中运行闭包的能力。
///
/// `execute` must enqueue the task and return immediately. Returning `false`
/// means the task was rejected; the backend drops the expiry in that case.
///
/// `execute` 必须将任务入队并立即返回。返回 `false` 表示任务被拒绝；此时
/// 后端会丢弃该到期事件。
pub trait TaskExecutor: Send + Sync {
    /// Enqueue `task` for execution. Must not block.
    /// 将 `task` 入队执行。不得阻塞。
    fn execute(&self, task: TaskClosure) -> bool;
}

/// Executor that forwards tasks into a bounded channel drained by the
/// owning context's event loop.
/// 将任务转发到有界通道的执行器，由拥有方上下文的事件循环来消费。
#[derive(Debug, Clone)]
pub struct ChannelExecutor {
    task_tx: mpsc::Sender<TaskClosure>,
}

impl ChannelExecutor {
    /// Wrap an existing sender.
    /// 包装一个已有的发送端。
    pub fn new(task_tx: mpsc::Sender<TaskClosure>) -> Self {
        Self { task_tx }
    }

    /// Create an executor together with the receiver its tasks arrive on.
    /// 创建执行器及其任务到达的接收端。
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TaskClosure>) {
        let (task_tx, task_rx) = mpsc::channel(capacity);
        (Self { task_tx }, task_rx)
    }
}

impl TaskExecutor for ChannelExecutor {
    fn execute(&self, task: TaskClosure) -> bool {
        // 使用 try_send 避免阻塞后端的滴答上下文
        // Use try_send to avoid blocking the backend's tick context
        if let Err(err) = self.task_tx.try_send(task) {
            warn!(error = %err, "Failed to dispatch task to channel executor");
            return false;
        }
        true
    }
}

/// Executor that spawns each task onto a tokio runtime.
/// 将每个任务生成到 tokio 运行时上的执行器。
#[derive(Debug, Clone)]
pub struct SpawnExecutor {
    handle: tokio::runtime::Handle,
}

impl SpawnExecutor {
    /// Dispatch onto the given runtime handle.
    /// 派发到给定的运行时句柄。
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Dispatch onto the runtime the caller is currently inside.
    /// 派发到调用者当前所在的运行时。
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime, like
    /// `tokio::runtime::Handle::current`.
    /// 与 `tokio::runtime::Handle::current` 一样，在 tokio 运行时之外调用
    /// 时会 panic。
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskExecutor for SpawnExecutor {
    fn execute(&self, task: TaskClosure) -> bool {
        self.handle.spawn(async move { task() });
        true
    }
}

/// Executor that runs the task immediately in the calling context.
/// 在调用上下文中立即运行任务的执行器。
///
/// Intended for tests and single-threaded hosts where the tick context and
/// the handle-owning context are the same.
/// 用于测试以及滴答上下文与句柄拥有上下文相同的单线程宿主。
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineExecutor;

impl TaskExecutor for InlineExecutor {
    fn execute(&self, task: TaskClosure) -> bool {
        task();
        true
    }
}
