//! 前端到后端的命令邮箱
//! Frontend-to-backend command mailbox
//!
//! 邮箱持有两个缓冲区：前端在短互斥锁下向 `pending` 追加命令；后端在每个
//! 滴答的入口用同一把锁将 `pending` 与自己私有的排空缓冲区交换，然后在
//! 不持锁的情况下处理命令。临界区被限定为一次指针交换。
//!
//! The mailbox keeps two buffers: frontends append commands to `pending`
//! under a short mutex; at every tick entry the backend swaps `pending`
//! with its privately owned draining buffer under the same mutex, then
//! processes commands without holding the lock. The critical section is
//! bounded to a pointer swap.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::executor::TaskExecutor;
use crate::timer::frontend::FrontendShared;
use crate::timer::{EpochId, TimerId};

/// A command posted by a frontend handle.
/// 前端句柄投递的命令。
pub(crate) struct TimerCommand {
    /// Identifier of the timer the command refers to.
    /// 命令所指向的定时器标识符。
    pub id: TimerId,
    /// Frontend epoch at the moment the command was posted.
    /// 命令投递时刻的前端纪元。
    pub epoch: EpochId,
    /// What the backend should do with the timer.
    /// 后端应对该定时器执行的动作。
    pub action: CommandAction,
}

/// Command payload variants.
/// 命令载荷变体。
pub(crate) enum CommandAction {
    /// Bind a fresh timer id to a pool slot.
    /// 将一个新的定时器标识符绑定到池槽位。
    Create {
        frontend: Arc<FrontendShared>,
        executor: Arc<dyn TaskExecutor>,
    },
    /// Arm the timer for `duration` ticks from the current cursor.
    /// 将定时器武装为从当前游标起 `duration` 个滴答。
    Start { duration: u32 },
    /// Cancel the current run, if any.
    /// 取消当前运行（如有）。
    Stop,
    /// Sever the binding and return the slot to the free-list.
    /// 解除绑定并将槽位归还空闲链表。
    Destroy,
}

impl fmt::Debug for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandAction::Create { .. } => f.write_str("Create"),
            CommandAction::Start { duration } => {
                f.debug_struct("Start").field("duration", duration).finish()
            }
            CommandAction::Stop => f.write_str("Stop"),
            CommandAction::Destroy => f.write_str("Destroy"),
        }
    }
}

impl fmt::Debug for TimerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerCommand")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("action", &self.action)
            .finish()
    }
}

/// Double-buffered command mailbox shared between all frontends and the
/// backend.
/// 所有前端与后端共享的双缓冲命令邮箱。
pub(crate) struct CommandQueue {
    pending: Mutex<Vec<TimerCommand>>,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            pending: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append a command. Commands from one handle are observed by the
    /// backend in the order they were pushed.
    /// 追加一个命令。来自同一句柄的命令按投递顺序被后端观察到。
    pub fn push(&self, command: TimerCommand) {
        self.lock_pending().push(command);
    }

    /// Swap the pending buffer with the backend's draining buffer.
    /// 将待处理缓冲区与后端的排空缓冲区交换。
    ///
    /// `draining` must be empty on entry so no command is ever lost.
    /// 进入时 `draining` 必须为空，这样任何命令都不会丢失。
    pub fn swap_into(&self, draining: &mut Vec<TimerCommand>) {
        debug_assert!(draining.is_empty());
        std::mem::swap(&mut *self.lock_pending(), draining);
    }

    // 投递方 panic 导致的锁中毒不会使命令流本身失效，直接取回内部数据。
    // Lock poisoning from a panicking poster does not invalidate the command
    // stream itself; take the inner data regardless.
    fn lock_pending(&self) -> MutexGuard<'_, Vec<TimerCommand>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
