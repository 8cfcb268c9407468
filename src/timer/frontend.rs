//! 定时器前端：服务与唯一所有权句柄
//! Timer frontend: service and uniquely-owned handles
//!
//! 前端从不直接触碰时间轮或槽位池。`TimerService` 分配标识符并投递
//! `Create` 命令；`UniqueTimer` 在本地维护用户可见状态（时长、回调、
//! 报告状态），并把每次武装、取消与释放转换成一条携带新纪元的命令。
//! 纪元计数器是唯一跨上下文同步的变量。
//!
//! The frontend never touches the wheel or the slot pool directly.
//! `TimerService` assigns identifiers and posts `Create` commands;
//! `UniqueTimer` keeps the user-visible state (duration, callback, reported
//! state) locally and turns every arm, cancel and release into a command
//! carrying a fresh epoch. The epoch counter is the only cross-context
//! synchronizing variable.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tracing::trace;

use crate::error::{Error, Result};
use crate::executor::TaskExecutor;
use crate::timer::command::{CommandAction, CommandQueue, TimerCommand};
use crate::timer::{EpochId, TimerId, TimerState, UNSET_DURATION};

/// Callback invoked with the timer's id when a run expires.
/// 当一次运行到期时以定时器标识符调用的回调。
pub type TimerCallback = Box<dyn Fn(TimerId) + Send + Sync>;

/// Frontend-visible timer state shared with in-flight expiry dispatches.
/// 与在途到期派发共享的前端可见定时器状态。
///
/// Holds atomics only; there is no per-timer lock. The owning handle writes
/// from its own context, the completion closure writes from the executor
/// context, and the epoch decides which of the two still speaks for the
/// timer.
///
/// 仅持有原子变量；没有任何针对单个定时器的锁。拥有方句柄从自身上下文
/// 写入，完成闭包从执行器上下文写入，由纪元决定两者中谁仍然代表该定时器。
pub(crate) struct FrontendShared {
    state: AtomicU8,
    epoch: AtomicU32,
    duration: AtomicU32,
    callback: ArcSwapOption<TimerCallback>,
}

impl FrontendShared {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(TimerState::Stopped.as_u8()),
            epoch: AtomicU32::new(0),
            duration: AtomicU32::new(UNSET_DURATION),
            callback: ArcSwapOption::const_empty(),
        }
    }

    pub fn state(&self) -> TimerState {
        TimerState::from_u8(self.state.load(Ordering::Relaxed))
    }

    pub fn set_state(&self, state: TimerState) {
        self.state.store(state.as_u8(), Ordering::Relaxed);
    }

    /// Invalidate every command and expiry posted so far and return the
    /// fresh epoch.
    /// 使至今投递的所有命令与到期事件失效，并返回新的纪元。
    pub fn bump_epoch(&self) -> EpochId {
        self.epoch.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    pub fn duration_raw(&self) -> u32 {
        self.duration.load(Ordering::Relaxed)
    }

    pub fn set_duration(&self, ticks: u32) {
        self.duration.store(ticks, Ordering::Relaxed);
    }

    pub fn store_callback(&self, callback: TimerCallback) {
        self.callback.store(Some(Arc::new(callback)));
    }

    /// Frontend-side completion of a backend expiry; runs on the executor
    /// context that owns the handle.
    /// 后端到期事件的前端侧完成；运行在拥有句柄的执行器上下文中。
    ///
    /// The run is acknowledged only when no re-arm, stop or release happened
    /// since the backend dispatched it.
    /// 仅当后端派发之后没有发生重新武装、取消或释放时，该次运行才会被确认。
    pub fn complete_expiry(&self, dispatched_epoch: EpochId, id: TimerId) {
        if self.epoch.load(Ordering::Acquire) != dispatched_epoch {
            trace!(id, dispatched_epoch, "Expiry superseded before completion");
            return;
        }
        self.set_state(TimerState::Expired);
        if let Some(callback) = self.callback.load_full() {
            callback(id);
        }
    }
}

impl fmt::Debug for FrontendShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrontendShared")
            .field("state", &self.state())
            .field("epoch", &self.epoch.load(Ordering::Relaxed))
            .field("duration", &self.duration.load(Ordering::Relaxed))
            .finish()
    }
}

/// Cloneable factory for timer handles.
/// 可克隆的定时器句柄工厂。
///
/// Cloning is cheap; every clone feeds the same backend mailbox.
/// 克隆开销极小；所有克隆共享同一个后端邮箱。
#[derive(Clone)]
pub struct TimerService {
    queue: Arc<CommandQueue>,
    next_id: Arc<AtomicU64>,
}

impl TimerService {
    pub(crate) fn new(queue: Arc<CommandQueue>) -> Self {
        Self {
            queue,
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Create a timer whose expiries are dispatched onto `executor`.
    /// 创建一个定时器，其到期事件被派发到 `executor` 上。
    ///
    /// The handle is usable immediately; the backend binds the id to a pool
    /// slot when it drains the mailbox on the next tick.
    /// 句柄立即可用；后端在下一个滴答排空邮箱时将标识符绑定到池槽位。
    pub fn create_timer(&self, executor: Arc<dyn TaskExecutor>) -> UniqueTimer {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(FrontendShared::new());

        self.queue.push(TimerCommand {
            id,
            epoch: 0,
            action: CommandAction::Create {
                frontend: shared.clone(),
                executor,
            },
        });
        trace!(id, "Timer created");

        UniqueTimer {
            inner: Some(HandleInner {
                id,
                shared,
                queue: self.queue.clone(),
            }),
        }
    }
}

impl fmt::Debug for TimerService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerService")
            .field("timers_created", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

struct HandleInner {
    id: TimerId,
    shared: Arc<FrontendShared>,
    queue: Arc<CommandQueue>,
}

impl HandleInner {
    fn post(&self, epoch: EpochId, action: CommandAction) {
        self.queue.push(TimerCommand {
            id: self.id,
            epoch,
            action,
        });
    }

    fn post_destroy(&self) {
        let epoch = self.shared.bump_epoch();
        self.shared.set_state(TimerState::Stopped);
        self.post(epoch, CommandAction::Destroy);
        trace!(id = self.id, epoch, "Timer destroyed");
    }
}

/// Uniquely-owned timer handle.
/// 唯一所有权的定时器句柄。
///
/// May be moved between contexts but must be operated from one context at a
/// time. Dropping the handle posts `Destroy` exactly once; the slot is
/// recycled by the backend after that command drains.
///
/// 可以在上下文之间移动，但同一时刻只能从一个上下文操作。丢弃句柄会且仅
/// 会投递一次 `Destroy`；该命令被排空后，槽位由后端回收。
pub struct UniqueTimer {
    inner: Option<HandleInner>,
}

impl UniqueTimer {
    /// Configure the duration of future runs, in ticks.
    /// 配置后续运行的时长，以滴答计。
    ///
    /// Stores locally and posts no command; the reported state is unchanged.
    /// 仅在本地存储，不投递命令；报告的状态不变。
    pub fn set(&mut self, duration_ticks: u32) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::InvalidHandle)?;
        if duration_ticks == 0 {
            return Err(Error::ZeroDuration);
        }
        inner.shared.set_duration(duration_ticks);
        Ok(())
    }

    /// Configure the duration and the callback invoked upon expiry.
    /// 配置时长以及到期时调用的回调。
    pub fn set_with_callback<F>(&mut self, duration_ticks: u32, callback: F) -> Result<()>
    where
        F: Fn(TimerId) + Send + Sync + 'static,
    {
        self.set(duration_ticks)?;
        // set 已验证句柄有效
        // set has already validated the handle
        if let Some(inner) = self.inner.as_ref() {
            inner.shared.store_callback(Box::new(callback));
        }
        Ok(())
    }

    /// Arm the timer for one run of the configured duration.
    /// 以配置的时长武装定时器进行一次运行。
    ///
    /// Arming an already-running timer supersedes the previous run: its
    /// epoch becomes stale and it can no longer fire. When no duration was
    /// ever configured, the run is armed with the unset sentinel and sits
    /// in the wheel without ever reaching its deadline.
    /// 武装一个已在运行的定时器会取代上一次运行：其纪元变为过期，不再可能
    /// 触发。若从未配置过时长，则以哨兵值武装，该次运行停留在时间轮中，
    /// 永远不会到达截止滴答。
    pub fn run(&mut self) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::InvalidHandle)?;
        let duration = inner.shared.duration_raw();
        let epoch = inner.shared.bump_epoch();
        inner.shared.set_state(TimerState::Running);
        inner.post(epoch, CommandAction::Start { duration });
        trace!(id = inner.id, epoch, duration, "Timer armed");
        Ok(())
    }

    /// Cancel the current run. No-op unless the timer is running.
    /// 取消当前运行。仅在定时器运行中时有效，否则为空操作。
    ///
    /// After `stop` returns, the callback of the cancelled run can no longer
    /// be invoked, even if the backend already dispatched the expiry.
    /// `stop` 返回之后，被取消运行的回调不再可能被调用，即使后端已经派发了
    /// 到期事件。
    pub fn stop(&mut self) {
        let Some(inner) = self.inner.as_ref() else {
            return;
        };
        if inner.shared.state() != TimerState::Running {
            return;
        }

        let epoch = inner.shared.bump_epoch();
        inner.shared.set_state(TimerState::Stopped);
        inner.post(epoch, CommandAction::Stop);
        trace!(id = inner.id, epoch, "Timer stopped");
    }

    /// Release the handle early, posting `Destroy` now instead of at drop.
    /// 提前释放句柄，立即投递 `Destroy` 而不是等到丢弃时。
    pub fn release(&mut self) {
        if let Some(inner) = self.inner.take() {
            inner.post_destroy();
        }
    }

    /// Returns the unique timer identifier, or `None` once released.
    /// 返回唯一定时器标识符；释放后返回 `None`。
    pub fn id(&self) -> Option<TimerId> {
        self.inner.as_ref().map(|inner| inner.id)
    }

    /// Returns true until the handle is released.
    /// 在句柄被释放前返回 true。
    pub fn is_valid(&self) -> bool {
        self.inner.is_some()
    }

    /// Returns true if a duration has been configured.
    /// 若已配置时长则返回 true。
    pub fn is_set(&self) -> bool {
        self.duration().is_some()
    }

    /// Returns true if the timer is currently running, as seen by the
    /// frontend.
    /// 若定时器当前正在运行（以前端视角）则返回 true。
    pub fn is_running(&self) -> bool {
        self.frontend_state() == Some(TimerState::Running)
    }

    /// Returns true if the last run expired and was not superseded.
    /// 若上一次运行已到期且未被取代则返回 true。
    pub fn has_expired(&self) -> bool {
        self.frontend_state() == Some(TimerState::Expired)
    }

    /// The configured duration in ticks, if any.
    /// 已配置的时长（滴答数），如有。
    pub fn duration(&self) -> Option<u32> {
        let inner = self.inner.as_ref()?;
        match inner.shared.duration_raw() {
            UNSET_DURATION => None,
            ticks => Some(ticks),
        }
    }

    fn frontend_state(&self) -> Option<TimerState> {
        self.inner.as_ref().map(|inner| inner.shared.state())
    }
}

impl Drop for UniqueTimer {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for UniqueTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueTimer")
            .field("id", &self.id())
            .field("state", &self.frontend_state())
            .finish()
    }
}
