//! 定时器后端引擎
//! Timer backend engine
//!
//! 后端拥有槽位池、时间轮与标识符绑定表，并且只能从单一上下文驱动。每个
//! 逻辑滴答执行一次固定序列：交换命令缓冲区、按序应用命令、推进游标、
//! 排空游标所在的桶并通过执行器派发到期事件。后端内部的所有失败（过期
//! 命令、未知标识符、缺失执行器、被拒绝的派发）都是非致命的：计数、记录、
//! 然后继续。
//!
//! The backend owns the slot pool, the timing wheel and the identifier
//! binding table, and must be driven from a single context. Every logical
//! tick runs one fixed sequence: swap the command buffers, apply commands in
//! order, advance the cursor, drain the cursor's bucket and dispatch
//! expiries through the executors. Every failure inside the backend (stale
//! command, unknown identifier, missing executor, rejected dispatch) is
//! non-fatal: counted, logged, moved past.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::interval;
use tracing::{debug, info, trace};

use crate::config::TimerConfig;
use crate::executor::TaskExecutor;
use crate::timer::command::{CommandAction, CommandQueue, TimerCommand};
use crate::timer::frontend::{FrontendShared, TimerService};
use crate::timer::pool::{SlotArena, SlotIdx};
use crate::timer::wheel::TimingWheel;
use crate::timer::{EpochId, Tick, TimerId, TimerState};

/// Counters and gauges describing the backend's state.
/// 描述后端状态的计数器与度量值。
#[derive(Debug, Clone, Default)]
pub struct TimerManagerStats {
    /// Pool slots ever created.
    /// 已创建的池槽位总数。
    pub allocated_slots: usize,
    /// Pool slots currently on the free-list.
    /// 当前位于空闲链表上的池槽位数。
    pub free_slots: usize,
    /// Timers currently resident in the wheel.
    /// 当前驻留在时间轮中的定时器数。
    pub running_timers: usize,
    /// Current absolute tick.
    /// 当前绝对滴答。
    pub cursor: Tick,
    /// Expiries successfully handed to an executor.
    /// 成功交给执行器的到期事件数。
    pub processed_expiries: u64,
    /// Commands dropped because they were superseded or unbound.
    /// 因被取代或未绑定而丢弃的命令数。
    pub stale_commands: u64,
    /// Expiries dropped because no executor accepted them.
    /// 因没有执行器接受而丢弃的到期事件数。
    pub rejected_dispatches: u64,
    /// Timers destroyed and returned to the free-list.
    /// 已销毁并归还空闲链表的定时器数。
    pub destroyed_timers: u64,
}

impl fmt::Display for TimerManagerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "TimerManagerStats {{ slots: {}/{} free, running: {}, cursor: {}, expired: {}, stale: {}, rejected: {}, destroyed: {} }}",
            self.free_slots,
            self.allocated_slots,
            self.running_timers,
            self.cursor,
            self.processed_expiries,
            self.stale_commands,
            self.rejected_dispatches,
            self.destroyed_timers
        )
    }
}

/// The backend engine of the timer service.
/// 定时器服务的后端引擎。
pub struct TimerManager {
    arena: SlotArena,
    wheel: TimingWheel,
    /// Identifier-to-slot bindings; severed by `Destroy`, so a command whose
    /// id is absent here belongs to a released timer.
    /// 标识符到槽位的绑定表；由 `Destroy` 解除，因此标识符不在表中的命令
    /// 属于已释放的定时器。
    bindings: HashMap<TimerId, SlotIdx>,
    queue: Arc<CommandQueue>,
    /// Backend-private half of the double-buffered mailbox.
    /// 双缓冲邮箱中后端私有的一半。
    draining: Vec<TimerCommand>,
    /// Reused per-tick buffer of due slots.
    /// 每滴答复用的到期槽位缓冲区。
    due: Vec<SlotIdx>,
    cursor: Tick,
    stats: TimerManagerStats,
}

impl TimerManager {
    /// Create a backend and the frontend service feeding it.
    /// 创建后端以及向其投递命令的前端服务。
    pub fn new(config: TimerConfig) -> (Self, TimerService) {
        let queue = Arc::new(CommandQueue::new(config.command_buffer_capacity));
        let manager = Self {
            arena: SlotArena::new(config.pre_reserve_capacity, config.chunk_capacity),
            wheel: TimingWheel::new(config.wheel_slots),
            bindings: HashMap::new(),
            queue: queue.clone(),
            draining: Vec::with_capacity(config.command_buffer_capacity),
            due: Vec::new(),
            cursor: 0,
            stats: TimerManagerStats::default(),
        };
        (manager, TimerService::new(queue))
    }

    /// Create a backend with the default configuration.
    /// 以默认配置创建后端。
    pub fn new_default() -> (Self, TimerService) {
        Self::new(TimerConfig::default())
    }

    /// Advance one logical tick and fire every timer that just expired.
    /// 推进一个逻辑滴答，并触发所有恰好到期的定时器。
    ///
    /// Must only ever be called from one context, and never re-entrantly
    /// from inside a dispatched callback.
    /// 只能从单一上下文调用，且绝不能从已派发的回调内部重入。
    pub fn tick_all(&mut self) {
        self.queue.swap_into(&mut self.draining);
        let mut commands = std::mem::take(&mut self.draining);
        for command in commands.drain(..) {
            self.apply_command(command);
        }
        self.draining = commands;

        self.cursor += 1;
        self.expire_due();
    }

    /// Current absolute tick.
    /// 当前绝对滴答。
    pub fn cursor(&self) -> Tick {
        self.cursor
    }

    /// Snapshot of the backend counters.
    /// 后端计数器的快照。
    pub fn stats(&self) -> TimerManagerStats {
        let mut stats = self.stats.clone();
        stats.allocated_slots = self.arena.len();
        stats.free_slots = self.arena.free_len();
        stats.running_timers = self.wheel.len();
        stats.cursor = self.cursor;
        stats
    }

    /// Drive the backend from a tokio interval until `shutdown_rx` fires.
    /// 通过 tokio 间隔驱动后端，直到 `shutdown_rx` 触发。
    ///
    /// One interval period is one logical tick. Hosts with their own tick
    /// source call [`tick_all`](Self::tick_all) directly instead.
    /// 一个间隔周期即一个逻辑滴答。拥有自己滴答源的宿主应直接调用
    /// [`tick_all`](Self::tick_all)。
    pub async fn run(mut self, tick_period: Duration, mut shutdown_rx: oneshot::Receiver<()>) {
        info!(period_ms = tick_period.as_millis() as u64, "Timer backend started");
        let mut ticker = interval(tick_period);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick_all(),
                _ = &mut shutdown_rx => break,
            }
        }

        info!(stats = %self.stats(), "Timer backend stopped");
    }

    fn apply_command(&mut self, command: TimerCommand) {
        let TimerCommand { id, epoch, action } = command;
        match action {
            CommandAction::Create { frontend, executor } => {
                self.bind_timer(id, frontend, executor);
            }
            CommandAction::Start { duration } => self.start_timer(id, epoch, duration),
            CommandAction::Stop => self.stop_timer(id, epoch),
            CommandAction::Destroy => self.destroy_timer(id, epoch),
        }
    }

    fn bind_timer(
        &mut self,
        id: TimerId,
        frontend: Arc<FrontendShared>,
        executor: Arc<dyn TaskExecutor>,
    ) {
        let idx = self.arena.alloc();
        if let Some(slot) = self.arena.get_mut(idx) {
            slot.id = id;
            slot.state = TimerState::Stopped;
            slot.epoch = 0;
            slot.deadline = 0;
            slot.frontend = Some(frontend);
            slot.executor = Some(executor);
        }
        self.bindings.insert(id, idx);
        trace!(id, "Timer bound to pool slot");
    }

    fn start_timer(&mut self, id: TimerId, epoch: EpochId, duration: u32) {
        let Some(idx) = self.resolve(id, epoch) else {
            return;
        };
        // 重新武装会取代仍驻留在时间轮中的上一次运行
        // Re-arming supersedes a previous run still resident in the wheel
        if self.slot_state(idx) == Some(TimerState::Running) {
            self.wheel.remove(&mut self.arena, idx);
        }

        let deadline = self.cursor + Tick::from(duration);
        if let Some(slot) = self.arena.get_mut(idx) {
            slot.deadline = deadline;
            slot.state = TimerState::Running;
        }
        self.wheel.insert(&mut self.arena, idx);
        trace!(id, epoch, deadline, "Timer armed in wheel");
    }

    fn stop_timer(&mut self, id: TimerId, epoch: EpochId) {
        let Some(idx) = self.resolve(id, epoch) else {
            return;
        };
        if self.slot_state(idx) == Some(TimerState::Running) {
            self.wheel.remove(&mut self.arena, idx);
        }
        if let Some(slot) = self.arena.get_mut(idx) {
            slot.state = TimerState::Stopped;
        }
        trace!(id, epoch, "Timer removed from wheel");
    }

    fn destroy_timer(&mut self, id: TimerId, epoch: EpochId) {
        let Some(idx) = self.resolve(id, epoch) else {
            return;
        };
        if self.slot_state(idx) == Some(TimerState::Running) {
            self.wheel.remove(&mut self.arena, idx);
        }
        self.bindings.remove(&id);
        self.arena.free(idx);
        self.stats.destroyed_timers += 1;
        trace!(id, "Timer slot returned to free-list");
    }

    /// Resolve a command target, applying the epoch filter of the
    /// frontend/backend protocol.
    /// 解析命令目标，并应用前端/后端协议的纪元过滤。
    fn resolve(&mut self, id: TimerId, epoch: EpochId) -> Option<SlotIdx> {
        let Some(&idx) = self.bindings.get(&id) else {
            self.stats.stale_commands += 1;
            trace!(id, "Command for unbound timer dropped");
            return None;
        };
        let slot = self.arena.get_mut(idx)?;
        if epoch < slot.epoch {
            self.stats.stale_commands += 1;
            trace!(id, epoch, "Superseded command dropped");
            return None;
        }
        slot.epoch = epoch;
        Some(idx)
    }

    fn expire_due(&mut self) {
        let mut due = std::mem::take(&mut self.due);
        due.clear();
        self.wheel.drain_expired(&mut self.arena, self.cursor, &mut due);

        for idx in due.iter().copied() {
            self.dispatch_expiry(idx);
        }
        self.due = due;
    }

    fn dispatch_expiry(&mut self, idx: SlotIdx) {
        let (id, dispatched_epoch, frontend, executor) = {
            let Some(slot) = self.arena.get_mut(idx) else {
                return;
            };
            slot.state = TimerState::Expired;
            (
                slot.id,
                slot.epoch,
                slot.frontend.clone(),
                slot.executor.clone(),
            )
        };
        let (Some(frontend), Some(executor)) = (frontend, executor) else {
            self.stats.rejected_dispatches += 1;
            debug!(id, "Expired timer has no dispatch target");
            return;
        };

        // 闭包只携带前端记录的引用；槽位本身绝不逃出后端。
        // The closure carries only a reference to the frontend record; the
        // slot itself never escapes the backend.
        let task = Box::new(move || frontend.complete_expiry(dispatched_epoch, id));
        if executor.execute(task) {
            self.stats.processed_expiries += 1;
            trace!(id, cursor = self.cursor, "Expiry dispatched");
        } else {
            self.stats.rejected_dispatches += 1;
            debug!(id, "Expiry dispatch rejected by executor");
        }
    }

    fn slot_state(&self, idx: SlotIdx) -> Option<TimerState> {
        self.arena.get(idx).map(|slot| slot.state)
    }
}
