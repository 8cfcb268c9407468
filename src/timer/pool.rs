//! 定时器槽位池
//! Timer slot pool
//!
//! 只增不减的分块存储：每个块以固定容量一次性分配，永不重新分配，因此
//! 槽位索引在池增长时保持稳定，后端可以跨滴答持有索引。可复用的槽位通过
//! `free_next` 串成空闲链表；归还只发生在后端排空 `Destroy` 命令时。
//!
//! Grow-only chunked storage: each chunk is allocated once at a fixed
//! capacity and never reallocates, so slot indices stay stable while the
//! pool grows and the backend can hold indices across ticks. Reusable slots
//! are threaded into a free-list through `free_next`; slots are returned
//! only when the backend drains a `Destroy` command.

use std::sync::Arc;

use crate::executor::TaskExecutor;
use crate::timer::frontend::FrontendShared;
use crate::timer::{EpochId, Tick, TimerId, TimerState};

/// Stable index of a slot within the pool.
/// 槽位在池中的稳定索引。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SlotIdx(u32);

impl SlotIdx {
    fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Backend-owned storage record for one timer.
/// 后端拥有的单个定时器存储记录。
///
/// The `prev`/`next` links place the slot in exactly one wheel bucket while
/// running; `free_next` threads it into the free-list while vacant. An
/// absent executor marks the slot as unallocated.
///
/// `prev`/`next` 链接使槽位在运行时恰好位于一个时间轮桶中；`free_next`
/// 在空置时将其串入空闲链表。执行器为空表示槽位未被分配。
pub(crate) struct TimerSlot {
    pub id: TimerId,
    pub state: TimerState,
    pub epoch: EpochId,
    pub deadline: Tick,
    pub executor: Option<Arc<dyn TaskExecutor>>,
    pub frontend: Option<Arc<FrontendShared>>,
    pub prev: Option<SlotIdx>,
    pub next: Option<SlotIdx>,
    pub free_next: Option<SlotIdx>,
}

impl TimerSlot {
    fn vacant() -> Self {
        Self {
            id: 0,
            state: TimerState::Stopped,
            epoch: 0,
            deadline: 0,
            executor: None,
            frontend: None,
            prev: None,
            next: None,
            free_next: None,
        }
    }
}

/// Grow-only slot pool with a free-list of recyclable slots.
/// 带可回收槽位空闲链表的只增槽位池。
pub(crate) struct SlotArena {
    chunks: Vec<Vec<TimerSlot>>,
    chunk_capacity: usize,
    free_head: Option<SlotIdx>,
    free_len: usize,
}

impl SlotArena {
    /// Create a pool with `pre_reserve` slots already on the free-list.
    /// 创建一个池，`pre_reserve` 个槽位已位于空闲链表上。
    pub fn new(pre_reserve: usize, chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "chunk_capacity must be non-zero");
        let mut arena = Self {
            chunks: Vec::new(),
            chunk_capacity,
            free_head: None,
            free_len: 0,
        };
        for _ in 0..pre_reserve {
            let idx = arena.grow();
            arena.push_free(idx);
        }
        arena
    }

    /// Take a vacant slot, recycling from the free-list before growing.
    /// 取一个空置槽位，优先从空闲链表回收，否则增长池。
    pub fn alloc(&mut self) -> SlotIdx {
        match self.free_head {
            Some(idx) => {
                self.free_head = self.get_mut(idx).and_then(|slot| slot.free_next.take());
                self.free_len = self.free_len.saturating_sub(1);
                idx
            }
            None => self.grow(),
        }
    }

    /// Return a slot to the free-list, clearing every binding it held.
    /// 将槽位归还空闲链表，清除其持有的所有绑定。
    pub fn free(&mut self, idx: SlotIdx) {
        if let Some(slot) = self.get_mut(idx) {
            *slot = TimerSlot::vacant();
            self.push_free(idx);
        }
    }

    pub fn get(&self, idx: SlotIdx) -> Option<&TimerSlot> {
        self.chunks
            .get(idx.as_usize() / self.chunk_capacity)?
            .get(idx.as_usize() % self.chunk_capacity)
    }

    pub fn get_mut(&mut self, idx: SlotIdx) -> Option<&mut TimerSlot> {
        self.chunks
            .get_mut(idx.as_usize() / self.chunk_capacity)?
            .get_mut(idx.as_usize() % self.chunk_capacity)
    }

    /// Total slots ever created.
    /// 已创建槽位总数。
    pub fn len(&self) -> usize {
        match self.chunks.last() {
            Some(last) => (self.chunks.len() - 1) * self.chunk_capacity + last.len(),
            None => 0,
        }
    }

    /// Slots currently waiting on the free-list.
    /// 当前在空闲链表上等待的槽位数。
    pub fn free_len(&self) -> usize {
        self.free_len
    }

    fn grow(&mut self) -> SlotIdx {
        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() == self.chunk_capacity);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_capacity));
        }
        let chunk_index = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_index];
        chunk.push(TimerSlot::vacant());
        SlotIdx((chunk_index * self.chunk_capacity + chunk.len() - 1) as u32)
    }

    fn push_free(&mut self, idx: SlotIdx) {
        let head = self.free_head;
        if let Some(slot) = self.get_mut(idx) {
            slot.free_next = head;
            self.free_head = Some(idx);
            self.free_len += 1;
        }
    }
}
