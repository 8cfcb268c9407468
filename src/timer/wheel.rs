//! 时间轮数据结构实现
//! Timing wheel data structure implementation
//!
//! 固定大小的桶环，按 `deadline mod W` 索引；桶内冲突通过槽位自身的
//! `prev`/`next` 索引链接解析，插入与摘除都是 O(1)。时间轮本身不存储
//! 任何槽位数据，所有链接都位于槽位池中，因此每个操作都显式借用池。
//!
//! Fixed-size ring of buckets indexed by `deadline mod W`; collisions inside
//! a bucket are resolved through the slots' own `prev`/`next` index links,
//! so insertion and removal are O(1). The wheel stores no slot data itself;
//! all links live in the slot pool, so every operation borrows the pool
//! explicitly.

use crate::timer::pool::{SlotArena, SlotIdx};
use crate::timer::Tick;

#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    head: Option<SlotIdx>,
    tail: Option<SlotIdx>,
}

/// Single-level hashed timing wheel.
/// 单层散列时间轮。
///
/// Deadlines beyond `W - 1` ticks are supported by keeping the full absolute
/// deadline on the slot: when the cursor lands on a bucket, slots whose
/// deadline has not been reached yet are re-appended for a future wrap
/// instead of fired.
///
/// 超过 `W - 1` 个滴答的截止时间通过在槽位上保存完整的绝对截止滴答来支持：
/// 当游标落在某个桶上时，尚未到达截止时间的槽位会被重新追加以等待未来的
/// 环绕，而不是被触发。
pub(crate) struct TimingWheel {
    buckets: Vec<Bucket>,
    bucket_mask: usize,
    resident: usize,
}

impl TimingWheel {
    /// Create a wheel with `slot_count` buckets.
    /// 创建一个拥有 `slot_count` 个桶的时间轮。
    pub fn new(slot_count: usize) -> Self {
        // 确保桶数量是2的幂
        // Ensure bucket count is power of 2
        assert!(
            slot_count.is_power_of_two(),
            "wheel slot count must be a power of 2"
        );
        Self {
            buckets: vec![Bucket::default(); slot_count],
            bucket_mask: slot_count - 1,
            resident: 0,
        }
    }

    /// Number of timers currently resident in the wheel.
    /// 当前驻留在时间轮中的定时器数量。
    pub fn len(&self) -> usize {
        self.resident
    }

    /// Append the slot to the tail of the bucket its deadline maps to.
    /// 将槽位追加到其截止滴答所映射桶的尾部。
    ///
    /// The slot must not already be linked into any bucket.
    /// 该槽位此时不得已链接在任何桶中。
    pub fn insert(&mut self, arena: &mut SlotArena, idx: SlotIdx) {
        let Some(deadline) = arena.get(idx).map(|slot| slot.deadline) else {
            return;
        };
        let bucket_index = self.bucket_of(deadline);
        let old_tail = self.buckets[bucket_index].tail;

        if let Some(slot) = arena.get_mut(idx) {
            slot.prev = old_tail;
            slot.next = None;
        }
        match old_tail {
            Some(tail_idx) => {
                if let Some(tail_slot) = arena.get_mut(tail_idx) {
                    tail_slot.next = Some(idx);
                }
            }
            None => self.buckets[bucket_index].head = Some(idx),
        }
        self.buckets[bucket_index].tail = Some(idx);
        self.resident += 1;
    }

    /// Unlink the slot from its bucket in O(1).
    /// 以 O(1) 将槽位从其桶中摘除。
    pub fn remove(&mut self, arena: &mut SlotArena, idx: SlotIdx) {
        let Some((prev, next, deadline)) = arena
            .get_mut(idx)
            .map(|slot| (slot.prev.take(), slot.next.take(), slot.deadline))
        else {
            return;
        };
        let bucket_index = self.bucket_of(deadline);

        match prev {
            Some(prev_idx) => {
                if let Some(prev_slot) = arena.get_mut(prev_idx) {
                    prev_slot.next = next;
                }
            }
            None => self.buckets[bucket_index].head = next,
        }
        match next {
            Some(next_idx) => {
                if let Some(next_slot) = arena.get_mut(next_idx) {
                    next_slot.prev = prev;
                }
            }
            None => self.buckets[bucket_index].tail = prev,
        }
        self.resident -= 1;
    }

    /// Walk the bucket the cursor landed on, collecting due slots in bucket
    /// order and re-appending the rest for a future wrap.
    /// 遍历游标落在的桶，按桶内顺序收集到期槽位，并重新追加其余槽位以等待
    /// 未来的环绕。
    pub fn drain_expired(&mut self, arena: &mut SlotArena, cursor: Tick, due: &mut Vec<SlotIdx>) {
        let bucket_index = self.bucket_of(cursor);
        let mut walker = self.buckets[bucket_index].head.take();
        self.buckets[bucket_index].tail = None;

        while let Some(idx) = walker {
            let Some((next, deadline)) = arena.get_mut(idx).map(|slot| {
                slot.prev = None;
                (slot.next.take(), slot.deadline)
            }) else {
                break;
            };
            walker = next;
            self.resident -= 1;

            if deadline <= cursor {
                due.push(idx);
            } else {
                self.insert(arena, idx);
            }
        }
    }

    fn bucket_of(&self, deadline: Tick) -> usize {
        (deadline as usize) & self.bucket_mask
    }
}
