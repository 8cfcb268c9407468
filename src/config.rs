//! 定义了定时器服务的可配置参数。
//! Defines configurable parameters for the timer service.

/// A structure containing all configurable parameters for the timer service.
///
/// 包含定时器服务所有可配置参数的结构体。
#[derive(Debug, Clone)]
pub struct TimerConfig {
    /// The number of buckets in the timing wheel. Must be a power of two so
    /// bucket selection can be a mask instead of a modulo.
    /// 时间轮的桶数量。必须是2的幂，这样桶的选择可以用掩码代替取模运算。
    pub wheel_slots: usize,

    /// The number of timer slots to pre-allocate on the free-list. Avoids
    /// pool growth latency on the first timers created by the host stack.
    /// 预分配到空闲链表的定时器槽位数量。避免宿主协议栈创建首批定时器时的
    /// 池增长延迟。
    pub pre_reserve_capacity: usize,

    /// The number of slots each pool chunk holds. Chunks never reallocate,
    /// which keeps slot indices stable while the pool grows.
    /// 每个池块容纳的槽位数量。块从不重新分配，这使槽位索引在池增长时保持稳定。
    pub chunk_capacity: usize,

    /// Initial capacity of the command mailbox buffers. The mailbox still
    /// grows past this when a burst of commands lands between two ticks.
    /// 命令邮箱缓冲区的初始容量。当两个滴答之间出现命令突发时，邮箱仍会超出
    /// 此容量增长。
    pub command_buffer_capacity: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            wheel_slots: 1024,
            pre_reserve_capacity: 64,
            chunk_capacity: 256,
            command_buffer_capacity: 1024,
        }
    }
}
