//! 定时器子系统场景测试
//! Timer subsystem scenario tests
//!
//! 这些测试手动驱动 `tick_all`，因此完全确定：每个断言都发生在两个滴答
//! 之间的静止点上。
//!
//! These tests drive `tick_all` by hand and are therefore fully
//! deterministic: every assertion happens at a quiescent point between two
//! ticks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::TimerConfig;
use crate::error::Error;
use crate::executor::{InlineExecutor, TaskClosure, TaskExecutor};
use crate::timer::{TimerId, TimerManager};

/// 将派发的闭包暂存起来的执行器，模拟尚未运行到期闭包的目标上下文。
/// Executor that parks dispatched closures, modelling a target context that
/// has not run the expiry closure yet.
struct QueueExecutor {
    tasks: Mutex<VecDeque<TaskClosure>>,
}

impl QueueExecutor {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            tasks: Mutex::new(VecDeque::new()),
        })
    }

    fn run_all(&self) -> usize {
        let mut ran = 0;
        while let Some(task) = self.tasks.lock().unwrap().pop_front() {
            task();
            ran += 1;
        }
        ran
    }
}

impl TaskExecutor for QueueExecutor {
    fn execute(&self, task: TaskClosure) -> bool {
        self.tasks.lock().unwrap().push_back(task);
        true
    }
}

/// 拒绝所有派发的执行器。
/// Executor that rejects every dispatch.
struct RejectExecutor;

impl TaskExecutor for RejectExecutor {
    fn execute(&self, _task: TaskClosure) -> bool {
        false
    }
}

fn fire_counter() -> (Arc<AtomicU32>, impl Fn(TimerId) + Send + Sync + Clone + 'static) {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();
    let callback = move |_id: TimerId| {
        counter_clone.fetch_add(1, Ordering::Relaxed);
    };
    (counter, callback)
}

#[test]
fn test_basic_expiry_fires_exactly_once() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();
    let seen_id = Arc::new(Mutex::new(None));
    let seen_id_clone = seen_id.clone();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer
        .set_with_callback(3, move |id| {
            callback(id);
            *seen_id_clone.lock().unwrap() = Some(id);
        })
        .unwrap();
    timer.run().unwrap();
    assert!(timer.is_running());

    manager.tick_all();
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 0);

    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert!(timer.has_expired());
    assert!(!timer.is_running());
    assert_eq!(*seen_id.lock().unwrap(), timer.id());

    // 已到期的运行不会再次触发
    // An expired run never fires again
    for _ in 0..5 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}

#[test]
fn test_stop_before_expiry_suppresses_callback() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(5, callback).unwrap();
    timer.run().unwrap();

    manager.tick_all();
    manager.tick_all();
    timer.stop();
    assert!(!timer.is_running());

    for _ in 0..5 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 0);
    assert!(!timer.has_expired());
}

#[test]
fn test_rearm_supersedes_previous_run() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(10, callback).unwrap();
    timer.run().unwrap();

    for _ in 0..3 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 0);

    // 在游标 3 处以更短的时长重新武装；回调保持不变
    // Re-arm at cursor 3 with a shorter duration; the callback is kept
    timer.set(2).unwrap();
    timer.run().unwrap();

    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 0);
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert_eq!(manager.cursor(), 5);

    // 原先截止于游标 10 的运行已不复存在
    // The run originally due at cursor 10 no longer exists
    for _ in 0..10 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}

#[test]
fn test_stop_after_dispatch_suppresses_callback() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();
    let executor = QueueExecutor::new();

    let mut timer = service.create_timer(executor.clone());
    timer.set_with_callback(1, callback).unwrap();
    timer.run().unwrap();

    // 后端已派发到期闭包，但执行器尚未运行它
    // The backend dispatched the expiry closure but the executor has not
    // run it yet
    manager.tick_all();
    timer.stop();

    assert_eq!(executor.run_all(), 1);
    assert_eq!(fired.load(Ordering::Relaxed), 0);
    assert!(!timer.has_expired());
}

#[test]
fn test_destroy_while_running_recycles_slot() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(100, callback).unwrap();
    timer.run().unwrap();
    let first_id = timer.id().unwrap();
    drop(timer);

    manager.tick_all();
    let stats = manager.stats();
    assert_eq!(stats.destroyed_timers, 1);
    assert_eq!(stats.running_timers, 0);
    assert_eq!(stats.free_slots, stats.allocated_slots);

    for _ in 0..200 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 0);

    // 槽位可以复用，但新句柄观察到新的标识符
    // The slot may be reused, but a new handle observes a fresh identifier
    let replacement = service.create_timer(Arc::new(InlineExecutor));
    manager.tick_all();
    assert_ne!(replacement.id().unwrap(), first_id);
    assert_eq!(manager.stats().allocated_slots, stats.allocated_slots);
}

#[test]
fn test_arm_and_stop_in_same_tick_window_never_fires() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(1, callback).unwrap();
    timer.run().unwrap();
    timer.stop();

    for _ in 0..3 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 0);
    assert!(!timer.has_expired());
}

#[test]
fn test_deadline_is_exact_when_armed_mid_stream() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    for _ in 0..3 {
        manager.tick_all();
    }
    assert_eq!(manager.cursor(), 3);

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(4, callback).unwrap();
    timer.run().unwrap();

    // 在游标 3 处武装，时长 4：恰好在游标变为 7 的那个滴答触发
    // Armed at cursor 3 with duration 4: fires exactly on the tick where
    // the cursor becomes 7
    for expected_cursor in 4u64..7 {
        manager.tick_all();
        assert_eq!(manager.cursor(), expected_cursor);
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }
    manager.tick_all();
    assert_eq!(manager.cursor(), 7);
    assert_eq!(fired.load(Ordering::Relaxed), 1);
}

#[test]
fn test_deadline_beyond_wheel_size_waits_for_wrap() {
    let config = TimerConfig {
        wheel_slots: 8,
        ..TimerConfig::default()
    };
    let (mut manager, service) = TimerManager::new(config);
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(20, callback).unwrap();
    timer.run().unwrap();

    // 时间轮只有 8 个桶；截止滴答 20 需要两次环绕
    // The wheel has only 8 buckets; deadline 20 needs two wraps
    for _ in 0..19 {
        manager.tick_all();
    }
    assert_eq!(fired.load(Ordering::Relaxed), 0);

    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert!(timer.has_expired());
}

#[test]
fn test_expired_timer_can_be_rearmed() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(2, callback).unwrap();

    timer.run().unwrap();
    manager.tick_all();
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert!(timer.has_expired());

    timer.run().unwrap();
    assert!(timer.is_running());
    manager.tick_all();
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 2);
}

#[test]
fn test_zero_duration_is_rejected() {
    let (_manager, service) = TimerManager::new_default();
    let mut timer = service.create_timer(Arc::new(InlineExecutor));

    assert_eq!(timer.set(0), Err(Error::ZeroDuration));
    assert!(!timer.is_set());
}

#[test]
fn test_run_without_duration_arms_but_never_fires() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.run().unwrap();
    assert!(timer.is_running());
    assert!(!timer.is_set());

    // 哨兵时长的运行停留在时间轮中，但永远不会到期
    // A sentinel-duration run stays resident in the wheel but never expires
    for _ in 0..100 {
        manager.tick_all();
    }
    assert!(!timer.has_expired());
    assert!(timer.is_running());
    assert_eq!(manager.stats().running_timers, 1);
    assert_eq!(manager.stats().processed_expiries, 0);

    // 配置时长后重新武装会像任何重武装一样取代哨兵运行
    // Configuring a duration and re-arming supersedes the sentinel run
    // like any re-arm
    timer.set_with_callback(2, callback).unwrap();
    timer.run().unwrap();
    manager.tick_all();
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);
    assert!(timer.has_expired());
}

#[test]
fn test_released_handle_rejects_operations() {
    let (mut manager, service) = TimerManager::new_default();
    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set(5).unwrap();
    timer.release();

    assert!(!timer.is_valid());
    assert_eq!(timer.id(), None);
    assert_eq!(timer.duration(), None);
    assert_eq!(timer.set(3), Err(Error::InvalidHandle));
    assert_eq!(timer.run(), Err(Error::InvalidHandle));
    // stop 与再次 release 在已释放的句柄上都是空操作
    // stop and a second release are both no-ops on a released handle
    timer.stop();
    timer.release();

    manager.tick_all();
    assert_eq!(manager.stats().destroyed_timers, 1);
}

#[test]
fn test_stop_is_noop_unless_running() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(InlineExecutor));
    timer.set_with_callback(2, callback).unwrap();
    timer.stop();
    assert!(!timer.is_running());

    timer.run().unwrap();
    manager.tick_all();
    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 1);

    // 到期之后 stop 不会清除 expired 状态
    // stop after expiry does not clear the expired state
    timer.stop();
    assert!(timer.has_expired());
}

#[test]
fn test_rejected_dispatch_is_counted_and_dropped() {
    let (mut manager, service) = TimerManager::new_default();
    let (fired, callback) = fire_counter();

    let mut timer = service.create_timer(Arc::new(RejectExecutor));
    timer.set_with_callback(1, callback).unwrap();
    timer.run().unwrap();

    manager.tick_all();
    assert_eq!(fired.load(Ordering::Relaxed), 0);
    let stats = manager.stats();
    assert_eq!(stats.rejected_dispatches, 1);
    assert_eq!(stats.processed_expiries, 0);
}

#[test]
fn test_running_timer_gauge_tracks_wheel_residency() {
    let (mut manager, service) = TimerManager::new_default();
    let mut timers = Vec::new();
    for _ in 0..16 {
        let mut timer = service.create_timer(Arc::new(InlineExecutor));
        timer.set(50).unwrap();
        timer.run().unwrap();
        timers.push(timer);
    }

    manager.tick_all();
    assert_eq!(manager.stats().running_timers, 16);

    for timer in &mut timers {
        timer.stop();
    }
    manager.tick_all();
    assert_eq!(manager.stats().running_timers, 0);
}

#[test]
fn test_churn_fires_exactly_the_unstopped_timers() {
    // xorshift64，与仓库测试保持确定性
    // xorshift64, keeps the test deterministic
    let mut rng_state: u64 = 0x9E3779B97F4A7C15;
    let mut next_u64 = move || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        rng_state
    };

    let config = TimerConfig {
        wheel_slots: 16,
        pre_reserve_capacity: 0,
        ..TimerConfig::default()
    };
    let (mut manager, service) = TimerManager::new(config);

    const TIMERS: usize = 500;
    const HORIZON: u64 = 40;

    let fire_counts: Arc<Vec<AtomicU32>> =
        Arc::new((0..TIMERS).map(|_| AtomicU32::new(0)).collect());
    let mut timers = Vec::with_capacity(TIMERS);
    let mut durations = Vec::with_capacity(TIMERS);
    let mut stop_ticks = Vec::with_capacity(TIMERS);

    for i in 0..TIMERS {
        let duration = (next_u64() % 30 + 1) as u32;
        let stop_tick = if next_u64() % 2 == 0 {
            Some(next_u64() % HORIZON + 1)
        } else {
            None
        };
        durations.push(duration);
        stop_ticks.push(stop_tick);

        let counts = fire_counts.clone();
        let mut timer = service.create_timer(Arc::new(InlineExecutor));
        timer
            .set_with_callback(duration, move |_| {
                counts[i].fetch_add(1, Ordering::Relaxed);
            })
            .unwrap();
        timer.run().unwrap();
        timers.push(timer);
    }

    for tick in 1..=HORIZON {
        for (i, stop_tick) in stop_ticks.iter().enumerate() {
            if *stop_tick == Some(tick) {
                timers[i].stop();
            }
        }
        manager.tick_all();
    }

    for i in 0..TIMERS {
        let deadline = u64::from(durations[i]);
        let fired = fire_counts[i].load(Ordering::Relaxed);
        // 在截止滴答之前（含当滴答）发出的 stop 必须抑制触发
        // A stop issued on or before the deadline tick must suppress firing
        let expect_fire = match stop_ticks[i] {
            Some(stop_tick) => deadline < stop_tick,
            None => true,
        };
        assert_eq!(
            fired,
            u32::from(expect_fire),
            "timer {i} duration {deadline} stop {:?}",
            stop_ticks[i]
        );
    }

    let stats = manager.stats();
    assert_eq!(stats.running_timers, 0);
    assert_eq!(
        stats.processed_expiries,
        fire_counts
            .iter()
            .map(|c| u64::from(c.load(Ordering::Relaxed)))
            .sum::<u64>()
    );
}
