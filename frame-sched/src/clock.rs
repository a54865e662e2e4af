//! # Clock 模块
//!
//! 共享帧时钟：把宿主的逐帧回调包装成唯一的 tick 源。
//!
//! ## 核心设计
//!
//! - 所有动画生产者共享 **同一个** 每帧回调槽位，按注册顺序依次调用
//! - 时钟只在「正在运行且仍有订阅者」时向宿主请求下一帧
//! - 单个回调 panic 会被捕获并记录，不影响同一帧其余回调，也不影响后续帧
//! - 取消是同步且彻底的：取消后的订阅即使已经排进本帧的快照，也不会再被调用
//!
//! ```text
//! FrameHost ──request_frame()──► 宿主事件循环
//!     ▲                                │
//!     │                                ▼
//!     └──────── schedule_next ◄── FrameClock::tick(timestamp_ms)
//!                                      │
//!                          订阅者 1 → 订阅者 2 → …（注册顺序）
//! ```

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use tracing::{debug, error, trace, warn};

/// 宿主帧源接口
///
/// 浏览器中对应 `requestAnimationFrame`，游戏引擎中对应主循环的每帧回调。
/// 宿主收到请求后，应在下一次重绘时调用 [`FrameClock::tick`]。
pub trait FrameHost {
    /// 请求一次帧回调
    fn request_frame(&self);

    /// 撤销尚未触发的帧请求
    fn cancel_frame(&self) {}
}

/// 手动驱动的帧源
///
/// 只记录「是否有待处理的帧请求」，由调用方自行决定何时调用 `tick`。
/// 用于测试和无头模拟。
#[derive(Debug, Default)]
pub struct ManualFrameHost {
    requested: Cell<bool>,
    request_count: Cell<u64>,
}

impl ManualFrameHost {
    /// 创建新的手动帧源
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// 是否有待处理的帧请求
    pub fn is_requested(&self) -> bool {
        self.requested.get()
    }

    /// 消费帧请求，返回消费前是否存在请求
    pub fn take_request(&self) -> bool {
        self.requested.replace(false)
    }

    /// 累计收到的帧请求数
    pub fn request_count(&self) -> u64 {
        self.request_count.get()
    }
}

impl FrameHost for ManualFrameHost {
    fn request_frame(&self) {
        self.requested.set(true);
        self.request_count.set(self.request_count.get() + 1);
    }

    fn cancel_frame(&self) {
        self.requested.set(false);
    }
}

/// 一次帧回调
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    /// 宿主提供的单调时间戳（毫秒）
    pub timestamp_ms: f64,
    /// 距上一帧的实际间隔（毫秒），首帧为 0
    pub delta_ms: f64,
    /// 帧序号（从 0 开始）
    pub frame_index: u64,
}

/// 订阅 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// 获取内部 ID 值
    pub fn value(&self) -> u64 {
        self.0
    }
}

type TickCallback = Rc<RefCell<Box<dyn FnMut(&Tick)>>>;

struct Subscriber {
    id: SubscriptionId,
    cancelled: Rc<Cell<bool>>,
    /// 触发一次后自动注销
    one_shot: bool,
    callback: TickCallback,
}

struct ClockInner {
    host: Option<Rc<dyn FrameHost>>,
    subscribers: RefCell<Vec<Subscriber>>,
    next_id: Cell<u64>,
    running: Cell<bool>,
    frame_requested: Cell<bool>,
    ticking: Cell<bool>,
    frame_index: Cell<u64>,
    last_timestamp_ms: Cell<Option<f64>>,
    failed_callbacks: Cell<u64>,
}

impl ClockInner {
    fn remove(&self, id: SubscriptionId) {
        self.subscribers.borrow_mut().retain(|s| s.id != id);
    }
}

/// 订阅令牌
///
/// 由注册方独占持有。`cancel` 幂等；令牌被丢弃时 **不会** 自动取消订阅。
#[must_use = "丢弃令牌后将无法取消订阅"]
pub struct SubscriptionToken {
    id: SubscriptionId,
    cancelled: Rc<Cell<bool>>,
    clock: Weak<ClockInner>,
}

impl SubscriptionToken {
    /// 订阅 ID
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// 取消订阅（幂等）
    pub fn cancel(&self) {
        if self.cancelled.replace(true) {
            return;
        }
        if let Some(inner) = self.clock.upgrade() {
            inner.remove(self.id);
            trace!(subscription = self.id.0, "订阅已取消");
        }
    }

    /// 是否已取消（一次性订阅触发后也视为已取消）
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }
}

impl std::fmt::Debug for SubscriptionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionToken")
            .field("id", &self.id.0)
            .field("cancelled", &self.cancelled.get())
            .finish()
    }
}

/// 共享帧时钟
///
/// 句柄可廉价克隆，所有克隆指向同一个时钟。
#[derive(Clone)]
pub struct FrameClock {
    inner: Rc<ClockInner>,
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::manual()
    }
}

impl std::fmt::Debug for FrameClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameClock")
            .field("subscribers", &self.subscriber_count())
            .field("running", &self.is_running())
            .field("frame_index", &self.frame_index())
            .finish()
    }
}

impl FrameClock {
    /// 创建绑定到宿主帧源的时钟
    pub fn new(host: Rc<dyn FrameHost>) -> Self {
        Self::with_host(Some(host))
    }

    /// 创建不绑定宿主的时钟（完全由调用方调用 `tick` 驱动）
    pub fn manual() -> Self {
        Self::with_host(None)
    }

    fn with_host(host: Option<Rc<dyn FrameHost>>) -> Self {
        Self {
            inner: Rc::new(ClockInner {
                host,
                subscribers: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
                running: Cell::new(false),
                frame_requested: Cell::new(false),
                ticking: Cell::new(false),
                frame_index: Cell::new(0),
                last_timestamp_ms: Cell::new(None),
                failed_callbacks: Cell::new(0),
            }),
        }
    }

    // ========== 生命周期 ==========

    /// 开始向宿主请求帧，直到没有订阅者为止
    pub fn start(&self) {
        if self.inner.running.replace(true) {
            return;
        }
        debug!(subscribers = self.subscriber_count(), "帧时钟启动");
        self.schedule_next();
    }

    /// 停止请求帧（保留所有订阅）
    pub fn stop(&self) {
        if !self.inner.running.replace(false) {
            return;
        }
        if self.inner.frame_requested.replace(false)
            && let Some(host) = &self.inner.host
        {
            host.cancel_frame();
        }
        debug!("帧时钟停止");
    }

    /// 是否处于运行状态
    pub fn is_running(&self) -> bool {
        self.inner.running.get()
    }

    // ========== 订阅管理 ==========

    /// 注册每帧回调
    ///
    /// 在 tick 过程中注册的回调从下一帧开始生效。
    pub fn on_tick(&self, callback: impl FnMut(&Tick) + 'static) -> SubscriptionToken {
        self.register(Box::new(callback), false)
    }

    /// 注册只触发一次的回调
    ///
    /// 回调执行前订阅即被注销，因此回调内部再次注册的订阅会在下一帧触发。
    pub fn once(&self, callback: impl FnOnce(&Tick) + 'static) -> SubscriptionToken {
        let mut callback = Some(callback);
        self.register(
            Box::new(move |tick: &Tick| {
                if let Some(callback) = callback.take() {
                    callback(tick);
                }
            }),
            true,
        )
    }

    /// 取消订阅（等价于 `token.cancel()`）
    pub fn cancel(&self, token: &SubscriptionToken) {
        token.cancel();
    }

    fn register(&self, callback: Box<dyn FnMut(&Tick)>, one_shot: bool) -> SubscriptionToken {
        let id = SubscriptionId(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        let cancelled = Rc::new(Cell::new(false));
        self.inner.subscribers.borrow_mut().push(Subscriber {
            id,
            cancelled: cancelled.clone(),
            one_shot,
            callback: Rc::new(RefCell::new(callback)),
        });
        trace!(subscription = id.0, one_shot, "注册帧回调");

        // tick 结束时会统一调度，这里只处理空闲时钟
        if !self.inner.ticking.get() {
            self.schedule_next();
        }

        SubscriptionToken {
            id,
            cancelled,
            clock: Rc::downgrade(&self.inner),
        }
    }

    /// 当前订阅者数量
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.borrow().len()
    }

    // ========== 帧驱动 ==========

    /// 宿主帧回调入口
    ///
    /// 按注册顺序调用所有订阅者。回调内部再次调用 `tick` 会被忽略。
    pub fn tick(&self, timestamp_ms: f64) {
        let inner = &self.inner;

        if inner.ticking.get() {
            warn!(timestamp_ms, "忽略重入的 tick 调用");
            return;
        }
        if !timestamp_ms.is_finite() {
            warn!(timestamp_ms, "忽略非有限的帧时间戳");
            return;
        }

        inner.frame_requested.set(false);

        let delta_ms = match inner.last_timestamp_ms.get() {
            Some(prev) => (timestamp_ms - prev).max(0.0),
            None => 0.0,
        };
        inner.last_timestamp_ms.set(Some(timestamp_ms));

        let frame_index = inner.frame_index.get();
        inner.frame_index.set(frame_index + 1);

        let tick = Tick {
            timestamp_ms,
            delta_ms,
            frame_index,
        };

        // 快照：本帧注册的新订阅不参与本帧
        let snapshot: Vec<(SubscriptionId, Rc<Cell<bool>>, bool, TickCallback)> = inner
            .subscribers
            .borrow()
            .iter()
            .map(|s| (s.id, s.cancelled.clone(), s.one_shot, s.callback.clone()))
            .collect();

        inner.ticking.set(true);
        for (id, cancelled, one_shot, callback) in snapshot {
            // 已在本帧更早的回调里被取消
            if cancelled.get() {
                continue;
            }
            if one_shot {
                cancelled.set(true);
                inner.remove(id);
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| {
                match callback.try_borrow_mut() {
                    Ok(mut callback) => (callback)(&tick),
                    Err(_) => warn!(subscription = id.0, "帧回调仍在执行中，跳过"),
                }
            }));

            if let Err(payload) = result {
                inner.failed_callbacks.set(inner.failed_callbacks.get() + 1);
                error!(
                    subscription = id.0,
                    frame = frame_index,
                    message = %panic_message(&*payload),
                    "帧回调 panic，已隔离"
                );
            }
        }
        inner.ticking.set(false);

        self.schedule_next();
    }

    /// 按需向宿主请求下一帧
    fn schedule_next(&self) {
        let inner = &self.inner;
        if !inner.running.get() || inner.frame_requested.get() {
            return;
        }
        if inner.subscribers.borrow().is_empty() {
            trace!("没有订阅者，暂停请求帧");
            return;
        }
        if let Some(host) = &inner.host {
            inner.frame_requested.set(true);
            host.request_frame();
        }
    }

    // ========== 查询方法 ==========

    /// 已派发的帧数
    pub fn frame_index(&self) -> u64 {
        self.inner.frame_index.get()
    }

    /// 最近一帧的时间戳
    pub fn last_timestamp_ms(&self) -> Option<f64> {
        self.inner.last_timestamp_ms.get()
    }

    /// 累计被捕获的回调 panic 次数
    pub fn failed_callbacks(&self) -> u64 {
        self.inner.failed_callbacks.get()
    }

    /// 当前是否正在派发 tick
    pub fn is_ticking(&self) -> bool {
        self.inner.ticking.get()
    }
}

/// 基于帧计数的节流器
///
/// 仅作为尽力而为的优化手段：正确性始终以时间戳为准。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameThrottle {
    every_n: u64,
}

impl FrameThrottle {
    /// 每 `every_n` 帧放行一次（0 按 1 处理）
    pub fn new(every_n: u64) -> Self {
        Self {
            every_n: every_n.max(1),
        }
    }

    /// 本帧是否放行
    pub fn should_run(&self, tick: &Tick) -> bool {
        tick.frame_index.is_multiple_of(self.every_n)
    }
}

/// 从 panic 载荷中提取消息
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> (Rc<RefCell<Vec<u64>>>, impl Fn(u64) -> Box<dyn FnMut(&Tick)>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |tag: u64| -> Box<dyn FnMut(&Tick)> {
            let log = log_clone.clone();
            Box::new(move |_tick: &Tick| log.borrow_mut().push(tag))
        };
        (log, make)
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();

        let _a = clock.on_tick(make(1));
        let _b = clock.on_tick(make(2));
        let _c = clock.on_tick(make(3));

        clock.tick(0.0);
        clock.tick(16.0);
        assert_eq!(*log.borrow(), vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_delta_measurement() {
        let clock = FrameClock::manual();
        let deltas = Rc::new(RefCell::new(Vec::new()));
        let deltas_clone = deltas.clone();
        let _token = clock.on_tick(move |tick| deltas_clone.borrow_mut().push(tick.delta_ms));

        clock.tick(100.0);
        clock.tick(116.5);
        clock.tick(150.0);
        // 时间戳回退时间隔记为 0
        clock.tick(140.0);

        assert_eq!(*deltas.borrow(), vec![0.0, 16.5, 33.5, 0.0]);
        assert_eq!(clock.frame_index(), 4);
        assert_eq!(clock.last_timestamp_ms(), Some(140.0));
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();

        let token = clock.on_tick(make(1));
        clock.tick(0.0);
        token.cancel();
        token.cancel();
        clock.cancel(&token);

        for i in 1..10 {
            clock.tick(f64::from(i) * 16.0);
        }
        assert_eq!(*log.borrow(), vec![1]);
        assert!(token.is_cancelled());
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn test_cancel_during_tick_skips_later_subscriber() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();

        let victim: Rc<RefCell<Option<SubscriptionToken>>> = Rc::new(RefCell::new(None));
        let victim_clone = victim.clone();
        let _killer = clock.on_tick(move |_| {
            if let Some(token) = victim_clone.borrow().as_ref() {
                token.cancel();
            }
        });
        *victim.borrow_mut() = Some(clock.on_tick(make(2)));

        clock.tick(0.0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn test_subscription_added_during_tick_runs_next_frame() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();

        let clock_clone = clock.clone();
        let pending = Rc::new(RefCell::new(Some(make(7))));
        let tokens: Rc<RefCell<Vec<SubscriptionToken>>> = Rc::new(RefCell::new(Vec::new()));
        let tokens_clone = tokens.clone();
        let _adder = clock.on_tick(move |_| {
            if let Some(callback) = pending.borrow_mut().take() {
                tokens_clone.borrow_mut().push(clock_clone.on_tick(callback));
            }
        });

        clock.tick(0.0);
        assert!(log.borrow().is_empty());
        clock.tick(16.0);
        assert_eq!(*log.borrow(), vec![7]);
    }

    #[test]
    fn test_once_fires_a_single_time() {
        let clock = FrameClock::manual();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let token = clock.once(move |_| count_clone.set(count_clone.get() + 1));

        clock.tick(0.0);
        clock.tick(16.0);
        assert_eq!(count.get(), 1);
        assert!(token.is_cancelled());
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn test_panicking_callback_is_isolated() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();

        let _a = clock.on_tick(make(1));
        let _bad = clock.on_tick(|_| panic!("boom"));
        let _c = clock.on_tick(make(3));

        clock.tick(0.0);
        clock.tick(16.0);

        assert_eq!(*log.borrow(), vec![1, 3, 1, 3]);
        assert_eq!(clock.failed_callbacks(), 2);
        // panic 的订阅仍然保留
        assert_eq!(clock.subscriber_count(), 3);
    }

    #[test]
    fn test_reentrant_tick_is_ignored() {
        let clock = FrameClock::manual();
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let clock_clone = clock.clone();
        let _token = clock.on_tick(move |tick| {
            count_clone.set(count_clone.get() + 1);
            clock_clone.tick(tick.timestamp_ms + 1.0);
        });

        clock.tick(0.0);
        assert_eq!(count.get(), 1);
        assert_eq!(clock.frame_index(), 1);
    }

    #[test]
    fn test_host_requests_follow_subscribers() {
        let host = ManualFrameHost::new();
        let clock = FrameClock::new(host.clone());

        // 未启动时不请求帧
        let token = clock.on_tick(|_| {});
        assert!(!host.is_requested());

        clock.start();
        assert!(host.take_request());

        clock.tick(0.0);
        assert!(host.take_request());

        // 没有订阅者后停止请求
        token.cancel();
        clock.tick(16.0);
        assert!(!host.is_requested());

        // 新订阅重新唤醒空闲时钟
        let _again = clock.on_tick(|_| {});
        assert!(host.is_requested());

        clock.stop();
        assert!(!host.is_requested());
        assert!(!clock.is_running());
    }

    #[test]
    fn test_non_finite_timestamp_is_ignored() {
        let clock = FrameClock::manual();
        let (log, make) = recorder();
        let _token = clock.on_tick(make(1));

        clock.tick(f64::NAN);
        assert!(log.borrow().is_empty());
        assert_eq!(clock.frame_index(), 0);
    }

    #[test]
    fn test_frame_throttle() {
        let throttle = FrameThrottle::new(3);
        let passed: Vec<u64> = (0..7)
            .filter(|i| {
                throttle.should_run(&Tick {
                    timestamp_ms: 0.0,
                    delta_ms: 0.0,
                    frame_index: *i,
                })
            })
            .collect();
        assert_eq!(passed, vec![0, 3, 6]);
        assert_eq!(FrameThrottle::new(0), FrameThrottle::new(1));
    }
}
