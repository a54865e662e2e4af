//! # Coalescer 模块
//!
//! 每个生产者独占的背压原语：在下一帧到来之前收到的 N 次请求，
//! 只折叠成 **一次** 调度，处理函数只拿到最后一次的载荷。
//!
//! 滚动、鼠标移动等事件在一个帧间隔内可能触发上百次，
//! 如果不折叠，每次事件都会排入一次布局读取/写入。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::Serialize;
use tracing::trace;

use crate::clock::{FrameClock, SubscriptionToken, Tick};

/// 折叠统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoalescerStats {
    /// 收到的请求总数
    pub requests: u64,
    /// 实际派发给处理函数的次数
    pub dispatched: u64,
    /// 被后续请求覆盖、从未派发的载荷数
    pub superseded: u64,
}

struct CoalescerInner<P> {
    clock: FrameClock,
    payload: RefCell<Option<P>>,
    /// 存在即表示有待处理的帧订阅
    pending: RefCell<Option<SubscriptionToken>>,
    handler: RefCell<Box<dyn FnMut(P, &Tick)>>,
    disposed: Cell<bool>,
    stats: Cell<CoalescerStats>,
}

impl<P> CoalescerInner<P> {
    fn bump(&self, f: impl FnOnce(&mut CoalescerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn cancel_pending(&self) {
        if let Some(token) = self.pending.borrow_mut().take() {
            token.cancel();
        }
        if self.payload.borrow_mut().take().is_some() {
            self.bump(|s| s.superseded += 1);
        }
    }
}

/// 请求折叠器
///
/// 由单个生产者独占持有；克隆句柄共享同一份状态。
pub struct Coalescer<P: 'static> {
    inner: Rc<CoalescerInner<P>>,
}

impl<P: 'static> Clone for Coalescer<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<P: 'static> std::fmt::Debug for Coalescer<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coalescer")
            .field("pending", &self.is_pending())
            .field("disposed", &self.is_disposed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<P: 'static> Coalescer<P> {
    /// 创建折叠器
    ///
    /// `handler` 在调度到的那一帧以最新载荷调用一次。
    pub fn new(clock: &FrameClock, handler: impl FnMut(P, &Tick) + 'static) -> Self {
        Self {
            inner: Rc::new(CoalescerInner {
                clock: clock.clone(),
                payload: RefCell::new(None),
                pending: RefCell::new(None),
                handler: RefCell::new(Box::new(handler)),
                disposed: Cell::new(false),
                stats: Cell::new(CoalescerStats::default()),
            }),
        }
    }

    /// 提交请求
    ///
    /// - 没有待处理调度：注册一次帧订阅并保存载荷
    /// - 已有待处理调度：只覆盖载荷
    pub fn request(&self, payload: P) {
        let inner = &self.inner;
        if inner.disposed.get() {
            trace!("折叠器已销毁，忽略请求");
            return;
        }

        inner.bump(|s| s.requests += 1);
        if inner.payload.borrow_mut().replace(payload).is_some() {
            inner.bump(|s| s.superseded += 1);
        }

        if inner.pending.borrow().is_some() {
            return;
        }

        let weak: Weak<CoalescerInner<P>> = Rc::downgrade(inner);
        let token = inner.clock.once(move |tick| {
            if let Some(inner) = weak.upgrade() {
                Self::dispatch(&inner, tick);
            }
        });
        *inner.pending.borrow_mut() = Some(token);
    }

    fn dispatch(inner: &Rc<CoalescerInner<P>>, tick: &Tick) {
        // 先清除待处理标记，处理函数内部的 request 会排到下一帧
        inner.pending.borrow_mut().take();
        let Some(payload) = inner.payload.borrow_mut().take() else {
            return;
        };
        if inner.disposed.get() {
            return;
        }

        inner.bump(|s| s.dispatched += 1);
        let mut handler = inner.handler.borrow_mut();
        (handler)(payload, tick);
    }

    /// 丢弃待处理的请求，不调用处理函数
    pub fn cancel(&self) {
        self.inner.cancel_pending();
    }

    /// 取消并永久停用；之后的 `request` 都是空操作
    pub fn dispose(&self) {
        if self.inner.disposed.replace(true) {
            return;
        }
        self.inner.cancel_pending();
    }

    /// 是否有待处理的调度
    pub fn is_pending(&self) -> bool {
        self.inner.pending.borrow().is_some()
    }

    /// 是否已销毁
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.get()
    }

    /// 折叠统计
    pub fn stats(&self) -> CoalescerStats {
        self.inner.stats.get()
    }
}
