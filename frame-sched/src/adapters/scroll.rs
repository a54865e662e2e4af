//! # Scroll 模块
//!
//! 平滑滚动：滚动事件折叠为目标位置，
//! 当前位置按与帧率无关的指数平滑追随目标，直到稳定。
//! `scroll_to` 则改用补间驱动。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{Teardown, ValueSink};
use crate::animation::{Animator, Easing, Tween, TweenHandle};
use crate::clock::{FrameClock, SubscriptionToken, Tick};
use crate::coalescer::Coalescer;
use crate::error::{SchedResult, ensure_non_negative, ensure_positive};
use crate::events::{EventHub, EventKind, HostEvent};

/// 平滑参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollSmootherOptions {
    /// 时间常数（毫秒），0 表示直接跳到目标
    pub smoothing_ms: f64,
    /// 与目标的距离小于此值时视为稳定（像素）
    pub settle_epsilon: f64,
}

impl Default for ScrollSmootherOptions {
    fn default() -> Self {
        Self {
            smoothing_ms: 120.0,
            settle_epsilon: 0.5,
        }
    }
}

impl ScrollSmootherOptions {
    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        ensure_non_negative("smoothing_ms", self.smoothing_ms)?;
        ensure_positive("settle_epsilon", self.settle_epsilon)?;
        Ok(())
    }

    /// 经过 `dt_ms` 后向目标靠近的比例
    pub fn alpha(&self, dt_ms: f64) -> f64 {
        if self.smoothing_ms <= 0.0 {
            return 1.0;
        }
        1.0 - (-dt_ms.max(0.0) / self.smoothing_ms).exp()
    }
}

struct SmootherInner {
    clock: FrameClock,
    animator: Animator,
    options: ScrollSmootherOptions,
    current: Cell<f64>,
    target: Cell<f64>,
    last_timestamp_ms: Cell<Option<f64>>,
    follower: RefCell<Option<SubscriptionToken>>,
    tween: RefCell<Option<TweenHandle>>,
    sink: RefCell<ValueSink>,
    teardown: Teardown,
}

impl SmootherInner {
    fn write(&self, value: f64) {
        if self.teardown.is_done() {
            return;
        }
        self.current.set(value);
        if let Ok(mut sink) = self.sink.try_borrow_mut() {
            (sink)(value);
        }
    }

    /// 合并后的滚动目标（每帧最多一次）
    fn retarget(self: &Rc<Self>, target: f64, tick: &Tick) {
        // 手动滚动打断程序化滚动
        self.cancel_tween();
        self.target.set(target);
        if self.follower.borrow().is_some() {
            return;
        }

        self.last_timestamp_ms.set(Some(tick.timestamp_ms));
        let weak: Weak<Self> = Rc::downgrade(self);
        let token = self.clock.on_tick(move |tick| {
            if let Some(inner) = weak.upgrade() {
                inner.follow(tick);
            }
        });
        *self.follower.borrow_mut() = Some(token);
        trace!(target, "开始追随滚动目标");
    }

    fn follow(&self, tick: &Tick) {
        let dt = match self.last_timestamp_ms.replace(Some(tick.timestamp_ms)) {
            Some(prev) => tick.timestamp_ms - prev,
            None => 0.0,
        };
        let target = self.target.get();
        let mut current = self.current.get();
        current += (target - current) * self.options.alpha(dt);

        if (target - current).abs() <= self.options.settle_epsilon {
            current = target;
            self.stop_follower();
            trace!(target, "滚动已稳定");
        }
        self.write(current);
    }

    fn stop_follower(&self) {
        if let Some(token) = self.follower.borrow_mut().take() {
            token.cancel();
        }
        self.last_timestamp_ms.set(None);
    }

    fn cancel_tween(&self) {
        if let Some(handle) = self.tween.borrow_mut().take() {
            handle.cancel();
        }
    }
}

/// 平滑滚动适配器
pub struct ScrollSmoother {
    inner: Rc<SmootherInner>,
    coalescer: Coalescer<f64>,
}

impl std::fmt::Debug for ScrollSmoother {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollSmoother")
            .field("current", &self.current())
            .field("target", &self.target())
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl ScrollSmoother {
    /// 挂接到滚动事件
    pub fn new(
        clock: &FrameClock,
        hub: &EventHub,
        options: ScrollSmootherOptions,
        initial: f64,
        sink: impl FnMut(f64) + 'static,
    ) -> SchedResult<Self> {
        options.validate()?;
        let animator = Animator::new(clock);
        let inner = Rc::new(SmootherInner {
            clock: clock.clone(),
            animator: animator.clone(),
            options,
            current: Cell::new(initial),
            target: Cell::new(initial),
            last_timestamp_ms: Cell::new(None),
            follower: RefCell::new(None),
            tween: RefCell::new(None),
            sink: RefCell::new(Box::new(sink)),
            teardown: Teardown::default(),
        });

        let weak = Rc::downgrade(&inner);
        let coalescer = Coalescer::new(clock, move |target: f64, tick: &Tick| {
            if let Some(inner) = weak.upgrade() {
                inner.retarget(target, tick);
            }
        });

        let requester = coalescer.clone();
        let listener = hub.listen(EventKind::Scroll, move |event| {
            if let HostEvent::Scroll { y, .. } = *event {
                requester.request(y);
            }
        });

        let disposer = coalescer.clone();
        let weak = Rc::downgrade(&inner);
        inner.teardown.defer(move || {
            listener.remove();
            disposer.dispose();
            if let Some(inner) = weak.upgrade() {
                inner.stop_follower();
                inner.cancel_tween();
            }
            animator.dispose();
        });

        debug!(smoothing_ms = options.smoothing_ms, "平滑滚动已挂接");
        Ok(Self { inner, coalescer })
    }

    /// 程序化滚动到目标位置
    pub fn scroll_to(&self, target: f64, duration_ms: f64, easing: Easing) {
        let inner = &self.inner;
        if inner.teardown.is_done() {
            return;
        }
        self.coalescer.cancel();
        inner.stop_follower();
        inner.cancel_tween();
        inner.target.set(target);

        let tween = Tween::new(inner.current.get(), target, duration_ms).with_easing(easing);
        let on_update = {
            let weak = Rc::downgrade(inner);
            move |value: f64| {
                if let Some(inner) = weak.upgrade() {
                    inner.write(value);
                }
            }
        };
        let on_complete = {
            let weak = Rc::downgrade(inner);
            move || {
                if let Some(inner) = weak.upgrade() {
                    inner.tween.borrow_mut().take();
                }
            }
        };
        let handle = inner
            .animator
            .animate_with_completion(tween, on_update, on_complete);
        *inner.tween.borrow_mut() = Some(handle);
        debug!(target, duration_ms, ?easing, "程序化滚动");
    }

    /// 当前输出位置
    pub fn current(&self) -> f64 {
        self.inner.current.get()
    }

    /// 目标位置
    pub fn target(&self) -> f64 {
        self.inner.target.get()
    }

    /// 是否没有待处理的追随或补间
    pub fn is_settled(&self) -> bool {
        self.inner.follower.borrow().is_none()
            && self.inner.tween.borrow().is_none()
            && !self.coalescer.is_pending()
    }

    /// 是否正在执行 `scroll_to`
    pub fn is_animating(&self) -> bool {
        self.inner.tween.borrow().is_some()
    }

    /// 合并器（用于统计）
    pub fn coalescer(&self) -> &Coalescer<f64> {
        &self.coalescer
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.inner.teardown.run();
    }
}

impl Drop for ScrollSmoother {
    fn drop(&mut self) {
        self.teardown();
    }
}
