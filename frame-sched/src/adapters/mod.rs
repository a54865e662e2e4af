//! # Adapters 模块
//!
//! 生产者适配器：把一种输入源（宿主事件、可见性、显式调用）
//! 经由 `Coalescer` 接到直接写值或 `Animator` 补间上。
//!
//! 每个适配器都独占自己的状态，`teardown()`（以及 `Drop`）同步取消
//! 合并器、运行中的补间、时钟订阅和事件监听器。
//! `teardown()` 返回之后，任何回调都不会再触发。

mod counter;
mod mouse;
mod parallax;
mod progress;
mod resize;
mod scroll;

pub use counter::{CounterDriver, CounterOptions};
pub use mouse::{MouseTracker, PointerPosition};
pub use parallax::{ParallaxOptions, ParallaxWriter};
pub use progress::{ProgressDriver, ProgressOptions};
pub use resize::ResizeWatcher;
pub use scroll::{ScrollSmoother, ScrollSmootherOptions};

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::animation::{Animator, Tween, TweenHandle};
use crate::clock::FrameClock;
use crate::error::SchedResult;
use crate::gate::{ElementId, GateMode, GateOptions, IntersectionGate, WatchHandle};

/// 值输出端
pub type ValueSink = Box<dyn FnMut(f64)>;

// ========== 拆除清单 ==========

/// 按登记的逆序执行的清理动作
#[derive(Default)]
pub(crate) struct Teardown {
    done: Cell<bool>,
    actions: RefCell<Vec<Box<dyn FnOnce()>>>,
}

impl Teardown {
    /// 登记清理动作；已拆除时立即执行
    pub(crate) fn defer(&self, action: impl FnOnce() + 'static) {
        if self.done.get() {
            action();
            return;
        }
        self.actions.borrow_mut().push(Box::new(action));
    }

    /// 执行全部清理动作（幂等）
    pub(crate) fn run(&self) {
        if self.done.replace(true) {
            return;
        }
        let actions = std::mem::take(&mut *self.actions.borrow_mut());
        for action in actions.into_iter().rev() {
            action();
        }
    }

    pub(crate) fn is_done(&self) -> bool {
        self.done.get()
    }
}

// ========== 触发式补间 ==========

/// 由可见性或显式调用触发、只播放一次的补间
///
/// `CounterDriver` 与 `ProgressDriver` 共用。
pub(crate) struct TriggeredTween {
    animator: Animator,
    tween: Tween,
    started: Cell<bool>,
    completed: Cell<bool>,
    value: Cell<f64>,
    sink: RefCell<ValueSink>,
    on_complete: RefCell<Option<Box<dyn FnOnce()>>>,
    handle: RefCell<Option<TweenHandle>>,
    watch: RefCell<Option<WatchHandle>>,
    teardown: Teardown,
}

impl TriggeredTween {
    pub(crate) fn new(clock: &FrameClock, tween: Tween, sink: ValueSink) -> Rc<Self> {
        let animator = Animator::new(clock);
        let this = Rc::new(Self {
            animator: animator.clone(),
            value: Cell::new(tween.from()),
            tween,
            started: Cell::new(false),
            completed: Cell::new(false),
            sink: RefCell::new(sink),
            on_complete: RefCell::new(None),
            handle: RefCell::new(None),
            watch: RefCell::new(None),
            teardown: Teardown::default(),
        });

        let weak = Rc::downgrade(&this);
        this.teardown.defer(move || {
            if let Some(this) = weak.upgrade() {
                if let Some(watch) = this.watch.borrow_mut().take() {
                    watch.unwatch();
                }
                if let Some(handle) = this.handle.borrow_mut().take() {
                    handle.cancel();
                }
                this.on_complete.borrow_mut().take();
            }
            animator.dispose();
        });
        this
    }

    pub(crate) fn set_on_complete(&self, on_complete: impl FnOnce() + 'static) {
        if self.teardown.is_done() || self.completed.get() {
            return;
        }
        *self.on_complete.borrow_mut() = Some(Box::new(on_complete));
    }

    /// 元素首次可见时启动（强制 Once 模式）
    pub(crate) fn trigger_on_visible(
        self: &Rc<Self>,
        gate: &IntersectionGate,
        element: impl Into<ElementId>,
        options: GateOptions,
    ) -> SchedResult<()> {
        if self.teardown.is_done() || self.started.get() {
            return Ok(());
        }
        let weak: Weak<Self> = Rc::downgrade(self);
        let handle = gate.watch(element, options.with_mode(GateMode::Once), move |visible| {
            if visible && let Some(this) = weak.upgrade() {
                this.start();
            }
        })?;
        if let Some(previous) = self.watch.borrow_mut().replace(handle) {
            previous.unwatch();
        }
        Ok(())
    }

    /// 启动补间；只有第一次调用有效
    pub(crate) fn start(self: &Rc<Self>) -> bool {
        if self.teardown.is_done() || self.started.replace(true) {
            return false;
        }
        // 显式启动后不再需要可见性触发
        if let Some(watch) = self.watch.borrow_mut().take() {
            watch.unwatch();
        }

        let on_update = {
            let weak = Rc::downgrade(self);
            move |value: f64| {
                if let Some(this) = weak.upgrade() {
                    this.write(value);
                }
            }
        };
        let on_complete = {
            let weak = Rc::downgrade(self);
            move || {
                if let Some(this) = weak.upgrade() {
                    this.finish();
                }
            }
        };
        let handle = self
            .animator
            .animate_with_completion(self.tween.clone(), on_update, on_complete);
        trace!(from = self.tween.from(), to = self.tween.to(), "触发补间");
        *self.handle.borrow_mut() = Some(handle);
        true
    }

    fn write(&self, value: f64) {
        if self.teardown.is_done() {
            return;
        }
        self.value.set(value);
        if let Ok(mut sink) = self.sink.try_borrow_mut() {
            (sink)(value);
        }
    }

    fn finish(&self) {
        self.completed.set(true);
        self.handle.borrow_mut().take();
        let on_complete = self.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete();
        }
    }

    pub(crate) fn value(&self) -> f64 {
        self.value.get()
    }

    pub(crate) fn is_started(&self) -> bool {
        self.started.get()
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.completed.get()
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.teardown.is_done()
    }

    pub(crate) fn teardown(&self) {
        self.teardown.run();
    }
}
