//! # Animator 模块
//!
//! 基于帧时钟的补间驱动器。
//!
//! 每个补间独占一个时钟订阅：首帧锚定起点，此后每帧按墙上时间采样，
//! 到达终点时输出精确的终点值一次、调用完成回调、注销订阅。
//!
//! ```rust,ignore
//! let animator = Animator::new(&clock);
//! let handle = animator.animate_with_completion(
//!     Tween::new(0.0, 1000.0, 2000.0).with_easing(Easing::EaseOutQuart),
//!     |value| label.set(format.format(value)),
//!     || tracing::info!("计数完成"),
//! );
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::{Tween, TweenId, TweenState};
use crate::clock::{FrameClock, SubscriptionToken, Tick};

type UpdateFn = Box<dyn FnMut(f64)>;
type CompleteFn = Box<dyn FnOnce()>;

/// 运行中的补间
struct TweenSlot {
    id: TweenId,
    tween: RefCell<Tween>,
    on_update: RefCell<UpdateFn>,
    on_complete: RefCell<Option<CompleteFn>>,
    token: RefCell<Option<SubscriptionToken>>,
}

impl TweenSlot {
    fn release(&self) {
        if let Some(token) = self.token.borrow_mut().take() {
            token.cancel();
        }
    }

    fn emit(&self, value: f64) {
        if let Ok(mut on_update) = self.on_update.try_borrow_mut() {
            (on_update)(value);
        }
    }

    fn complete(&self) {
        let on_complete = self.on_complete.borrow_mut().take();
        if let Some(on_complete) = on_complete {
            on_complete();
        }
    }
}

struct AnimatorInner {
    clock: FrameClock,
    next_id: Cell<u64>,
    active: RefCell<Vec<Rc<TweenSlot>>>,
    disposed: Cell<bool>,
}

impl AnimatorInner {
    fn forget(&self, id: TweenId) {
        self.active.borrow_mut().retain(|slot| slot.id != id);
    }

    fn on_tick(&self, slot: &Rc<TweenSlot>, tick: &Tick) {
        let step = slot.tween.borrow_mut().sample(tick.timestamp_ms);

        if let Some(value) = step.value {
            slot.emit(value);
        }
        if !step.finished {
            return;
        }

        slot.release();
        self.forget(slot.id);
        // on_update 内部可能已经取消了补间
        if slot.tween.borrow().state() == TweenState::Completed {
            trace!(tween = slot.id.0, "补间完成");
            slot.complete();
        }
    }
}

/// 补间驱动器
///
/// 句柄可克隆，克隆共享同一组运行中的补间。
#[derive(Clone)]
pub struct Animator {
    inner: Rc<AnimatorInner>,
}

impl std::fmt::Debug for Animator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Animator")
            .field("active", &self.active_count())
            .field("disposed", &self.inner.disposed.get())
            .finish()
    }
}

impl Animator {
    /// 创建驱动器
    pub fn new(clock: &FrameClock) -> Self {
        Self {
            inner: Rc::new(AnimatorInner {
                clock: clock.clone(),
                next_id: Cell::new(1),
                active: RefCell::new(Vec::new()),
                disposed: Cell::new(false),
            }),
        }
    }

    /// 启动补间
    pub fn animate(&self, tween: Tween, on_update: impl FnMut(f64) + 'static) -> TweenHandle {
        self.start(tween, Box::new(on_update), None)
    }

    /// 启动补间（带完成回调）
    pub fn animate_with_completion(
        &self,
        tween: Tween,
        on_update: impl FnMut(f64) + 'static,
        on_complete: impl FnOnce() + 'static,
    ) -> TweenHandle {
        self.start(tween, Box::new(on_update), Some(Box::new(on_complete)))
    }

    fn start(
        &self,
        mut tween: Tween,
        on_update: UpdateFn,
        on_complete: Option<CompleteFn>,
    ) -> TweenHandle {
        let id = TweenId::new(self.inner.next_id.get());
        self.inner.next_id.set(id.0 + 1);

        if self.inner.disposed.get() {
            trace!(tween = id.0, "驱动器已销毁，返回空句柄");
            tween.cancel();
        }

        let slot = Rc::new(TweenSlot {
            id,
            tween: RefCell::new(tween),
            on_update: RefCell::new(on_update),
            on_complete: RefCell::new(on_complete),
            token: RefCell::new(None),
        });

        if slot.tween.borrow().is_active() {
            let weak_slot: Weak<TweenSlot> = Rc::downgrade(&slot);
            let weak_inner: Weak<AnimatorInner> = Rc::downgrade(&self.inner);
            let token = self.inner.clock.on_tick(move |tick| {
                if let (Some(slot), Some(inner)) = (weak_slot.upgrade(), weak_inner.upgrade()) {
                    inner.on_tick(&slot, tick);
                }
            });
            *slot.token.borrow_mut() = Some(token);
            self.inner.active.borrow_mut().push(slot.clone());
            debug!(
                tween = id.0,
                duration_ms = slot.tween.borrow().duration_ms(),
                "启动补间"
            );
        }

        TweenHandle {
            slot,
            animator: Rc::downgrade(&self.inner),
        }
    }

    /// 取消所有运行中的补间
    pub fn cancel_all(&self) {
        let slots: Vec<Rc<TweenSlot>> = self.inner.active.borrow_mut().drain(..).collect();
        for slot in slots {
            slot.tween.borrow_mut().cancel();
            slot.release();
            slot.on_complete.borrow_mut().take();
        }
    }

    /// 取消所有补间并停用；之后 `animate` 返回已取消的句柄
    pub fn dispose(&self) {
        self.inner.disposed.set(true);
        self.cancel_all();
    }

    /// 运行中的补间数量
    pub fn active_count(&self) -> usize {
        self.inner.active.borrow().len()
    }

    /// 是否有运行中的补间
    pub fn has_active_tweens(&self) -> bool {
        self.active_count() > 0
    }
}

/// 补间句柄
///
/// 丢弃句柄不会停止补间。
#[derive(Clone)]
pub struct TweenHandle {
    slot: Rc<TweenSlot>,
    animator: Weak<AnimatorInner>,
}

impl std::fmt::Debug for TweenHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TweenHandle")
            .field("id", &self.slot.id.0)
            .field("state", &self.state())
            .finish()
    }
}

impl TweenHandle {
    /// 补间 ID
    pub fn id(&self) -> TweenId {
        self.slot.id
    }

    /// 当前状态
    pub fn state(&self) -> TweenState {
        self.slot.tween.borrow().state()
    }

    /// 是否仍在运行
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// 取消补间：不再调用 `on_update` / `on_complete`（幂等）
    pub fn cancel(&self) {
        if !self.slot.tween.borrow_mut().cancel() {
            return;
        }
        self.detach();
        self.slot.on_complete.borrow_mut().take();
        trace!(tween = self.slot.id.0, "补间已取消");
    }

    /// 立即跳到终点：输出终点值一次并调用完成回调
    pub fn finish(&self) {
        if !self.slot.tween.borrow_mut().finish() {
            return;
        }
        self.detach();
        let to = self.slot.tween.borrow().to();
        self.slot.emit(to);
        self.slot.complete();
    }

    fn detach(&self) {
        self.slot.release();
        if let Some(animator) = self.animator.upgrade() {
            animator.forget(self.slot.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::Easing;

    struct Probe {
        values: Rc<RefCell<Vec<f64>>>,
        completions: Rc<Cell<u32>>,
    }

    impl Probe {
        fn new() -> Self {
            Self {
                values: Rc::new(RefCell::new(Vec::new())),
                completions: Rc::new(Cell::new(0)),
            }
        }

        fn start(&self, animator: &Animator, tween: Tween) -> TweenHandle {
            let values = self.values.clone();
            let completions = self.completions.clone();
            animator.animate_with_completion(
                tween,
                move |v| values.borrow_mut().push(v),
                move || completions.set(completions.get() + 1),
            )
        }
    }

    #[test]
    fn test_animate_linear() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let probe = Probe::new();

        let handle = probe.start(
            &animator,
            Tween::new(0.0, 10.0, 100.0).with_easing(Easing::Linear),
        );
        assert_eq!(animator.active_count(), 1);

        clock.tick(1000.0);
        clock.tick(1050.0);
        clock.tick(1100.0);
        clock.tick(1150.0);

        assert_eq!(*probe.values.borrow(), vec![0.0, 5.0, 10.0]);
        assert_eq!(probe.completions.get(), 1);
        assert_eq!(handle.state(), TweenState::Completed);
        assert_eq!(animator.active_count(), 0);
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn test_zero_duration_resolves_next_tick() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let probe = Probe::new();

        probe.start(&animator, Tween::new(1.0, 2.0, 0.0));
        assert!(probe.values.borrow().is_empty());

        clock.tick(0.0);
        assert_eq!(*probe.values.borrow(), vec![2.0]);
        assert_eq!(probe.completions.get(), 1);
    }

    #[test]
    fn test_cancel_stops_updates() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let probe = Probe::new();

        let handle = probe.start(&animator, Tween::new(0.0, 1.0, 100.0));
        clock.tick(0.0);
        handle.cancel();
        handle.cancel();
        for i in 1..10 {
            clock.tick(f64::from(i) * 20.0);
        }

        assert_eq!(probe.values.borrow().len(), 1);
        assert_eq!(probe.completions.get(), 0);
        assert_eq!(handle.state(), TweenState::Cancelled);
        assert_eq!(clock.subscriber_count(), 0);
    }

    #[test]
    fn test_finish_jumps_to_end() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let probe = Probe::new();

        let handle = probe.start(&animator, Tween::new(0.0, 8.0, 1000.0));
        clock.tick(0.0);
        handle.finish();
        handle.finish();
        clock.tick(16.0);

        assert_eq!(*probe.values.borrow(), vec![0.0, 8.0]);
        assert_eq!(probe.completions.get(), 1);
    }

    #[test]
    fn test_cancel_all_and_dispose() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let probe = Probe::new();

        let a = probe.start(&animator, Tween::new(0.0, 1.0, 100.0));
        let b = probe.start(&animator, Tween::new(0.0, 1.0, 100.0));
        animator.dispose();
        assert!(!a.is_active());
        assert!(!b.is_active());

        let late = probe.start(&animator, Tween::new(0.0, 1.0, 100.0));
        assert_eq!(late.state(), TweenState::Cancelled);
        clock.tick(0.0);
        assert!(probe.values.borrow().is_empty());
        assert!(!animator.has_active_tweens());
    }

    #[test]
    fn test_cancel_inside_update() {
        let clock = FrameClock::manual();
        let animator = Animator::new(&clock);
        let completions = Rc::new(Cell::new(0));
        let slot: Rc<RefCell<Option<TweenHandle>>> = Rc::new(RefCell::new(None));

        let slot_clone = slot.clone();
        let completions_clone = completions.clone();
        let handle = animator.animate_with_completion(
            Tween::new(0.0, 1.0, 0.0),
            move |_| {
                if let Some(handle) = slot_clone.borrow().as_ref() {
                    handle.cancel();
                }
            },
            move || completions_clone.set(completions_clone.get() + 1),
        );
        *slot.borrow_mut() = Some(handle.clone());

        clock.tick(0.0);
        // 已完成的补间不能再被取消，完成回调照常触发
        assert_eq!(completions.get(), 1);
        assert_eq!(handle.state(), TweenState::Completed);
    }
}
