//! # Resize 模块
//!
//! 视口尺寸变化折叠为每帧一次的 `on_resize` 调用。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::trace;

use super::Teardown;
use crate::clock::{FrameClock, Tick};
use crate::coalescer::Coalescer;
use crate::events::{EventHub, EventKind, HostEvent, ViewportSize};

/// 尺寸变化适配器
pub struct ResizeWatcher {
    size: Rc<Cell<ViewportSize>>,
    coalescer: Coalescer<ViewportSize>,
    teardown: Teardown,
}

impl std::fmt::Debug for ResizeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResizeWatcher")
            .field("size", &self.size.get())
            .finish()
    }
}

impl ResizeWatcher {
    /// 挂接到 `resize` 事件
    pub fn new(
        clock: &FrameClock,
        hub: &EventHub,
        initial: ViewportSize,
        on_resize: impl FnMut(ViewportSize) + 'static,
    ) -> Self {
        let size = Rc::new(Cell::new(initial));
        let on_resize = RefCell::new(on_resize);

        let applied = size.clone();
        let coalescer = Coalescer::new(clock, move |next: ViewportSize, _tick: &Tick| {
            // 来回拖动后回到原尺寸，不算变化
            if applied.replace(next) == next {
                return;
            }
            trace!(width = next.width, height = next.height, "视口尺寸变化");
            if let Ok(mut on_resize) = on_resize.try_borrow_mut() {
                (on_resize)(next);
            }
        });

        let requester = coalescer.clone();
        let listener = hub.listen(EventKind::Resize, move |event| {
            if let HostEvent::Resize { width, height } = *event {
                requester.request(ViewportSize { width, height });
            }
        });

        let teardown = Teardown::default();
        let disposer = coalescer.clone();
        teardown.defer(move || {
            listener.remove();
            disposer.dispose();
        });

        Self {
            size,
            coalescer,
            teardown,
        }
    }

    /// 最近一次通知的尺寸
    pub fn size(&self) -> ViewportSize {
        self.size.get()
    }

    /// 合并器（用于统计）
    pub fn coalescer(&self) -> &Coalescer<ViewportSize> {
        &self.coalescer
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.teardown.run();
    }
}

impl Drop for ResizeWatcher {
    fn drop(&mut self) {
        self.teardown();
    }
}
