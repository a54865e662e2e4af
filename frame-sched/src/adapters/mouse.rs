//! # Mouse 模块
//!
//! 指针追踪：`mousemove` 折叠为每帧一次的位置发布，
//! 同时给出相对视口中心归一化到 [-1, 1] 的坐标。

use std::cell::Cell;
use std::rc::Rc;

use serde::Serialize;
use tracing::debug;

use super::Teardown;
use crate::clock::{FrameClock, Tick};
use crate::coalescer::Coalescer;
use crate::events::{EventHub, EventKind, HostEvent, ViewportSize};
use crate::store::Store;

/// 指针位置
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PointerPosition {
    /// 视口坐标
    pub x: f64,
    pub y: f64,
    /// 归一化坐标，视口中心为 0
    pub nx: f64,
    pub ny: f64,
}

impl PointerPosition {
    /// 按视口尺寸计算归一化坐标
    pub fn in_viewport(x: f64, y: f64, viewport: ViewportSize) -> Self {
        Self {
            x,
            y,
            nx: normalize(x, viewport.width),
            ny: normalize(y, viewport.height),
        }
    }
}

fn normalize(value: f64, extent: f64) -> f64 {
    if extent <= 0.0 || !extent.is_finite() {
        return 0.0;
    }
    (value / extent * 2.0 - 1.0).clamp(-1.0, 1.0)
}

/// 指针追踪适配器
pub struct MouseTracker {
    positions: Store<PointerPosition>,
    viewport: Rc<Cell<ViewportSize>>,
    coalescer: Coalescer<(f64, f64)>,
    teardown: Teardown,
}

impl std::fmt::Debug for MouseTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MouseTracker")
            .field("position", &self.position())
            .field("viewport", &self.viewport.get())
            .finish()
    }
}

impl MouseTracker {
    /// 挂接到 `mousemove` 与 `resize` 事件
    pub fn new(clock: &FrameClock, hub: &EventHub, viewport: ViewportSize) -> Self {
        let positions = Store::new(PointerPosition::default());
        let viewport = Rc::new(Cell::new(viewport));

        let coalescer = {
            let positions = positions.clone();
            let viewport = viewport.clone();
            Coalescer::new(clock, move |(x, y): (f64, f64), _tick: &Tick| {
                positions.set(PointerPosition::in_viewport(x, y, viewport.get()));
            })
        };

        let requester = coalescer.clone();
        let moves = hub.listen(EventKind::MouseMove, move |event| {
            if let HostEvent::MouseMove { x, y } = *event {
                requester.request((x, y));
            }
        });
        // 视口尺寸只是换算参数，直接更新
        let resized = viewport.clone();
        let resizes = hub.listen(EventKind::Resize, move |event| {
            if let HostEvent::Resize { width, height } = *event {
                resized.set(ViewportSize { width, height });
            }
        });

        let teardown = Teardown::default();
        let disposer = coalescer.clone();
        teardown.defer(move || {
            moves.remove();
            resizes.remove();
            disposer.dispose();
        });

        debug!(?viewport, "指针追踪已挂接");
        Self {
            positions,
            viewport,
            coalescer,
            teardown,
        }
    }

    /// 位置容器（订阅方在每帧最多收到一次通知）
    pub fn positions(&self) -> Store<PointerPosition> {
        self.positions.clone()
    }

    /// 最近发布的位置
    pub fn position(&self) -> PointerPosition {
        self.positions.get()
    }

    pub fn viewport(&self) -> ViewportSize {
        self.viewport.get()
    }

    /// 合并器（用于统计）
    pub fn coalescer(&self) -> &Coalescer<(f64, f64)> {
        &self.coalescer
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.teardown.run();
    }
}

impl Drop for MouseTracker {
    fn drop(&mut self) {
        self.teardown();
    }
}
