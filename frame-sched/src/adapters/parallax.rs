//! # Parallax 模块
//!
//! 视差层：滚动位置折叠后换算为位移，每帧最多写一次。

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Teardown, ValueSink};
use crate::clock::{FrameClock, Tick};
use crate::coalescer::Coalescer;
use crate::error::{SchedError, SchedResult};
use crate::events::{EventHub, EventKind, HostEvent};

/// 视差参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallaxOptions {
    /// 位移系数
    pub speed: f64,
    /// 位移为零时的滚动位置
    pub anchor_y: f64,
    pub min_offset: Option<f64>,
    pub max_offset: Option<f64>,
}

impl Default for ParallaxOptions {
    fn default() -> Self {
        Self {
            speed: 0.5,
            anchor_y: 0.0,
            min_offset: None,
            max_offset: None,
        }
    }
}

impl ParallaxOptions {
    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        if !self.speed.is_finite() {
            return Err(SchedError::invalid("speed", self.speed, "必须是有限值"));
        }
        if let (Some(min), Some(max)) = (self.min_offset, self.max_offset)
            && min > max
        {
            return Err(SchedError::invalid("min_offset", min, "不能大于 max_offset"));
        }
        Ok(())
    }

    /// 滚动位置对应的位移
    pub fn offset_for(&self, scroll_y: f64) -> f64 {
        let mut offset = (scroll_y - self.anchor_y) * self.speed;
        if let Some(min) = self.min_offset {
            offset = offset.max(min);
        }
        if let Some(max) = self.max_offset {
            offset = offset.min(max);
        }
        offset
    }
}

/// 视差层适配器
pub struct ParallaxWriter {
    options: ParallaxOptions,
    offset: Rc<Cell<f64>>,
    coalescer: Coalescer<f64>,
    teardown: Teardown,
}

impl std::fmt::Debug for ParallaxWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallaxWriter")
            .field("options", &self.options)
            .field("offset", &self.offset.get())
            .finish()
    }
}

impl ParallaxWriter {
    /// 挂接到滚动事件
    pub fn new(
        clock: &FrameClock,
        hub: &EventHub,
        options: ParallaxOptions,
        sink: impl FnMut(f64) + 'static,
    ) -> SchedResult<Self> {
        options.validate()?;
        let offset = Rc::new(Cell::new(options.offset_for(0.0)));
        let sink: RefCell<ValueSink> = RefCell::new(Box::new(sink));

        let written = offset.clone();
        let coalescer = Coalescer::new(clock, move |scroll_y: f64, _tick: &Tick| {
            let value = options.offset_for(scroll_y);
            written.set(value);
            if let Ok(mut sink) = sink.try_borrow_mut() {
                (sink)(value);
            }
        });

        let requester = coalescer.clone();
        let listener = hub.listen(EventKind::Scroll, move |event| {
            if let HostEvent::Scroll { y, .. } = *event {
                requester.request(y);
            }
        });

        let teardown = Teardown::default();
        let disposer = coalescer.clone();
        teardown.defer(move || {
            listener.remove();
            disposer.dispose();
        });

        debug!(speed = options.speed, anchor_y = options.anchor_y, "视差层已挂接");
        Ok(Self {
            options,
            offset,
            coalescer,
            teardown,
        })
    }

    /// 最近写出的位移
    pub fn offset(&self) -> f64 {
        self.offset.get()
    }

    pub fn options(&self) -> &ParallaxOptions {
        &self.options
    }

    /// 合并器（用于统计）
    pub fn coalescer(&self) -> &Coalescer<f64> {
        &self.coalescer
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.teardown.run();
    }
}

impl Drop for ParallaxWriter {
    fn drop(&mut self) {
        self.teardown();
    }
}
