//! # Counter 模块
//!
//! 数字计数器：元素首次进入视口（或显式 `start()`）时，
//! 从 `from` 补间到 `to`，每帧输出数值及其格式化文本。

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::TriggeredTween;
use crate::animation::{Easing, NumberFormat, Tween};
use crate::clock::FrameClock;
use crate::error::{SchedError, SchedResult, ensure_non_negative};
use crate::gate::{ElementId, GateOptions, IntersectionGate};

/// 计数器参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CounterOptions {
    pub from: f64,
    pub to: f64,
    pub duration_ms: f64,
    pub delay_ms: f64,
    pub easing: Easing,
    pub format: NumberFormat,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            from: 0.0,
            to: 100.0,
            duration_ms: 2000.0,
            delay_ms: 0.0,
            easing: Easing::EaseOutQuart,
            format: NumberFormat::default(),
        }
    }
}

impl CounterOptions {
    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        ensure_non_negative("duration_ms", self.duration_ms)?;
        ensure_non_negative("delay_ms", self.delay_ms)?;
        if self.format.decimals > NumberFormat::MAX_DECIMALS {
            return Err(SchedError::invalid(
                "decimals",
                self.format.decimals as f64,
                format!("小数位数不能超过 {}", NumberFormat::MAX_DECIMALS),
            ));
        }
        Ok(())
    }

    fn tween(&self) -> Tween {
        Tween::new(self.from, self.to, self.duration_ms)
            .with_easing(self.easing)
            .with_delay(self.delay_ms)
    }
}

/// 计数器适配器
pub struct CounterDriver {
    driver: Rc<TriggeredTween>,
    format: NumberFormat,
    text: Rc<RefCell<String>>,
}

impl std::fmt::Debug for CounterDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CounterDriver")
            .field("value", &self.value())
            .field("text", &self.text())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl CounterDriver {
    /// 创建计数器，尚未启动
    ///
    /// `sink` 每帧收到数值与格式化文本。
    pub fn new(
        clock: &FrameClock,
        options: CounterOptions,
        mut sink: impl FnMut(f64, &str) + 'static,
    ) -> SchedResult<Self> {
        options.validate()?;
        let text = Rc::new(RefCell::new(options.format.format(options.from)));

        let format = options.format.clone();
        let written = text.clone();
        let driver = TriggeredTween::new(
            clock,
            options.tween(),
            Box::new(move |value| {
                let rendered = format.format(value);
                sink(value, &rendered);
                *written.borrow_mut() = rendered;
            }),
        );

        Ok(Self {
            driver,
            format: options.format,
            text,
        })
    }

    /// 元素首次可见时启动
    pub fn trigger_on_visible(
        &self,
        gate: &IntersectionGate,
        element: impl Into<ElementId>,
        options: GateOptions,
    ) -> SchedResult<()> {
        self.driver.trigger_on_visible(gate, element, options)
    }

    /// 显式启动；已启动或已拆除时返回 `false`
    pub fn start(&self) -> bool {
        self.driver.start()
    }

    /// 设置完成回调（最多调用一次）
    pub fn on_complete(&self, on_complete: impl FnOnce() + 'static) {
        self.driver.set_on_complete(on_complete);
    }

    /// 当前数值
    pub fn value(&self) -> f64 {
        self.driver.value()
    }

    /// 当前文本
    pub fn text(&self) -> String {
        self.text.borrow().clone()
    }

    pub fn format(&self) -> &NumberFormat {
        &self.format
    }

    pub fn is_started(&self) -> bool {
        self.driver.is_started()
    }

    pub fn is_complete(&self) -> bool {
        self.driver.is_complete()
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.driver.teardown();
    }

    pub fn is_torn_down(&self) -> bool {
        self.driver.is_torn_down()
    }
}

impl Drop for CounterDriver {
    fn drop(&mut self) {
        self.teardown();
    }
}
