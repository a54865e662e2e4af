//! # Progress 模块
//!
//! 进度条：与计数器同样的触发方式，输出限制在 0..=100 的百分比宽度。

use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::TriggeredTween;
use crate::animation::{Easing, Tween};
use crate::clock::FrameClock;
use crate::error::{SchedResult, ensure_non_negative};
use crate::gate::{ElementId, GateOptions, IntersectionGate};

/// 进度条参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressOptions {
    /// 目标百分比
    pub target: f64,
    pub duration_ms: f64,
    pub delay_ms: f64,
    pub easing: Easing,
}

impl Default for ProgressOptions {
    fn default() -> Self {
        Self {
            target: 100.0,
            duration_ms: 1500.0,
            delay_ms: 0.0,
            easing: Easing::EaseOutCubic,
        }
    }
}

impl ProgressOptions {
    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        ensure_non_negative("duration_ms", self.duration_ms)?;
        ensure_non_negative("delay_ms", self.delay_ms)?;
        Ok(())
    }

    /// 目标限制到 0..=100
    pub fn clamped_target(&self) -> f64 {
        if self.target.is_finite() {
            self.target.clamp(0.0, 100.0)
        } else {
            0.0
        }
    }
}

/// 进度条适配器
pub struct ProgressDriver {
    driver: Rc<TriggeredTween>,
    target: f64,
}

impl std::fmt::Debug for ProgressDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressDriver")
            .field("percent", &self.percent())
            .field("target", &self.target)
            .finish()
    }
}

impl ProgressDriver {
    /// 创建进度条，尚未启动
    pub fn new(
        clock: &FrameClock,
        options: ProgressOptions,
        mut sink: impl FnMut(f64) + 'static,
    ) -> SchedResult<Self> {
        options.validate()?;
        let target = options.clamped_target();
        let tween = Tween::new(0.0, target, options.duration_ms)
            .with_easing(options.easing)
            .with_delay(options.delay_ms);

        // 回弹类缓动会越过终点，输出端只接收合法宽度
        let driver = TriggeredTween::new(
            clock,
            tween,
            Box::new(move |value: f64| sink(value.clamp(0.0, 100.0))),
        );
        Ok(Self { driver, target })
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

    /// 显式启动
    pub fn start(&self) -> bool {
        self.driver.start()
    }

    pub fn on_complete(&self, on_complete: impl FnOnce() + 'static) {
        self.driver.set_on_complete(on_complete);
    }

    /// 当前百分比
    pub fn percent(&self) -> f64 {
        self.driver.value().clamp(0.0, 100.0)
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn is_complete(&self) -> bool {
        self.driver.is_complete()
    }

    /// 拆除（幂等）
    pub fn teardown(&self) {
        self.driver.teardown();
    }
}

impl Drop for ProgressDriver {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;

    #[test]
    fn test_target_is_clamped() {
        let options = ProgressOptions {
            target: 140.0,
            ..ProgressOptions::default()
        };
        assert_eq!(options.clamped_target(), 100.0);
        let options = ProgressOptions {
            target: f64::NAN,
            ..options
        };
        assert_eq!(options.clamped_target(), 0.0);
    }

    #[test]
    fn test_overshoot_never_leaves_range() {
        let clock = FrameClock::manual();
        let widths = Rc::new(RefCell::new(Vec::new()));
        let widths_clone = widths.clone();
        let progress = ProgressDriver::new(
            &clock,
            ProgressOptions {
                target: 100.0,
                duration_ms: 1000.0,
                easing: Easing::EaseOutBack,
                ..ProgressOptions::default()
            },
            move |w| widths_clone.borrow_mut().push(w),
        )
        .unwrap();

        progress.start();
        for k in 0..=20 {
            clock.tick(f64::from(k) * 50.0);
        }

        let widths = widths.borrow();
        assert!(widths.iter().all(|w| (0.0..=100.0).contains(w)));
        assert_eq!(widths.last(), Some(&100.0));
        assert!(progress.is_complete());
        assert_eq!(progress.percent(), 100.0);
    }

    #[test]
    fn test_drop_cancels_tween() {
        let clock = FrameClock::manual();
        {
            let progress = ProgressDriver::new(&clock, ProgressOptions::default(), |_| {}).unwrap();
            progress.start();
            clock.tick(0.0);
            assert_eq!(clock.subscriber_count(), 1);
        }
        assert_eq!(clock.subscriber_count(), 0);
    }
}
