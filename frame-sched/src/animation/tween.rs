//! # Tween 模块
//!
//! 单个补间实例：`from -> to` 在 `duration_ms` 内按缓动函数变化。
//!
//! 进度只由 **墙上时间** 决定：无论宿主跑 30fps 还是 144fps，
//! 时长都相同，中间采样多少次只影响平滑度，不影响终点时间。

use super::Easing;

/// 补间 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TweenId(pub u64);

impl TweenId {
    /// 创建新的补间 ID
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

/// 补间状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TweenState {
    /// 等待锚定首帧，或处于延迟期
    #[default]
    Pending,
    /// 正在播放
    Playing,
    /// 已完成（终点值已输出）
    Completed,
    /// 已取消
    Cancelled,
}

impl TweenState {
    /// 是否为活跃状态（需要更新）
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Playing)
    }

    /// 是否已结束
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// 单次采样结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TweenStep {
    /// 本帧输出值（延迟期或已结束时为 `None`）
    pub value: Option<f64>,
    /// 是否在本次采样后结束
    pub finished: bool,
}

/// 补间实例
///
/// 字段只能经构造器写入，时长与延迟始终是有限的非负数。
#[derive(Debug, Clone, PartialEq)]
pub struct Tween {
    from: f64,
    to: f64,
    /// 时长（毫秒），`0` 表示下一帧直接到达终点
    duration_ms: f64,
    delay_ms: f64,
    easing: Easing,
    state: TweenState,
    /// 首帧时间戳 + 延迟
    start_time_ms: Option<f64>,
}

impl Tween {
    /// 创建补间
    pub fn new(from: f64, to: f64, duration_ms: f64) -> Self {
        let duration_ms = if duration_ms.is_finite() {
            duration_ms.max(0.0)
        } else {
            0.0
        };
        Self {
            from,
            to,
            duration_ms,
            delay_ms: 0.0,
            easing: Easing::default(),
            state: TweenState::Pending,
            start_time_ms: None,
        }
    }

    /// 设置缓动函数
    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    /// 设置延迟
    pub fn with_delay(mut self, delay_ms: f64) -> Self {
        self.delay_ms = if delay_ms.is_finite() {
            delay_ms.max(0.0)
        } else {
            0.0
        };
        self
    }

    /// 起始值
    pub fn from(&self) -> f64 {
        self.from
    }

    /// 目标值
    pub fn to(&self) -> f64 {
        self.to
    }

    /// 时长（毫秒）
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// 延迟启动（毫秒）
    pub fn delay_ms(&self) -> f64 {
        self.delay_ms
    }

    /// 缓动函数
    pub fn easing(&self) -> Easing {
        self.easing
    }

    /// 当前状态
    pub fn state(&self) -> TweenState {
        self.state
    }

    /// 锚定后的起始时间
    pub fn start_time_ms(&self) -> Option<f64> {
        self.start_time_ms
    }

    /// 经过 `elapsed_ms` 后的值（纯函数）
    pub fn value_at(&self, elapsed_ms: f64) -> f64 {
        if self.duration_ms <= 0.0 {
            return self.to;
        }
        let progress = (elapsed_ms / self.duration_ms).clamp(0.0, 1.0);
        if progress >= 1.0 {
            return self.to;
        }
        self.from + (self.to - self.from) * self.easing.apply(progress)
    }

    /// 在 `now_ms` 时刻采样
    ///
    /// 首次采样时锚定起点；进度到达 1 时返回精确的终点值并进入 `Completed`。
    pub fn sample(&mut self, now_ms: f64) -> TweenStep {
        if self.state.is_finished() {
            return TweenStep {
                value: None,
                finished: true,
            };
        }

        let start = *self.start_time_ms.get_or_insert(now_ms + self.delay_ms);
        if now_ms < start {
            return TweenStep {
                value: None,
                finished: false,
            };
        }
        self.state = TweenState::Playing;

        let elapsed = now_ms - start;
        if self.duration_ms <= 0.0 || elapsed >= self.duration_ms {
            self.state = TweenState::Completed;
            return TweenStep {
                value: Some(self.to),
                finished: true,
            };
        }

        TweenStep {
            value: Some(self.value_at(elapsed)),
            finished: false,
        }
    }

    /// 强制完成
    pub fn finish(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = TweenState::Completed;
        true
    }

    /// 取消
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        self.state = TweenState::Cancelled;
        true
    }

    /// 是否为活跃状态
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tween_creation() {
        let tween = Tween::new(0.0, 10.0, 500.0);
        assert_eq!(tween.state(), TweenState::Pending);
        assert_eq!(tween.start_time_ms(), None);
        assert_eq!(tween.easing(), Easing::EaseInOutCubic);
    }

    #[test]
    fn test_sample_anchors_on_first_call() {
        let mut tween = Tween::new(0.0, 100.0, 1000.0).with_easing(Easing::Linear);

        let first = tween.sample(5000.0);
        assert_eq!(first.value, Some(0.0));
        assert!(!first.finished);
        assert_eq!(tween.start_time_ms(), Some(5000.0));
        assert_eq!(tween.state(), TweenState::Playing);

        let mid = tween.sample(5250.0);
        assert_eq!(mid.value, Some(25.0));

        let end = tween.sample(6000.0);
        assert_eq!(end.value, Some(100.0));
        assert!(end.finished);
        assert_eq!(tween.state(), TweenState::Completed);

        // 结束后不再输出
        assert_eq!(tween.sample(7000.0).value, None);
    }

    #[test]
    fn test_overshoot_snaps_to_exact_end() {
        let mut tween = Tween::new(0.1, 0.7, 100.0).with_easing(Easing::EaseOutQuart);
        tween.sample(0.0);
        let step = tween.sample(133.3);
        assert_eq!(step.value, Some(0.7));
        assert!(step.finished);
    }

    #[test]
    fn test_delay() {
        let mut tween = Tween::new(0.0, 1.0, 100.0)
            .with_easing(Easing::Linear)
            .with_delay(50.0);

        assert_eq!(tween.sample(0.0).value, None);
        assert_eq!(tween.state(), TweenState::Pending);
        assert_eq!(tween.sample(40.0).value, None);
        assert_eq!(tween.sample(50.0).value, Some(0.0));
        assert_eq!(tween.sample(100.0).value, Some(0.5));
    }

    #[test]
    fn test_zero_and_negative_duration() {
        for duration in [0.0, -20.0, f64::NAN] {
            let mut tween = Tween::new(3.0, 9.0, duration);
            let step = tween.sample(10.0);
            assert_eq!(step.value, Some(9.0));
            assert!(step.finished);
        }
    }

    #[test]
    fn test_builders_keep_timing_finite() {
        let tween = Tween::new(0.0, 1.0, f64::INFINITY).with_delay(f64::NAN);
        assert_eq!(tween.duration_ms(), 0.0);
        assert_eq!(tween.delay_ms(), 0.0);

        let tween = Tween::new(0.0, 1.0, 250.0).with_delay(-5.0);
        assert_eq!(tween.duration_ms(), 250.0);
        assert_eq!(tween.delay_ms(), 0.0);
        assert_eq!((tween.from(), tween.to()), (0.0, 1.0));
    }

    #[test]
    fn test_cancel_and_finish() {
        let mut tween = Tween::new(0.0, 1.0, 100.0);
        assert!(tween.cancel());
        assert!(!tween.cancel());
        assert!(!tween.finish());
        assert_eq!(tween.sample(0.0).value, None);

        let mut tween = Tween::new(0.0, 1.0, 100.0);
        assert!(tween.finish());
        assert_eq!(tween.state(), TweenState::Completed);
    }

    #[test]
    fn test_value_at_is_frame_rate_independent() {
        let tween = Tween::new(0.0, 1000.0, 2000.0).with_easing(Easing::EaseOutQuart);

        // 30fps 与 144fps 在同一墙上时间得到相同的值
        let at_30 = tween.value_at(33.333 * 30.0);
        let at_144 = tween.value_at(6.944_375 * 144.0);
        assert!((at_30 - at_144).abs() < 1e-6);
    }
}
