//! # Monitor 模块
//!
//! 只读性能遥测：把帧时钟的采样聚合成约 1 秒的滚动窗口，
//! 输出帧率、平均帧时间和（尽力而为的）内存占用。
//!
//! 监视器只读取时间戳，从不修改任何生产者状态，也不参与门控。

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::{FrameClock, SubscriptionToken, Tick};
use crate::error::{SchedError, SchedResult, ensure_positive};
use crate::store::Store;

/// 宿主堆内存探针
///
/// 宿主不提供堆内存信息时返回 `None`，监视器按 0 处理。
pub trait MemoryProbe {
    /// 已使用的堆内存（字节）
    fn used_heap_bytes(&self) -> Option<u64>;
}

/// 不提供内存信息的探针
#[derive(Debug, Default, Clone, Copy)]
pub struct NoMemoryProbe;

impl MemoryProbe for NoMemoryProbe {
    fn used_heap_bytes(&self) -> Option<u64> {
        None
    }
}

/// 自适应质量等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    High,
    Medium,
    Low,
}

/// 质量等级的帧率阈值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityThresholds {
    /// 不低于此帧率为 High
    pub high_fps: f64,
    /// 不低于此帧率为 Medium，否则 Low
    pub medium_fps: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            high_fps: 50.0,
            medium_fps: 30.0,
        }
    }
}

impl QualityThresholds {
    /// 按帧率分级
    pub fn classify(&self, fps: f64) -> QualityLevel {
        if fps >= self.high_fps {
            QualityLevel::High
        } else if fps >= self.medium_fps {
            QualityLevel::Medium
        } else {
            QualityLevel::Low
        }
    }

    /// 验证阈值
    pub fn validate(&self) -> SchedResult<()> {
        ensure_positive("medium_fps", self.medium_fps)?;
        ensure_positive("high_fps", self.high_fps)?;
        if self.high_fps <= self.medium_fps {
            return Err(SchedError::InvalidThresholds {
                high: self.high_fps,
                medium: self.medium_fps,
            });
        }
        Ok(())
    }
}

/// 监视器参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorOptions {
    /// 窗口长度（毫秒）
    pub window_ms: f64,
    /// 质量阈值
    pub thresholds: QualityThresholds,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            window_ms: 1000.0,
            thresholds: QualityThresholds::default(),
        }
    }
}

impl MonitorOptions {
    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        ensure_positive("window_ms", self.window_ms)?;
        self.thresholds.validate()
    }
}

/// 当前窗口的累积量
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub window_start_ms: f64,
    pub frame_count: u32,
    pub total_delta_ms: f64,
}

impl PerformanceSample {
    fn open(window_start_ms: f64) -> Self {
        Self {
            window_start_ms,
            frame_count: 0,
            total_delta_ms: 0.0,
        }
    }
}

/// 一个窗口的读数
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceReading {
    pub fps: u32,
    pub frame_time_ms: f64,
    pub memory_mb: f64,
}

/// 发布给诊断面板的快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetrySnapshot {
    pub reading: PerformanceReading,
    pub quality: QualityLevel,
    /// 第几个已关闭的窗口（从 1 开始）
    pub window_index: u64,
}

struct MonitorInner {
    clock: FrameClock,
    probe: Rc<dyn MemoryProbe>,
    options: MonitorOptions,
    sample: Cell<Option<PerformanceSample>>,
    windows_closed: Cell<u64>,
    token: RefCell<Option<SubscriptionToken>>,
    snapshots: Store<Option<TelemetrySnapshot>>,
}

impl MonitorInner {
    fn on_tick(&self, tick: &Tick) {
        // 窗口从上一帧开始；全新的时钟上首帧即起点，且同样计入帧数
        let mut sample = self
            .sample
            .get()
            .unwrap_or_else(|| PerformanceSample::open(tick.timestamp_ms - tick.delta_ms));

        sample.frame_count += 1;
        sample.total_delta_ms = (tick.timestamp_ms - sample.window_start_ms).max(0.0);

        if sample.total_delta_ms < self.options.window_ms {
            self.sample.set(Some(sample));
            return;
        }

        let reading = PerformanceReading {
            fps: (f64::from(sample.frame_count) * 1000.0 / sample.total_delta_ms).round() as u32,
            frame_time_ms: sample.total_delta_ms / f64::from(sample.frame_count),
            memory_mb: self
                .probe
                .used_heap_bytes()
                .map(|bytes| bytes as f64 / (1024.0 * 1024.0))
                .unwrap_or(0.0),
        };
        let window_index = self.windows_closed.get() + 1;
        self.windows_closed.set(window_index);
        self.sample.set(Some(PerformanceSample::open(tick.timestamp_ms)));

        let quality = self.options.thresholds.classify(f64::from(reading.fps));
        trace!(
            fps = reading.fps,
            frame_time_ms = reading.frame_time_ms,
            ?quality,
            "性能窗口关闭"
        );
        self.snapshots.set(Some(TelemetrySnapshot {
            reading,
            quality,
            window_index,
        }));
    }
}

/// 性能监视器
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Rc<MonitorInner>,
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("running", &self.is_running())
            .field("windows_closed", &self.inner.windows_closed.get())
            .field("latest", &self.latest())
            .finish()
    }
}

impl PerformanceMonitor {
    /// 创建监视器
    pub fn new(
        clock: &FrameClock,
        probe: Rc<dyn MemoryProbe>,
        options: MonitorOptions,
    ) -> SchedResult<Self> {
        options.validate()?;
        Ok(Self {
            inner: Rc::new(MonitorInner {
                clock: clock.clone(),
                probe,
                options,
                sample: Cell::new(None),
                windows_closed: Cell::new(0),
                token: RefCell::new(None),
                snapshots: Store::new(None),
            }),
        })
    }

    /// 订阅帧时钟（重复调用无效果）
    pub fn start(&self) {
        if self.inner.token.borrow().is_some() {
            return;
        }
        // 时钟已在运行时，窗口从它的上一帧开始
        self.inner
            .sample
            .set(self.inner.clock.last_timestamp_ms().map(PerformanceSample::open));
        let weak: Weak<MonitorInner> = Rc::downgrade(&self.inner);
        let token = self.inner.clock.on_tick(move |tick| {
            if let Some(inner) = weak.upgrade() {
                inner.on_tick(tick);
            }
        });
        *self.inner.token.borrow_mut() = Some(token);
        debug!(window_ms = self.inner.options.window_ms, "性能监视器启动");
    }

    /// 取消订阅并丢弃未关闭的窗口
    pub fn stop(&self) {
        if let Some(token) = self.inner.token.borrow_mut().take() {
            token.cancel();
        }
        self.inner.sample.set(None);
    }

    /// 是否正在采样
    pub fn is_running(&self) -> bool {
        self.inner.token.borrow().is_some()
    }

    /// 最近一个已关闭窗口的快照
    pub fn latest(&self) -> Option<TelemetrySnapshot> {
        self.inner.snapshots.get()
    }

    /// 当前窗口的累积量
    pub fn current_sample(&self) -> Option<PerformanceSample> {
        self.inner.sample.get()
    }

    /// 快照容器（诊断面板可订阅）
    pub fn snapshots(&self) -> Store<Option<TelemetrySnapshot>> {
        self.inner.snapshots.clone()
    }

    /// 已关闭的窗口数
    pub fn windows_closed(&self) -> u64 {
        self.inner.windows_closed.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn used_heap_bytes(&self) -> Option<u64> {
            Some(self.0)
        }
    }

    fn monitor(clock: &FrameClock, probe: Rc<dyn MemoryProbe>) -> PerformanceMonitor {
        let monitor = PerformanceMonitor::new(clock, probe, MonitorOptions::default()).unwrap();
        monitor.start();
        monitor
    }

    #[test]
    fn test_sixty_ticks_per_second() {
        let clock = FrameClock::manual();
        let monitor = monitor(&clock, Rc::new(NoMemoryProbe));

        // 60 帧均匀分布在 0..=1000ms
        for k in 0..60 {
            clock.tick(f64::from(k) * 1000.0 / 59.0);
        }

        let snapshot = monitor.latest().unwrap();
        assert_eq!(snapshot.reading.fps, 60);
        assert!((snapshot.reading.frame_time_ms - 16.67).abs() < 0.01);
        assert_eq!(snapshot.reading.memory_mb, 0.0);
        assert_eq!(snapshot.quality, QualityLevel::High);
        assert_eq!(snapshot.window_index, 1);
    }

    #[test]
    fn test_start_on_running_clock() {
        let clock = FrameClock::manual();
        let _other = clock.on_tick(|_| {});
        clock.tick(0.0);

        let monitor = monitor(&clock, Rc::new(NoMemoryProbe));
        assert_eq!(monitor.current_sample().unwrap().window_start_ms, 0.0);

        for k in 1..=60 {
            clock.tick(f64::from(k) * 1000.0 / 60.0);
        }

        let snapshot = monitor.latest().unwrap();
        assert_eq!(snapshot.reading.fps, 60);
        assert!((snapshot.reading.frame_time_ms - 1000.0 / 60.0).abs() < 1e-9);
        assert_eq!(monitor.windows_closed(), 1);
    }

    #[test]
    fn test_window_resets() {
        let clock = FrameClock::manual();
        let monitor = monitor(&clock, Rc::new(NoMemoryProbe));

        // 20fps 持续 2 秒
        for k in 0..=40 {
            clock.tick(f64::from(k) * 50.0);
        }

        assert_eq!(monitor.windows_closed(), 2);
        let snapshot = monitor.latest().unwrap();
        assert_eq!(snapshot.reading.fps, 20);
        assert_eq!(snapshot.quality, QualityLevel::Low);

        let sample = monitor.current_sample().unwrap();
        assert_eq!(sample.frame_count, 0);
        assert_eq!(sample.window_start_ms, 2000.0);
    }

    #[test]
    fn test_memory_probe() {
        let clock = FrameClock::manual();
        let monitor = monitor(&clock, Rc::new(FixedProbe(64 * 1024 * 1024)));
        clock.tick(0.0);
        clock.tick(1000.0);
        assert_eq!(monitor.latest().unwrap().reading.memory_mb, 64.0);
    }

    #[test]
    fn test_duplicate_start_and_stop() {
        let clock = FrameClock::manual();
        let monitor = monitor(&clock, Rc::new(NoMemoryProbe));
        monitor.start();
        assert_eq!(clock.subscriber_count(), 1);

        monitor.stop();
        assert!(!monitor.is_running());
        assert_eq!(clock.subscriber_count(), 0);
        assert_eq!(monitor.current_sample(), None);
    }

    #[test]
    fn test_snapshot_subscription() {
        let clock = FrameClock::manual();
        let monitor = monitor(&clock, Rc::new(NoMemoryProbe));
        let levels = Rc::new(RefCell::new(Vec::new()));
        let levels_clone = levels.clone();
        let _sub = monitor.snapshots().subscribe(move |snapshot| {
            if let Some(snapshot) = snapshot {
                levels_clone.borrow_mut().push(snapshot.quality);
            }
        });

        // 40fps 一秒，随后 60fps 一秒
        let mut t = 0.0;
        clock.tick(t);
        for _ in 0..40 {
            t += 25.0;
            clock.tick(t);
        }
        for k in 1..=60 {
            clock.tick(1000.0 + f64::from(k) * 1000.0 / 60.0);
        }

        assert_eq!(*levels.borrow(), vec![QualityLevel::Medium, QualityLevel::High]);
    }

    #[test]
    fn test_invalid_options() {
        let clock = FrameClock::manual();
        let bad_window = MonitorOptions {
            window_ms: 0.0,
            ..MonitorOptions::default()
        };
        assert!(PerformanceMonitor::new(&clock, Rc::new(NoMemoryProbe), bad_window).is_err());

        let bad_thresholds = MonitorOptions {
            thresholds: QualityThresholds {
                high_fps: 30.0,
                medium_fps: 45.0,
            },
            ..MonitorOptions::default()
        };
        assert!(PerformanceMonitor::new(&clock, Rc::new(NoMemoryProbe), bad_thresholds).is_err());
    }
}
