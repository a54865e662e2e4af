//! # Sim 模块
//!
//! 无界面宿主：用确定性的模拟帧源、视口布局和堆内存探针
//! 满足调度核心的宿主接口，按时间轴回放场景事件。
//!
//! ## 主循环
//!
//! ```text
//! 每个模拟帧:
//!   1. 投递到期的场景事件（EventHub / scroll_to / start / teardown）
//!   2. 重新计算可见性，变化的元素交给 IntersectionGate::report
//!   3. 若时钟请求了帧：FrameClock::tick(now)
//!   4. now += 1000 / fps ± jitter
//! ```

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

use frame_sched::{
    CounterDriver, ElementId, EventHub, FrameClock, FrameHost, GateMode, GateOptions, HostEvent,
    IntersectionGate, MemoryProbe, MouseTracker, ParallaxWriter, PerformanceMonitor, ProgressDriver,
    ResizeWatcher, ScrollSmoother, StoreSubscription, TelemetrySnapshot, ViewportSize,
    VisibilityEntry, VisibilityObserver, WatchHandle,
};
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::report::{
    CounterReport, FrameStats, ParallaxReport, ProgressReport, RunReport, ScrollReport,
    VisibilityChange,
};
use crate::scenario::{Scenario, ScenarioAction, ScenarioError, ScenarioResult};

// ========== 宿主接口 ==========

/// 被观察元素的最近一次报告
#[derive(Debug, Clone, Copy, PartialEq)]
struct Reported {
    is_intersecting: bool,
    thresholds_passed: usize,
}

#[derive(Debug, Clone)]
struct Observation {
    thresholds: Vec<f64>,
    options: GateOptions,
    last: Option<Reported>,
}

/// 模拟宿主：帧源、可见性观察器与内存探针
#[derive(Debug, Default)]
pub struct SimulatedHost {
    frame_requested: Cell<bool>,
    requests: Cell<u64>,
    observed: RefCell<BTreeMap<ElementId, Observation>>,
    heap_bytes: Option<u64>,
}

impl SimulatedHost {
    /// 创建宿主
    pub fn new(heap_mb: Option<f64>) -> Rc<Self> {
        Rc::new(Self {
            heap_bytes: heap_mb.map(|mb| (mb * 1024.0 * 1024.0) as u64),
            ..Self::default()
        })
    }

    /// 取走帧请求
    pub fn take_request(&self) -> bool {
        self.frame_requested.replace(false)
    }

    /// 累计帧请求次数
    pub fn request_count(&self) -> u64 {
        self.requests.get()
    }

    /// 正在观察的元素
    pub fn observed_elements(&self) -> Vec<ElementId> {
        self.observed.borrow().keys().cloned().collect()
    }

    /// 按当前布局计算可见性，只返回相对上次报告有变化的元素
    ///
    /// 新观察的元素总会报告一次。
    pub fn visibility_changes(&self, layout: &Layout) -> Vec<VisibilityEntry> {
        let mut observed = self.observed.borrow_mut();
        let mut entries = Vec::new();

        for (id, observation) in observed.iter_mut() {
            let Some(rect) = layout.elements.get(id) else {
                continue;
            };
            let ratio = layout.intersection_ratio(*rect, &observation.options);
            let reported = Reported {
                is_intersecting: ratio > 0.0,
                thresholds_passed: observation.thresholds.iter().filter(|t| ratio >= **t).count(),
            };
            if observation.last == Some(reported) {
                continue;
            }
            observation.last = Some(reported);
            entries.push(VisibilityEntry {
                target: id.clone(),
                is_intersecting: reported.is_intersecting,
                intersection_ratio: ratio,
            });
        }
        entries
    }
}

impl FrameHost for SimulatedHost {
    fn request_frame(&self) {
        self.frame_requested.set(true);
        self.requests.set(self.requests.get() + 1);
    }

    fn cancel_frame(&self) {
        self.frame_requested.set(false);
    }
}

/// 同一元素的所有观察共用首次注册的 root margin，阈值则逐个累加
impl VisibilityObserver for SimulatedHost {
    fn observe(&self, element: &ElementId, options: &GateOptions) {
        let mut observed = self.observed.borrow_mut();
        let observation = observed.entry(element.clone()).or_insert_with(|| Observation {
            thresholds: Vec::new(),
            options: *options,
            last: None,
        });
        if observation.options.root_margin != options.root_margin {
            warn!(
                element = %element,
                kept = ?observation.options.root_margin,
                ignored = ?options.root_margin,
                "同一元素的 root margin 不一致，沿用首次注册的值"
            );
        }
        observation.thresholds.push(options.threshold);
        // 新阈值需要一次新的初始报告
        observation.last = None;
    }

    fn unobserve(&self, element: &ElementId) {
        self.observed.borrow_mut().remove(element);
    }
}

impl MemoryProbe for SimulatedHost {
    fn used_heap_bytes(&self) -> Option<u64> {
        self.heap_bytes
    }
}

// ========== 布局 ==========

/// 元素矩形（文档坐标，只关心纵向）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ElementRect {
    pub top: f64,
    pub height: f64,
}

/// 视口与元素布局
#[derive(Debug, Clone, Default)]
pub struct Layout {
    pub viewport: ViewportSize,
    pub scroll_y: f64,
    pub elements: BTreeMap<ElementId, ElementRect>,
}

impl Layout {
    /// 从场景构建
    pub fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            viewport: scenario.viewport,
            scroll_y: 0.0,
            elements: scenario
                .elements
                .iter()
                .map(|e| {
                    (e.id.clone(), ElementRect {
                        top: e.top,
                        height: e.height,
                    })
                })
                .collect(),
        }
    }

    /// 元素落在（外扩后的）视口内的比例
    pub fn intersection_ratio(&self, rect: ElementRect, options: &GateOptions) -> f64 {
        let root_top = self.scroll_y - options.root_margin.top;
        let root_bottom = self.scroll_y + self.viewport.height + options.root_margin.bottom;
        let overlap = (root_bottom.min(rect.top + rect.height) - root_top.max(rect.top)).max(0.0);
        if rect.height <= 0.0 {
            return 0.0;
        }
        (overlap / rect.height).clamp(0.0, 1.0)
    }
}

// ========== 抖动 ==========

/// xorshift64*，只用于生成可复现的帧间隔抖动
#[derive(Debug, Clone)]
struct Jitter {
    state: u64,
    amplitude_ms: f64,
}

impl Jitter {
    fn new(seed: u64, amplitude_ms: f64) -> Self {
        Self {
            state: seed.max(1),
            amplitude_ms,
        }
    }

    fn next_ms(&mut self) -> f64 {
        if self.amplitude_ms <= 0.0 {
            return 0.0;
        }
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        let bits = self.state.wrapping_mul(0x2545_f491_4f6c_dd1d) >> 11;
        let unit = bits as f64 / (1u64 << 53) as f64;
        (unit * 2.0 - 1.0) * self.amplitude_ms
    }
}

// ========== 模拟 ==========

struct CounterSlot {
    id: String,
    driver: CounterDriver,
    first_frame_ms: Rc<Cell<Option<f64>>>,
    completed_at_ms: Rc<Cell<Option<f64>>>,
}

struct ProgressSlot {
    id: String,
    driver: ProgressDriver,
    completed_at_ms: Rc<Cell<Option<f64>>>,
}

/// 一次场景运行
pub struct Simulation {
    scenario: Scenario,
    config: AppConfig,
    host: Rc<SimulatedHost>,
    clock: FrameClock,
    hub: EventHub,
    gate: IntersectionGate,
    monitor: PerformanceMonitor,
    layout: Rc<RefCell<Layout>>,
    now_ms: Rc<Cell<f64>>,
    counters: Vec<CounterSlot>,
    progress: Vec<ProgressSlot>,
    parallax: Vec<(String, ParallaxWriter)>,
    smoother: Option<ScrollSmoother>,
    mouse: Option<MouseTracker>,
    resize: Option<(ResizeWatcher, Rc<Cell<u32>>)>,
    watches: Vec<WatchHandle>,
    visibility: Rc<RefCell<Vec<VisibilityChange>>>,
    telemetry: Rc<RefCell<Vec<TelemetrySnapshot>>>,
    _telemetry_subscription: StoreSubscription,
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("scenario", &self.scenario.name)
            .field("now_ms", &self.now_ms.get())
            .field("clock", &self.clock)
            .finish()
    }
}

impl Simulation {
    /// 按场景挂接所有生产者
    pub fn new(scenario: Scenario, config: AppConfig) -> ScenarioResult<Self> {
        scenario.validate()?;

        let host = SimulatedHost::new(config.simulation.heap_mb);
        let clock = FrameClock::new(host.clone());
        let hub = EventHub::new();
        let gate = IntersectionGate::new(&clock, host.clone());
        let monitor = PerformanceMonitor::new(&clock, host.clone(), config.monitor)?;
        let layout = Rc::new(RefCell::new(Layout::from_scenario(&scenario)));
        let now_ms = Rc::new(Cell::new(0.0));

        let telemetry = Rc::new(RefCell::new(Vec::new()));
        let telemetry_subscription = {
            let telemetry = telemetry.clone();
            let log_telemetry = config.debug.log_telemetry;
            monitor.snapshots().subscribe(move |snapshot| {
                if let Some(snapshot) = snapshot {
                    if log_telemetry {
                        info!(
                            fps = snapshot.reading.fps,
                            frame_time_ms = snapshot.reading.frame_time_ms,
                            quality = ?snapshot.quality,
                            "遥测窗口"
                        );
                    }
                    telemetry.borrow_mut().push(*snapshot);
                }
            })
        };

        let producers = &scenario.producers;

        let mut counters = Vec::with_capacity(producers.counters.len());
        for spec in &producers.counters {
            let first_frame_ms = Rc::new(Cell::new(None));
            let completed_at_ms = Rc::new(Cell::new(None));
            let driver = {
                let first_frame_ms = first_frame_ms.clone();
                let now_ms = now_ms.clone();
                CounterDriver::new(&clock, spec.options.clone(), move |_, _| {
                    if first_frame_ms.get().is_none() {
                        first_frame_ms.set(Some(now_ms.get()));
                    }
                })?
            };
            {
                let completed_at_ms = completed_at_ms.clone();
                let now_ms = now_ms.clone();
                driver.on_complete(move || completed_at_ms.set(Some(now_ms.get())));
            }
            if let Some(element) = &spec.element {
                let options = spec.gate.options(GateMode::Once)?;
                driver.trigger_on_visible(&gate, element.clone(), options)?;
            }
            counters.push(CounterSlot {
                id: spec.id.clone(),
                driver,
                first_frame_ms,
                completed_at_ms,
            });
        }

        let mut progress = Vec::with_capacity(producers.progress.len());
        for spec in &producers.progress {
            let completed_at_ms = Rc::new(Cell::new(None));
            let driver = ProgressDriver::new(&clock, spec.options, |_| {})?;
            {
                let completed_at_ms = completed_at_ms.clone();
                let now_ms = now_ms.clone();
                driver.on_complete(move || completed_at_ms.set(Some(now_ms.get())));
            }
            if let Some(element) = &spec.element {
                let options = spec.gate.options(GateMode::Once)?;
                driver.trigger_on_visible(&gate, element.clone(), options)?;
            }
            progress.push(ProgressSlot {
                id: spec.id.clone(),
                driver,
                completed_at_ms,
            });
        }

        let mut parallax = Vec::with_capacity(producers.parallax.len());
        for spec in &producers.parallax {
            let writer = ParallaxWriter::new(&clock, &hub, spec.options, |_| {})?;
            parallax.push((spec.id.clone(), writer));
        }

        let visibility = Rc::new(RefCell::new(Vec::new()));
        let mut watches = Vec::with_capacity(producers.watches.len());
        for spec in &producers.watches {
            let element = spec.element.clone();
            let log = visibility.clone();
            let now_ms = now_ms.clone();
            let handle = gate.watch(
                spec.element.clone(),
                spec.gate.options(GateMode::Always)?,
                move |visible| {
                    log.borrow_mut().push(VisibilityChange {
                        element: element.clone(),
                        visible,
                        at_ms: now_ms.get(),
                    });
                },
            )?;
            watches.push(handle);
        }

        let smoother = if producers.smooth_scroll {
            let layout = layout.clone();
            Some(ScrollSmoother::new(
                &clock,
                &hub,
                config.scroll,
                0.0,
                move |y| layout.borrow_mut().scroll_y = y,
            )?)
        } else {
            None
        };

        let mouse = producers
            .mouse_tracker
            .then(|| MouseTracker::new(&clock, &hub, scenario.viewport));

        let resize = producers.resize_watcher.then(|| {
            let notifications = Rc::new(Cell::new(0u32));
            let counted = notifications.clone();
            let watcher = ResizeWatcher::new(&clock, &hub, scenario.viewport, move |size| {
                trace!(width = size.width, height = size.height, "收到尺寸通知");
                counted.set(counted.get() + 1);
            });
            (watcher, notifications)
        });

        debug!(
            scenario = %scenario.name,
            counters = counters.len(),
            progress = progress.len(),
            parallax = parallax.len(),
            watches = watches.len(),
            "场景已挂接"
        );

        Ok(Self {
            scenario,
            config,
            host,
            clock,
            hub,
            gate,
            monitor,
            layout,
            now_ms,
            counters,
            progress,
            parallax,
            smoother,
            mouse,
            resize,
            watches,
            visibility,
            telemetry,
            _telemetry_subscription: telemetry_subscription,
        })
    }

    /// 回放整个场景
    pub fn run(self) -> ScenarioResult<RunReport> {
        let events = self.scenario.sorted_events();
        let mut next_event = 0;

        let interval = 1000.0 / self.config.clock.fps;
        let mut jitter = Jitter::new(self.config.simulation.seed, self.config.clock.jitter_ms);
        let drop_every = self.config.clock.drop_every;
        let mut frames = FrameStats::default();

        info!(
            scenario = %self.scenario.name,
            duration_ms = self.scenario.duration_ms,
            fps = self.config.clock.fps,
            "开始运行场景"
        );

        self.monitor.start();
        self.clock.start();

        let mut now = 0.0;
        while now <= self.scenario.duration_ms {
            self.now_ms.set(now);

            while let Some(event) = events.get(next_event)
                && event.at_ms <= now
            {
                self.apply(&event.action)?;
                next_event += 1;
            }
            self.report_visibility();

            frames.offered += 1;
            if drop_every > 0 && frames.offered.is_multiple_of(drop_every) {
                frames.dropped += 1;
            } else if self.host.take_request() {
                self.clock.tick(now);
                frames.ticked += 1;
                self.report_visibility();
            } else {
                frames.idle += 1;
            }

            now += interval + jitter.next_ms();
        }

        frames.failed_callbacks = self.clock.failed_callbacks();
        frames.host_requests = self.host.request_count();
        self.monitor.stop();
        self.clock.stop();

        let report = self.report(frames);
        info!(
            scenario = %report.scenario,
            ticked = report.frames.ticked,
            windows = report.telemetry.len(),
            "场景运行结束"
        );
        Ok(report)
    }

    fn report_visibility(&self) {
        let entries = self.host.visibility_changes(&self.layout.borrow());
        for entry in &entries {
            trace!(
                element = %entry.target,
                ratio = entry.intersection_ratio,
                "可见性报告"
            );
            self.gate.report(entry);
        }
    }

    fn apply(&self, action: &ScenarioAction) -> ScenarioResult<()> {
        trace!(?action, at_ms = self.now_ms.get(), "投递场景事件");
        match action {
            ScenarioAction::Scroll { x, y } => {
                // 启用平滑滚动时页面位置由平滑器写入
                if self.smoother.is_none() {
                    self.layout.borrow_mut().scroll_y = *y;
                }
                self.hub.dispatch(&HostEvent::Scroll { x: *x, y: *y });
            }
            ScenarioAction::MouseMove { x, y } => {
                self.hub.dispatch(&HostEvent::MouseMove { x: *x, y: *y });
            }
            ScenarioAction::Resize { width, height } => {
                self.layout.borrow_mut().viewport = ViewportSize {
                    width: *width,
                    height: *height,
                };
                self.hub.dispatch(&HostEvent::Resize {
                    width: *width,
                    height: *height,
                });
            }
            ScenarioAction::ScrollTo {
                y,
                duration_ms,
                easing,
            } => {
                if let Some(smoother) = &self.smoother {
                    smoother.scroll_to(*y, *duration_ms, *easing);
                }
            }
            ScenarioAction::StartCounter { id } => {
                let slot = self
                    .counters
                    .iter()
                    .find(|c| &c.id == id)
                    .ok_or_else(|| unknown_producer(id))?;
                slot.driver.start();
            }
            ScenarioAction::StartProgress { id } => {
                let slot = self
                    .progress
                    .iter()
                    .find(|p| &p.id == id)
                    .ok_or_else(|| unknown_producer(id))?;
                slot.driver.start();
            }
            ScenarioAction::Teardown { id } => self.teardown(id)?,
        }
        Ok(())
    }

    fn teardown(&self, id: &str) -> ScenarioResult<()> {
        if let Some(slot) = self.counters.iter().find(|c| c.id == id) {
            slot.driver.teardown();
        } else if let Some(slot) = self.progress.iter().find(|p| p.id == id) {
            slot.driver.teardown();
        } else if let Some((_, layer)) = self.parallax.iter().find(|(layer_id, _)| layer_id == id) {
            layer.teardown();
        } else {
            return Err(unknown_producer(id));
        }
        debug!(producer = id, "生产者已拆除");
        Ok(())
    }

    fn report(&self, frames: FrameStats) -> RunReport {
        RunReport {
            scenario: self.scenario.name.clone(),
            simulated_ms: self.scenario.duration_ms,
            frames,
            telemetry: self.telemetry.borrow().clone(),
            counters: self
                .counters
                .iter()
                .map(|slot| CounterReport {
                    id: slot.id.clone(),
                    value: slot.driver.value(),
                    text: slot.driver.text(),
                    started: slot.driver.is_started(),
                    complete: slot.driver.is_complete(),
                    first_frame_ms: slot.first_frame_ms.get(),
                    completed_at_ms: slot.completed_at_ms.get(),
                })
                .collect(),
            progress: self
                .progress
                .iter()
                .map(|slot| ProgressReport {
                    id: slot.id.clone(),
                    percent: slot.driver.percent(),
                    complete: slot.driver.is_complete(),
                    completed_at_ms: slot.completed_at_ms.get(),
                })
                .collect(),
            parallax: self
                .parallax
                .iter()
                .map(|(id, layer)| ParallaxReport {
                    id: id.clone(),
                    offset: layer.offset(),
                    stats: layer.coalescer().stats(),
                })
                .collect(),
            scroll: self.smoother.as_ref().map(|smoother| ScrollReport {
                current: smoother.current(),
                target: smoother.target(),
                settled: smoother.is_settled(),
                stats: smoother.coalescer().stats(),
            }),
            pointer: self.mouse.as_ref().map(MouseTracker::position),
            viewport: self.layout.borrow().viewport,
            resize_notifications: self.resize.as_ref().map(|(_, n)| n.get()).unwrap_or(0),
            visibility: self.visibility.borrow().clone(),
            active_watches: self.watches.iter().filter(|w| w.is_active()).count(),
            events_dispatched: self.hub.dispatched(),
        }
    }
}

fn unknown_producer(id: &str) -> ScenarioError {
    ScenarioError::Invalid(format!("未知的生产者 '{id}'"))
}

/// 加载配置后运行场景的便捷入口
pub fn run_scenario(scenario: Scenario, config: AppConfig) -> ScenarioResult<RunReport> {
    Simulation::new(scenario, config)?.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use frame_sched::Margin;

    fn layout() -> Layout {
        let mut layout = Layout {
            viewport: ViewportSize {
                width: 1000.0,
                height: 800.0,
            },
            ..Layout::default()
        };
        layout.elements.insert(ElementId::from("card"), ElementRect {
            top: 1000.0,
            height: 400.0,
        });
        layout
    }

    #[test]
    fn test_intersection_ratio() {
        let mut layout = layout();
        let rect = layout.elements[&ElementId::from("card")];
        let options = GateOptions::default();

        assert_eq!(layout.intersection_ratio(rect, &options), 0.0);
        layout.scroll_y = 300.0;
        assert_eq!(layout.intersection_ratio(rect, &options), 0.25);
        layout.scroll_y = 1000.0;
        assert_eq!(layout.intersection_ratio(rect, &options), 1.0);

        // 底边内缩 100px
        layout.scroll_y = 300.0;
        let shrunk = options.with_root_margin(Margin {
            bottom: -100.0,
            ..Margin::default()
        });
        assert_eq!(layout.intersection_ratio(rect, &shrunk), 0.0);
    }

    #[test]
    fn test_reports_only_changes() {
        let host = SimulatedHost::new(None);
        let mut layout = layout();
        host.observe(&ElementId::from("card"), &GateOptions::default());

        // 新观察的元素先报告一次
        let first = host.visibility_changes(&layout);
        assert_eq!(first.len(), 1);
        assert!(!first[0].is_intersecting);
        assert!(host.visibility_changes(&layout).is_empty());

        layout.scroll_y = 300.0;
        let entered = host.visibility_changes(&layout);
        assert_eq!(entered.len(), 1);
        assert!(entered[0].is_intersecting);

        // 仍在同一个阈值区间
        layout.scroll_y = 310.0;
        assert!(host.visibility_changes(&layout).is_empty());

        host.unobserve(&ElementId::from("card"));
        layout.scroll_y = 0.0;
        assert!(host.visibility_changes(&layout).is_empty());
    }

    #[test]
    fn test_first_root_margin_is_kept() {
        let host = SimulatedHost::new(None);
        let mut layout = layout();
        layout.scroll_y = 300.0;
        let card = ElementId::from("card");

        host.observe(&card, &GateOptions::default());
        host.observe(
            &card,
            &GateOptions::default().with_root_margin(Margin {
                bottom: -100.0,
                ..Margin::default()
            }),
        );

        // 内缩后的 margin 会让元素不可见；这里仍按首次注册的 margin 计算
        let entries = host.visibility_changes(&layout);
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_intersecting);
        assert_eq!(entries[0].intersection_ratio, 0.25);
    }

    #[test]
    fn test_frame_requests() {
        let host = SimulatedHost::new(Some(32.0));
        assert!(!host.take_request());
        host.request_frame();
        assert!(host.take_request());
        assert!(!host.take_request());
        assert_eq!(host.request_count(), 1);
        assert_eq!(host.used_heap_bytes(), Some(32 * 1024 * 1024));
    }

    #[test]
    fn test_jitter_is_bounded_and_repeatable() {
        let mut a = Jitter::new(7, 3.0);
        let mut b = Jitter::new(7, 3.0);
        for _ in 0..1000 {
            let value = a.next_ms();
            assert!((-3.0..=3.0).contains(&value));
            assert_eq!(value, b.next_ms());
        }
        assert_eq!(Jitter::new(7, 0.0).next_ms(), 0.0);
    }
}
