//! # Gate 模块
//!
//! 可见性闸门：把视口可见性变化转换成按帧派发的离散回调。
//!
//! ## 设计说明
//!
//! - 观察器回调可能发生在布局阶段，因此 [`IntersectionGate::report`] 从不同步调用用户回调，
//!   而是经由 `Coalescer` 推迟到下一帧，与其它逐帧工作合并
//! - `Once` 模式：首次进入视口后触发 `callback(true)` 并停止观察，状态 `Fired` 为终态
//! - `Always` 模式：首次报告及之后每次状态变化都触发 `callback(is_intersecting)`
//!
//! ```text
//! Once:    Idle ──enter──► Fired
//! Always:  Idle ──► Visible ◄──► Hidden
//! ```

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::clock::FrameClock;
use crate::coalescer::Coalescer;
use crate::error::{SchedError, SchedResult};

/// 被观察元素的标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    /// 创建元素标识
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// 字符串形式
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// 观察区域外扩（像素），语义同 CSS `rootMargin`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Margin {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margin {
    /// 四边相同
    pub fn uniform(value: f64) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }

    /// 解析 CSS 风格的 margin 字符串（1–4 个值，单位 `px` 可省略）
    ///
    /// ```rust,ignore
    /// Margin::parse("0px 0px -100px 0px")?;
    /// Margin::parse("50px")?;
    /// ```
    pub fn parse(input: &str) -> SchedResult<Self> {
        let invalid = |message: &str| SchedError::InvalidMargin {
            input: input.to_string(),
            message: message.to_string(),
        };

        let values = input
            .split_whitespace()
            .map(|token| {
                let number = token.strip_suffix("px").unwrap_or(token);
                number
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| invalid(&format!("无法解析 '{token}'")))
            })
            .collect::<SchedResult<Vec<f64>>>()?;

        match values.as_slice() {
            [all] => Ok(Self::uniform(*all)),
            [vertical, horizontal] => Ok(Self {
                top: *vertical,
                right: *horizontal,
                bottom: *vertical,
                left: *horizontal,
            }),
            [top, horizontal, bottom] => Ok(Self {
                top: *top,
                right: *horizontal,
                bottom: *bottom,
                left: *horizontal,
            }),
            [top, right, bottom, left] => Ok(Self {
                top: *top,
                right: *right,
                bottom: *bottom,
                left: *left,
            }),
            [] => Err(invalid("至少需要一个值")),
            _ => Err(invalid("最多四个值")),
        }
    }
}

/// 触发模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    /// 只在首次进入视口时触发
    #[default]
    Once,
    /// 每次可见性变化都触发
    Always,
}

/// 观察参数
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateOptions {
    /// 可见比例阈值（0.0 - 1.0）
    pub threshold: f64,
    /// 观察区域外扩
    pub root_margin: Margin,
    /// 触发模式
    pub mode: GateMode,
}

impl Default for GateOptions {
    fn default() -> Self {
        Self {
            threshold: 0.1,
            root_margin: Margin::default(),
            mode: GateMode::Once,
        }
    }
}

impl GateOptions {
    /// 设置触发模式
    pub fn with_mode(mut self, mode: GateMode) -> Self {
        self.mode = mode;
        self
    }

    /// 设置阈值
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// 设置观察区域外扩
    pub fn with_root_margin(mut self, root_margin: Margin) -> Self {
        self.root_margin = root_margin;
        self
    }

    /// 验证参数
    pub fn validate(&self) -> SchedResult<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SchedError::invalid(
                "threshold",
                self.threshold,
                "必须在 0.0 - 1.0 之间",
            ));
        }
        Ok(())
    }
}

/// 闸门状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// 尚未收到报告
    #[default]
    Idle,
    /// 可见（Always 模式）
    Visible,
    /// 不可见（Always 模式）
    Hidden,
    /// 已触发（Once 模式终态）
    Fired,
}

/// 观察器报告的一条可见性记录
#[derive(Debug, Clone, PartialEq)]
pub struct VisibilityEntry {
    pub target: ElementId,
    pub is_intersecting: bool,
    /// 可见部分占元素面积的比例
    pub intersection_ratio: f64,
}

/// 宿主可见性观察器接口
///
/// 浏览器中对应 `IntersectionObserver`；原生宿主可以在布局阶段计算后报告。
pub trait VisibilityObserver {
    /// 开始观察元素
    fn observe(&self, element: &ElementId, options: &GateOptions);

    /// 停止观察元素
    fn unobserve(&self, element: &ElementId);
}

/// 不做任何事的观察器（宿主自行调用 `report`）
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl VisibilityObserver for NullObserver {
    fn observe(&self, _element: &ElementId, _options: &GateOptions) {}

    fn unobserve(&self, _element: &ElementId) {}
}

struct WatchInner {
    id: u64,
    element: ElementId,
    options: GateOptions,
    state: Cell<GateState>,
    has_fired: Cell<bool>,
    active: Cell<bool>,
    coalescer: RefCell<Option<Coalescer<bool>>>,
    callback: RefCell<Box<dyn FnMut(bool)>>,
    gate: Weak<GateInner>,
}

impl WatchInner {
    /// 帧内处理折叠后的可见性
    fn apply(&self, visible: bool) {
        if !self.active.get() {
            return;
        }

        match self.options.mode {
            GateMode::Once => {
                if !visible || self.has_fired.replace(true) {
                    return;
                }
                self.state.set(GateState::Fired);
                debug!(element = %self.element, "元素进入视口，触发一次");
                self.invoke(true);
                self.detach();
            }
            GateMode::Always => {
                let next = if visible {
                    GateState::Visible
                } else {
                    GateState::Hidden
                };
                if self.state.replace(next) == next {
                    return;
                }
                trace!(element = %self.element, visible, "可见性变化");
                self.invoke(visible);
            }
        }
    }

    fn invoke(&self, visible: bool) {
        if let Ok(mut callback) = self.callback.try_borrow_mut() {
            (callback)(visible);
        }
    }

    fn detach(&self) {
        if !self.active.replace(false) {
            return;
        }
        if let Some(coalescer) = self.coalescer.borrow_mut().take() {
            coalescer.dispose();
        }
        if let Some(gate) = self.gate.upgrade() {
            gate.release(self.id, &self.element);
        }
    }
}

struct GateInner {
    clock: FrameClock,
    observer: Rc<dyn VisibilityObserver>,
    watches: RefCell<Vec<Rc<WatchInner>>>,
    next_id: Cell<u64>,
}

impl GateInner {
    fn release(&self, id: u64, element: &ElementId) {
        let still_observed = {
            let mut watches = self.watches.borrow_mut();
            watches.retain(|w| w.id != id);
            watches.iter().any(|w| &w.element == element)
        };
        if !still_observed {
            self.observer.unobserve(element);
        }
    }
}

/// 可见性闸门
#[derive(Clone)]
pub struct IntersectionGate {
    inner: Rc<GateInner>,
}

impl std::fmt::Debug for IntersectionGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntersectionGate")
            .field("watches", &self.watch_count())
            .finish()
    }
}

impl IntersectionGate {
    /// 创建闸门
    pub fn new(clock: &FrameClock, observer: Rc<dyn VisibilityObserver>) -> Self {
        Self {
            inner: Rc::new(GateInner {
                clock: clock.clone(),
                observer,
                watches: RefCell::new(Vec::new()),
                next_id: Cell::new(1),
            }),
        }
    }

    /// 开始观察元素
    pub fn watch(
        &self,
        element: impl Into<ElementId>,
        options: GateOptions,
        callback: impl FnMut(bool) + 'static,
    ) -> SchedResult<WatchHandle> {
        options.validate()?;
        let element = element.into();

        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let watch = Rc::new(WatchInner {
            id,
            element: element.clone(),
            options,
            state: Cell::new(GateState::Idle),
            has_fired: Cell::new(false),
            active: Cell::new(true),
            coalescer: RefCell::new(None),
            callback: RefCell::new(Box::new(callback)),
            gate: Rc::downgrade(&self.inner),
        });

        let weak: Weak<WatchInner> = Rc::downgrade(&watch);
        let coalescer = Coalescer::new(&self.inner.clock, move |visible: bool, _tick| {
            if let Some(watch) = weak.upgrade() {
                watch.apply(visible);
            }
        });
        *watch.coalescer.borrow_mut() = Some(coalescer);

        self.inner.watches.borrow_mut().push(watch.clone());
        self.inner.observer.observe(&element, &options);
        debug!(element = %element, mode = ?options.mode, "开始观察元素");

        Ok(WatchHandle { inner: watch })
    }

    /// 观察器回调入口：只记录，不同步调用用户回调
    pub fn report(&self, entry: &VisibilityEntry) {
        let targets: Vec<Rc<WatchInner>> = self
            .inner
            .watches
            .borrow()
            .iter()
            .filter(|w| w.element == entry.target && w.active.get())
            .cloned()
            .collect();

        for watch in targets {
            let visible = entry.is_intersecting
                && entry.intersection_ratio >= watch.options.threshold;

            // Once 模式只关心进入事件，离开不调度任何工作
            if watch.options.mode == GateMode::Once && (!visible || watch.has_fired.get()) {
                continue;
            }
            if let Some(coalescer) = watch.coalescer.borrow().as_ref() {
                coalescer.request(visible);
            }
        }
    }

    /// 正在观察的 watch 数量
    pub fn watch_count(&self) -> usize {
        self.inner.watches.borrow().len()
    }

    /// 元素是否仍被观察
    pub fn is_observing(&self, element: &ElementId) -> bool {
        self.inner
            .watches
            .borrow()
            .iter()
            .any(|w| &w.element == element)
    }
}

/// 观察句柄
#[derive(Clone)]
pub struct WatchHandle {
    inner: Rc<WatchInner>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("element", &self.inner.element)
            .field("state", &self.state())
            .finish()
    }
}

impl WatchHandle {
    /// 停止观察，丢弃待处理的报告（幂等）
    pub fn unwatch(&self) {
        self.inner.detach();
    }

    /// 当前状态
    pub fn state(&self) -> GateState {
        self.inner.state.get()
    }

    /// 是否已触发过（Once 模式）
    pub fn has_fired(&self) -> bool {
        self.inner.has_fired.get()
    }

    /// 是否仍在观察
    pub fn is_active(&self) -> bool {
        self.inner.active.get()
    }

    /// 被观察的元素
    pub fn element(&self) -> &ElementId {
        &self.inner.element
    }
}
