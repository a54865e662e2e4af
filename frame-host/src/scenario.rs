//! # Scenario 模块
//!
//! 场景文件：描述一个页面（视口、元素布局）、挂在页面上的生产者，
//! 以及按时间排列的输入事件。
//!
//! ```json
//! {
//!   "name": "landing",
//!   "duration_ms": 4000,
//!   "elements": [{ "id": "stats", "top": 1400, "height": 300 }],
//!   "producers": {
//!     "counters": [{ "id": "users", "element": "stats", "to": 12000 }],
//!     "parallax": [{ "id": "hero-bg", "speed": 0.4 }],
//!     "smooth_scroll": true
//!   },
//!   "events": [{ "at_ms": 500, "type": "scroll", "y": 1200 }]
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use frame_sched::{
    CounterOptions, Easing, ElementId, GateMode, GateOptions, Margin, ParallaxOptions,
    ProgressOptions, SchedError, ViewportSize,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 场景错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScenarioError {
    /// 读取失败
    #[error("无法读取场景文件 {path}: {message}")]
    Io { path: String, message: String },

    /// JSON 解析失败
    #[error("场景文件 {path} 解析失败: {message}")]
    Parse { path: String, message: String },

    /// 场景参数不合法
    #[error("场景参数无效: {0}")]
    Invalid(String),

    /// 生产者引用了不存在的元素
    #[error("生产者 '{producer}' 引用了不存在的元素 '{element}'")]
    UnknownElement { producer: String, element: String },

    /// 事件引用了不存在的生产者
    #[error("第 {index} 个事件引用了不存在的生产者 '{id}'")]
    UnknownProducer { index: usize, id: String },

    /// 标识重复
    #[error("重复的标识 '{0}'")]
    DuplicateId(String),

    /// 调度参数错误
    #[error("调度参数错误: {0}")]
    Sched(#[from] SchedError),
}

/// Result 类型别名
pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// 场景
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    /// 场景名称
    pub name: String,

    /// 初始视口
    #[serde(default)]
    pub viewport: ViewportSize,

    /// 模拟时长（毫秒）
    pub duration_ms: f64,

    /// 页面元素（文档坐标）
    #[serde(default)]
    pub elements: Vec<ElementSpec>,

    /// 生产者
    #[serde(default)]
    pub producers: ProducerSpecs,

    /// 输入事件
    #[serde(default)]
    pub events: Vec<TimedEvent>,
}

/// 页面元素
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    pub id: ElementId,
    /// 元素顶部的文档坐标
    pub top: f64,
    pub height: f64,
}

/// 可见性门控参数（root margin 使用 CSS 字符串）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSpec {
    #[serde(default = "default_threshold")]
    pub threshold: f64,

    #[serde(default)]
    pub root_margin: Option<String>,
}

fn default_threshold() -> f64 {
    GateOptions::default().threshold
}

impl Default for GateSpec {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            root_margin: None,
        }
    }
}

impl GateSpec {
    /// 转换为门控参数
    pub fn options(&self, mode: GateMode) -> ScenarioResult<GateOptions> {
        let root_margin = match &self.root_margin {
            Some(margin) => Margin::parse(margin)?,
            None => Margin::default(),
        };
        let options = GateOptions::default()
            .with_threshold(self.threshold)
            .with_root_margin(root_margin)
            .with_mode(mode);
        options.validate()?;
        Ok(options)
    }
}

/// 计数器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterSpec {
    pub id: String,
    /// 可见时启动；不配置则等待 `start_counter` 事件
    #[serde(default)]
    pub element: Option<ElementId>,
    #[serde(default)]
    pub gate: GateSpec,
    #[serde(flatten)]
    pub options: CounterOptions,
}

/// 进度条
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSpec {
    pub id: String,
    #[serde(default)]
    pub element: Option<ElementId>,
    #[serde(default)]
    pub gate: GateSpec,
    #[serde(flatten)]
    pub options: ProgressOptions,
}

/// 视差层
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParallaxSpec {
    pub id: String,
    #[serde(flatten)]
    pub options: ParallaxOptions,
}

/// 持续观察的可见性（Always 模式），变化记入报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSpec {
    pub element: ElementId,
    #[serde(default)]
    pub gate: GateSpec,
}

/// 场景中的全部生产者
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProducerSpecs {
    #[serde(default)]
    pub counters: Vec<CounterSpec>,
    #[serde(default)]
    pub progress: Vec<ProgressSpec>,
    #[serde(default)]
    pub parallax: Vec<ParallaxSpec>,
    #[serde(default)]
    pub watches: Vec<WatchSpec>,
    /// 启用平滑滚动（页面位置由平滑后的值决定）
    #[serde(default)]
    pub smooth_scroll: bool,
    #[serde(default)]
    pub mouse_tracker: bool,
    #[serde(default)]
    pub resize_watcher: bool,
}

/// 定时事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    /// 相对场景开始的时间（毫秒）
    pub at_ms: f64,
    #[serde(flatten)]
    pub action: ScenarioAction,
}

/// 场景动作
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// 文档滚动
    Scroll {
        #[serde(default)]
        x: f64,
        y: f64,
    },
    /// 指针移动
    MouseMove { x: f64, y: f64 },
    /// 视口尺寸变化
    Resize { width: f64, height: f64 },
    /// 程序化滚动（需要启用平滑滚动）
    ScrollTo {
        y: f64,
        #[serde(default = "default_scroll_to_ms")]
        duration_ms: f64,
        #[serde(default)]
        easing: Easing,
    },
    /// 显式启动计数器
    StartCounter { id: String },
    /// 显式启动进度条
    StartProgress { id: String },
    /// 拆除生产者
    Teardown { id: String },
}

fn default_scroll_to_ms() -> f64 {
    800.0
}

/// 记录元素的 root margin，与已记录的值不同时报错
fn check_margin(
    margins: &mut BTreeMap<ElementId, Margin>,
    element: &ElementId,
    margin: Margin,
) -> ScenarioResult<()> {
    match margins.get(element) {
        Some(existing) if *existing != margin => Err(ScenarioError::Invalid(format!(
            "元素 '{element}' 被不同的 root_margin 观察"
        ))),
        Some(_) => Ok(()),
        None => {
            margins.insert(element.clone(), margin);
            Ok(())
        }
    }
}

impl Scenario {
    /// 从文件加载并验证
    pub fn load(path: impl AsRef<Path>) -> ScenarioResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| ScenarioError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let scenario: Self = serde_json::from_str(&content).map_err(|e| ScenarioError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// 从 JSON 字符串解析并验证
    pub fn from_json(content: &str) -> ScenarioResult<Self> {
        let scenario: Self = serde_json::from_str(content).map_err(|e| ScenarioError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// 验证场景
    pub fn validate(&self) -> ScenarioResult<()> {
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(ScenarioError::Invalid(format!(
                "duration_ms 必须为正数: {}",
                self.duration_ms
            )));
        }
        if !(self.viewport.width > 0.0 && self.viewport.height > 0.0) {
            return Err(ScenarioError::Invalid("视口尺寸必须为正数".to_string()));
        }

        let mut elements = BTreeSet::new();
        for element in &self.elements {
            if !element.top.is_finite() || !element.height.is_finite() || element.height <= 0.0 {
                return Err(ScenarioError::Invalid(format!(
                    "元素 '{}' 的位置或高度无效",
                    element.id
                )));
            }
            if !elements.insert(element.id.clone()) {
                return Err(ScenarioError::DuplicateId(element.id.to_string()));
            }
        }

        let check_element = |producer: &str, element: &ElementId| {
            if elements.contains(element) {
                Ok(())
            } else {
                Err(ScenarioError::UnknownElement {
                    producer: producer.to_string(),
                    element: element.to_string(),
                })
            }
        };

        // 同一元素只有一个观察区域
        let mut margins = BTreeMap::new();

        let mut ids = BTreeSet::new();
        let producers = &self.producers;
        for counter in &producers.counters {
            counter.options.validate()?;
            let options = counter.gate.options(GateMode::Once)?;
            if let Some(element) = &counter.element {
                check_element(&counter.id, element)?;
                check_margin(&mut margins, element, options.root_margin)?;
            }
            if !ids.insert(counter.id.as_str()) {
                return Err(ScenarioError::DuplicateId(counter.id.clone()));
            }
        }
        for progress in &producers.progress {
            progress.options.validate()?;
            let options = progress.gate.options(GateMode::Once)?;
            if let Some(element) = &progress.element {
                check_element(&progress.id, element)?;
                check_margin(&mut margins, element, options.root_margin)?;
            }
            if !ids.insert(progress.id.as_str()) {
                return Err(ScenarioError::DuplicateId(progress.id.clone()));
            }
        }
        for layer in &producers.parallax {
            layer.options.validate()?;
            if !ids.insert(layer.id.as_str()) {
                return Err(ScenarioError::DuplicateId(layer.id.clone()));
            }
        }
        for watch in &producers.watches {
            let options = watch.gate.options(GateMode::Always)?;
            check_element("watch", &watch.element)?;
            check_margin(&mut margins, &watch.element, options.root_margin)?;
        }

        for (index, event) in self.events.iter().enumerate() {
            if !event.at_ms.is_finite() || event.at_ms < 0.0 || event.at_ms > self.duration_ms {
                return Err(ScenarioError::Invalid(format!(
                    "第 {index} 个事件的时间 {} 超出场景范围",
                    event.at_ms
                )));
            }
            let unknown = |id: &str| ScenarioError::UnknownProducer {
                index,
                id: id.to_string(),
            };
            match &event.action {
                ScenarioAction::StartCounter { id } => {
                    if !producers.counters.iter().any(|c| &c.id == id) {
                        return Err(unknown(id));
                    }
                }
                ScenarioAction::StartProgress { id } => {
                    if !producers.progress.iter().any(|p| &p.id == id) {
                        return Err(unknown(id));
                    }
                }
                ScenarioAction::Teardown { id } => {
                    if !ids.contains(id.as_str()) {
                        return Err(unknown(id));
                    }
                }
                ScenarioAction::ScrollTo { .. } if !producers.smooth_scroll => {
                    return Err(ScenarioError::Invalid(format!(
                        "第 {index} 个事件 scroll_to 需要启用 smooth_scroll"
                    )));
                }
                ScenarioAction::Resize { width, height } if !(*width > 0.0 && *height > 0.0) => {
                    return Err(ScenarioError::Invalid(format!(
                        "第 {index} 个事件的视口尺寸无效"
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// 按时间排序的事件（同一时间保持文件中的顺序）
    pub fn sorted_events(&self) -> Vec<TimedEvent> {
        let mut events = self.events.clone();
        events.sort_by(|a, b| a.at_ms.total_cmp(&b.at_ms));
        events
    }

    /// 查找元素
    pub fn element(&self, id: &ElementId) -> Option<&ElementSpec> {
        self.elements.iter().find(|e| &e.id == id)
    }
}
