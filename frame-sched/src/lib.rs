//! # Frame Sched
//!
//! 帧同步动画与性能遥测调度核心。
//!
//! ## 架构概述
//!
//! `frame-sched` 是纯逻辑核心，不依赖任何 IO 或渲染引擎。
//! 宿主只需提供一个「每帧回调」来源，其余工作都由调度核心在帧内完成：
//!
//! ```text
//! Host                              frame-sched
//!   │                                    │
//!   │──── EventHub::dispatch ──────────►│ Coalescer（每生产者每帧最多一次）
//!   │──── IntersectionGate::report ────►│
//!   │                                    │
//!   │◄─── FrameHost::request_frame ─────│
//!   │──── FrameClock::tick(ts) ────────►│ Animator / 直接写值 / PerformanceMonitor
//!   │                                    │
//!   │◄─── on_update(f64) / bool / TelemetrySnapshot
//! ```
//!
//! ## 核心类型
//!
//! - [`FrameClock`]：共享的单一帧回调槽
//! - [`Coalescer`]：高频请求的每帧折叠
//! - [`Animator`] / [`Tween`] / [`Easing`]：基于墙上时间的补间
//! - [`IntersectionGate`]：可见性门控
//! - [`PerformanceMonitor`]：滚动窗口帧率与质量等级
//! - [`adapters`]：滚动、视差、指针、计数器、进度条、尺寸适配器
//!
//! ## 线程模型
//!
//! 全部运行在一个逻辑线程上（`Rc` / `RefCell`），所有类型都不是 `Send`。
//!
//! ## 模块结构
//!
//! - [`clock`]：FrameClock 与宿主帧源
//! - [`coalescer`]：每帧折叠
//! - [`animation`]：补间、缓动、数值格式
//! - [`gate`]：可见性门控
//! - [`monitor`]：性能遥测
//! - [`events`]：宿主输入事件
//! - [`store`]：共享状态容器
//! - [`error`]：错误类型定义

pub mod adapters;
pub mod animation;
pub mod clock;
pub mod coalescer;
pub mod error;
pub mod events;
pub mod gate;
pub mod monitor;
pub mod store;

// 重导出核心类型
pub use adapters::{
    CounterDriver, CounterOptions, MouseTracker, ParallaxOptions, ParallaxWriter, PointerPosition,
    ProgressDriver, ProgressOptions, ResizeWatcher, ScrollSmoother, ScrollSmootherOptions,
    ValueSink,
};
pub use animation::{
    Animator, Easing, NumberFormat, Tween, TweenHandle, TweenId, TweenState, TweenStep,
};
pub use clock::{
    FrameClock, FrameHost, FrameThrottle, ManualFrameHost, SubscriptionId, SubscriptionToken, Tick,
};
pub use coalescer::{Coalescer, CoalescerStats};
pub use error::{SchedError, SchedResult};
pub use events::{EventHub, EventKind, EventListenerHandle, HostEvent, ListenerId, ViewportSize};
pub use gate::{
    ElementId, GateMode, GateOptions, GateState, IntersectionGate, Margin, NullObserver,
    VisibilityEntry, VisibilityObserver, WatchHandle,
};
pub use monitor::{
    MemoryProbe, MonitorOptions, NoMemoryProbe, PerformanceMonitor, PerformanceReading,
    PerformanceSample, QualityLevel, QualityThresholds, TelemetrySnapshot,
};
pub use store::{Store, StoreSubscription};
