//! # Animation 模块
//!
//! 基于墙上时间的数值补间。
//!
//! ## 核心设计理念
//!
//! 动画系统只负责 **时间轴管理**：
//! - 知道某个值从 A 到 B 需要在 duration 内变化
//! - 每帧把当前值交给 `on_update`，由绑定层决定是写样式还是触发重绘
//! - **不假设消费方类型**
//!
//! ## 核心概念
//!
//! - `Tween`: 单个补间实例（纯状态机，可脱离时钟测试）
//! - `Animator`: 把补间挂到 `FrameClock` 上的驱动器
//! - `Easing`: 缓动函数
//! - `NumberFormat`: 数值展示格式（纯函数）

mod animator;
mod easing;
mod format;
mod tween;

pub use animator::{Animator, TweenHandle};
pub use easing::Easing;
pub use format::NumberFormat;
pub use tween::{Tween, TweenId, TweenState, TweenStep};
