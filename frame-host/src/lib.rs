//! # Frame Host
//!
//! `frame-sched` 的无界面宿主。
//!
//! 用确定性的模拟帧源代替浏览器的每帧回调，用场景文件描述页面布局与输入事件，
//! 运行后输出帧统计、遥测窗口和各生产者的最终状态。
//!
//! ## 模块结构
//!
//! - [`config`]：宿主配置（config.json）
//! - [`scenario`]：场景文件
//! - [`sim`]：模拟宿主与主循环
//! - [`report`]：运行报告

pub mod config;
pub mod report;
pub mod scenario;
pub mod sim;

pub use config::{AppConfig, ConfigError};
pub use report::RunReport;
pub use scenario::{Scenario, ScenarioError, ScenarioResult};
pub use sim::{Simulation, SimulatedHost, run_scenario};
