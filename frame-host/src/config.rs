//! # Config 模块
//!
//! 宿主配置管理，集中管理所有配置项。
//!
//! ## 配置优先级
//!
//! 1. 命令行参数（最高）
//! 2. 配置文件 (config.json)
//! 3. 默认值（最低）

use std::fs;
use std::path::Path;

use frame_sched::{MonitorOptions, ScrollSmootherOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// 应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// 模拟帧源
    #[serde(default)]
    pub clock: ClockConfig,

    /// 性能监视器
    #[serde(default)]
    pub monitor: MonitorOptions,

    /// 平滑滚动
    #[serde(default)]
    pub scroll: ScrollSmootherOptions,

    /// 模拟环境
    #[serde(default)]
    pub simulation: SimulationConfig,

    /// 调试配置
    #[serde(default)]
    pub debug: DebugConfig,
}

/// 模拟帧源配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClockConfig {
    /// 目标帧率
    #[serde(default = "default_fps")]
    pub fps: f64,

    /// 帧间隔抖动上限（毫秒），0 表示完全均匀
    #[serde(default)]
    pub jitter_ms: f64,

    /// 每 N 帧丢一帧（模拟掉帧），0 表示不丢帧
    #[serde(default)]
    pub drop_every: u64,
}

/// 模拟环境配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// 抖动序列的种子
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// 模拟的堆内存占用（MB），不配置表示宿主不提供内存信息
    #[serde(default)]
    pub heap_mb: Option<f64>,
}

/// 调试配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugConfig {
    /// 日志级别（trace/debug/info/warn/error）
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// 每个遥测窗口关闭时输出一行日志
    #[serde(default)]
    pub log_telemetry: bool,
}

// 默认值函数
fn default_fps() -> f64 {
    60.0
}

fn default_seed() -> u64 {
    0x5eed
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fps: default_fps(),
            jitter_ms: 0.0,
            drop_every: 0,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            heap_mb: None,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_telemetry: false,
        }
    }
}

impl AppConfig {
    /// 加载配置文件
    ///
    /// 如果文件不存在或解析失败，返回默认配置并输出警告。
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::try_load(path) {
            Ok(config) => {
                info!(path = ?path, "配置文件加载成功");
                config
            }
            Err(e) => {
                warn!(error = %e, "配置文件不可用，使用默认配置");
                Self::default()
            }
        }
    }

    /// 加载配置文件，失败时返回原因而不输出日志
    ///
    /// 日志系统尚未初始化时使用，由调用方决定何时报告。
    pub fn try_load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::IoError(format!(
                "配置文件不存在: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        serde_json::from_str(&content)
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))
    }

    /// 保存配置到文件
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// 序列化为格式化的 JSON
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializationFailed(e.to_string()))
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.clock.fps.is_finite() || self.clock.fps <= 0.0 || self.clock.fps > 1000.0 {
            return Err(ConfigError::ValidationFailed(format!(
                "帧率必须在 (0, 1000] 之间: {}",
                self.clock.fps
            )));
        }

        let interval = 1000.0 / self.clock.fps;
        if !self.clock.jitter_ms.is_finite()
            || self.clock.jitter_ms < 0.0
            || self.clock.jitter_ms >= interval
        {
            return Err(ConfigError::ValidationFailed(format!(
                "帧间隔抖动必须在 [0, {interval:.2}) 之间: {}",
                self.clock.jitter_ms
            )));
        }

        if let Some(heap_mb) = self.simulation.heap_mb
            && (!heap_mb.is_finite() || heap_mb < 0.0)
        {
            return Err(ConfigError::ValidationFailed(format!(
                "模拟堆内存不能为负数: {heap_mb}"
            )));
        }

        self.log_level()?;

        self.monitor
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;
        self.scroll
            .validate()
            .map_err(|e| ConfigError::ValidationFailed(e.to_string()))?;

        Ok(())
    }

    /// 解析日志级别
    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.debug.log_level.parse().map_err(|_| {
            ConfigError::ValidationFailed(format!("未知的日志级别: {}", self.debug.log_level))
        })
    }
}

/// 配置错误
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    /// 序列化失败
    #[error("配置序列化失败: {0}")]
    SerializationFailed(String),
    /// IO 错误
    #[error("配置 IO 错误: {0}")]
    IoError(String),
    /// 验证失败
    #[error("配置验证失败: {0}")]
    ValidationFailed(String),
}
