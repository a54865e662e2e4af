//! # Error 模块
//!
//! 定义 frame-sched 中使用的错误类型。
//!
//! 调度核心本身不会把错误抛给调用方：回调 panic 被逐个捕获，
//! 宿主能力缺失时退化为默认值。这里的错误只出现在**构造参数校验**阶段。

use thiserror::Error;

/// 参数校验错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchedError {
    /// 数值不是有限值或超出范围
    #[error("参数 '{name}' 的值无效: {value} - {message}")]
    InvalidValue {
        name: &'static str,
        value: f64,
        message: String,
    },

    /// 无法解析的 root margin 字符串
    #[error("无效的 margin 语法 '{input}': {message}")]
    InvalidMargin { input: String, message: String },

    /// 质量阈值配置不合法
    #[error("质量阈值无效: high_fps ({high}) 必须大于 medium_fps ({medium})")]
    InvalidThresholds { high: f64, medium: f64 },
}

impl SchedError {
    /// 构造 `InvalidValue`
    pub(crate) fn invalid(name: &'static str, value: f64, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            name,
            value,
            message: message.into(),
        }
    }
}

/// Result 类型别名
pub type SchedResult<T> = Result<T, SchedError>;

/// 检查参数为有限的非负数
pub(crate) fn ensure_non_negative(name: &'static str, value: f64) -> SchedResult<f64> {
    if !value.is_finite() {
        return Err(SchedError::invalid(name, value, "必须是有限值"));
    }
    if value < 0.0 {
        return Err(SchedError::invalid(name, value, "不能为负数"));
    }
    Ok(value)
}

/// 检查参数为有限的正数
pub(crate) fn ensure_positive(name: &'static str, value: f64) -> SchedResult<f64> {
    let value = ensure_non_negative(name, value)?;
    if value == 0.0 {
        return Err(SchedError::invalid(name, value, "必须大于 0"));
    }
    Ok(value)
}
