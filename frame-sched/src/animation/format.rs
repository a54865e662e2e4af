//! # Format 模块
//!
//! 动画数值的展示格式：千位分隔符、小数位、前后缀。
//! 纯函数，不属于补间状态。

use serde::{Deserialize, Serialize};

/// 数值格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NumberFormat {
    /// 小数位数
    pub decimals: usize,
    /// 千位分隔符（`None` 表示不分组）
    pub separator: Option<char>,
    /// 小数点
    pub decimal_point: char,
    /// 前缀（如 `"$"`）
    pub prefix: String,
    /// 后缀（如 `"+"`、`"%"`）
    pub suffix: String,
}

impl Default for NumberFormat {
    fn default() -> Self {
        Self {
            decimals: 0,
            separator: Some(','),
            decimal_point: '.',
            prefix: String::new(),
            suffix: String::new(),
        }
    }
}

impl NumberFormat {
    /// 小数位数上限，超出部分在格式化时截断
    pub const MAX_DECIMALS: usize = 20;

    /// 设置小数位数
    pub fn with_decimals(mut self, decimals: usize) -> Self {
        self.decimals = decimals;
        self
    }

    /// 设置千位分隔符
    pub fn with_separator(mut self, separator: Option<char>) -> Self {
        self.separator = separator;
        self
    }

    /// 设置前后缀
    pub fn with_affixes(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    /// 格式化数值
    ///
    /// 非有限值按 0 处理。
    pub fn format(&self, value: f64) -> String {
        let value = if value.is_finite() { value } else { 0.0 };
        let decimals = self.decimals.min(Self::MAX_DECIMALS);
        let digits = format!("{:.*}", decimals, value.abs());
        let (integer, fraction) = match digits.split_once('.') {
            Some((integer, fraction)) => (integer, Some(fraction)),
            None => (digits.as_str(), None),
        };

        // 舍入后为零时不输出负号
        let negative = value < 0.0 && digits.bytes().any(|b| b.is_ascii_digit() && b != b'0');

        let mut out =
            String::with_capacity(digits.len() + self.prefix.len() + self.suffix.len() + 4);
        out.push_str(&self.prefix);
        if negative {
            out.push('-');
        }
        out.push_str(&group_thousands(integer, self.separator));
        if let Some(fraction) = fraction {
            out.push(self.decimal_point);
            out.push_str(fraction);
        }
        out.push_str(&self.suffix);
        out
    }
}

fn group_thousands(integer: &str, separator: Option<char>) -> String {
    let Some(separator) = separator else {
        return integer.to_string();
    };

    let len = integer.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, ch) in integer.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format() {
        let format = NumberFormat::default();
        assert_eq!(format.format(0.0), "0");
        assert_eq!(format.format(999.0), "999");
        assert_eq!(format.format(1000.0), "1,000");
        assert_eq!(format.format(1234567.4), "1,234,567");
    }

    #[test]
    fn test_decimals_and_affixes() {
        let format = NumberFormat::default()
            .with_decimals(2)
            .with_affixes("$", "+");
        assert_eq!(format.format(1234.567), "$1,234.57+");
        assert_eq!(format.format(-42.0), "$-42.00+");
    }

    #[test]
    fn test_decimals_are_capped() {
        let format = NumberFormat::default().with_decimals(500);
        let text = format.format(1.5);
        let fraction = text.split_once('.').map(|(_, f)| f.len());
        assert_eq!(fraction, Some(NumberFormat::MAX_DECIMALS));
        assert!(text.starts_with("1.5"));
    }

    #[test]
    fn test_without_separator() {
        let format = NumberFormat::default().with_separator(None);
        assert_eq!(format.format(1_000_000.0), "1000000");
    }

    #[test]
    fn test_negative_zero_after_rounding() {
        let format = NumberFormat::default();
        assert_eq!(format.format(-0.2), "0");
        assert_eq!(format.format(-0.0), "0");
    }

    #[test]
    fn test_non_finite() {
        assert_eq!(NumberFormat::default().format(f64::NAN), "0");
    }

    #[test]
    fn test_custom_separator_deserialize() {
        let format: NumberFormat =
            serde_json::from_str(r#"{"separator":" ","decimal_point":",","decimals":1}"#).unwrap();
        assert_eq!(format.format(12345.67), "12 345,7");
    }
}
