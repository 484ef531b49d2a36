//! 选项值类型转换
//!
//! 返回 `Result<T, String>`，错误文本由调用方包装成带选项名的 `QueueError`

use std::time::Duration;

use super::value::OptionValue;

/// 转换为字符串列表
///
/// 接受原生字符串列表，或每个元素都是字符串的通用列表（解析配置文件得到的形态）
pub fn strings(value: &OptionValue) -> Result<Vec<String>, String> {
    match value {
        OptionValue::Strings(items) => Ok(items.clone()),
        OptionValue::List(items) => items
            .iter()
            .map(|item| match item {
                OptionValue::String(s) => Ok(s.clone()),
                other => Err(format!("string expected, got {other}")),
            })
            .collect(),
        _ => Err("strings expected".to_string()),
    }
}

/// 转换为字符串
pub fn string(value: &OptionValue) -> Result<String, String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| format!("string expected, got {value}"))
}

/// 转换为正整数
pub fn positive_int(value: &OptionValue) -> Result<usize, String> {
    match value {
        OptionValue::Integer(v) if *v > 0 => usize::try_from(*v).map_err(|e| e.to_string()),
        other => Err(format!("positive integer expected, got {other}")),
    }
}

/// 转换为整数，字符串按十进制解析
pub fn integer(value: &OptionValue) -> Result<i64, String> {
    match value {
        OptionValue::Integer(v) => Ok(*v),
        OptionValue::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(*v as i64),
        OptionValue::Float(v) => Err(format!("{v} is not an integer")),
        OptionValue::String(s) => s.parse::<i64>().map_err(|e| e.to_string()),
        other => Err(format!("integer expected, got {}", other.kind())),
    }
}

/// 转换为浮点数
pub fn float(value: &OptionValue) -> Result<f64, String> {
    match value {
        OptionValue::Integer(v) => Ok(*v as f64),
        OptionValue::Float(v) => Ok(*v),
        OptionValue::String(s) => s.parse::<f64>().map_err(|e| e.to_string()),
        other => Err(format!("float expected, got {}", other.kind())),
    }
}

/// 转换为布尔值
pub fn boolean(value: &OptionValue) -> Result<bool, String> {
    match value {
        OptionValue::Bool(v) => Ok(*v),
        OptionValue::Integer(0) => Ok(false),
        OptionValue::Integer(1) => Ok(true),
        OptionValue::String(s) => match s.as_str() {
            "1" | "t" | "T" | "true" | "TRUE" | "True" => Ok(true),
            "0" | "f" | "F" | "false" | "FALSE" | "False" => Ok(false),
            _ => Err(format!("invalid boolean {s:?}")),
        },
        other => Err(format!("bool expected, got {}", other.kind())),
    }
}

/// 转换为时长
///
/// 整数按毫秒计算；字符串使用 `15s`、`1m30s`、`250ms` 格式
pub fn duration(value: &OptionValue) -> Result<Duration, String> {
    match value {
        OptionValue::Duration(v) => Ok(*v),
        OptionValue::Integer(v) => u64::try_from(*v)
            .map(Duration::from_millis)
            .map_err(|_| format!("negative duration {v}")),
        OptionValue::Float(v) => {
            Duration::try_from_secs_f64(*v / 1000.0).map_err(|_| format!("invalid duration {v}"))
        }
        OptionValue::String(s) => parse_duration(s),
        other => Err(format!("duration expected, got {}", other.kind())),
    }
}

/// 转换为普通文本，数字与布尔值会被格式化
pub fn text(value: &OptionValue) -> Result<String, String> {
    match value {
        OptionValue::String(s) => Ok(s.clone()),
        OptionValue::Integer(_) | OptionValue::Float(_) | OptionValue::Bool(_) => {
            Ok(value.to_string())
        }
        other => Err(format!("string expected, got {}", other.kind())),
    }
}

/// 解析 `1h15m30.5s` 形式的时长字符串
///
/// 必须兼容 Go `time.ParseDuration` 语法（小数单位如 `1.5h`），humantime 不接受
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let invalid = || format!("invalid duration {input:?}");

    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() || input.starts_with('-') {
        return Err(invalid());
    }

    let mut rest = input.strip_prefix('+').unwrap_or(input);
    let mut total = 0f64;

    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("missing unit in duration {input:?}"))?;
        if number_len == 0 {
            return Err(invalid());
        }
        let number: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            unit => return Err(format!("unknown unit {unit:?} in duration {input:?}")),
        };
        rest = &rest[unit_len..];
        total += number * nanos_per_unit;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(Duration::from_nanos(total.round() as u64))
}
