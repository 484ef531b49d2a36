//! 松散类型的选项值
//!
//! `Strings` 是原生字符串列表，`List` 是解析配置文件得到的通用列表，
//! 两者都可以赋给列表类选项，但 `List` 的每个元素都必须是字符串

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// 选项值
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Duration(Duration),
    /// 原生字符串列表
    Strings(Vec<String>),
    /// 通用列表，元素类型任意
    List(Vec<OptionValue>),
    Map(BTreeMap<String, OptionValue>),
}

impl OptionValue {
    /// 值的类型名，用于日志
    pub fn kind(&self) -> &'static str {
        match self {
            OptionValue::Null => "null",
            OptionValue::Bool(_) => "bool",
            OptionValue::Integer(_) => "integer",
            OptionValue::Float(_) => "float",
            OptionValue::String(_) => "string",
            OptionValue::Duration(_) => "duration",
            OptionValue::Strings(_) => "strings",
            OptionValue::List(_) => "list",
            OptionValue::Map(_) => "map",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Null => f.write_str("null"),
            OptionValue::Bool(v) => write!(f, "{v}"),
            OptionValue::Integer(v) => write!(f, "{v}"),
            OptionValue::Float(v) => write!(f, "{v}"),
            OptionValue::String(v) => f.write_str(v),
            OptionValue::Duration(v) => f.write_str(&format_duration(*v)),
            OptionValue::Strings(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    f.write_str(item)?;
                }
                f.write_str("]")
            }
            OptionValue::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            OptionValue::Map(entries) => {
                f.write_str("map[")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{key}:{value}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// 按 `1h2m3s` / `250ms` 的格式输出时长
///
/// 与 Go `time.Duration` 的字符串形式一致，humantime 的输出格式不同
pub fn format_duration(duration: Duration) -> String {
    let nanos = duration.as_nanos();
    if nanos == 0 {
        return "0s".to_string();
    }
    if nanos < 1_000 {
        return format!("{nanos}ns");
    }
    if nanos < 1_000_000 {
        return trim_fraction(nanos as f64 / 1_000.0, "µs");
    }
    if nanos < 1_000_000_000 {
        return trim_fraction(nanos as f64 / 1_000_000.0, "ms");
    }

    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = (total_secs % 60) as f64 + f64::from(duration.subsec_nanos()) / 1e9;
    let secs = trim_fraction(secs, "s");

    if hours > 0 {
        format!("{hours}h{minutes}m{secs}")
    } else if minutes > 0 {
        format!("{minutes}m{secs}")
    } else {
        secs
    }
}

fn trim_fraction(value: f64, unit: &str) -> String {
    let text = format!("{value:.9}");
    let text = text.trim_end_matches('0').trim_end_matches('.');
    format!("{text}{unit}")
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<i32> for OptionValue {
    fn from(v: i32) -> Self {
        OptionValue::Integer(i64::from(v))
    }
}

impl From<i64> for OptionValue {
    fn from(v: i64) -> Self {
        OptionValue::Integer(v)
    }
}

impl From<u16> for OptionValue {
    fn from(v: u16) -> Self {
        OptionValue::Integer(i64::from(v))
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Integer(i64::from(v))
    }
}

impl From<u64> for OptionValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(OptionValue::Integer)
            .unwrap_or(OptionValue::Float(v as f64))
    }
}

impl From<usize> for OptionValue {
    fn from(v: usize) -> Self {
        OptionValue::from(v as u64)
    }
}

impl From<f32> for OptionValue {
    fn from(v: f32) -> Self {
        OptionValue::Float(f64::from(v))
    }
}

impl From<f64> for OptionValue {
    fn from(v: f64) -> Self {
        OptionValue::Float(v)
    }
}

impl From<&str> for OptionValue {
    fn from(v: &str) -> Self {
        OptionValue::String(v.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(v: String) -> Self {
        OptionValue::String(v)
    }
}

impl From<&String> for OptionValue {
    fn from(v: &String) -> Self {
        OptionValue::String(v.clone())
    }
}

impl From<Duration> for OptionValue {
    fn from(v: Duration) -> Self {
        OptionValue::Duration(v)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(v: Vec<String>) -> Self {
        OptionValue::Strings(v)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(v: Vec<&str>) -> Self {
        OptionValue::Strings(v.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for OptionValue {
    fn from(v: [&str; N]) -> Self {
        OptionValue::Strings(v.iter().map(|s| s.to_string()).collect())
    }
}

impl From<Vec<OptionValue>> for OptionValue {
    fn from(v: Vec<OptionValue>) -> Self {
        OptionValue::List(v)
    }
}

impl From<BTreeMap<String, OptionValue>> for OptionValue {
    fn from(v: BTreeMap<String, OptionValue>) -> Self {
        OptionValue::Map(v)
    }
}

impl From<serde_json::Value> for OptionValue {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => OptionValue::Null,
            serde_json::Value::Bool(b) => OptionValue::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => OptionValue::Integer(i),
                None => OptionValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => OptionValue::String(s),
            // 配置文件中的数组总是通用列表
            serde_json::Value::Array(items) => {
                OptionValue::List(items.into_iter().map(OptionValue::from).collect())
            }
            serde_json::Value::Object(entries) => OptionValue::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, OptionValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&serde_json::Value> for OptionValue {
    fn from(v: &serde_json::Value) -> Self {
        OptionValue::from(v.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_arrays_become_generic_lists() {
        let value = OptionValue::from(json!([":5001", 5]));
        assert_eq!(
            value,
            OptionValue::List(vec![
                OptionValue::String(":5001".to_string()),
                OptionValue::Integer(5),
            ])
        );
    }

    #[test]
    fn test_native_lists() {
        assert_eq!(
            OptionValue::from(vec![":5001", ":5002"]),
            OptionValue::Strings(vec![":5001".to_string(), ":5002".to_string()])
        );
        assert_eq!(OptionValue::from([":5001"]).kind(), "strings");
    }

    #[test]
    fn test_display() {
        assert_eq!(OptionValue::from("oh noes").to_string(), "oh noes");
        assert_eq!(OptionValue::from(vec!["a", "b"]).to_string(), "[a b]");
        assert_eq!(
            OptionValue::from(json!({"a": 1})).to_string(),
            "map[a:1]"
        );
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::ZERO), "0s");
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_secs(15)), "15s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
    }
}
