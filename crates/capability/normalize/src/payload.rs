//! 报文体解析与字段提取。

use serde_json::{Map, Value};

/// 解析后的报文体。
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON 对象。
    Record(Map<String, Value>),
    /// 非对象 JSON 值；非 JSON 文本按字符串保存。
    Scalar(Value),
}

impl Payload {
    /// 按 UTF-8（非法字节替换）解码后尝试 JSON 解析。
    pub fn parse(bytes: &[u8]) -> Self {
        let text = String::from_utf8_lossy(bytes);
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Payload::Record(map),
            Ok(other) => Payload::Scalar(other),
            Err(_) => Payload::Scalar(Value::String(text.into_owned())),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Payload::Record(map) => Value::Object(map),
            Payload::Scalar(value) => value,
        }
    }
}

/// 读取数值字段；数字字符串同样接受。
pub fn number_field(map: &Map<String, Value>, key: &str) -> Option<f64> {
    match map.get(key)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// 读取毫秒时间戳字段（小数部分截断）。
pub fn timestamp_field(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key)? {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|value| value as i64)),
        Value::String(text) => text.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// 读取字符串字段；数字按十进制文本处理。
pub fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_distinguishes_record_and_scalar() {
        assert!(matches!(Payload::parse(br#"{"a":1}"#), Payload::Record(_)));
        assert_eq!(Payload::parse(b"42"), Payload::Scalar(json!(42)));
        assert_eq!(Payload::parse(b"online"), Payload::Scalar(json!("online")));
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        let payload = Payload::parse(&[0x6f, 0xff, 0x6b]);
        assert_eq!(payload, Payload::Scalar(json!("o\u{fffd}k")));
    }

    #[test]
    fn fields_accept_numeric_strings() {
        let map = json!({"v": "229.5", "ts": 1700000000123.9_f64, "device": 7})
            .as_object()
            .cloned()
            .expect("object");
        assert_eq!(number_field(&map, "v"), Some(229.5));
        assert_eq!(timestamp_field(&map, "ts"), Some(1_700_000_000_123));
        assert_eq!(text_field(&map, "device"), Some("7".to_string()));
        assert_eq!(number_field(&map, "missing"), None);
    }
}
