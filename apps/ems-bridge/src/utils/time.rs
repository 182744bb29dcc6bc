//! 查询参数中的时间解析。

use chrono::{DateTime, NaiveDate, NaiveDateTime};

/// 解析时间参数为毫秒时间戳。
///
/// 接受纯数字（毫秒）、RFC 3339（`Z` 或偏移量），以及不带时区的
/// `YYYY-MM-DDTHH:MM:SS[.fff]` / `YYYY-MM-DD`（按 UTC 处理）。
pub fn parse_time_param(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if value.bytes().all(|byte| byte.is_ascii_digit()) {
        return value.parse::<i64>().ok();
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(value, format) {
            return Some(parsed.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|parsed| parsed.and_utc().timestamp_millis())
}
