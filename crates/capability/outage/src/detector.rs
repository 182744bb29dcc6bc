//! 停电与断数检测算法（单次前向扫描）。

use chrono::{DateTime, SecondsFormat, Utc};
use domain::HistorySample;
use serde::Serialize;

/// 设备缺失时的占位名。
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

/// 检测参数。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// 低于该电压视为停电。
    pub min_voltage: f64,
    /// 相邻样本间隔超过 `max_gap_minutes × interval_ms` 视为断数。
    pub max_gap_minutes: u32,
    /// 名义采样间隔（毫秒）。
    pub interval_ms: i64,
}

impl DetectorConfig {
    pub fn gap_limit_ms(&self) -> i64 {
        i64::from(self.max_gap_minutes).saturating_mul(self.interval_ms)
    }

    fn below_threshold(&self, sample: &HistorySample) -> Option<f64> {
        sample.voltage.filter(|voltage| *voltage < self.min_voltage)
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            min_voltage: 50.0,
            max_gap_minutes: 10,
            interval_ms: 60_000,
        }
    }
}

/// 事件的时间跨度与公共字段。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventSpan {
    pub start: String,
    pub end: String,
    pub start_ts: i64,
    pub end_ts: i64,
    pub duration_seconds: f64,
    pub duration_formatted: String,
    pub device: String,
}

impl EventSpan {
    pub fn new(start_ts: i64, end_ts: i64, device: Option<&str>) -> Self {
        let duration_seconds = end_ts.saturating_sub(start_ts) as f64 / 1000.0;
        Self {
            start: rfc3339(start_ts),
            end: rfc3339(end_ts),
            start_ts,
            end_ts,
            duration_seconds,
            duration_formatted: format_duration(duration_seconds),
            device: device.unwrap_or(UNKNOWN_DEVICE).to_string(),
        }
    }
}

/// 检测事件。
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutageEvent {
    PowerOutage {
        #[serde(flatten)]
        span: EventSpan,
        min_voltage: f64,
        max_voltage: f64,
        data_points: usize,
    },
    NoData {
        #[serde(flatten)]
        span: EventSpan,
        gap_minutes: f64,
    },
}

impl OutageEvent {
    pub fn span(&self) -> &EventSpan {
        match self {
            OutageEvent::PowerOutage { span, .. } | OutageEvent::NoData { span, .. } => span,
        }
    }

    pub fn is_power_outage(&self) -> bool {
        matches!(self, OutageEvent::PowerOutage { .. })
    }
}

/// 扫描样本序列，返回停电与断数事件。
///
/// 连续低压样本（相邻间隔不超过断数阈值）合并为一次停电；停电段结束后从段后
/// 第一个样本继续扫描。电压缺失的样本不算低压，但仍参与断数判断。
pub fn detect(samples: &[HistorySample], config: &DetectorConfig) -> Vec<OutageEvent> {
    let mut sorted: Vec<&HistorySample> = samples.iter().collect();
    sorted.sort_by_key(|sample| sample.ts_ms);

    let gap_limit = config.gap_limit_ms();
    let mut events = Vec::new();
    let mut i = 0;
    while i < sorted.len() {
        let current = sorted[i];
        if let Some(voltage) = config.below_threshold(current) {
            let (mut min, mut max) = (voltage, voltage);
            let mut j = i + 1;
            while j < sorted.len() {
                let next = sorted[j];
                let Some(next_voltage) = config.below_threshold(next) else {
                    break;
                };
                if next.ts_ms.saturating_sub(sorted[j - 1].ts_ms) > gap_limit {
                    break;
                }
                min = min.min(next_voltage);
                max = max.max(next_voltage);
                j += 1;
            }
            let last = sorted[j - 1];
            events.push(OutageEvent::PowerOutage {
                span: EventSpan::new(current.ts_ms, last.ts_ms, current.device.as_deref()),
                min_voltage: round_to(min, 2),
                max_voltage: round_to(max, 2),
                data_points: j - i,
            });
            i = j;
            continue;
        }

        if let Some(next) = sorted.get(i + 1) {
            let gap_ms = next.ts_ms.saturating_sub(current.ts_ms);
            if gap_ms > gap_limit {
                let span = EventSpan::new(current.ts_ms, next.ts_ms, current.device.as_deref());
                let gap_minutes = round_to(span.duration_seconds / 60.0, 1);
                events.push(OutageEvent::NoData { span, gap_minutes });
            }
        }
        i += 1;
    }
    events
}

/// 秒数渲染为 `"{s}s"`、`"{m}m {s}s"` 或 `"{h}h {m}m {s}s"`。
pub fn format_duration(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    if seconds < 60.0 {
        format!("{}s", total)
    } else if seconds < 3600.0 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m {}s", total / 3600, (total % 3600) / 60, total % 60)
    }
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

fn rfc3339(ts_ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ts_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))
        .unwrap_or_default()
}
