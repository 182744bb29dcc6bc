//! Topic 布局与匹配。
//!
//! - 设备状态：`esp/energia/{device_id}/state`（订阅模式中设备段为 `+`）
//! - 旧版单指标：`{base}/metrics/vrms|irms|s_apparent`
//! - 旧版汇总：`{base}/telemetry`
//! - 瞬时采样：`{base}/samples/voltage|current`
//! - 状态：`{base}/status`

use domain::{SampleChannel, TopicFilter};

/// 旧版单指标 topic 对应的字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyMetric {
    Vrms,
    Irms,
    SApparent,
}

/// topic 分类结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    DeviceState { device_id: String },
    LegacyMetric(LegacyMetric),
    LegacyTelemetry,
    Samples(SampleChannel),
    Status,
}

/// 带单层通配 `+` 的 topic 模式。
#[derive(Debug, Clone)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<String>,
}

impl TopicPattern {
    pub fn new(pattern: &str) -> Self {
        let raw = pattern.trim_matches('/').to_string();
        let segments = raw.split('/').map(str::to_string).collect();
        Self { raw, segments }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// 匹配 topic，返回第一个 `+` 段捕获的值。
    pub fn capture(&self, topic: &str) -> Option<String> {
        let parts: Vec<&str> = topic.trim_matches('/').split('/').collect();
        if parts.len() != self.segments.len() {
            return None;
        }
        let mut captured = None;
        for (segment, part) in self.segments.iter().zip(parts) {
            if segment == "+" {
                if part.is_empty() {
                    return None;
                }
                captured.get_or_insert_with(|| part.to_string());
            } else if segment != part {
                return None;
            }
        }
        captured
    }
}

/// 全部订阅 topic 的布局。
#[derive(Debug, Clone)]
pub struct TopicLayout {
    device_state: TopicPattern,
    base: String,
}

impl TopicLayout {
    pub fn new(device_state_pattern: &str, base: &str) -> Self {
        Self {
            device_state: TopicPattern::new(device_state_pattern),
            base: base.trim_matches('/').to_string(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// 旧版汇总遥测 topic（设备状态的兼容别名也发往此 topic）。
    pub fn telemetry_topic(&self) -> String {
        format!("{}/telemetry", self.base)
    }

    pub fn legacy_metric_topic(&self, metric: LegacyMetric) -> String {
        let name = match metric {
            LegacyMetric::Vrms => "vrms",
            LegacyMetric::Irms => "irms",
            LegacyMetric::SApparent => "s_apparent",
        };
        format!("{}/metrics/{}", self.base, name)
    }

    pub fn samples_topic(&self, channel: SampleChannel) -> String {
        format!("{}/samples/{}", self.base, channel.as_str())
    }

    pub fn status_topic(&self) -> String {
        format!("{}/status", self.base)
    }

    pub fn classify(&self, topic: &str) -> Option<TopicKind> {
        if let Some(device_id) = self.device_state.capture(topic) {
            return Some(TopicKind::DeviceState { device_id });
        }
        let rest = topic
            .trim_matches('/')
            .strip_prefix(self.base.as_str())?
            .strip_prefix('/')?;
        let kind = match rest {
            "metrics/vrms" => TopicKind::LegacyMetric(LegacyMetric::Vrms),
            "metrics/irms" => TopicKind::LegacyMetric(LegacyMetric::Irms),
            "metrics/s_apparent" => TopicKind::LegacyMetric(LegacyMetric::SApparent),
            "telemetry" => TopicKind::LegacyTelemetry,
            "samples/voltage" => TopicKind::Samples(SampleChannel::Voltage),
            "samples/current" => TopicKind::Samples(SampleChannel::Current),
            "status" => TopicKind::Status,
            _ => return None,
        };
        Some(kind)
    }

    /// 需要订阅的 topic 列表；瞬时采样量大，使用 QoS 0。
    pub fn subscriptions(&self) -> Vec<TopicFilter> {
        let filter = |filter: String, qos: u8| TopicFilter { filter, qos };
        vec![
            filter(self.device_state.as_str().to_string(), 1),
            filter(self.legacy_metric_topic(LegacyMetric::Vrms), 1),
            filter(self.legacy_metric_topic(LegacyMetric::Irms), 1),
            filter(self.legacy_metric_topic(LegacyMetric::SApparent), 1),
            filter(self.telemetry_topic(), 1),
            filter(self.samples_topic(SampleChannel::Voltage), 0),
            filter(self.samples_topic(SampleChannel::Current), 0),
            filter(self.status_topic(), 1),
        ]
    }
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self::new("esp/energia/+/state", "tesis/iot/esp32")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pattern_captures_device_segment() {
        let pattern = TopicPattern::new("esp/energia/+/state");
        assert_eq!(
            pattern.capture("esp/energia/E2641D44/state"),
            Some("E2641D44".to_string())
        );
        assert_eq!(pattern.capture("esp/energia/E2641D44/other"), None);
        assert_eq!(pattern.capture("esp/energia/state"), None);
        assert_eq!(pattern.capture("esp/energia//state"), None);
    }

    #[test]
    fn layout_classifies_legacy_topics() {
        let layout = TopicLayout::default();
        assert_eq!(
            layout.classify("tesis/iot/esp32/metrics/vrms"),
            Some(TopicKind::LegacyMetric(LegacyMetric::Vrms))
        );
        assert_eq!(
            layout.classify("tesis/iot/esp32/telemetry"),
            Some(TopicKind::LegacyTelemetry)
        );
        assert_eq!(
            layout.classify("tesis/iot/esp32/samples/current"),
            Some(TopicKind::Samples(SampleChannel::Current))
        );
        assert_eq!(layout.classify("tesis/iot/esp32/status"), Some(TopicKind::Status));
        assert_eq!(layout.classify("tesis/iot/esp32/unknown"), None);
        assert_eq!(layout.classify("tesis/iot/esp32telemetry"), None);
        assert_eq!(layout.classify("other/topic"), None);
    }

    #[test]
    fn subscriptions_cover_all_topics() {
        let layout = TopicLayout::default();
        let subscriptions = layout.subscriptions();
        assert_eq!(subscriptions.len(), 8);
        assert_eq!(subscriptions[0].filter, "esp/energia/+/state");
        let samples: Vec<_> = subscriptions.iter().filter(|item| item.qos == 0).collect();
        assert_eq!(samples.len(), 2);
    }
}
