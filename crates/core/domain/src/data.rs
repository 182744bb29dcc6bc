use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 快照帧使用的 topic 标签。
pub const SNAPSHOT_TOPIC: &str = "snapshot";

/// 传输层投递的原始消息。
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub received_at_ms: i64,
}

/// MQTT 订阅过滤器（topic 模式 + QoS 等级）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: u8,
}

/// 规范化后的电能指标（进程内唯一的“当前值”）。
///
/// JSON 字段名沿用现有前端读取的规范名（`vrms`、`irms`、`s_apparent_va` 等）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetric {
    #[serde(rename = "vrms")]
    pub voltage: Option<f64>,
    #[serde(rename = "irms")]
    pub current: Option<f64>,
    #[serde(rename = "s_apparent_va")]
    pub apparent_power: Option<f64>,
    #[serde(rename = "potencia_activa")]
    pub active_power: Option<f64>,
    #[serde(rename = "factor_potencia")]
    pub power_factor: Option<f64>,
    pub device: Option<String>,
    #[serde(rename = "ts")]
    pub ts_ms: Option<i64>,
}

/// 最近一次汇总遥测报文（原样保存，保留未映射字段）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub Map<String, Value>);

impl RawRecord {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// 采样通道。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleChannel {
    Voltage,
    Current,
}

impl SampleChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleChannel::Voltage => "voltage",
            SampleChannel::Current => "current",
        }
    }

    /// 解析 URL 路径中的通道名。
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "voltage" => Some(SampleChannel::Voltage),
            "current" => Some(SampleChannel::Current),
            _ => None,
        }
    }
}

/// 单个瞬时采样点。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(rename = "ts")]
    pub ts_ms: i64,
    pub value: f64,
}

/// 扇出信封：一个带 topic 标签的更新单元。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    pub topic: String,
    pub data: Value,
}

impl FanoutEnvelope {
    pub fn new(topic: impl Into<String>, data: Value) -> Self {
        Self {
            topic: topic.into(),
            data,
        }
    }

    pub fn is_snapshot(&self) -> bool {
        self.topic == SNAPSHOT_TOPIC
    }
}

/// 历史序列中的一行。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    #[serde(rename = "ts")]
    pub ts_ms: i64,
    pub device: Option<String>,
    #[serde(rename = "vrms")]
    pub voltage: Option<f64>,
    #[serde(rename = "irms")]
    pub current: Option<f64>,
    #[serde(rename = "s_apparent_va")]
    pub apparent_power: Option<f64>,
    #[serde(rename = "potencia_activa")]
    pub active_power: Option<f64>,
    #[serde(rename = "factor_potencia")]
    pub power_factor: Option<f64>,
}

impl HistorySample {
    /// 仅含时间戳与电压的样本（检测算法的最小输入）。
    pub fn voltage_at(ts_ms: i64, voltage: Option<f64>) -> Self {
        Self {
            ts_ms,
            voltage,
            ..Self::default()
        }
    }
}
