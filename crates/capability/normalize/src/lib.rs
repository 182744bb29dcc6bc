//! 报文规整：topic 分类 -> 解码为更新 -> 写入实时状态并生成扇出信封。
//!
//! `decode` 为纯函数，不触碰状态；`apply` 在一次加锁内完成状态修改。

pub mod payload;
pub mod topic;

pub use payload::Payload;
pub use topic::{LegacyMetric, TopicKind, TopicLayout, TopicPattern};

use domain::{CanonicalMetric, FanoutEnvelope, InboundMessage, RawRecord, Sample, SampleChannel};
use ems_realtime::StateStore;
use payload::{number_field, text_field, timestamp_field};
use serde_json::{Map, Value};
use std::sync::Arc;

/// 规整错误。
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("unmapped topic: {0}")]
    UnmappedTopic(String),
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },
}

impl NormalizeError {
    fn malformed(topic: &str, reason: &str) -> Self {
        NormalizeError::MalformedPayload {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// 设备状态报文中的一次完整读数。
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReading {
    pub device: String,
    pub ts_ms: i64,
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub apparent_power: Option<f64>,
    pub active_power: Option<f64>,
    pub power_factor: Option<f64>,
}

impl DeviceReading {
    pub fn to_metric(&self) -> CanonicalMetric {
        CanonicalMetric {
            voltage: self.voltage,
            current: self.current,
            apparent_power: self.apparent_power,
            active_power: self.active_power,
            power_factor: self.power_factor,
            device: Some(self.device.clone()),
            ts_ms: Some(self.ts_ms),
        }
    }
}

/// 解码后的更新（尚未写入状态）。
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    DeviceState {
        topic: String,
        reading: DeviceReading,
    },
    /// `value` 缺失或非数值时为 `None`，对应字段随之清空。
    LegacyMetric {
        topic: String,
        metric: LegacyMetric,
        value: Option<f64>,
        ts_ms: i64,
        raw: Map<String, Value>,
    },
    Consolidated {
        topic: String,
        record: Map<String, Value>,
    },
    Sample {
        topic: String,
        channel: SampleChannel,
        sample: Option<Sample>,
        raw: Value,
    },
    Status {
        topic: String,
        raw: Value,
    },
}

/// 一次规整的产出。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub envelopes: Vec<FanoutEnvelope>,
    /// 完整设备读数（仅设备状态报文产生），供持久化使用。
    pub reading: Option<CanonicalMetric>,
}

/// 报文规整器。
#[derive(Clone)]
pub struct Normalizer {
    layout: TopicLayout,
    store: Arc<StateStore>,
}

impl Normalizer {
    pub fn new(layout: TopicLayout, store: Arc<StateStore>) -> Self {
        Self { layout, store }
    }

    pub fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    pub fn normalize(&self, message: InboundMessage) -> Result<Normalized, NormalizeError> {
        let update = self.decode(&message)?;
        Ok(self.apply(update))
    }

    /// 将原始消息解码为更新。
    pub fn decode(&self, message: &InboundMessage) -> Result<Update, NormalizeError> {
        let topic = message.topic.as_str();
        let kind = self
            .layout
            .classify(topic)
            .ok_or_else(|| NormalizeError::UnmappedTopic(topic.to_string()))?;
        let payload = Payload::parse(&message.payload);

        match kind {
            TopicKind::DeviceState { device_id } => {
                let Payload::Record(map) = payload else {
                    return Err(NormalizeError::malformed(topic, "expected JSON object"));
                };
                let reading = DeviceReading {
                    device: text_field(&map, "device").unwrap_or(device_id),
                    ts_ms: timestamp_field(&map, "ts").unwrap_or(message.received_at_ms),
                    voltage: number_field(&map, "V"),
                    current: number_field(&map, "I"),
                    apparent_power: number_field(&map, "S"),
                    active_power: number_field(&map, "P"),
                    power_factor: number_field(&map, "PF"),
                };
                Ok(Update::DeviceState {
                    topic: topic.to_string(),
                    reading,
                })
            }
            TopicKind::LegacyMetric(metric) => {
                let Payload::Record(map) = payload else {
                    return Err(NormalizeError::malformed(topic, "expected JSON object"));
                };
                let value = number_field(&map, "value");
                let ts_ms = timestamp_field(&map, "ts").unwrap_or(message.received_at_ms);
                Ok(Update::LegacyMetric {
                    topic: topic.to_string(),
                    metric,
                    value,
                    ts_ms,
                    raw: map,
                })
            }
            TopicKind::LegacyTelemetry => {
                let Payload::Record(record) = payload else {
                    return Err(NormalizeError::malformed(topic, "expected JSON object"));
                };
                Ok(Update::Consolidated {
                    topic: topic.to_string(),
                    record,
                })
            }
            TopicKind::Samples(channel) => {
                let sample = match &payload {
                    Payload::Record(map) => {
                        let key = match channel {
                            SampleChannel::Voltage => "v",
                            SampleChannel::Current => "i",
                        };
                        number_field(map, key)
                            .or_else(|| number_field(map, "value"))
                            .map(|value| Sample {
                                ts_ms: timestamp_field(map, "ts")
                                    .unwrap_or(message.received_at_ms),
                                value,
                            })
                    }
                    Payload::Scalar(_) => None,
                };
                Ok(Update::Sample {
                    topic: topic.to_string(),
                    channel,
                    sample,
                    raw: payload.into_value(),
                })
            }
            TopicKind::Status => Ok(Update::Status {
                topic: topic.to_string(),
                raw: payload.into_value(),
            }),
        }
    }

    /// 将更新写入实时状态，返回需要扇出的信封。
    pub fn apply(&self, update: Update) -> Normalized {
        match update {
            Update::DeviceState { topic, reading } => {
                let metric = reading.to_metric();
                let data = serde_json::to_value(&metric).unwrap_or_default();
                let record = match &data {
                    Value::Object(map) => RawRecord(map.clone()),
                    _ => RawRecord::default(),
                };
                self.store.update(|state| {
                    state.metric = metric.clone();
                    state.raw = record;
                });
                Normalized {
                    envelopes: vec![
                        FanoutEnvelope::new(topic, data.clone()),
                        FanoutEnvelope::new(self.layout.telemetry_topic(), data),
                    ],
                    reading: Some(metric),
                }
            }
            Update::LegacyMetric {
                topic,
                metric,
                value,
                ts_ms,
                raw,
            } => {
                self.store.update(|state| {
                    let slot = match metric {
                        LegacyMetric::Vrms => &mut state.metric.voltage,
                        LegacyMetric::Irms => &mut state.metric.current,
                        LegacyMetric::SApparent => &mut state.metric.apparent_power,
                    };
                    *slot = value;
                    state.metric.ts_ms = Some(ts_ms);
                });
                passthrough(topic, Value::Object(raw))
            }
            Update::Consolidated { topic, record } => {
                self.store.update(|state| {
                    backfill(&mut state.metric, &record);
                    state.raw = RawRecord(record.clone());
                });
                passthrough(topic, Value::Object(record))
            }
            Update::Sample {
                topic,
                channel,
                sample,
                raw,
            } => {
                if let Some(sample) = sample {
                    self.store
                        .update(|state| state.buffer_mut(channel).push(sample));
                }
                passthrough(topic, raw)
            }
            Update::Status { topic, raw } => passthrough(topic, raw),
        }
    }
}

fn passthrough(topic: String, data: Value) -> Normalized {
    Normalized {
        envelopes: vec![FanoutEnvelope::new(topic, data)],
        reading: None,
    }
}

// 汇总报文只覆盖其中出现的规范字段，缺失字段保留原值。
fn backfill(metric: &mut CanonicalMetric, record: &Map<String, Value>) {
    let fields = [
        ("vrms", &mut metric.voltage),
        ("irms", &mut metric.current),
        ("s_apparent_va", &mut metric.apparent_power),
        ("potencia_activa", &mut metric.active_power),
        ("factor_potencia", &mut metric.power_factor),
    ];
    for (key, slot) in fields {
        if let Some(value) = number_field(record, key) {
            *slot = Some(value);
        }
    }
    if let Some(device) = text_field(record, "device") {
        metric.device = Some(device);
    }
    if let Some(ts_ms) = timestamp_field(record, "ts") {
        metric.ts_ms = Some(ts_ms);
    }
}
