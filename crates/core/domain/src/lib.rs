pub mod data;

pub use data::{
    CanonicalMetric, FanoutEnvelope, HistorySample, InboundMessage, RawRecord, SNAPSHOT_TOPIC,
    Sample, SampleChannel, TopicFilter,
};

/// 快照提供者：为新接入的订阅者生成一次性的追赶帧。
pub trait SnapshotProvider: Send + Sync {
    fn snapshot_envelope(&self) -> FanoutEnvelope;
}

/// 当前 Unix 时间戳（毫秒）。
pub fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}
