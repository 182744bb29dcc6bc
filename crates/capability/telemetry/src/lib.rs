//! 追踪、请求 ID 生成与进程级计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub inbound_messages: u64,
    pub normalized_updates: u64,
    pub dropped_malformed: u64,
    pub dropped_unmapped: u64,
    pub envelopes_published: u64,
    pub duplex_dropped_oldest: u64,
    pub stream_dropped_newest: u64,
    pub subscriber_send_failures: u64,
    pub mqtt_reconnects: u64,
    pub persist_success: u64,
    pub persist_failure: u64,
    pub persist_backpressure: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    inbound_messages: AtomicU64,
    normalized_updates: AtomicU64,
    dropped_malformed: AtomicU64,
    dropped_unmapped: AtomicU64,
    envelopes_published: AtomicU64,
    duplex_dropped_oldest: AtomicU64,
    stream_dropped_newest: AtomicU64,
    subscriber_send_failures: AtomicU64,
    mqtt_reconnects: AtomicU64,
    persist_success: AtomicU64,
    persist_failure: AtomicU64,
    persist_backpressure: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            inbound_messages: AtomicU64::new(0),
            normalized_updates: AtomicU64::new(0),
            dropped_malformed: AtomicU64::new(0),
            dropped_unmapped: AtomicU64::new(0),
            envelopes_published: AtomicU64::new(0),
            duplex_dropped_oldest: AtomicU64::new(0),
            stream_dropped_newest: AtomicU64::new(0),
            subscriber_send_failures: AtomicU64::new(0),
            mqtt_reconnects: AtomicU64::new(0),
            persist_success: AtomicU64::new(0),
            persist_failure: AtomicU64::new(0),
            persist_backpressure: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            inbound_messages: self.inbound_messages.load(Ordering::Relaxed),
            normalized_updates: self.normalized_updates.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unmapped: self.dropped_unmapped.load(Ordering::Relaxed),
            envelopes_published: self.envelopes_published.load(Ordering::Relaxed),
            duplex_dropped_oldest: self.duplex_dropped_oldest.load(Ordering::Relaxed),
            stream_dropped_newest: self.stream_dropped_newest.load(Ordering::Relaxed),
            subscriber_send_failures: self.subscriber_send_failures.load(Ordering::Relaxed),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
            persist_success: self.persist_success.load(Ordering::Relaxed),
            persist_failure: self.persist_failure.load(Ordering::Relaxed),
            persist_backpressure: self.persist_backpressure.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录传输层消息接收次数。
pub fn record_inbound_message() {
    metrics().inbound_messages.fetch_add(1, Ordering::Relaxed);
}

/// 记录规整成功次数。
pub fn record_normalized_update() {
    metrics().normalized_updates.fetch_add(1, Ordering::Relaxed);
}

/// 记录畸形报文丢弃次数。
pub fn record_dropped_malformed() {
    metrics().dropped_malformed.fetch_add(1, Ordering::Relaxed);
}

/// 记录未映射 topic 丢弃次数。
pub fn record_dropped_unmapped() {
    metrics().dropped_unmapped.fetch_add(1, Ordering::Relaxed);
}

/// 记录扇出信封发布次数。
pub fn record_envelope_published() {
    metrics().envelopes_published.fetch_add(1, Ordering::Relaxed);
}

/// 记录 WebSocket 广播队列溢出（丢弃最旧）次数。
pub fn record_duplex_dropped_oldest() {
    metrics()
        .duplex_dropped_oldest
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 SSE 通道已满（丢弃最新）次数。
pub fn record_stream_dropped_newest() {
    metrics()
        .stream_dropped_newest
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录订阅者发送失败次数。
pub fn record_subscriber_send_failure() {
    metrics()
        .subscriber_send_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录 MQTT 重连次数。
pub fn record_mqtt_reconnect() {
    metrics().mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化写入成功条数。
pub fn record_persist_success(count: u64) {
    metrics().persist_success.fetch_add(count, Ordering::Relaxed);
}

/// 记录持久化写入失败次数。
pub fn record_persist_failure() {
    metrics().persist_failure.fetch_add(1, Ordering::Relaxed);
}

/// 记录持久化队列背压次数。
pub fn record_persist_backpressure() {
    metrics()
        .persist_backpressure
        .fetch_add(1, Ordering::Relaxed);
}
