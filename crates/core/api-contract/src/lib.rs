//! 稳定的 DTO 与 API 响应契约。
//!
//! 快照与检测结果直接以 JSON 返回（前端直接读取字段）；错误统一使用
//! [`ApiResponse`] 封装。

use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 采样查询默认条数。
pub const DEFAULT_SAMPLES_LIMIT: usize = 100;

/// `GET /samples/{channel}` 查询参数。
#[derive(Debug, Default, Deserialize)]
pub struct SamplesQuery {
    pub n: Option<usize>,
}

impl SamplesQuery {
    pub fn limit(&self) -> usize {
        self.n.unwrap_or(DEFAULT_SAMPLES_LIMIT)
    }
}

/// `GET /metrics/power-outages` 查询参数。
///
/// `start`/`end` 为 RFC 3339 时间或毫秒时间戳文本。
#[derive(Debug, Default, Deserialize)]
pub struct PowerOutageQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub device: Option<String>,
    pub min_voltage: Option<f64>,
    pub max_gap_minutes: Option<u32>,
}

/// 健康检查返回结构。
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: String,
    pub broker: String,
    pub base: String,
}

/// 进程计数器与订阅者统计。
#[derive(Debug, Default, Serialize)]
pub struct StatsDto {
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
    pub stream_subscribers: usize,
    pub duplex_subscribers: usize,
    pub duplex_queue_len: usize,
}
