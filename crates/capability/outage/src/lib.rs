//! 停电/断数检测。
//!
//! - [`detector`]：纯算法，输入按设备的历史样本，输出事件列表
//! - [`OutageService`]：从 `HistorySource` 取数后执行检测

pub mod detector;

pub use detector::{
    DetectorConfig, EventSpan, OutageEvent, UNKNOWN_DEVICE, detect, format_duration,
};

use ems_storage::{HistorySource, StorageError, TimeRange};
use std::sync::Arc;
use tracing::{info, warn};

/// 检测服务错误。
#[derive(Debug, thiserror::Error)]
pub enum OutageError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("history source unavailable: {0}")]
    Source(String),
}

impl From<StorageError> for OutageError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::DeviceNotFound(device) => OutageError::DeviceNotFound(device),
            StorageError::Backend(message) => OutageError::Source(message),
        }
    }
}

/// 一次检测请求。未给出的阈值使用服务默认值。
#[derive(Debug, Clone, PartialEq)]
pub struct OutageQuery {
    pub device: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub min_voltage: Option<f64>,
    pub max_gap_minutes: Option<u32>,
}

/// 检测服务。
#[derive(Clone)]
pub struct OutageService {
    source: Arc<dyn HistorySource>,
    defaults: DetectorConfig,
}

impl OutageService {
    pub fn new(source: Arc<dyn HistorySource>, defaults: DetectorConfig) -> Self {
        Self { source, defaults }
    }

    pub async fn detect(&self, query: &OutageQuery) -> Result<Vec<OutageEvent>, OutageError> {
        if query.device.trim().is_empty() {
            return Err(OutageError::InvalidQuery("device is required".to_string()));
        }
        if query.end_ms < query.start_ms {
            return Err(OutageError::InvalidQuery(
                "end must not be before start".to_string(),
            ));
        }
        let config = DetectorConfig {
            min_voltage: query.min_voltage.unwrap_or(self.defaults.min_voltage),
            max_gap_minutes: query.max_gap_minutes.unwrap_or(self.defaults.max_gap_minutes),
            interval_ms: self.defaults.interval_ms,
        };

        let range = TimeRange::new(query.start_ms, query.end_ms);
        let samples = self
            .source
            .fetch_series(Some(&query.device), range)
            .await
            .map_err(|err| {
                warn!(
                    target: "ems.outage",
                    device = %query.device,
                    error = %err,
                    "history_fetch_failed"
                );
                OutageError::from(err)
            })?;

        let events = detect(&samples, &config);
        info!(
            target: "ems.outage",
            device = %query.device,
            samples = samples.len(),
            events = events.len(),
            "outages_detected"
        );
        Ok(events)
    }
}
