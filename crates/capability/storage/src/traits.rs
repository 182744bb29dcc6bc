//! 存储接口 Trait 定义
//!
//! - HistorySource：历史序列读取（停电检测的数据来源）
//! - TelemetryWriter：设备读数写入（后台持久化队列的落地端）

use crate::error::StorageError;
use crate::models::TimeRange;
use async_trait::async_trait;
use domain::{CanonicalMetric, HistorySample};

/// 历史序列数据源。
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// 读取区间内的样本，按时间升序返回。
    ///
    /// `device` 为设备编码（或 ID 文本）；指定设备不存在时返回
    /// `StorageError::DeviceNotFound`。
    async fn fetch_series(
        &self,
        device: Option<&str>,
        range: TimeRange,
    ) -> Result<Vec<HistorySample>, StorageError>;
}

/// 设备读数写入接口。
#[async_trait]
pub trait TelemetryWriter: Send + Sync {
    /// 批量写入，返回实际写入条数（未知设备的读数被跳过）。
    async fn write_readings(&self, readings: &[CanonicalMetric]) -> Result<usize, StorageError>;
}
