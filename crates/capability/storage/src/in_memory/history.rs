//! 历史序列内存实现

use crate::error::StorageError;
use crate::models::TimeRange;
use crate::traits::{HistorySource, TelemetryWriter};
use domain::{CanonicalMetric, HistorySample};
use std::collections::HashSet;
use std::sync::RwLock;

/// 历史序列内存存储。写入的读数可被随后的查询读到。
pub struct InMemoryHistoryStore {
    samples: RwLock<Vec<HistorySample>>,
    devices: RwLock<HashSet<String>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            samples: RwLock::new(Vec::new()),
            devices: RwLock::new(HashSet::new()),
        }
    }

    /// 以给定样本初始化，样本中出现的设备视为已登记。
    pub fn with_samples(samples: Vec<HistorySample>) -> Self {
        let devices = samples
            .iter()
            .filter_map(|sample| sample.device.clone())
            .collect();
        Self {
            samples: RwLock::new(samples),
            devices: RwLock::new(devices),
        }
    }

    /// 登记设备（无样本的设备查询返回空序列而非不存在）。
    pub fn register_device(&self, device: impl Into<String>) {
        if let Ok(mut devices) = self.devices.write() {
            devices.insert(device.into());
        }
    }

    /// 当前累计的样本数量（用于测试）
    pub fn len(&self) -> usize {
        self.samples.read().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl HistorySource for InMemoryHistoryStore {
    async fn fetch_series(
        &self,
        device: Option<&str>,
        range: TimeRange,
    ) -> Result<Vec<HistorySample>, StorageError> {
        if let Some(device) = device {
            let devices = self
                .devices
                .read()
                .map_err(|_| StorageError::new("lock failed"))?;
            if !devices.contains(device) {
                return Err(StorageError::DeviceNotFound(device.to_string()));
            }
        }
        let samples = self
            .samples
            .read()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut selected: Vec<HistorySample> = samples
            .iter()
            .filter(|sample| range.contains(sample.ts_ms))
            .filter(|sample| match device {
                Some(device) => sample.device.as_deref() == Some(device),
                None => true,
            })
            .cloned()
            .collect();
        selected.sort_by_key(|sample| sample.ts_ms);
        Ok(selected)
    }
}

#[async_trait::async_trait]
impl TelemetryWriter for InMemoryHistoryStore {
    async fn write_readings(&self, readings: &[CanonicalMetric]) -> Result<usize, StorageError> {
        let mut samples = self
            .samples
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut devices = self
            .devices
            .write()
            .map_err(|_| StorageError::new("lock failed"))?;
        let mut written = 0;
        for reading in readings {
            let (Some(device), Some(ts_ms)) = (reading.device.as_ref(), reading.ts_ms) else {
                continue;
            };
            devices.insert(device.clone());
            samples.push(HistorySample {
                ts_ms,
                device: Some(device.clone()),
                voltage: reading.voltage,
                current: reading.current,
                apparent_power: reading.apparent_power,
                active_power: reading.active_power,
                power_factor: reading.power_factor,
            });
            written += 1;
        }
        Ok(written)
    }
}
