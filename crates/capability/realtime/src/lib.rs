//! 实时状态存储。
//!
//! 进程内唯一的实时视图：最新规范化指标、最近一次汇总报文，以及电压/电流两条
//! 采样环形缓冲。所有读写经同一把互斥锁串行化，锁内只做字段更新或值拷贝。

pub mod buffer;

pub use buffer::{DEFAULT_SAMPLE_CAPACITY, SampleBuffer};

use domain::{
    CanonicalMetric, FanoutEnvelope, RawRecord, SNAPSHOT_TOPIC, Sample, SampleChannel,
    SnapshotProvider,
};
use serde::Serialize;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// 锁内可变状态。
#[derive(Debug, Default)]
pub struct LiveState {
    pub metric: CanonicalMetric,
    pub raw: RawRecord,
    pub voltage: SampleBuffer,
    pub current: SampleBuffer,
}

impl LiveState {
    fn with_capacity(sample_capacity: usize) -> Self {
        Self {
            metric: CanonicalMetric::default(),
            raw: RawRecord::default(),
            voltage: SampleBuffer::new(sample_capacity),
            current: SampleBuffer::new(sample_capacity),
        }
    }

    pub fn buffer(&self, channel: SampleChannel) -> &SampleBuffer {
        match channel {
            SampleChannel::Voltage => &self.voltage,
            SampleChannel::Current => &self.current,
        }
    }

    pub fn buffer_mut(&mut self, channel: SampleChannel) -> &mut SampleBuffer {
        match channel {
            SampleChannel::Voltage => &mut self.voltage,
            SampleChannel::Current => &mut self.current,
        }
    }
}

/// 只读快照（值拷贝，与后续修改无关）。
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    pub metrics: CanonicalMetric,
    pub telemetry: RawRecord,
}

/// 实时状态存储。
pub struct StateStore {
    state: Mutex<LiveState>,
}

impl StateStore {
    pub fn new(sample_capacity: usize) -> Self {
        Self {
            state: Mutex::new(LiveState::with_capacity(sample_capacity)),
        }
    }

    /// 在互斥锁内应用一次修改。
    pub fn update<R>(&self, mutator: impl FnOnce(&mut LiveState) -> R) -> R {
        let mut state = self.lock();
        mutator(&mut state)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.lock();
        Snapshot {
            metrics: state.metric.clone(),
            telemetry: state.raw.clone(),
        }
    }

    pub fn metric(&self) -> CanonicalMetric {
        self.lock().metric.clone()
    }

    pub fn raw_record(&self) -> RawRecord {
        self.lock().raw.clone()
    }

    /// 返回指定通道最近的至多 `n` 个采样。
    pub fn recent_samples(&self, channel: SampleChannel, n: usize) -> Vec<Sample> {
        self.lock().buffer(channel).recent(n)
    }

    // 写入方只在锁内做赋值，中毒时沿用内部状态继续服务。
    fn lock(&self) -> MutexGuard<'_, LiveState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl SnapshotProvider for StateStore {
    fn snapshot_envelope(&self) -> FanoutEnvelope {
        let data = serde_json::to_value(self.snapshot()).unwrap_or_default();
        FanoutEnvelope::new(SNAPSHOT_TOPIC, data)
    }
}
