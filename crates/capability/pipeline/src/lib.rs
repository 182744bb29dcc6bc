//! 设备读数后台持久化。
//!
//! 规整产生的完整读数经 [`PersistHandle::submit`] 非阻塞投递到有界队列，由独立任务
//! 校验、去重、攒批后写入存储；写入慢或失败不会拖慢扇出。

use async_trait::async_trait;
use domain::CanonicalMetric;
use ems_storage::TelemetryWriter;
use ems_telemetry::{record_persist_backpressure, record_persist_failure, record_persist_success};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 单条读数的处理结果。
#[derive(Debug, Clone)]
pub struct WriteResult {
    pub device: Option<String>,
    pub written: bool,
    pub reason: Option<String>,
}

impl WriteResult {
    fn skipped(reading: &CanonicalMetric, reason: &str) -> Self {
        Self {
            device: reading.device.clone(),
            written: false,
            reason: Some(reason.to_string()),
        }
    }
}

/// Pipeline 处理错误。
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("writer error: {0}")]
    Writer(String),
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("pipeline closed")]
    Closed,
}

/// Pipeline 参数。
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    pub max_buffer_size: usize,
    pub max_retries: usize,
    pub dedup_cache_size: usize,
    /// 投递队列容量（`PersistHandle::submit` 的背压上限）。
    pub queue_capacity: usize,
    /// 未满批时的定时刷写间隔。
    pub flush_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_buffer_size: 1000,
            max_retries: 3,
            dedup_cache_size: 1024,
            queue_capacity: 1000,
            flush_interval: Duration::from_secs(1),
        }
    }
}

impl PipelineConfig {
    fn sanitized(mut self) -> Self {
        if self.batch_size == 0 {
            self.batch_size = 1;
        }
        if self.max_buffer_size < self.batch_size {
            self.max_buffer_size = self.batch_size;
        }
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ReadingSignature {
    ts_ms: i64,
    values: [Option<u64>; 5],
}

struct DedupState {
    map: HashMap<String, (ReadingSignature, u64)>,
    order: VecDeque<(String, u64)>,
    counter: u64,
    capacity: usize,
}

impl DedupState {
    fn new(capacity: usize) -> Self {
        Self {
            map: HashMap::new(),
            order: VecDeque::new(),
            counter: 0,
            capacity,
        }
    }

    // 每个设备只记住最近一次读数的签名。
    fn is_duplicate(&mut self, key: String, signature: ReadingSignature) -> bool {
        if self.capacity == 0 {
            return false;
        }
        if let Some((existing, _)) = self.map.get(&key) {
            if existing == &signature {
                return true;
            }
        }
        self.counter = self.counter.saturating_add(1);
        let token = self.counter;
        self.map.insert(key.clone(), (signature, token));
        self.order.push_back((key, token));
        while self.map.len() > self.capacity {
            if let Some((evict_key, evict_token)) = self.order.pop_front() {
                let should_remove = self
                    .map
                    .get(&evict_key)
                    .map(|(_, token)| *token == evict_token)
                    .unwrap_or(false);
                if should_remove {
                    self.map.remove(&evict_key);
                }
            } else {
                break;
            }
        }
        false
    }
}

/// 读数写入器抽象。
#[async_trait]
pub trait MetricWriter: Send + Sync {
    async fn write_batch(&self, readings: &[CanonicalMetric]) -> Result<usize, PipelineError>;
}

struct PipelineState {
    buffer: Vec<CanonicalMetric>,
    dedup: DedupState,
}

struct PipelineInner {
    writer: Arc<dyn MetricWriter>,
    config: PipelineConfig,
    state: Mutex<PipelineState>,
}

/// 攒批写入器：校验、去重、满批写入，失败按次数重试。
#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<PipelineInner>,
}

impl Pipeline {
    pub fn new(writer: Arc<dyn MetricWriter>) -> Self {
        Self::with_config(writer, PipelineConfig::default())
    }

    pub fn with_config(writer: Arc<dyn MetricWriter>, config: PipelineConfig) -> Self {
        let config = config.sanitized();
        let inner = PipelineInner {
            writer,
            config: config.clone(),
            state: Mutex::new(PipelineState {
                buffer: Vec::new(),
                dedup: DedupState::new(config.dedup_cache_size),
            }),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub async fn handle(&self, reading: CanonicalMetric) -> Result<WriteResult, PipelineError> {
        if let Some(reason) = validate_reading(&reading) {
            return Ok(WriteResult::skipped(&reading, reason));
        }
        let Some(key) = reading.device.clone() else {
            return Ok(WriteResult::skipped(&reading, "missing_device"));
        };

        let mut state = self.inner.state.lock().await;
        if state.buffer.len() >= self.inner.config.max_buffer_size {
            return Err(PipelineError::Backpressure("buffer full".to_string()));
        }
        if state.dedup.is_duplicate(key, signature_from_reading(&reading)) {
            return Ok(WriteResult::skipped(&reading, "duplicate"));
        }
        let device = reading.device.clone();
        state.buffer.push(reading);
        if state.buffer.len() < self.inner.config.batch_size {
            return Ok(WriteResult {
                device,
                written: false,
                reason: Some("queued".to_string()),
            });
        }
        let batch = std::mem::take(&mut state.buffer);
        drop(state);

        self.write_or_requeue(batch).await?;
        Ok(WriteResult {
            device,
            written: true,
            reason: None,
        })
    }

    /// 写出缓冲中全部读数，返回写入条数。
    pub async fn flush(&self) -> Result<usize, PipelineError> {
        let mut state = self.inner.state.lock().await;
        if state.buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut state.buffer);
        drop(state);

        self.write_or_requeue(batch).await
    }

    pub async fn buffered(&self) -> usize {
        self.inner.state.lock().await.buffer.len()
    }

    async fn write_or_requeue(&self, batch: Vec<CanonicalMetric>) -> Result<usize, PipelineError> {
        match self.write_batch_with_retry(&batch).await {
            Ok(written) => {
                record_persist_success(written as u64);
                debug!(
                    target: "ems.pipeline",
                    batch = batch.len(),
                    written,
                    "persist_batch_written"
                );
                Ok(written)
            }
            Err(err) => {
                record_persist_failure();
                warn!(
                    target: "ems.pipeline",
                    batch = batch.len(),
                    error = %err,
                    "persist_batch_failed"
                );
                self.requeue(batch).await?;
                Err(err)
            }
        }
    }

    async fn write_batch_with_retry(
        &self,
        readings: &[CanonicalMetric],
    ) -> Result<usize, PipelineError> {
        let mut attempt = 0;
        loop {
            match self.inner.writer.write_batch(readings).await {
                Ok(written) => return Ok(written),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.inner.config.max_retries {
                        return Err(err);
                    }
                }
            }
        }
    }

    async fn requeue(&self, mut readings: Vec<CanonicalMetric>) -> Result<(), PipelineError> {
        if readings.is_empty() {
            return Ok(());
        }
        let mut state = self.inner.state.lock().await;
        if state.buffer.len() + readings.len() > self.inner.config.max_buffer_size {
            return Err(PipelineError::Backpressure(
                "buffer overflow after retry".to_string(),
            ));
        }
        state.buffer.append(&mut readings);
        Ok(())
    }
}

/// 持久化队列投递端。
#[derive(Clone)]
pub struct PersistHandle {
    sender: mpsc::Sender<CanonicalMetric>,
}

impl PersistHandle {
    /// 非阻塞投递；队列满时立即返回背压错误。
    pub fn submit(&self, reading: CanonicalMetric) -> Result<(), PipelineError> {
        match self.sender.try_send(reading) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                record_persist_backpressure();
                Err(PipelineError::Backpressure("queue full".to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::Closed),
        }
    }
}

/// 启动后台持久化任务：满批即写，未满批按间隔刷写；投递端全部释放后刷写并退出。
pub fn spawn_persistence(pipeline: Pipeline) -> (PersistHandle, JoinHandle<()>) {
    let (sender, mut receiver) = mpsc::channel(pipeline.config().queue_capacity);
    let flush_interval = pipeline.config().flush_interval;
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                next = receiver.recv() => match next {
                    Some(reading) => {
                        if let Err(err) = pipeline.handle(reading).await {
                            warn!(target: "ems.pipeline", error = %err, "persist_handle_failed");
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    let _ = pipeline.flush().await;
                }
            }
        }
        let _ = pipeline.flush().await;
        debug!(target: "ems.pipeline", "persistence_stopped");
    });
    (PersistHandle { sender }, handle)
}

fn signature_from_reading(reading: &CanonicalMetric) -> ReadingSignature {
    let bits = |value: Option<f64>| value.map(f64::to_bits);
    ReadingSignature {
        ts_ms: reading.ts_ms.unwrap_or_default(),
        values: [
            bits(reading.voltage),
            bits(reading.current),
            bits(reading.apparent_power),
            bits(reading.active_power),
            bits(reading.power_factor),
        ],
    }
}

fn validate_reading(reading: &CanonicalMetric) -> Option<&'static str> {
    if reading.device.as_deref().is_none_or(str::is_empty) {
        return Some("missing_device");
    }
    match reading.ts_ms {
        Some(ts_ms) if ts_ms > 0 => {}
        _ => return Some("invalid_ts"),
    }
    let values = [
        reading.voltage,
        reading.current,
        reading.apparent_power,
        reading.active_power,
        reading.power_factor,
    ];
    if values.iter().flatten().any(|value| !value.is_finite()) {
        return Some("invalid_value");
    }
    None
}

/// 空写入器（关闭持久化或测试时使用）。
#[derive(Debug, Default)]
pub struct NoopWriter;

#[async_trait]
impl MetricWriter for NoopWriter {
    async fn write_batch(&self, _readings: &[CanonicalMetric]) -> Result<usize, PipelineError> {
        Ok(0)
    }
}

/// 基于存储层的写入器。
#[derive(Clone)]
pub struct StorageMetricWriter {
    store: Arc<dyn TelemetryWriter>,
}

impl StorageMetricWriter {
    pub fn new(store: Arc<dyn TelemetryWriter>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl MetricWriter for StorageMetricWriter {
    async fn write_batch(&self, readings: &[CanonicalMetric]) -> Result<usize, PipelineError> {
        self.store
            .write_readings(readings)
            .await
            .map_err(|err| PipelineError::Writer(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_storage::InMemoryHistoryStore;

    #[derive(Default)]
    struct CountingWriter {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl MetricWriter for CountingWriter {
        async fn write_batch(&self, readings: &[CanonicalMetric]) -> Result<usize, PipelineError> {
            self.batches.lock().await.push(readings.len());
            Ok(readings.len())
        }
    }

    #[derive(Default)]
    struct FailingWriter;

    #[async_trait]
    impl MetricWriter for FailingWriter {
        async fn write_batch(&self, _readings: &[CanonicalMetric]) -> Result<usize, PipelineError> {
            Err(PipelineError::Writer("forced failure".to_string()))
        }
    }

    fn reading(ts_ms: i64, voltage: f64) -> CanonicalMetric {
        CanonicalMetric {
            voltage: Some(voltage),
            device: Some("dev-1".to_string()),
            ts_ms: Some(ts_ms),
            ..CanonicalMetric::default()
        }
    }

    fn config(batch_size: usize, max_buffer_size: usize, dedup: usize) -> PipelineConfig {
        PipelineConfig {
            batch_size,
            max_buffer_size,
            max_retries: 1,
            dedup_cache_size: dedup,
            queue_capacity: 4,
            flush_interval: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn pipeline_batches_readings() {
        let writer = Arc::new(CountingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(2, 10, 0));
        let first = pipeline.handle(reading(1, 220.0)).await.expect("queued");
        assert_eq!(first.reason.as_deref(), Some("queued"));
        let second = pipeline.handle(reading(2, 221.0)).await.expect("written");
        assert!(second.written);
        assert_eq!(writer.batches.lock().await.as_slice(), &[2]);
    }

    #[tokio::test]
    async fn pipeline_dedup_skips_identical_reading() {
        let writer = Arc::new(CountingWriter::default());
        let pipeline = Pipeline::with_config(writer, config(1, 10, 10));
        let first = pipeline.handle(reading(1, 220.0)).await.expect("written");
        let second = pipeline.handle(reading(1, 220.0)).await.expect("duplicate");
        assert!(first.written);
        assert_eq!(second.reason.as_deref(), Some("duplicate"));
    }

    #[tokio::test]
    async fn pipeline_rejects_invalid_readings() {
        let pipeline = Pipeline::new(Arc::new(NoopWriter));
        let mut missing_device = reading(1, 220.0);
        missing_device.device = None;
        let result = pipeline.handle(missing_device).await.expect("skipped");
        assert_eq!(result.reason.as_deref(), Some("missing_device"));

        let result = pipeline.handle(reading(0, 220.0)).await.expect("skipped");
        assert_eq!(result.reason.as_deref(), Some("invalid_ts"));

        let result = pipeline.handle(reading(5, f64::NAN)).await.expect("skipped");
        assert_eq!(result.reason.as_deref(), Some("invalid_value"));
        assert_eq!(pipeline.buffered().await, 0);
    }

    #[tokio::test]
    async fn pipeline_backpressure_rejects_when_full() {
        let pipeline = Pipeline::with_config(Arc::new(FailingWriter), config(1, 1, 0));
        let _ = pipeline
            .handle(reading(1, 220.0))
            .await
            .expect_err("write failure");
        let err = pipeline
            .handle(reading(2, 220.0))
            .await
            .expect_err("backpressure");
        assert_eq!(err.to_string(), "backpressure: buffer full");
    }

    #[tokio::test]
    async fn flush_writes_partial_batch() {
        let writer = Arc::new(CountingWriter::default());
        let pipeline = Pipeline::with_config(writer.clone(), config(10, 10, 0));
        pipeline.handle(reading(1, 220.0)).await.expect("queued");
        pipeline.handle(reading(2, 220.0)).await.expect("queued");
        assert_eq!(pipeline.flush().await.expect("flush"), 2);
        assert_eq!(pipeline.flush().await.expect("flush"), 0);
        assert_eq!(writer.batches.lock().await.as_slice(), &[2]);
    }

    #[tokio::test]
    async fn submit_reports_backpressure_without_blocking() {
        let (sender, _receiver) = mpsc::channel(1);
        let handle = PersistHandle { sender };
        handle.submit(reading(1, 220.0)).expect("first");
        let err = handle.submit(reading(2, 220.0)).expect_err("full");
        assert!(matches!(err, PipelineError::Backpressure(_)));
    }

    #[tokio::test]
    async fn background_task_flushes_on_close() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let writer = Arc::new(StorageMetricWriter::new(store.clone()));
        let pipeline = Pipeline::with_config(writer, config(10, 10, 10));
        let (handle, task) = spawn_persistence(pipeline);

        handle.submit(reading(1, 220.0)).expect("submit");
        handle.submit(reading(2, 219.0)).expect("submit");
        drop(handle);
        task.await.expect("join");

        assert_eq!(store.len(), 2);
    }
}
