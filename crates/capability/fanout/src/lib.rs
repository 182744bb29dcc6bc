//! 实时扇出。
//!
//! - 流式订阅（SSE）：每个订阅者独享一条通道，首帧为快照，空闲时发送保活帧。
//! - 双工订阅（WebSocket）：共享一条丢弃最旧的广播队列，由单个后台任务按注册顺序
//!   依次发送，发送失败的订阅者在本轮结束后移除。

pub mod queue;

pub use queue::DropOldestQueue;

use async_trait::async_trait;
use domain::{FanoutEnvelope, SnapshotProvider};
use ems_telemetry::{
    record_duplex_dropped_oldest, record_envelope_published, record_stream_dropped_newest,
    record_subscriber_send_failure,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 保活帧（SSE 空闲超时时发送）。
pub const KEEPALIVE_FRAME: &str = r#"{"type":"keepalive"}"#;
/// 对客户端 `ping` 文本的应答帧。
pub const PONG_FRAME: &str = r#"{"type":"pong"}"#;

/// 判断客户端文本是否为心跳（忽略首尾空白与大小写）。
pub fn is_ping(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("ping")
}

/// 扇出错误。
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("subscriber closed")]
    Closed,
    #[error("send failed: {0}")]
    Send(String),
    #[error("serialize failed: {0}")]
    Serialize(String),
}

/// 扇出配置。
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// 流式订阅者通道上限；`None` 为不设上限。
    pub stream_capacity: Option<usize>,
    pub stream_keepalive: Duration,
    pub duplex_capacity: usize,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        Self {
            stream_capacity: None,
            stream_keepalive: Duration::from_secs(30),
            duplex_capacity: 10_000,
        }
    }
}

/// 双工订阅者的发送端（WebSocket 连接写半部）。
#[async_trait]
pub trait DuplexSink: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), FanoutError>;
}

/// 流式订阅者收到的一帧。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFrame {
    Envelope(Arc<str>),
    KeepAlive,
}

impl StreamFrame {
    pub fn as_str(&self) -> &str {
        match self {
            StreamFrame::Envelope(text) => text,
            StreamFrame::KeepAlive => KEEPALIVE_FRAME,
        }
    }
}

enum Delivery {
    Sent,
    DroppedNewest,
    Closed,
}

enum StreamSender {
    Bounded(mpsc::Sender<Arc<str>>),
    Unbounded(mpsc::UnboundedSender<Arc<str>>),
}

impl StreamSender {
    fn deliver(&self, frame: Arc<str>) -> Delivery {
        match self {
            StreamSender::Bounded(sender) => match sender.try_send(frame) {
                Ok(()) => Delivery::Sent,
                Err(mpsc::error::TrySendError::Full(_)) => Delivery::DroppedNewest,
                Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
            },
            StreamSender::Unbounded(sender) => match sender.send(frame) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            },
        }
    }
}

enum StreamReceiver {
    Bounded(mpsc::Receiver<Arc<str>>),
    Unbounded(mpsc::UnboundedReceiver<Arc<str>>),
}

impl StreamReceiver {
    async fn recv(&mut self) -> Option<Arc<str>> {
        match self {
            StreamReceiver::Bounded(receiver) => receiver.recv().await,
            StreamReceiver::Unbounded(receiver) => receiver.recv().await,
        }
    }
}

/// 扇出中心。
pub struct Broadcaster {
    config: FanoutConfig,
    snapshots: Arc<dyn SnapshotProvider>,
    streams: Mutex<HashMap<u64, StreamSender>>,
    duplex: Mutex<Vec<(u64, Arc<dyn DuplexSink>)>>,
    queue: DropOldestQueue<Arc<str>>,
    next_id: AtomicU64,
}

impl Broadcaster {
    pub fn new(config: FanoutConfig, snapshots: Arc<dyn SnapshotProvider>) -> Arc<Self> {
        let queue = DropOldestQueue::new(config.duplex_capacity);
        Arc::new(Self {
            config,
            snapshots,
            streams: Mutex::new(HashMap::new()),
            duplex: Mutex::new(Vec::new()),
            queue,
            next_id: AtomicU64::new(1),
        })
    }

    /// 创建扇出中心并启动双工广播任务。
    pub fn start(
        config: FanoutConfig,
        snapshots: Arc<dyn SnapshotProvider>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let broadcaster = Self::new(config, snapshots);
        let handle = tokio::spawn(broadcaster.clone().run_duplex());
        (broadcaster, handle)
    }

    /// 发布一个信封；不阻塞调用方。
    pub fn publish(&self, envelope: &FanoutEnvelope) {
        let frame: Arc<str> = match serde_json::to_string(envelope) {
            Ok(text) => text.into(),
            Err(err) => {
                warn!(
                    target: "ems.fanout",
                    topic = %envelope.topic,
                    error = %err,
                    "fanout_serialize_failed"
                );
                return;
            }
        };

        lock(&self.streams).retain(|id, sender| match sender.deliver(frame.clone()) {
            Delivery::Sent => true,
            Delivery::DroppedNewest => {
                record_stream_dropped_newest();
                debug!(target: "ems.fanout", subscriber = *id, "stream_dropped_newest");
                true
            }
            Delivery::Closed => false,
        });

        if self.queue.push(frame).is_some() {
            record_duplex_dropped_oldest();
            debug!(
                target: "ems.fanout",
                capacity = self.queue.capacity(),
                "duplex_dropped_oldest"
            );
        }
        record_envelope_published();
    }

    /// 当前快照帧（序列化后的快照信封）。
    pub fn snapshot_frame(&self) -> Result<String, FanoutError> {
        let envelope = self.snapshots.snapshot_envelope();
        serde_json::to_string(&envelope).map_err(|err| FanoutError::Serialize(err.to_string()))
    }

    /// 注册流式订阅者；先登记通道再取快照，快照之后的更新不会丢失。
    pub fn subscribe_stream(self: &Arc<Self>) -> StreamSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = match self.config.stream_capacity {
            Some(capacity) => {
                let (tx, rx) = mpsc::channel(capacity.max(1));
                (StreamSender::Bounded(tx), StreamReceiver::Bounded(rx))
            }
            None => {
                let (tx, rx) = mpsc::unbounded_channel();
                (StreamSender::Unbounded(tx), StreamReceiver::Unbounded(rx))
            }
        };
        lock(&self.streams).insert(id, sender);

        let snapshot = match self.snapshot_frame() {
            Ok(frame) => Some(Arc::from(frame)),
            Err(err) => {
                warn!(target: "ems.fanout", error = %err, "snapshot_frame_failed");
                None
            }
        };
        debug!(target: "ems.fanout", subscriber = id, "stream_subscribed");

        StreamSubscription {
            id,
            broadcaster: self.clone(),
            receiver,
            pending_snapshot: snapshot,
            keepalive: self.config.stream_keepalive,
        }
    }

    /// 注册双工订阅者；句柄释放时注销。
    pub fn register_duplex(self: &Arc<Self>, sink: Arc<dyn DuplexSink>) -> DuplexHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.duplex).push((id, sink));
        debug!(target: "ems.fanout", subscriber = id, "duplex_registered");
        DuplexHandle {
            id,
            broadcaster: self.clone(),
        }
    }

    /// 将一帧依次发送给全部双工订阅者，返回成功数；失败者在本轮结束后移除。
    pub async fn run_duplex_pass(&self, frame: &str) -> usize {
        let sinks: Vec<(u64, Arc<dyn DuplexSink>)> = lock(&self.duplex).clone();
        let mut delivered = 0;
        let mut dead = Vec::new();
        for (id, sink) in sinks {
            match sink.send_text(frame).await {
                Ok(()) => delivered += 1,
                Err(err) => {
                    record_subscriber_send_failure();
                    warn!(
                        target: "ems.fanout",
                        subscriber = id,
                        error = %err,
                        "duplex_send_failed"
                    );
                    dead.push(id);
                }
            }
        }
        if !dead.is_empty() {
            lock(&self.duplex).retain(|(id, _)| !dead.contains(id));
        }
        delivered
    }

    pub fn stream_subscribers(&self) -> usize {
        lock(&self.streams).len()
    }

    pub fn duplex_subscribers(&self) -> usize {
        lock(&self.duplex).len()
    }

    pub fn duplex_queue_len(&self) -> usize {
        self.queue.len()
    }

    async fn run_duplex(self: Arc<Self>) {
        loop {
            let frame = self.queue.pop().await;
            self.run_duplex_pass(&frame).await;
        }
    }

    fn remove_stream(&self, id: u64) {
        if lock(&self.streams).remove(&id).is_some() {
            debug!(target: "ems.fanout", subscriber = id, "stream_unsubscribed");
        }
    }

    fn remove_duplex(&self, id: u64) {
        lock(&self.duplex).retain(|(item, _)| *item != id);
        debug!(target: "ems.fanout", subscriber = id, "duplex_unregistered");
    }
}

/// 流式订阅；释放时自动注销。
pub struct StreamSubscription {
    id: u64,
    broadcaster: Arc<Broadcaster>,
    receiver: StreamReceiver,
    pending_snapshot: Option<Arc<str>>,
    keepalive: Duration,
}

impl StreamSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 下一帧：首帧为快照，之后为更新；空闲超过保活间隔时返回保活帧。
    pub async fn next_frame(&mut self) -> Option<StreamFrame> {
        if let Some(snapshot) = self.pending_snapshot.take() {
            return Some(StreamFrame::Envelope(snapshot));
        }
        match tokio::time::timeout(self.keepalive, self.receiver.recv()).await {
            Ok(Some(frame)) => Some(StreamFrame::Envelope(frame)),
            Ok(None) => None,
            Err(_) => Some(StreamFrame::KeepAlive),
        }
    }
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        self.broadcaster.remove_stream(self.id);
    }
}

/// 双工订阅句柄；释放时自动注销。
pub struct DuplexHandle {
    id: u64,
    broadcaster: Arc<Broadcaster>,
}

impl DuplexHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for DuplexHandle {
    fn drop(&mut self) {
        self.broadcaster.remove_duplex(self.id);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
