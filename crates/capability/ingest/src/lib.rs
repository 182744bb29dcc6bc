//! 数据接入：MQTT 订阅与断线重连。

use async_trait::async_trait;
use domain::{InboundMessage, TopicFilter, now_epoch_ms};
use ems_telemetry::record_mqtt_reconnect;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeFilter};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 采集错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
}

/// 入站消息处理器。
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError>;
}

/// 采集源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError>;
}

/// 占位源（关闭采集时使用）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// 指数退避：每次失败翻倍，封顶于 `max`，连接成功后复位。
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        let max = max.max(min);
        Self {
            min,
            max,
            current: min,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.min;
    }
}

/// MQTT 采集源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub subscriptions: Vec<TopicFilter>,
    pub keep_alive: Duration,
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

/// MQTT 采集源。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    fn options(&self) -> MqttOptions {
        let client_id = format!("ems-bridge-{}", now_epoch_ms());
        let mut options = MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(self.config.keep_alive);
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }
        options
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn MessageHandler>) -> Result<(), IngestError> {
        let (client, mut eventloop) = AsyncClient::new(self.options(), 64);
        let mut backoff = Backoff::new(self.config.reconnect_min, self.config.reconnect_max);

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff.reset();
                    info!(
                        target: "ems.ingest",
                        host = %self.config.host,
                        port = self.config.port,
                        "mqtt_connected"
                    );
                    // clean session 下每次连接都需重新订阅。
                    let filters = subscribe_filters(&self.config.subscriptions);
                    if let Err(err) = client.try_subscribe_many(filters) {
                        warn!(target: "ems.ingest", error = %err, "mqtt_subscribe_failed");
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    debug!(target: "ems.ingest", pkid = ack.pkid, "mqtt_subscribed");
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let message = InboundMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        received_at_ms: now_epoch_ms(),
                    };
                    if let Err(err) = handler.handle(message).await {
                        warn!(
                            target: "ems.ingest",
                            topic = %publish.topic,
                            error = %err,
                            "message_handler_failed"
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    let delay = backoff.next_delay();
                    record_mqtt_reconnect();
                    warn!(
                        target: "ems.ingest",
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "mqtt_connection_lost"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// 订阅列表转换为 rumqttc 过滤器。
pub fn subscribe_filters(subscriptions: &[TopicFilter]) -> Vec<SubscribeFilter> {
    subscriptions
        .iter()
        .map(|item| SubscribeFilter::new(item.filter.clone(), qos_from_level(item.qos)))
        .collect()
}

fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        _ => QoS::ExactlyOnce,
    }
}
