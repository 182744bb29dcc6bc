//! 采集链路装配
//!
//! 将 MQTT 采集源、规整器、扇出中心与持久化队列串联起来：
//! 每条入站消息先规整并写入实时状态，再发布扇出信封，
//! 设备读数额外投递到持久化队列（若启用）。

use domain::InboundMessage;
use ems_config::AppConfig;
use ems_fanout::Broadcaster;
use ems_ingest::{IngestError, MessageHandler, MqttSource, MqttSourceConfig, NoopSource, Source};
use ems_normalize::{NormalizeError, Normalizer};
use ems_pipeline::PersistHandle;
use ems_telemetry::{
    record_dropped_malformed, record_dropped_unmapped, record_inbound_message,
    record_normalized_update,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 入站消息处理器
pub struct BridgeHandler {
    normalizer: Normalizer,
    broadcaster: Arc<Broadcaster>,
    persist: Option<PersistHandle>,
}

impl BridgeHandler {
    pub fn new(
        normalizer: Normalizer,
        broadcaster: Arc<Broadcaster>,
        persist: Option<PersistHandle>,
    ) -> Self {
        Self {
            normalizer,
            broadcaster,
            persist,
        }
    }
}

#[async_trait::async_trait]
impl MessageHandler for BridgeHandler {
    /// 畸形或未映射的消息只计数并记录日志，不会中断采集。
    async fn handle(&self, message: InboundMessage) -> Result<(), IngestError> {
        record_inbound_message();
        let topic = message.topic.clone();
        debug!(
            target: "ems.ingest",
            topic = %topic,
            payload_size = message.payload.len(),
            "message_received"
        );

        let normalized = match self.normalizer.normalize(message) {
            Ok(normalized) => normalized,
            Err(NormalizeError::UnmappedTopic(_)) => {
                record_dropped_unmapped();
                debug!(target: "ems.ingest", topic = %topic, reason = "unmapped", "message_dropped");
                return Ok(());
            }
            Err(err @ NormalizeError::MalformedPayload { .. }) => {
                record_dropped_malformed();
                warn!(
                    target: "ems.ingest",
                    topic = %topic,
                    reason = "malformed",
                    error = %err,
                    "message_dropped"
                );
                return Ok(());
            }
        };

        record_normalized_update();
        for envelope in &normalized.envelopes {
            self.broadcaster.publish(envelope);
        }

        if let (Some(persist), Some(reading)) = (&self.persist, normalized.reading) {
            if let Err(err) = persist.submit(reading) {
                debug!(target: "ems.ingest", topic = %topic, error = %err, "persist_submit_rejected");
            }
        }
        Ok(())
    }
}

/// 启动采集任务
///
/// `EMS_INGEST=off` 时使用空操作源，服务仍可提供快照与历史查询。
pub fn spawn_ingest(
    config: &AppConfig,
    normalizer: Normalizer,
    broadcaster: Arc<Broadcaster>,
    persist: Option<PersistHandle>,
) -> JoinHandle<()> {
    let subscriptions = normalizer.layout().subscriptions();
    let handler = Arc::new(BridgeHandler::new(normalizer, broadcaster, persist));

    let source: Arc<dyn Source> = if config.ingest_enabled {
        let mqtt_config = MqttSourceConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            subscriptions,
            keep_alive: Duration::from_secs(60),
            reconnect_min: Duration::from_millis(config.mqtt_reconnect_min_ms),
            reconnect_max: Duration::from_millis(config.mqtt_reconnect_max_ms),
        };
        info!(
            target: "ems.ingest",
            host = %mqtt_config.host,
            port = mqtt_config.port,
            topics = mqtt_config.subscriptions.len(),
            "ingest_source_mqtt"
        );
        Arc::new(MqttSource::new(mqtt_config))
    } else {
        info!(target: "ems.ingest", "ingest_source_noop");
        Arc::new(NoopSource)
    };

    tokio::spawn(async move {
        if let Err(err) = source.run(handler).await {
            warn!(target: "ems.ingest", error = %err, "ingest_stopped");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ems_fanout::FanoutConfig;
    use ems_normalize::TopicLayout;
    use ems_realtime::StateStore;

    fn message(topic: &str, payload: &str) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: payload.as_bytes().to_vec(),
            received_at_ms: 0,
        }
    }

    fn handler() -> (BridgeHandler, Arc<StateStore>, Arc<Broadcaster>) {
        let store = Arc::new(StateStore::new(16));
        let broadcaster = Broadcaster::new(FanoutConfig::default(), store.clone());
        let normalizer = Normalizer::new(TopicLayout::default(), store.clone());
        (
            BridgeHandler::new(normalizer, broadcaster.clone(), None),
            store,
            broadcaster,
        )
    }

    #[tokio::test]
    async fn device_state_updates_store_and_streams() {
        let (handler, store, broadcaster) = handler();
        let mut subscription = broadcaster.subscribe_stream();
        let snapshot = subscription.next_frame().await.expect("snapshot");
        assert!(snapshot.as_str().contains("\"snapshot\""));

        handler
            .handle(message(
                "esp/energia/E2641D44/state",
                r#"{"V":221.5,"I":1.2,"ts":1700000000000}"#,
            ))
            .await
            .expect("handled");

        assert_eq!(store.metric().voltage, Some(221.5));
        assert_eq!(store.metric().device.as_deref(), Some("E2641D44"));
        let frame = subscription.next_frame().await.expect("frame");
        assert!(frame.as_str().contains("esp/energia/E2641D44/state"));
    }

    #[tokio::test]
    async fn dropped_messages_do_not_fail_ingest() {
        let (handler, store, broadcaster) = handler();
        handler
            .handle(message("unrelated/topic", "{}"))
            .await
            .expect("unmapped is ok");
        handler
            .handle(message("tesis/iot/esp32/metrics/vrms", "not json"))
            .await
            .expect("malformed is ok");

        assert_eq!(store.metric().voltage, None);
        assert_eq!(broadcaster.duplex_queue_len(), 0);
    }
}
