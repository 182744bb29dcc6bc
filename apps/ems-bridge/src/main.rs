//! 电能遥测桥接服务：MQTT 采集 → 规整 → 实时快照 → SSE/WebSocket 扇出，
//! 以及基于历史序列的停电/断数查询。

mod handlers;
mod ingest;
mod middleware;
mod routes;
mod utils;

use axum::Router;
use ems_config::AppConfig;
use ems_fanout::{Broadcaster, FanoutConfig};
use ems_normalize::{Normalizer, TopicLayout};
use ems_outage::{DetectorConfig, OutageService};
use ems_pipeline::{
    PersistHandle, Pipeline, PipelineConfig, StorageMetricWriter, spawn_persistence,
};
use ems_realtime::StateStore;
use ems_storage::{PgHistorySource, PgTelemetryWriter, connect_pool};
use ems_telemetry::init_tracing;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// 全局共享状态。
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<StateStore>,
    pub broadcaster: Arc<Broadcaster>,
    /// 未配置历史库时为 `None`，停电查询返回 503。
    pub outages: Option<OutageService>,
    pub broker: String,
    pub base: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;
    init_tracing();

    let store = Arc::new(StateStore::new(config.samples_buffer_size));
    let fanout_config = FanoutConfig {
        stream_capacity: config.stream_capacity,
        stream_keepalive: Duration::from_secs(config.stream_keepalive_seconds.max(1)),
        duplex_capacity: config.duplex_queue_capacity,
    };
    let (broadcaster, _fanout_task) = Broadcaster::start(fanout_config, store.clone());

    let pool = connect_history(&config).await;
    let outages = pool.clone().map(|pool| {
        let defaults = DetectorConfig {
            min_voltage: config.outage_min_voltage,
            max_gap_minutes: config.outage_max_gap_minutes,
            interval_ms: config.outage_interval_ms,
        };
        OutageService::new(Arc::new(PgHistorySource::new(pool)), defaults)
    });
    let persist = start_persistence(&config, pool);

    let layout = TopicLayout::new(&config.mqtt_device_topic, &config.mqtt_base);
    let normalizer = Normalizer::new(layout, store.clone());
    let _ingest_task = ingest::spawn_ingest(&config, normalizer, broadcaster.clone(), persist);

    let state = AppState {
        store,
        broadcaster,
        outages,
        broker: format!("{}:{}", config.mqtt_host, config.mqtt_port),
        base: config.mqtt_base.clone(),
    };
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "ems.http", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// 组装路由与全局中间件。
pub fn build_app(state: AppState) -> Router {
    routes::create_api_router()
        .with_state(state)
        // 注入 request_id/trace_id
        .layer(axum::middleware::from_fn(middleware::request_context))
        .layer(CorsLayer::permissive())
}

/// 连接历史库；未配置或连接失败时降级为无历史模式。
async fn connect_history(config: &AppConfig) -> Option<PgPool> {
    let url = config.database_url.as_deref()?;
    match connect_pool(url).await {
        Ok(pool) => {
            info!(target: "ems.http", "history_connected");
            Some(pool)
        }
        Err(err) => {
            warn!(target: "ems.http", error = %err, "history_unavailable");
            None
        }
    }
}

fn start_persistence(config: &AppConfig, pool: Option<PgPool>) -> Option<PersistHandle> {
    if !config.persist_enabled {
        return None;
    }
    let Some(pool) = pool else {
        warn!(target: "ems.pipeline", "persist_disabled_without_database");
        return None;
    };
    let writer = StorageMetricWriter::new(Arc::new(PgTelemetryWriter::new(pool)));
    let pipeline = Pipeline::with_config(
        Arc::new(writer),
        PipelineConfig {
            batch_size: config.persist_batch_size.max(1),
            queue_capacity: config.persist_queue_capacity.max(1),
            ..PipelineConfig::default()
        },
    );
    let (handle, _task) = spawn_persistence(pipeline);
    info!(
        target: "ems.pipeline",
        batch_size = config.persist_batch_size,
        queue_capacity = config.persist_queue_capacity,
        "persistence_started"
    );
    Some(handle)
}
