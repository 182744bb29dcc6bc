//! 路由定义
//!
//! - 健康检查与计数器：/health, /stats
//! - 快照查询：/metrics, /telemetry, /samples/:channel
//! - 实时推送：/stream (SSE), /ws (WebSocket)
//! - 历史检测：/metrics/power-outages

use super::AppState;
use super::handlers::*;
use axum::{Router, routing::get};

/// 创建 API 路由
pub fn create_api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .route("/metrics/power-outages", get(get_power_outages))
        .route("/telemetry", get(get_telemetry))
        .route("/samples/:channel", get(get_samples))
        .route("/stream", get(stream_events))
        .route("/ws", get(ws_handler))
}

#[cfg(test)]
mod tests {
    use crate::{AppState, build_app};
    use axum::{
        Router,
        body::Body,
        http::{Request, StatusCode, header},
    };
    use domain::{HistorySample, Sample, SampleChannel};
    use ems_fanout::{Broadcaster, FanoutConfig};
    use ems_outage::{DetectorConfig, OutageService};
    use ems_realtime::StateStore;
    use ems_storage::InMemoryHistoryStore;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(with_history: bool) -> AppState {
        let store = Arc::new(StateStore::new(16));
        let broadcaster = Broadcaster::new(FanoutConfig::default(), store.clone());
        let outages = with_history.then(|| {
            let samples = [(0, 220.0), (900_000, 220.0)]
                .iter()
                .map(|(ts, voltage)| HistorySample {
                    device: Some("dev-1".to_string()),
                    ..HistorySample::voltage_at(*ts, Some(*voltage))
                })
                .collect();
            OutageService::new(
                Arc::new(InMemoryHistoryStore::with_samples(samples)),
                DetectorConfig::default(),
            )
        });
        AppState {
            store,
            broadcaster,
            outages,
            broker: "127.0.0.1:1883".to_string(),
            base: "tesis/iot/esp32".to_string(),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::get(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let status = response.status();
        let bytes: bytes::Bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_reports_broker_and_base() {
        let response = build_app(state(false))
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert!(response.headers().contains_key("x-trace-id"));

        let (_, body) = get(build_app(state(false)), "/health").await;
        assert_eq!(
            body,
            json!({"status": "ok", "broker": "127.0.0.1:1883", "base": "tesis/iot/esp32"})
        );
    }

    #[tokio::test]
    async fn empty_snapshots_use_canonical_shape() {
        let (status, body) = get(build_app(state(false)), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vrms"], Value::Null);
        assert!(body.as_object().expect("object").contains_key("factor_potencia"));

        let (status, body) = get(build_app(state(false)), "/telemetry").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({}));
    }

    #[tokio::test]
    async fn samples_return_most_recent_in_order() {
        let state = state(false);
        state.store.update(|live| {
            for ts_ms in 1..=5 {
                live.buffer_mut(SampleChannel::Voltage).push(Sample {
                    ts_ms,
                    value: ts_ms as f64,
                });
            }
        });
        let (status, body) = get(build_app(state.clone()), "/samples/voltage?n=2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{"ts": 4, "value": 4.0}, {"ts": 5, "value": 5.0}]));

        let (_, body) = get(build_app(state.clone()), "/samples/voltage").await;
        assert_eq!(body.as_array().map(Vec::len), Some(5));

        let (_, body) = get(build_app(state.clone()), "/samples/current").await;
        assert_eq!(body, json!([]));

        let (status, body) = get(build_app(state.clone()), "/samples/power").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], json!("RESOURCE.NOT_FOUND"));

        let (status, _) = get(build_app(state), "/samples/voltage?n=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn power_outages_validate_parameters() {
        let app = || build_app(state(true));
        let (status, body) = get(app(), "/metrics/power-outages?device=dev-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], json!(false));

        let (status, _) = get(app(), "/metrics/power-outages?start=0&end=10").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            get(app(), "/metrics/power-outages?start=soon&end=10&device=dev-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = get(app(), "/metrics/power-outages?start=10&end=5&device=dev-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn power_outages_report_events_and_errors() {
        let (status, body) = get(
            build_app(state(true)),
            "/metrics/power-outages?start=0&end=1000000&device=dev-1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["type"], json!("no_data"));
        assert_eq!(body[0]["gap_minutes"], json!(15.0));

        let (status, _) = get(
            build_app(state(true)),
            "/metrics/power-outages?start=1970-01-01T00:00:00Z&end=1970-01-02T00:00:00Z&device=ghost",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get(
            build_app(state(false)),
            "/metrics/power-outages?start=0&end=1000000&device=dev-1",
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"]["code"], json!("SERVICE.UNAVAILABLE"));
    }

    #[tokio::test]
    async fn stats_include_subscriber_counts() {
        let (status, body) = get(build_app(state(false)), "/stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stream_subscribers"], json!(0));
        assert_eq!(body["duplex_queue_len"], json!(0));
        assert!(body["inbound_messages"].is_u64());
    }

    #[tokio::test]
    async fn stream_starts_with_snapshot_frame() {
        let state = state(false);
        let response = build_app(state.clone())
            .oneshot(Request::get("/stream").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(state.broadcaster.stream_subscribers(), 1);

        let mut body = response.into_body();
        let frame = body
            .frame()
            .await
            .expect("frame")
            .expect("data")
            .into_data()
            .expect("bytes");
        let text = String::from_utf8(frame.to_vec()).expect("utf8");
        assert!(text.starts_with("data: "));
        assert!(text.contains(r#""topic":"snapshot""#));

        drop(body);
        assert_eq!(state.broadcaster.stream_subscribers(), 0);
    }
}
