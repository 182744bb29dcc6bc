use crate::AppState;
use api_contract::StatsDto;
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use ems_telemetry::metrics;

/// GET /stats：进程计数器与当前订阅者数量
pub async fn get_stats(State(state): State<AppState>) -> Response {
    let counters = metrics().snapshot();
    Json(StatsDto {
        inbound_messages: counters.inbound_messages,
        normalized_updates: counters.normalized_updates,
        dropped_malformed: counters.dropped_malformed,
        dropped_unmapped: counters.dropped_unmapped,
        envelopes_published: counters.envelopes_published,
        duplex_dropped_oldest: counters.duplex_dropped_oldest,
        stream_dropped_newest: counters.stream_dropped_newest,
        subscriber_send_failures: counters.subscriber_send_failures,
        mqtt_reconnects: counters.mqtt_reconnects,
        persist_success: counters.persist_success,
        persist_failure: counters.persist_failure,
        persist_backpressure: counters.persist_backpressure,
        stream_subscribers: state.broadcaster.stream_subscribers(),
        duplex_subscribers: state.broadcaster.duplex_subscribers(),
        duplex_queue_len: state.broadcaster.duplex_queue_len(),
    })
    .into_response()
}
