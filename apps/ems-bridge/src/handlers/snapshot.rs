//! 快照查询 handlers
//!
//! - GET /metrics：当前规范化指标
//! - GET /telemetry：最近一次汇总遥测原文
//! - GET /samples/{voltage|current}?n=N：最近 N 个采样点（时间升序）

use crate::AppState;
use crate::utils::response::{bad_request_error, not_found_error};
use api_contract::SamplesQuery;
use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use domain::SampleChannel;

pub async fn get_metrics(State(state): State<AppState>) -> Response {
    Json(state.store.metric()).into_response()
}

pub async fn get_telemetry(State(state): State<AppState>) -> Response {
    Json(state.store.raw_record()).into_response()
}

pub async fn get_samples(
    State(state): State<AppState>,
    Path(channel): Path<String>,
    query: Result<Query<SamplesQuery>, QueryRejection>,
) -> Response {
    let Some(channel) = SampleChannel::parse(&channel) else {
        return not_found_error(format!("unknown sample channel: {channel}"));
    };
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request_error(rejection.body_text()),
    };
    Json(state.store.recent_samples(channel, query.limit())).into_response()
}
