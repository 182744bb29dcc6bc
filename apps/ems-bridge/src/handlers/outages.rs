//! 停电/断数查询 handler
//!
//! - GET /metrics/power-outages?start=&end=&device=[&min_voltage=&max_gap_minutes=]

use crate::AppState;
use crate::utils::response::{bad_request_error, outage_error, unavailable_error};
use crate::utils::time::parse_time_param;
use api_contract::PowerOutageQuery;
use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
    response::{IntoResponse, Response},
};
use ems_outage::OutageQuery;

pub async fn get_power_outages(
    State(state): State<AppState>,
    query: Result<Query<PowerOutageQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(query) => query,
        Err(rejection) => return bad_request_error(rejection.body_text()),
    };
    let request = match outage_query(query) {
        Ok(request) => request,
        Err(response) => return response,
    };
    let Some(service) = state.outages.as_ref() else {
        return unavailable_error("history source not configured");
    };
    match service.detect(&request).await {
        Ok(events) => Json(events).into_response(),
        Err(err) => outage_error(err),
    }
}

/// 校验并转换查询参数。
fn outage_query(query: PowerOutageQuery) -> Result<OutageQuery, Response> {
    let (Some(start), Some(end)) = (query.start.as_deref(), query.end.as_deref()) else {
        return Err(bad_request_error("start and end parameters are required"));
    };
    let device = query
        .device
        .map(|device| device.trim().to_string())
        .filter(|device| !device.is_empty())
        .ok_or_else(|| bad_request_error("device parameter is required"))?;
    let start_ms = parse_time_param(start)
        .ok_or_else(|| bad_request_error(format!("invalid start: {start}")))?;
    let end_ms =
        parse_time_param(end).ok_or_else(|| bad_request_error(format!("invalid end: {end}")))?;
    if query.min_voltage.is_some_and(|value| !value.is_finite()) {
        return Err(bad_request_error("min_voltage must be a finite number"));
    }
    Ok(OutageQuery {
        device,
        start_ms,
        end_ms,
        min_voltage: query.min_voltage,
        max_gap_minutes: query.max_gap_minutes,
    })
}
