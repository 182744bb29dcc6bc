use crate::AppState;
use api_contract::HealthDto;
use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};

pub async fn health(State(state): State<AppState>) -> Response {
    Json(HealthDto {
        status: "ok".to_string(),
        broker: state.broker.clone(),
        base: state.base.clone(),
    })
    .into_response()
}
