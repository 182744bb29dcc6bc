//! HTTP 错误响应辅助函数
//!
//! 所有错误返回统一的 ApiResponse 格式，HTTP 状态码与错误码一一对应。

use api_contract::ApiResponse;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use ems_outage::OutageError;

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 资源未找到错误响应
pub fn not_found_error(message: impl Into<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ApiResponse::<()>::error("RESOURCE.NOT_FOUND", message.into())),
    )
        .into_response()
}

/// 依赖服务不可用响应
pub fn unavailable_error(message: impl Into<String>) -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ApiResponse::<()>::error("SERVICE.UNAVAILABLE", message.into())),
    )
        .into_response()
}

/// 检测服务错误映射
pub fn outage_error(err: OutageError) -> Response {
    let message = err.to_string();
    match err {
        OutageError::InvalidQuery(_) => bad_request_error(message),
        OutageError::DeviceNotFound(_) => not_found_error(message),
        OutageError::Source(_) => unavailable_error(message),
    }
}
