//! 流式推送（SSE）
//!
//! 每个连接独享一条订阅：首帧为快照，之后逐条推送更新，空闲时推送保活帧。
//! 连接断开时响应流被释放，订阅随之注销。

use crate::AppState;
use axum::{
    extract::State,
    http::{HeaderValue, header},
    response::{
        IntoResponse, Response,
        sse::{Event, Sse},
    },
};
use std::convert::Infallible;

pub async fn stream_events(State(state): State<AppState>) -> Response {
    let subscription = state.broadcaster.subscribe_stream();
    let events = futures::stream::unfold(subscription, |mut subscription| async move {
        let frame = subscription.next_frame().await?;
        let event = Event::default().data(frame.as_str());
        Some((Ok::<Event, Infallible>(event), subscription))
    });

    let mut response = Sse::new(events).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}
