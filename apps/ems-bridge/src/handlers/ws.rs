//! 双工推送（WebSocket）
//!
//! 连接建立后先发送快照帧，再加入广播；客户端发送 `ping` 时回复 pong 帧，
//! 其余入站文本忽略。

use crate::AppState;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use ems_fanout::{DuplexSink, FanoutError, PONG_FRAME, is_ping};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// WebSocket 写半部；广播任务与 pong 应答共用。
struct WsSink {
    sender: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait]
impl DuplexSink for WsSink {
    async fn send_text(&self, text: &str) -> Result<(), FanoutError> {
        self.sender
            .lock()
            .await
            .send(Message::Text(text.to_string()))
            .await
            .map_err(|err| FanoutError::Send(err.to_string()))
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(socket: WebSocket, state: AppState) {
    let (sender, mut receiver) = socket.split();
    let sink = Arc::new(WsSink {
        sender: Mutex::new(sender),
    });

    // 持有写锁完成注册与快照发送，广播帧只能排在快照之后
    let mut writer = sink.sender.lock().await;
    let handle = state.broadcaster.register_duplex(sink.clone());
    let snapshot = match state.broadcaster.snapshot_frame() {
        Ok(frame) => frame,
        Err(err) => {
            warn!(target: "ems.http", error = %err, "duplex_snapshot_failed");
            return;
        }
    };
    if let Err(err) = writer.send(Message::Text(snapshot)).await {
        debug!(target: "ems.http", error = %err, "duplex_snapshot_failed");
        return;
    }
    drop(writer);
    debug!(target: "ems.http", subscriber = handle.id(), "duplex_connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) if is_ping(&text) => {
                if sink.send_text(PONG_FRAME).await.is_err() {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {}
        }
    }
    debug!(target: "ems.http", subscriber = handle.id(), "duplex_disconnected");
}
