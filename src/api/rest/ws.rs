use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use crate::models::notification::Channel;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    /// Only forward notifications for this audience.
    pub channel: Option<Channel>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, params.channel))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, channel: Option<Channel>) {
    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.events.subscribe();

    info!(channel = ?channel, "websocket client connected");

    let send_task = tokio::spawn(async move {
        loop {
            let notification = match rx.recv().await {
                Ok(notification) => notification,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "websocket client lagging; notifications dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            if channel.is_some_and(|wanted| wanted != notification.channel) {
                continue;
            }

            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize notification for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    info!("websocket client disconnected");
}
