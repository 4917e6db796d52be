//! Axum HTTP handlers for the web server
//!
//! Provides the browser-facing WebSocket endpoint, and general metadata endpoints.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    Json,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::mcp::server::{ExecutorStatus, Relay};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub websocket_endpoint: &'static str,
    pub executor: ExecutorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor_exit_code: Option<i32>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

pub async fn discovery(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        name: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        websocket_endpoint: "/ws",
        executor: state.relay.executor_status().await,
        executor_exit_code: state.relay.executor_exit_code().await,
    })
}

pub async fn ws_endpoint(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| serve_client(state.relay, socket))
}

/// Runs one client connection: inbound frames are handled in arrival order, while replies
/// relayed from the tool executor are written as they arrive.
async fn serve_client(relay: Arc<Relay>, mut socket: WebSocket) {
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let client = relay.register_client(outbound_tx);
    info!(client_id = %client.id(), "client connected");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                let frame = match inbound {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        debug!(client_id = %client.id(), error = %err, "websocket receive failed");
                        break;
                    }
                };

                if let Some(reply) = relay.handle_frame(&client, &frame).await {
                    if send_json(&mut socket, &reply).await.is_err() {
                        break;
                    }
                }
            }
            Some(message) = outbound_rx.recv() => {
                if send_json(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    relay.client_disconnected(client.id()).await;
}

async fn send_json(socket: &mut WebSocket, message: &Value) -> Result<(), axum::Error> {
    socket.send(Message::Text(message.to_string().into())).await
}
