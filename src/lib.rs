use std::sync::Arc;

use axum::{middleware, routing::get, Router};

pub mod config;
pub mod content_fetcher;
pub mod domain;
pub mod errors;
pub mod executor;
pub mod http;
pub mod logging;
pub mod mcp;

use mcp::server::Relay;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
}

impl AppState {
    pub fn new(relay: Arc<Relay>) -> Self {
        Self { relay }
    }
}

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(http::handlers::health))
        .route("/.well-known/mcp", get(http::handlers::discovery))
        .route("/ws", get(http::handlers::ws_endpoint))
        .layer(middleware::from_fn(logging::request_logging_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use futures_util::{SinkExt, StreamExt};
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncBufReadExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
    use tower::ServiceExt;

    use crate::content_fetcher::ReqwestFetcher;
    use crate::domain::tools::FallbackTools;
    use crate::mcp::server::RelaySettings;

    use super::*;

    fn relay() -> Arc<Relay> {
        let fetcher = ReqwestFetcher::new(Duration::from_secs(1)).expect("client build");
        Arc::new(Relay::new(
            FallbackTools::new(Arc::new(fetcher)),
            RelaySettings::default(),
        ))
    }

    fn app_with(relay: Arc<Relay>) -> Router {
        build_app(AppState::new(relay))
    }

    fn app() -> Router {
        app_with(relay())
    }

    type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

    async fn connect_ws(relay: Arc<Relay>) -> WsClient {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app_with(relay)).await });

        let (ws, _) = connect_async(format!("ws://{addr}/ws"))
            .await
            .expect("websocket handshake");
        ws
    }

    async fn send_text(ws: &mut WsClient, frame: &str) {
        ws.send(Message::text(frame)).await.expect("send frame");
    }

    async fn next_json(ws: &mut WsClient) -> Value {
        loop {
            let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("frame before timeout")
                .expect("socket open")
                .expect("valid frame");
            if message.is_text() {
                let text = message.to_text().expect("utf-8 text");
                return serde_json::from_str(text).expect("json frame");
            }
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&body).expect("valid json response")
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        assert_eq!(body, "{\"status\":\"ok\"}");
    }

    #[tokio::test]
    async fn discovery_reports_disabled_executor() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/.well-known/mcp")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::OK);
        let body_json = body_json(response).await;
        assert_eq!(body_json["websocket_endpoint"], "/ws");
        assert_eq!(body_json["executor"], "disabled");
        assert_eq!(body_json["name"], env!("CARGO_PKG_NAME"));
    }

    #[tokio::test]
    async fn discovery_reports_running_executor() {
        let relay = relay();
        let (relay_end, _executor_end) = duplex(64);
        relay.attach_executor(Box::new(relay_end), None).await;

        let response = app_with(relay)
            .oneshot(
                Request::builder()
                    .uri("/.well-known/mcp")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(body_json(response).await["executor"], "running");
    }

    #[tokio::test]
    async fn ws_requires_upgrade() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn root_get_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .method("GET")
                    .body(Body::empty())
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn post_to_ws_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/ws")
                    .method("POST")
                    .body(Body::from(r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
                    .expect("request build"),
            )
            .await
            .expect("request execution");

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn websocket_session_relays_frames_and_cleans_up_on_close() {
        let relay = relay();
        let (relay_end, executor_end) = duplex(64 * 1024);
        relay.attach_executor(Box::new(relay_end), None).await;
        let mut forwarded = BufReader::new(executor_end).lines();
        let mut ws = connect_ws(Arc::clone(&relay)).await;

        send_text(&mut ws, "{not json").await;
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["error"]["code"], -32700);

        send_text(&mut ws, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#).await;
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["id"], 2);
        assert_eq!(reply["result"], "pong");

        let call = |id: &str| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": "readFile", "arguments": { "path": "a" } }
            })
            .to_string()
        };

        send_text(&mut ws, &call("w1")).await;
        let line = forwarded
            .next_line()
            .await
            .expect("read forwarded")
            .expect("forwarded line");
        let key = serde_json::from_str::<Value>(&line).expect("json line")["id"].clone();
        relay
            .handle_executor_line(&json!({ "jsonrpc": "2.0", "id": key, "result": "from executor" }).to_string())
            .await;
        let reply = next_json(&mut ws).await;
        assert_eq!(reply["id"], "w1");
        assert_eq!(reply["result"], "from executor");

        send_text(&mut ws, &call("w2")).await;
        forwarded
            .next_line()
            .await
            .expect("read forwarded")
            .expect("forwarded line");
        assert_eq!(relay.correlations().len().await, 1);

        ws.close(None).await.expect("close handshake");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !relay.correlations().is_empty().await {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("disconnect removes pending forwards");
    }
}
