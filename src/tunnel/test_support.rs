//! Loopback servers shared by the tunnel tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, Method, Uri};
use axum::response::{AppendHeaders, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use super::forward::encode_body;

/// Serve `app` on an ephemeral loopback port.
pub(crate) async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port nothing listens on.
pub(crate) async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// The "local service" behind the tunnel. Returns its port.
///
/// - `GET /status` → `200 {"ok":true}` as `application/json`
/// - `ANY /echo` → what the service saw: method, query, host, headers, body
/// - `GET /cookies` → two `Set-Cookie` headers
/// - `GET /slow` → answers after five seconds
pub(crate) async fn spawn_local_service() -> u16 {
    let app = Router::new()
        .route("/status", get(|| async { Json(json!({"ok": true})) }))
        .route("/echo", any(echo))
        .route(
            "/cookies",
            get(|| async {
                (
                    AppendHeaders([(header::SET_COOKIE, "a=1"), (header::SET_COOKIE, "b=2")]),
                    "ok",
                )
            }),
        )
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        );
    serve(app).await.port()
}

async fn echo(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let all = |name: &str| -> Vec<String> {
        headers
            .get_all(name)
            .iter()
            .map(|v| v.to_str().unwrap_or_default().to_string())
            .collect()
    };
    Json(json!({
        "method": method.as_str(),
        "query": uri.query().unwrap_or_default(),
        "host": all("host"),
        "multi": all("x-multi"),
        "single": all("x-single"),
        "body": encode_body(&body),
    }))
}

/// What the fake relay observed.
#[derive(Debug)]
pub(crate) enum RelayEvent {
    /// A client upgraded; carries its query parameters.
    Connected(HashMap<String, String>),
    /// A text message from the client.
    Message(String),
    /// The client answered the relay's close frame.
    CloseAcked,
}

/// What the fake relay does once its script is sent.
#[derive(Debug, Clone, Copy)]
pub(crate) enum AfterScript {
    /// Keep the socket open and record client messages.
    Listen,
    /// Send a close frame and wait for the client's reply.
    Close,
    /// Drop the TCP connection without a close frame.
    Drop,
}

#[derive(Clone)]
struct FakeRelay {
    script: Arc<Vec<String>>,
    after: AfterScript,
    events: mpsc::UnboundedSender<RelayEvent>,
}

/// A relay stand-in serving `/ws`. On every connection it sends `script`,
/// then behaves as `after` says.
///
/// Returns the base address to configure as the client's server.
pub(crate) async fn spawn_fake_relay(
    script: Vec<String>,
    after: AfterScript,
) -> (String, mpsc::UnboundedReceiver<RelayEvent>) {
    let (events, rx) = mpsc::unbounded_channel();
    let relay = FakeRelay {
        script: Arc::new(script),
        after,
        events,
    };
    let app = Router::new().route("/ws", get(relay_ws)).with_state(relay);
    let addr = serve(app).await;
    (format!("http://{addr}"), rx)
}

async fn relay_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(relay): State<FakeRelay>,
) -> Response {
    ws.on_upgrade(move |socket| relay_session(socket, relay, query))
}

async fn relay_session(mut socket: WebSocket, relay: FakeRelay, query: HashMap<String, String>) {
    let _ = relay.events.send(RelayEvent::Connected(query));
    for msg in relay.script.iter() {
        if socket.send(Message::Text(msg.clone().into())).await.is_err() {
            return;
        }
    }
    match relay.after {
        AfterScript::Close => {
            let _ = socket.send(Message::Close(None)).await;
            while let Some(Ok(msg)) = socket.recv().await {
                if let Message::Close(_) = msg {
                    let _ = relay.events.send(RelayEvent::CloseAcked);
                    break;
                }
            }
        }
        AfterScript::Drop => drop(socket),
        AfterScript::Listen => {
            while let Some(Ok(msg)) = socket.recv().await {
                if let Message::Text(text) = msg {
                    let _ = relay.events.send(RelayEvent::Message(text.as_str().to_string()));
                }
            }
        }
    }
}
