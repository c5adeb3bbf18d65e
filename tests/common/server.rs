//! Mock portal server for end-to-end tests.
//!
//! Serves the websocket channel, the notification feed, and the push
//! subscription endpoints on a random port. Tests script it through the
//! handle: seed the feed, push real-time frames, reject handshakes, kick
//! live connections, and read the call counters.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{any, get};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use protocolo_notify_client::RawNotification;

const SERVER_READY_TIMEOUT_MS: u64 = 5000;
const SERVER_READY_POLL_INTERVAL_MS: u64 = 10;

struct PortalState {
    feed: Mutex<Vec<RawNotification>>,
    feed_fetches: AtomicUsize,
    last_since: Mutex<Option<String>>,
    reject_handshakes: AtomicUsize,
    connections: AtomicUsize,
    push_registrations: AtomicUsize,
    push_revocations: AtomicUsize,
    failing_revocations: AtomicUsize,
    frame_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
}

/// Scriptable portal instance bound to a random port.
///
/// When dropped, the server shuts down and releases the port.
pub struct TestServer {
    /// Base URL for the client config (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    state: Arc<PortalState>,
    _shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let (frame_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(8);
        let state = Arc::new(PortalState {
            feed: Mutex::new(Vec::new()),
            feed_fetches: AtomicUsize::new(0),
            last_since: Mutex::new(None),
            reject_handshakes: AtomicUsize::new(0),
            connections: AtomicUsize::new(0),
            push_registrations: AtomicUsize::new(0),
            push_revocations: AtomicUsize::new(0),
            failing_revocations: AtomicUsize::new(0),
            frame_tx,
            kick_tx,
        });

        let app = Router::new()
            .route("/", get(|| async { StatusCode::OK }))
            .route("/v1/ws", any(ws_route))
            .route("/v1/notifications", get(feed_route))
            .route(
                "/v1/push/subscriptions",
                axum::routing::post(register_push_route).delete(revoke_push_route),
            )
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .expect("Server failed");
        });

        let server = Self {
            base_url,
            state,
            _shutdown_tx: Some(shutdown_tx),
        };
        server.wait_for_ready().await;
        server
    }

    /// Pushes a notification to every live websocket connection.
    pub fn push_notification(&self, raw: &RawNotification) {
        self.push_frame(
            json!({ "type": "notification", "payload": raw })
                .to_string(),
        );
    }

    /// Pushes an arbitrary text frame to every live websocket connection.
    pub fn push_frame(&self, frame: String) {
        let _ = self.state.frame_tx.send(frame);
    }

    /// Appends a record to the poll feed.
    pub fn add_feed(&self, raw: RawNotification) {
        self.state.feed.lock().unwrap().push(raw);
    }

    /// Rejects the next `count` websocket handshakes by closing before the
    /// acknowledgment.
    pub fn fail_next_handshakes(&self, count: usize) {
        self.state.reject_handshakes.store(count, Ordering::SeqCst);
    }

    /// Closes every live websocket connection from the server side.
    pub fn kick_connections(&self) {
        let _ = self.state.kick_tx.send(());
    }

    /// Fails the next `count` push revocations with a server error.
    pub fn fail_next_revocations(&self, count: usize) {
        self.state.failing_revocations.store(count, Ordering::SeqCst);
    }

    /// Completed websocket handshakes so far.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn feed_fetches(&self) -> usize {
        self.state.feed_fetches.load(Ordering::SeqCst)
    }

    /// The `since` cursor of the most recent feed fetch.
    pub fn last_since(&self) -> Option<String> {
        self.state.last_since.lock().unwrap().clone()
    }

    pub fn push_registrations(&self) -> usize {
        self.state.push_registrations.load(Ordering::SeqCst)
    }

    pub fn push_revocations(&self) -> usize {
        self.state.push_revocations.load(Ordering::SeqCst)
    }

    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self._shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn ws_route(State(state): State<Arc<PortalState>>, ws: WebSocketUpgrade) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<PortalState>) {
    // The client speaks first with its hello.
    let hello = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => break text,
            Some(Ok(_)) => continue,
            _ => return,
        }
    };

    if state.reject_handshakes.load(Ordering::SeqCst) > 0 {
        state.reject_handshakes.fetch_sub(1, Ordering::SeqCst);
        return;
    }

    let session_id = serde_json::from_str::<Value>(&hello)
        .ok()
        .and_then(|v| v["payload"]["sessionId"].as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    let ack = json!({
        "type": "connected",
        "payload": { "sessionId": session_id, "serverVersion": "test" }
    })
    .to_string();
    if socket.send(Message::Text(ack.into())).await.is_err() {
        return;
    }
    state.connections.fetch_add(1, Ordering::SeqCst);

    let mut frame_rx = state.frame_tx.subscribe();
    let mut kick_rx = state.kick_tx.subscribe();
    loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let Ok(frame) = frame else { return };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            _ = kick_rx.recv() => {
                // Hard drop; the client sees the transport close.
                return;
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let is_ping = serde_json::from_str::<Value>(&text)
                            .map(|v| v["type"] == "ping")
                            .unwrap_or(false);
                        if is_ping {
                            let pong = json!({ "type": "pong" }).to_string();
                            if socket.send(Message::Text(pong.into())).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => return,
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(rename = "userId")]
    #[allow(dead_code)]
    user_id: String,
    since: Option<String>,
}

async fn feed_route(
    State(state): State<Arc<PortalState>>,
    Query(query): Query<FeedQuery>,
) -> Json<Value> {
    state.feed_fetches.fetch_add(1, Ordering::SeqCst);
    *state.last_since.lock().unwrap() = query.since.clone();

    let feed = state.feed.lock().unwrap();
    let notifications: Vec<&RawNotification> = feed
        .iter()
        .filter(|raw| match (&query.since, &raw.id) {
            (Some(since), Some(id)) => id.as_str() > since.as_str(),
            _ => true,
        })
        .collect();
    Json(json!({ "notifications": notifications }))
}

async fn register_push_route(
    State(state): State<Arc<PortalState>>,
    Json(_body): Json<Value>,
) -> StatusCode {
    state.push_registrations.fetch_add(1, Ordering::SeqCst);
    StatusCode::CREATED
}

async fn revoke_push_route(
    State(state): State<Arc<PortalState>>,
    Json(_body): Json<Value>,
) -> StatusCode {
    if state.failing_revocations.load(Ordering::SeqCst) > 0 {
        state.failing_revocations.fetch_sub(1, Ordering::SeqCst);
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    state.push_revocations.fetch_add(1, Ordering::SeqCst);
    StatusCode::NO_CONTENT
}
