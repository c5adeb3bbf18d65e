//! Real-time channel owner.
//!
//! Owns the single websocket connection to the portal, drives the connection
//! state machine, and forwards parsed inbound envelopes to the registered
//! consumer. Reconnects with exponential backoff up to the configured attempt
//! ceiling, after which the state becomes `Failed` and the polling fallback
//! is the sole event source until an explicit `connect()`.

use std::sync::{Arc, Mutex};

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::messages::{msg_types, system, ClientMessage, ServerMessage};
use super::state::{ConnectionState, ReconnectPolicy};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type MessageHandler = dyn Fn(ServerMessage) + Send + Sync;

/// Channel handshake/transport failure. Drives state transitions and logs,
/// never propagates to the embedding application.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket transport error: {0}")]
    Transport(#[from] tungstenite::Error),
    #[error("handshake timed out")]
    HandshakeTimeout,
    #[error("server rejected handshake: {0}")]
    HandshakeRejected(String),
    #[error("channel closed before handshake completed")]
    ClosedDuringHandshake,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Websocket endpoint, e.g. "wss://portal.example/v1/ws".
    pub url: String,
    pub user_id: String,
    /// Sent in the handshake hello for server-side diagnostics.
    pub client_version: String,
    pub handshake_timeout: std::time::Duration,
    pub heartbeat_interval: std::time::Duration,
    pub policy: ReconnectPolicy,
}

struct ChannelTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    settings: ConnectionSettings,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    handler: Arc<Mutex<Option<Arc<MessageHandler>>>>,
    outbound_tx: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
    task: Mutex<Option<ChannelTask>>,
}

impl ConnectionManager {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            settings,
            state_tx: Arc::new(watch::channel(ConnectionState::Disconnected).0),
            handler: Arc::new(Mutex::new(None)),
            outbound_tx: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Registers the single consumer of inbound envelopes. A second
    /// registration replaces the first.
    pub fn on_message(&self, handler: impl Fn(ServerMessage) + Send + Sync + 'static) {
        *self.handler.lock().unwrap() = Some(Arc::new(handler));
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Starts the channel task. Idempotent: a no-op while the task is already
    /// connecting, connected, or backing off. `Failed` and `Disconnected`
    /// start over from attempt zero.
    pub fn connect(&self, session_id: &str) {
        let mut task = self.task.lock().unwrap();
        if self.state().is_active() {
            debug!(state = self.state().as_str(), "connect() ignored, channel already active");
            return;
        }
        if let Some(previous) = task.take() {
            previous.cancel.cancel();
            previous.handle.abort();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound_tx.lock().unwrap() = Some(outbound_tx);

        self.state_tx.send_replace(ConnectionState::Connecting);

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_channel(
            self.settings.clone(),
            session_id.to_string(),
            Arc::clone(&self.state_tx),
            Arc::clone(&self.handler),
            outbound_rx,
            cancel.clone(),
        ));
        *task = Some(ChannelTask { cancel, handle });
    }

    /// Best-effort send: when not `Connected`, the message is dropped with a
    /// debug log. Never errors, never buffers across reconnects.
    pub fn send(&self, message: ClientMessage) {
        if !self.state().is_connected() {
            debug!(msg_type = %message.msg_type, "dropping outbound message, channel not connected");
            return;
        }
        if let Some(tx) = self.outbound_tx.lock().unwrap().as_ref() {
            if tx.send(message).is_err() {
                debug!("dropping outbound message, channel task gone");
            }
        }
    }

    /// Tears down the channel from any state: cancels the task, any pending
    /// backoff timer, and the in-flight attempt. Deterministic, never errors.
    pub fn disconnect(&self) {
        let mut task = self.task.lock().unwrap();
        if let Some(current) = task.take() {
            current.cancel.cancel();
        }
        *self.outbound_tx.lock().unwrap() = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.cancel.cancel();
            task.handle.abort();
        }
    }
}

fn to_frame(message: &ClientMessage) -> tungstenite::Message {
    let text = serde_json::to_string(message).unwrap_or_default();
    tungstenite::Message::text(text)
}

enum ServeExit {
    TransportLost,
    Cancelled,
}

async fn run_channel(
    settings: ConnectionSettings,
    session_id: String,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    handler: Arc<Mutex<Option<Arc<MessageHandler>>>>,
    mut outbound_rx: mpsc::UnboundedReceiver<ClientMessage>,
    cancel: CancellationToken,
) {
    // Failed handshakes since the last successful connection. Attempt 1 is
    // the initial connect; the ceiling counts every consecutive failure.
    let mut attempt: u32 = 0;

    loop {
        // On cancellation the task exits without touching the state: the
        // manager writes Disconnected (disconnect) or Connecting (a
        // superseding connect) synchronously, and a late write from this
        // task would clobber it.
        let established = tokio::select! {
            result = establish(&settings, &session_id) => result,
            _ = cancel.cancelled() => return,
        };

        match established {
            Ok(stream) => {
                attempt = 0;
                state_tx.send_replace(ConnectionState::Connected);
                info!(session_id = %session_id, "real-time channel connected");

                match serve(stream, &handler, &mut outbound_rx, &settings, &cancel).await {
                    ServeExit::Cancelled => return,
                    ServeExit::TransportLost => {
                        warn!("real-time channel lost, reconnecting");
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, attempt = attempt + 1, "channel handshake failed");
            }
        }

        attempt += 1;
        if settings.policy.is_exhausted(attempt) {
            warn!(
                attempts = attempt,
                "reconnect attempts exhausted, channel failed"
            );
            state_tx.send_replace(ConnectionState::Failed);
            return;
        }

        state_tx.send_replace(ConnectionState::Reconnecting { attempt });
        let delay = settings.policy.delay_for_attempt(attempt - 1);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "backing off before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Websocket upgrade plus application handshake: send `hello`, wait for
/// `connected` within the handshake timeout.
async fn establish(
    settings: &ConnectionSettings,
    session_id: &str,
) -> Result<WsStream, ConnectionError> {
    let (mut stream, _) = connect_async(&settings.url).await?;

    let hello = ClientMessage::new(
        msg_types::HELLO,
        system::Hello {
            session_id: session_id.to_string(),
            user_id: settings.user_id.clone(),
            client_version: settings.client_version.clone(),
        },
    );
    stream.send(to_frame(&hello)).await?;

    let handshake = tokio::time::timeout(settings.handshake_timeout, async move {
        loop {
            match stream.next().await {
                Some(Ok(tungstenite::Message::Text(text))) => match ServerMessage::parse(&text) {
                    Ok(msg) if msg.msg_type == msg_types::CONNECTED => {
                        if let Ok(ack) = serde_json::from_value::<system::Connected>(msg.payload) {
                            debug!(
                                session_id = %ack.session_id,
                                server_version = %ack.server_version,
                                "handshake acknowledged"
                            );
                        }
                        return Ok(stream);
                    }
                    Ok(msg) if msg.msg_type == msg_types::ERROR => {
                        return Err(ConnectionError::HandshakeRejected(msg.payload.to_string()));
                    }
                    Ok(msg) => {
                        debug!(msg_type = %msg.msg_type, "ignoring pre-handshake message");
                    }
                    Err(err) => {
                        debug!(error = %err, "dropping malformed frame during handshake");
                    }
                },
                Some(Ok(_)) => {}
                Some(Err(err)) => return Err(ConnectionError::Transport(err)),
                None => return Err(ConnectionError::ClosedDuringHandshake),
            }
        }
    })
    .await;

    match handshake {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::HandshakeTimeout),
    }
}

/// Connected-state loop: heartbeat, outbound sends, inbound dispatch.
async fn serve(
    mut stream: WsStream,
    handler: &Arc<Mutex<Option<Arc<MessageHandler>>>>,
    outbound_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    settings: &ConnectionSettings,
    cancel: &CancellationToken,
) -> ServeExit {
    let mut heartbeat = tokio::time::interval(settings.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // An interval fires immediately; the first tick is not a heartbeat.
    heartbeat.tick().await;

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if let Err(err) = stream.send(to_frame(&ClientMessage::empty(msg_types::PING))).await {
                    warn!(error = %err, "heartbeat send failed");
                    return ServeExit::TransportLost;
                }
            }
            Some(message) = outbound_rx.recv() => {
                if let Err(err) = stream.send(to_frame(&message)).await {
                    warn!(error = %err, "outbound send failed");
                    return ServeExit::TransportLost;
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        dispatch_frame(&text, handler, &mut stream).await;
                    }
                    Some(Ok(tungstenite::Message::Ping(data))) => {
                        let _ = stream.send(tungstenite::Message::Pong(data)).await;
                    }
                    Some(Ok(tungstenite::Message::Close(_))) | None => {
                        return ServeExit::TransportLost;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, "websocket read error");
                        return ServeExit::TransportLost;
                    }
                }
            }
            _ = cancel.cancelled() => {
                let _ = stream.close(None).await;
                return ServeExit::Cancelled;
            }
        }
    }
}

/// One inbound text frame. Malformed payloads are dropped and logged; a bad
/// message never reaches the handler and never tears down the channel.
async fn dispatch_frame(
    text: &str,
    handler: &Arc<Mutex<Option<Arc<MessageHandler>>>>,
    stream: &mut WsStream,
) {
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(err) => {
            debug!(error = %err, "dropping malformed inbound frame");
            return;
        }
    };

    match message.msg_type.as_str() {
        msg_types::PING => {
            let _ = stream.send(to_frame(&ClientMessage::empty(msg_types::PONG))).await;
        }
        msg_types::PONG => {}
        msg_types::ERROR => {
            if let Ok(error) = serde_json::from_value::<system::Error>(message.payload) {
                warn!(code = %error.code, message = %error.message, "server reported channel error");
            }
        }
        _ => {
            let callback = handler.lock().unwrap().clone();
            match callback {
                Some(callback) => callback(message),
                None => debug!(msg_type = %message.msg_type, "no message handler registered, frame dropped"),
            }
        }
    }
}
