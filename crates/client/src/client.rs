//! WebSocket relay client with automatic reconnection

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::backoff::ReconnectPolicy;
use crate::error::{ClientError, ClientResult};

type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Websocket endpoint, e.g. `ws://localhost:8080/ws`
    pub url: String,
    /// Party identity sent as the `userId` query parameter
    pub identity: String,
    pub handshake_timeout: Duration,
    pub ping_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl RelayConfig {
    pub fn new(url: impl Into<String>, identity: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identity: identity.into(),
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Endpoint URL with the identity attached
    pub fn endpoint(&self) -> ClientResult<String> {
        let identity = self.identity.trim();
        let valid = !identity.is_empty()
            && identity
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~' | '@'));
        if !valid {
            return Err(ClientError::InvalidIdentity(self.identity.clone()));
        }

        let separator = if self.url.contains('?') { '&' } else { '?' };
        Ok(format!("{}{separator}userId={identity}", self.url))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect attempts exhausted; call `connect` again to restart
    GaveUp,
}

/// An event frame pushed by the relay
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub kind: String,
    pub body: Value,
}

impl InboundFrame {
    /// Parse a text frame. Server keep-alives and frames without a `type` yield `None`.
    pub fn parse(text: &str) -> Option<Self> {
        let body: Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Dropping non-JSON frame");
                return None;
            }
        };

        let kind = body.get("type")?.as_str()?.to_string();
        if kind == "ping" {
            return None;
        }
        Some(Self { kind, body })
    }
}

/// How a connected session ended
#[derive(Debug, PartialEq)]
enum SessionEnd {
    /// Server closed with 1000 or 1001
    Closed,
    /// `disconnect` was called
    Stopped,
    Lost(String),
}

struct Inner {
    config: RelayConfig,
    state: watch::Sender<ConnectionState>,
    frames: broadcast::Sender<InboundFrame>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    stop: watch::Sender<bool>,
}

pub struct RelayClient {
    inner: Arc<Inner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayClient {
    pub fn new(config: RelayConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (frames, _) = broadcast::channel(256);
        let (stop, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config,
                state,
                frames,
                outbound: Mutex::new(None),
                stop,
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Follow state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive inbound event frames
    pub fn subscribe(&self) -> broadcast::Receiver<InboundFrame> {
        self.inner.frames.subscribe()
    }

    /// Start the connection loop. A no-op while the loop is already running.
    pub async fn connect(&self) -> ClientResult<()> {
        // Fail fast on a bad identity instead of retrying it ten times
        self.inner.config.endpoint()?;

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Relay client already running");
            return Ok(());
        }

        self.inner.stop.send_replace(false);
        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move { inner.run().await }));
        Ok(())
    }

    /// Close the connection without reconnecting
    pub async fn disconnect(&self) {
        self.inner.stop.send_replace(true);

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "Relay client task ended abnormally");
            }
        }

        *self.inner.outbound.lock().await = None;
        self.inner.set_state(ConnectionState::Disconnected);
        info!("Disconnected from relay");
    }

    /// Send a JSON frame on the live connection
    pub async fn send<T: Serialize>(&self, frame: &T) -> ClientResult<()> {
        let text = serde_json::to_string(frame)?;
        let outbound = self.inner.outbound.lock().await;
        let sender = outbound.as_ref().ok_or(ClientError::NotConnected)?;
        sender
            .send(Message::Text(text))
            .map_err(|_| ClientError::NotConnected)
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }

    fn stopping(&self) -> bool {
        *self.stop.borrow()
    }

    async fn run(&self) {
        let policy = self.config.reconnect;
        let mut stop = self.stop.subscribe();
        let mut attempt: u32 = 0;

        loop {
            if self.stopping() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            match self.open().await {
                Ok(stream) => {
                    attempt = 0;
                    match self.pump(stream).await {
                        SessionEnd::Closed => {
                            info!("Relay closed the connection normally");
                            break;
                        }
                        SessionEnd::Stopped => break,
                        SessionEnd::Lost(reason) => {
                            warn!(reason = %reason, "Relay connection lost");
                        }
                    }
                }
                Err(e) => warn!(error = %e, attempt, "Relay connection failed"),
            }

            if self.stopping() {
                break;
            }
            if policy.exhausted(attempt) {
                warn!(attempts = attempt, "Giving up on the relay");
                self.set_state(ConnectionState::GaveUp);
                return;
            }

            let delay = policy.delay(attempt);
            attempt += 1;
            self.set_state(ConnectionState::Disconnected);
            info!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stopped(&mut stop) => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    async fn open(&self) -> ClientResult<RelayStream> {
        let endpoint = self.config.endpoint()?;
        let (stream, _) = timeout(self.config.handshake_timeout, connect_async(endpoint))
            .await
            .map_err(|_| ClientError::Timeout)??;
        Ok(stream)
    }

    async fn pump(&self, stream: RelayStream) -> SessionEnd {
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.outbound.lock().await = Some(tx);
        self.set_state(ConnectionState::Connected);
        info!(url = %self.config.url, "Connected to relay");

        let mut stop = self.stop.subscribe();
        let period = self.config.ping_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        let end = loop {
            tokio::select! {
                incoming = source.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(frame) = InboundFrame::parse(&text) {
                            debug!(kind = %frame.kind, "Relay event received");
                            // No subscribers is fine
                            let _ = self.frames.send(frame);
                        }
                    }
                    Some(Ok(Message::Close(frame))) => break close_outcome(frame.as_ref()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                    None => break SessionEnd::Lost("stream ended".to_string()),
                },
                Some(message) = rx.recv() => {
                    if let Err(e) = sink.send(message).await {
                        break SessionEnd::Lost(e.to_string());
                    }
                }
                _ = heartbeat.tick() => {
                    let ping = serde_json::json!({ "type": "ping", "timestamp": now_millis() });
                    if let Err(e) = sink.send(Message::Text(ping.to_string())).await {
                        break SessionEnd::Lost(e.to_string());
                    }
                }
                _ = stopped(&mut stop) => {
                    let close = Message::Close(Some(CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    }));
                    if let Err(e) = sink.send(close).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    break SessionEnd::Stopped;
                }
            }
        };

        *self.outbound.lock().await = None;
        end
    }
}

/// Resolves once `disconnect` has been requested
async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stopped| *stopped).await;
}

fn close_outcome(frame: Option<&CloseFrame<'_>>) -> SessionEnd {
    match frame.map(|f| f.code) {
        Some(CloseCode::Normal) | Some(CloseCode::Away) => SessionEnd::Closed,
        Some(code) => SessionEnd::Lost(format!("closed with code {}", u16::from(code))),
        None => SessionEnd::Lost("closed without status".to_string()),
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
