//! Tunnel client — outbound WS connection from this host to the relay.
//!
//! Spawned on startup. Maintains a persistent WebSocket to the relay with a
//! fixed-delay reconnect and a heartbeat, and answers every request frame by
//! forwarding it to the local service.
//!
//! One connection runs three tasks:
//!
//! - the **dispatcher** (this task) reads frames in order and handles each one
//!   to completion before reading the next;
//! - the **writer** owns the WS sink and is the only code that writes to it;
//! - the **heartbeat** enqueues a control message every period.
//!
//! The dispatcher and heartbeat reach the writer through one bounded channel.
//! A failed response write ends the connection; a failed heartbeat write does
//! not, since a dead socket also surfaces on the read side.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::forward::LocalForwarder;
use super::frame::{self, ControlMessage, Inbound, ResponseFrame, INVALID_REQUEST};
use super::target::{ConnectionTarget, TargetError};
use crate::state::{TunnelEventType, TunnelStats};

type WsConnection = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsConnection, Message>;
type WsStream = SplitStream<WsConnection>;

/// Pending writes allowed before heartbeats start being dropped.
const OUTBOUND_QUEUE: usize = 32;

/// How long the writer gets to flush and close the sink once a session ends.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Everything one connection attempt needs. Read-only for the life of the client.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Relay base address, e.g. `https://vpn.example.com`.
    pub server: String,
    pub key: String,
    pub version: Option<String>,
    pub local_port: u16,
    pub request_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// Delay between connection attempts. Fixed, unbounded retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub interval: Duration,
}

impl ReconnectPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fixed(Duration::from_secs(3))
    }
}

/// Connection-level failures. Only these end a session.
#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error("connect failed: {0}")]
    Connect(#[source] Box<tungstenite::Error>),
    #[error("read failed: {0}")]
    Read(#[source] Box<tungstenite::Error>),
    #[error("write failed: {0}")]
    Write(#[source] Box<tungstenite::Error>),
    #[error("encoding frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("writer task stopped")]
    WriterGone,
}

/// Reason a connection ended without an error.
#[derive(Debug)]
enum DisconnectReason {
    /// Relay sent a close frame.
    Closed(Option<CloseFrame>),
    /// Stream ended without a close frame.
    StreamEnded,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed(Some(frame)) => {
                write!(
                    f,
                    "closed by relay ({}: {})",
                    u16::from(frame.code),
                    frame.reason.as_str()
                )
            }
            Self::Closed(None) => write!(f, "closed by relay"),
            Self::StreamEnded => write!(f, "stream ended"),
        }
    }
}

/// Messages for the writer task.
enum Outbound {
    Heartbeat,
    Response {
        frame: ResponseFrame,
        ack: oneshot::Sender<Result<(), TunnelError>>,
    },
}

/// Spawn the tunnel client task. Returns a `JoinHandle` that runs until aborted.
pub fn spawn(
    session: SessionConfig,
    policy: ReconnectPolicy,
    stats: Arc<TunnelStats>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(session, policy, stats))
}

/// Main loop: connect, serve frames, wait `policy.interval`, repeat. Never returns.
pub async fn run(session: SessionConfig, policy: ReconnectPolicy, stats: Arc<TunnelStats>) {
    let forwarder = LocalForwarder::new(session.local_port, session.request_timeout);
    let mut attempts: u64 = 0;

    loop {
        if attempts > 0 {
            stats.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        attempts += 1;

        match connect_and_run(&session, &forwarder, &stats).await {
            Ok(reason) => {
                info!(
                    "Tunnel: disconnected ({reason}), reconnecting in {}s",
                    policy.interval.as_secs_f64()
                );
                stats
                    .push_event(TunnelEventType::Disconnected, reason.to_string())
                    .await;
            }
            Err(e @ (TunnelError::Connect(_) | TunnelError::Target(_))) => {
                warn!(
                    "Tunnel: connection attempt failed: {e}, retrying in {}s",
                    policy.interval.as_secs_f64()
                );
                stats
                    .push_event(TunnelEventType::ConnectFailed, e.to_string())
                    .await;
            }
            Err(e) => {
                warn!(
                    "Tunnel: connection error: {e}, reconnecting in {}s",
                    policy.interval.as_secs_f64()
                );
                stats
                    .push_event(TunnelEventType::Disconnected, e.to_string())
                    .await;
            }
        }
        stats.connected.store(false, Ordering::Relaxed);
        tokio::time::sleep(policy.interval).await;
    }
}

/// A single connection attempt: connect, serve frames until disconnect.
async fn connect_and_run(
    session: &SessionConfig,
    forwarder: &LocalForwarder,
    stats: &Arc<TunnelStats>,
) -> Result<DisconnectReason, TunnelError> {
    // Rebuilt every attempt so a reconnect never reuses a stale URL.
    let target = ConnectionTarget::new(&session.server, &session.key, session.version.as_deref())?;
    info!("Tunnel: connecting to relay at {target}");

    let (ws, _response) = tokio_tungstenite::connect_async(target.as_str())
        .await
        .map_err(|e| TunnelError::Connect(Box::new(e)))?;
    let (sink, mut stream) = ws.split();

    info!(
        "Tunnel: connected to relay, forwarding to 127.0.0.1:{}",
        forwarder.port()
    );
    stats.connected.store(true, Ordering::Relaxed);
    stats
        .push_event(TunnelEventType::Connected, target.redacted())
        .await;

    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
    let mut writer = tokio::spawn(writer_task(sink, rx));
    let heartbeat = tokio::spawn(heartbeat_task(
        tx.clone(),
        session.heartbeat_interval,
        stats.clone(),
    ));

    let result = dispatch_loop(&mut stream, &tx, forwarder, stats).await;

    // Once every sender is gone the writer closes the sink, which also
    // flushes a pending close reply to the relay.
    heartbeat.abort();
    let _ = heartbeat.await;
    drop(tx);
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        debug!("Tunnel: writer did not close in time");
        writer.abort();
    }
    result
}

/// Sole owner of the WS sink. Closes it when the channel is drained.
async fn writer_task(mut sink: WsSink, mut rx: mpsc::Receiver<Outbound>) {
    while let Some(out) = rx.recv().await {
        match out {
            Outbound::Heartbeat => {
                if let Err(e) = send_json(&mut sink, &ControlMessage::Heartbeat).await {
                    debug!("Tunnel: heartbeat write failed: {e}");
                }
            }
            Outbound::Response { frame, ack } => {
                let _ = ack.send(send_json(&mut sink, &frame).await);
            }
        }
    }
    if let Err(e) = sink.close().await {
        debug!("Tunnel: closing socket: {e}");
    }
}

async fn send_json<T: Serialize>(sink: &mut WsSink, msg: &T) -> Result<(), TunnelError> {
    let text = serde_json::to_string(msg)?;
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| TunnelError::Write(Box::new(e)))
}

/// Enqueue a heartbeat every `period`, first one after a full period.
async fn heartbeat_task(tx: mpsc::Sender<Outbound>, period: Duration, stats: Arc<TunnelStats>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        match tx.try_send(Outbound::Heartbeat) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                stats.dropped_heartbeats.fetch_add(1, Ordering::Relaxed);
                debug!("Tunnel: writer busy, heartbeat skipped");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

/// Read frames until the connection ends. Each frame is answered before the
/// next one is read.
async fn dispatch_loop(
    stream: &mut WsStream,
    tx: &mpsc::Sender<Outbound>,
    forwarder: &LocalForwarder,
    stats: &TunnelStats,
) -> Result<DisconnectReason, TunnelError> {
    while let Some(msg) = stream.next().await {
        let msg = msg.map_err(|e| TunnelError::Read(Box::new(e)))?;
        let reply = match msg {
            Message::Text(text) => handle_message(forwarder, stats, text.as_str()).await,
            Message::Binary(data) => match std::str::from_utf8(&data) {
                Ok(text) => handle_message(forwarder, stats, text).await,
                Err(_) => Some(reject(stats, String::new())),
            },
            Message::Close(frame) => return Ok(DisconnectReason::Closed(frame)),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        };
        if let Some(frame) = reply {
            respond(tx, frame).await?;
        }
    }
    Ok(DisconnectReason::StreamEnded)
}

/// Hand `frame` to the writer and wait until it is on the wire.
async fn respond(tx: &mpsc::Sender<Outbound>, frame: ResponseFrame) -> Result<(), TunnelError> {
    let (ack, written) = oneshot::channel();
    tx.send(Outbound::Response { frame, ack })
        .await
        .map_err(|_| TunnelError::WriterGone)?;
    written.await.map_err(|_| TunnelError::WriterGone)?
}

/// Handle one inbound message. Returns the frame to send back, if any.
///
/// Every per-frame failure is turned into an error frame here; nothing in
/// this function can end the connection.
pub async fn handle_message(
    forwarder: &LocalForwarder,
    stats: &TunnelStats,
    raw: &str,
) -> Option<ResponseFrame> {
    stats.frames_received.fetch_add(1, Ordering::Relaxed);

    let request = match frame::decode(raw) {
        Inbound::Request(request) => request,
        Inbound::Invalid { id } => return Some(reject(stats, id)),
        Inbound::Notice { id, error } => {
            warn!(id = %id, "Tunnel: relay reported: {error}");
            return None;
        }
    };

    let started = Instant::now();
    match forwarder.forward(&request).await {
        Ok(response) => {
            stats.frames_forwarded.fetch_add(1, Ordering::Relaxed);
            debug!(
                id = %request.id,
                method = request.method_or_default(),
                path = %request.path,
                status = response.status.unwrap_or_default(),
                elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                "Tunnel: forwarded"
            );
            Some(response)
        }
        Err(e) => {
            stats.forward_failures.fetch_add(1, Ordering::Relaxed);
            warn!(
                id = %request.id,
                method = request.method_or_default(),
                path = %request.path,
                "Tunnel: forwarding failed: {e}"
            );
            Some(ResponseFrame::failure(request.id, e.to_string()))
        }
    }
}

fn reject(stats: &TunnelStats, id: String) -> ResponseFrame {
    stats.frames_rejected.fetch_add(1, Ordering::Relaxed);
    warn!(id = %id, "Tunnel: rejected invalid frame");
    ResponseFrame::failure(id, INVALID_REQUEST)
}
