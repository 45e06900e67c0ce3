//! Shared state: tunnel statistics and what the status endpoint needs.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;

use crate::config::Config;

/// Tunnel connection event types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelEventType {
    Connected,
    Disconnected,
    ConnectFailed,
}

impl TunnelEventType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::ConnectFailed => "connect_failed",
        }
    }
}

/// A tunnel lifecycle event for observability.
#[derive(Clone, Debug)]
pub struct ConnectionEvent {
    pub timestamp: Instant,
    pub event_type: TunnelEventType,
    pub detail: String,
}

/// Maximum number of recent events to retain.
const MAX_TUNNEL_EVENTS: usize = 50;

/// Tunnel counters. Atomics on the hot path, Mutex only for the event log.
pub struct TunnelStats {
    pub connected: AtomicBool,
    /// Connection attempts after the first one.
    pub reconnects: AtomicU64,
    pub frames_received: AtomicU64,
    pub frames_forwarded: AtomicU64,
    /// Frames answered with "Invalid request".
    pub frames_rejected: AtomicU64,
    pub forward_failures: AtomicU64,
    /// Heartbeats skipped because the writer queue was full.
    pub dropped_heartbeats: AtomicU64,
    pub events: Mutex<VecDeque<ConnectionEvent>>,
}

impl TunnelStats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            reconnects: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            frames_forwarded: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            forward_failures: AtomicU64::new(0),
            dropped_heartbeats: AtomicU64::new(0),
            events: Mutex::new(VecDeque::with_capacity(MAX_TUNNEL_EVENTS)),
        }
    }

    /// Push a connection event, evicting oldest if at capacity.
    pub async fn push_event(&self, event_type: TunnelEventType, detail: String) {
        let mut events = self.events.lock().await;
        if events.len() >= MAX_TUNNEL_EVENTS {
            events.pop_front();
        }
        events.push_back(ConnectionEvent {
            timestamp: Instant::now(),
            event_type,
            detail,
        });
    }

    /// Up to `limit` events, newest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<ConnectionEvent> {
        let events = self.events.lock().await;
        events.iter().rev().take(limit).cloned().collect()
    }
}

impl Default for TunnelStats {
    fn default() -> Self {
        Self::new()
    }
}

/// State handed to the status endpoint via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Monotonic instant when the client started (for uptime calculation).
    pub start_time: Instant,
    pub tunnel_stats: Arc<TunnelStats>,
}
