//! Local health/status endpoint.

use std::sync::atomic::Ordering;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::AppState;

/// `GET /api/health` — liveness probe plus tunnel status.
///
/// Returns status, uptime, version, the forwarded port, tunnel counters and
/// the ten most recent connection events. No authentication; bind it to
/// loopback.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let uptime = state.start_time.elapsed().as_secs();
    let ts = &state.tunnel_stats;

    let now = std::time::Instant::now();
    let recent_events: Vec<Value> = ts
        .recent_events(10)
        .await
        .iter()
        .map(|e| {
            let ago = now.duration_since(e.timestamp);
            let ago_str = if ago.as_secs() < 60 {
                format!("{}s ago", ago.as_secs())
            } else if ago.as_secs() < 3600 {
                format!("{}m ago", ago.as_secs() / 60)
            } else {
                format!("{}h ago", ago.as_secs() / 3600)
            };
            json!({
                "time": ago_str,
                "event": e.event_type.as_str(),
                "detail": e.detail,
            })
        })
        .collect();

    Json(json!({
        "status": "ok",
        "uptime_secs": uptime,
        "version": env!("CARGO_PKG_VERSION"),
        "local_port": state.config.local.port,
        "tunnel": {
            "connected": ts.connected.load(Ordering::Relaxed),
            "reconnects": ts.reconnects.load(Ordering::Relaxed),
            "frames_received": ts.frames_received.load(Ordering::Relaxed),
            "frames_forwarded": ts.frames_forwarded.load(Ordering::Relaxed),
            "frames_rejected": ts.frames_rejected.load(Ordering::Relaxed),
            "forward_failures": ts.forward_failures.load(Ordering::Relaxed),
            "dropped_heartbeats": ts.dropped_heartbeats.load(Ordering::Relaxed),
            "recent_events": recent_events,
        },
    }))
}
