#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # webvpn-client
//!
//! Reverse-tunnel client for WebVPN.
//!
//! Dials out to a relay over WebSocket, receives HTTP requests as JSON frames
//! and forwards each one to a service on `127.0.0.1:<port>`, so that service
//! is reachable through the relay without any inbound exposure.
//!
//! ```text
//! webvpn-client --server https://vpn.example.com --key <client-key> --port 8080
//! ```
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, CLI flags, logging, graceful shutdown
//! config.rs        — TOML + env-var + flag configuration
//! state.rs         — tunnel statistics
//! routes/
//!   health.rs      — GET /api/health (optional local status endpoint)
//! tunnel/
//!   target.rs      — relay URL (ws/wss, /ws, key + version)
//!   frame.rs       — request/response/heartbeat frames
//!   forward.rs     — frame → loopback HTTP call → frame
//!   client.rs      — reconnect loop, heartbeat, writer task, dispatcher
//! ```

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{info, warn};

use webvpn_client::config::Overrides;
use webvpn_client::{routes, tunnel, AppState, Config, TunnelStats};

/// Reverse-tunnel client: exposes a local HTTP service through a WebVPN relay.
#[derive(Parser)]
#[command(name = "webvpn-client", about)]
struct Cli {
    /// Path to TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Relay base address (http/https).
    #[arg(long)]
    server: Option<String>,
    /// Client key issued by the relay.
    #[arg(long)]
    key: Option<String>,
    /// Local service port on 127.0.0.1.
    #[arg(long)]
    port: Option<u16>,
    /// Client version reported to the relay.
    #[arg(long = "version")]
    client_version: Option<String>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            server: self.server.clone(),
            key: self.key.clone(),
            port: self.port,
            version: self.client_version.clone(),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };
    config.apply_overrides(cli.overrides());

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    if let Err(e) = config.validate() {
        eprintln!("{e}");
        std::process::exit(1);
    }

    info!("webvpn-client v{} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Forwarding relay {} to 127.0.0.1:{}",
        config.relay.url, config.local.port
    );

    let state = AppState {
        tunnel_stats: Arc::new(TunnelStats::new()),
        start_time: Instant::now(),
        config: Arc::new(config),
    };

    let status_task = match state.config.status.clone() {
        Some(status) => match TcpListener::bind(&status.listen).await {
            Ok(listener) => {
                info!("Status endpoint listening on {}", status.listen);
                let app = routes::status_router(state.clone());
                Some(tokio::spawn(async move {
                    if let Err(e) = axum::serve(listener, app).await {
                        warn!("Status endpoint stopped: {e}");
                    }
                }))
            }
            Err(e) => {
                warn!("Status endpoint disabled, cannot bind {}: {e}", status.listen);
                None
            }
        },
        None => None,
    };

    let tunnel_task = tunnel::client::spawn(
        state.config.session_config(),
        state.config.reconnect_policy(),
        state.tunnel_stats.clone(),
    );

    shutdown_signal().await;

    info!("Shutting down...");
    tunnel_task.abort();
    if let Some(task) = status_task {
        task.abort();
    }
    info!("Goodbye");
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!("Cannot register SIGTERM handler: {e}");
                ctrl_c.await.ok();
                info!("Received SIGINT");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received SIGINT");
    }
}
