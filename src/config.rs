//! Configuration loading and defaults.
//!
//! Configuration is resolved in order of precedence (highest wins):
//!
//! 1. **Command-line flags** — `--server`, `--key`, `--port`, `--version`
//! 2. **Environment variables** — `WEBVPN_SERVER`, `WEBVPN_KEY`,
//!    `WEBVPN_PORT`, `WEBVPN_VERSION`
//! 3. **Config file** — path via `--config <path>`, or `webvpn-client.toml` in CWD
//! 4. **Compiled defaults** — see each field's default value below
//!
//! The TOML file mirrors the struct hierarchy:
//!
//! ```toml
//! [relay]
//! url = "https://vpn.example.com"   # http(s) or ws(s); upgraded to ws(s)
//! key = "client-key"                # required
//! version = "1.4.2"                 # optional, reported to the relay
//!
//! [local]
//! port = 8080                       # loopback service port (default 80)
//! request_timeout_secs = 30
//!
//! [tunnel]
//! reconnect_delay_secs = 3          # fixed backoff between attempts
//! heartbeat_interval_secs = 10
//!
//! [logging]
//! level = "info"
//!
//! # Optional — omit entirely to disable the local status endpoint
//! [status]
//! listen = "127.0.0.1:9090"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::tunnel::client::{ReconnectPolicy, SessionConfig};
use crate::tunnel::target::ConnectionTarget;

/// Default config file looked up in the working directory.
const DEFAULT_CONFIG_FILE: &str = "webvpn-client.toml";

/// Errors that stop the process before any connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing --key")]
    MissingKey,
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: Box<toml::de::Error>,
    },
    #[error("Invalid value {value:?} for {var}")]
    InvalidEnv { var: &'static str, value: String },
    #[error("Invalid server address: {0}")]
    InvalidServer(String),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

/// Top-level configuration, deserialized from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub local: LocalConfig,
    #[serde(default)]
    pub tunnel: TunnelConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Optional local status endpoint.
    pub status: Option<StatusConfig>,
}

/// Where to dial and how to authenticate.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Relay base address (default `http://localhost:3000`).
    #[serde(default = "default_server")]
    pub url: String,
    /// Client key issued by the relay. Required.
    #[serde(default)]
    pub key: String,
    /// Client version reported at connect time.
    pub version: Option<String>,
}

/// The loopback service requests are forwarded to.
#[derive(Debug, Clone, Deserialize)]
pub struct LocalConfig {
    /// Port on `127.0.0.1` (default 80).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Upper bound for one forwarded request including its body (default 30).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

/// Connection supervision settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TunnelConfig {
    /// Fixed delay between reconnect attempts (default 3).
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// Seconds between heartbeat messages (default 10).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// tracing filter level (default `info`). Overridden by `RUST_LOG` env var.
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Local status endpoint, see [`crate::routes`].
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    /// Socket address to bind, e.g. `127.0.0.1:9090`.
    pub listen: String,
}

/// Values supplied on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub server: Option<String>,
    pub key: Option<String>,
    pub port: Option<u16>,
    pub version: Option<String>,
}

fn default_server() -> String {
    "http://localhost:3000".to_string()
}
fn default_port() -> u16 {
    80
}
fn default_request_timeout() -> u64 {
    30
}
fn default_reconnect_delay() -> u64 {
    3
}
fn default_heartbeat_interval() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            url: default_server(),
            key: String::new(),
            version: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_secs: default_reconnect_delay(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// If `path` is `Some`, that file must exist. Otherwise `webvpn-client.toml`
    /// in the current directory is used when present, falling back to
    /// compiled defaults.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => Config::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source: Box::new(source),
        })
    }

    /// Apply `WEBVPN_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup("WEBVPN_SERVER") {
            self.relay.url = server;
        }
        if let Some(key) = lookup("WEBVPN_KEY") {
            self.relay.key = key;
        }
        if let Some(port) = lookup("WEBVPN_PORT") {
            self.local.port = port.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                var: "WEBVPN_PORT",
                value: port.clone(),
            })?;
        }
        if let Some(version) = lookup("WEBVPN_VERSION") {
            self.relay.version = Some(version);
        }
        Ok(())
    }

    /// Apply command-line values on top of everything else.
    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(server) = overrides.server {
            self.relay.url = server;
        }
        if let Some(key) = overrides.key {
            self.relay.key = key;
        }
        if let Some(port) = overrides.port {
            self.local.port = port;
        }
        if let Some(version) = overrides.version {
            self.relay.version = Some(version);
        }
    }

    /// Reject configurations the client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.relay.key.is_empty() {
            return Err(ConfigError::MissingKey);
        }
        ConnectionTarget::new(&self.relay.url, &self.relay.key, self.relay.version.as_deref())
            .map_err(|e| ConfigError::InvalidServer(e.to_string()))?;
        if self.local.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroInterval("local.request_timeout_secs"));
        }
        if self.tunnel.reconnect_delay_secs == 0 {
            return Err(ConfigError::ZeroInterval("tunnel.reconnect_delay_secs"));
        }
        if self.tunnel.heartbeat_interval_secs == 0 {
            return Err(ConfigError::ZeroInterval("tunnel.heartbeat_interval_secs"));
        }
        Ok(())
    }

    /// Connection parameters handed to the tunnel supervisor.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            server: self.relay.url.clone(),
            key: self.relay.key.clone(),
            version: self.relay.version.clone().filter(|v| !v.is_empty()),
            local_port: self.local.port,
            request_timeout: Duration::from_secs(self.local.request_timeout_secs),
            heartbeat_interval: Duration::from_secs(self.tunnel.heartbeat_interval_secs),
        }
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::fixed(Duration::from_secs(self.tunnel.reconnect_delay_secs))
    }
}
