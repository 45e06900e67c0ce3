#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! webvpn-client library — the reverse-tunnel client behind the binary.
//!
//! - `tunnel` — relay connection, frame protocol and local forwarding
//! - `config` — configuration loading
//! - `state` — tunnel statistics shared with the status endpoint
//! - `routes` — optional local status endpoint
//! - `util` — small shared helpers

pub mod config;
pub mod routes;
pub mod state;
pub mod tunnel;
pub mod util;

// Re-export key types at crate root for convenience.
pub use config::Config;
pub use state::{AppState, TunnelStats};
pub use tunnel::client::{ReconnectPolicy, SessionConfig};
