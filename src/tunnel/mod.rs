//! Reverse tunnel to a WebVPN relay.
//!
//! The client dials out to the relay, receives HTTP requests as JSON frames
//! and answers each one by calling the service on `127.0.0.1:<port>`.
//!
//! - `target` — relay WebSocket URL with connect-time credentials
//! - `frame` — request/response/heartbeat wire types
//! - `forward` — frame → loopback HTTP call → frame
//! - `client` — reconnect loop, heartbeat, single writer, frame dispatch

pub mod client;
pub mod forward;
pub mod frame;
pub mod target;

#[cfg(test)]
mod test_support;
