//! WebSocket push endpoint.
//!
//! Every session served at the configured path (default `/ws`) receives the
//! last full REAPER state on connect, then each diff the poller publishes.

pub mod connection;
pub mod handler;

pub use handler::ws_handler;
