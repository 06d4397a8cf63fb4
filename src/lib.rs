//! # wwr-sync
//!
//! Live-sync client and WebSocket proxy for the REAPER web remote.
//!
//! The client keeps a view of the REAPER session current over two paths:
//! batched long-polling of `GET /_/<name>;<name>;` requests with failure
//! backoff, and an auto-reconnecting WebSocket that receives pushed state.
//! The proxy polls REAPER on a short interval, pushes changed lines to
//! every WebSocket session, serves the web remote's static files, and
//! forwards everything else to REAPER.
//!
//! ## Architecture
//!
//! ```text
//! SyncClient (client/)
//!     │
//!     ├── PollScheduler ── HttpTransport ──► GET /_/A;B;
//!     └── WsChannel ───────────────────────► /ws
//!                                              │
//! wwr-proxy (proxy/, ws/)                      │
//!     ├── WS Handler ◄── EventBus ◄── Poller ──┼──► REAPER
//!     ├── Static files (www_root)              │
//!     └── Reverse proxy ───────────────────────┘
//! ```

pub mod app_state;
pub mod client;
pub mod config;
pub mod domain;
pub mod error;
pub mod proxy;
pub mod ws;

pub use client::{ReplyHandler, Route, SyncClient};
pub use config::{ClientConfig, ProxyConfig, ReconnectPolicy};
pub use error::{Result, SyncError};
