//! Live-sync client: batched long-polling with backoff, and an
//! auto-reconnecting WebSocket channel for pushed state.
//!
//! - [`PollScheduler`] batches one-shot and recurring request names into a
//!   single `GET /_/...` per cycle, with a guard timeout and exponential
//!   backoff on consecutive failures.
//! - [`WsChannel`] keeps one WebSocket to `/ws` open, reconnecting after
//!   every close or error until explicitly closed.
//! - [`SyncClient`] selects which of the two carries recurring requests.
//!
//! Payloads from either path go to a single [`ReplyHandler`].

pub mod channel;
pub mod reply;
pub mod scheduler;
pub mod selector;
pub mod transport;

pub use channel::{ChannelState, WsChannel, ws_url};
pub use reply::ReplyHandler;
pub use scheduler::{PollScheduler, PollState};
pub use selector::{Route, SyncClient};
pub use transport::{HttpTransport, PollResponse, PollTransport};
