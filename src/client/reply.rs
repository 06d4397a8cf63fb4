//! Reply dispatch seam.

use tokio::time::Instant;

/// Consumer of server payloads, from either transport.
///
/// Polling replies carry the instant their cycle started, which lets the
/// consumer estimate round-trip latency. WebSocket pushes carry `None`.
/// Empty polling replies and failures are never dispatched.
pub trait ReplyHandler: Send + Sync + 'static {
    /// Handles one opaque payload.
    fn on_reply(&self, payload: &str, started_at: Option<Instant>);
}

impl<F> ReplyHandler for F
where
    F: Fn(&str, Option<Instant>) + Send + Sync + 'static,
{
    fn on_reply(&self, payload: &str, started_at: Option<Instant>) {
        self(payload, started_at);
    }
}
