//! Background REAPER poller feeding the WebSocket push endpoint.
//!
//! Every tick GETs `<reaper_url>/_/<poll_keys>`. A body that differs from
//! the last one replaces it, and its changed lines are published on the
//! event bus, at most once per [`MIN_BROADCAST_GAP`].

use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::app_state::{AppState, shutdown_requested};
use crate::domain::{EventBus, StateDiff, StateStore};

/// Timeout of one poll request.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed poll request.
pub const ERROR_PAUSE: Duration = Duration::from_secs(1);

/// Minimum time between two broadcasts.
pub const MIN_BROADCAST_GAP: Duration = Duration::from_millis(10);

/// Turns poll bodies into rate-limited diff broadcasts.
#[derive(Debug, Default)]
pub struct Broadcaster {
    last_broadcast: Option<Instant>,
}

impl Broadcaster {
    /// Creates a broadcaster that has never published.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `body` as the last state and publishes its changed lines.
    ///
    /// Returns `true` if a diff was published. Nothing is published when
    /// the body is unchanged, the diff is empty, or the previous broadcast
    /// is less than [`MIN_BROADCAST_GAP`] old. The state is stored in every
    /// case.
    pub fn apply(&mut self, store: &StateStore, bus: &EventBus, body: &[u8], now: Instant) -> bool {
        let Some(diff) = store.update(body) else {
            return false;
        };
        if diff.is_empty() {
            return false;
        }
        if let Some(last) = self.last_broadcast
            && now.duration_since(last) < MIN_BROADCAST_GAP
        {
            tracing::debug!("diff dropped by broadcast rate limit");
            return false;
        }

        let receivers = bus.publish(StateDiff::new(String::from_utf8_lossy(&diff)));
        tracing::debug!(bytes = diff.len(), receivers, "state diff broadcast");
        self.last_broadcast = Some(now);
        true
    }
}

/// Polls REAPER until the shutdown signal in `state` fires.
///
/// Returns immediately, with a warning, if no poll keys are configured.
pub async fn run_poller(state: AppState) {
    if state.config.poll_keys.is_empty() {
        tracing::warn!("POLL_GET_KEYS is empty, state polling disabled");
        return;
    }
    if state.config.poll_interval.is_zero() {
        tracing::error!("POLL_INTERVAL_MS is zero, state polling disabled");
        return;
    }
    let url = match state.config.poll_url() {
        Ok(url) => url,
        Err(err) => {
            tracing::error!(error = %err, "invalid poll url, state polling disabled");
            return;
        }
    };

    let mut shutdown = state.shutdown.clone();
    let mut ticker = tokio::time::interval(state.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut broadcaster = Broadcaster::new();

    tracing::info!(url = %url, interval = ?state.config.poll_interval, "state poller started");

    loop {
        tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            _ = ticker.tick() => {}
        }

        let outcome = tokio::select! {
            () = shutdown_requested(&mut shutdown) => break,
            outcome = poll_once(&state.http, &url) => outcome,
        };

        match outcome {
            PollOutcome::Body(body) => {
                broadcaster.apply(&state.state_store, &state.event_bus, &body, Instant::now());
            }
            PollOutcome::TimedOut => {}
            PollOutcome::BodyFailed(err) => {
                tracing::warn!(error = %err, "reading poll body failed");
            }
            PollOutcome::RequestFailed(err) => {
                tracing::warn!(error = %err, "poll request failed");
                tokio::select! {
                    () = shutdown_requested(&mut shutdown) => break,
                    () = tokio::time::sleep(ERROR_PAUSE) => {}
                }
            }
        }
    }

    tracing::info!("state poller stopped");
}

enum PollOutcome {
    Body(Vec<u8>),
    TimedOut,
    RequestFailed(reqwest::Error),
    BodyFailed(reqwest::Error),
}

async fn poll_once(http: &reqwest::Client, url: &Url) -> PollOutcome {
    let resp = match http.get(url.clone()).timeout(POLL_TIMEOUT).send().await {
        Ok(resp) => resp,
        Err(err) if err.is_timeout() => return PollOutcome::TimedOut,
        Err(err) => return PollOutcome::RequestFailed(err),
    };
    match resp.bytes().await {
        Ok(bytes) => PollOutcome::Body(bytes.to_vec()),
        Err(err) if err.is_timeout() => PollOutcome::TimedOut,
        Err(err) => PollOutcome::BodyFailed(err),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_body_is_broadcast_in_full() {
        let store = StateStore::new();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut b = Broadcaster::new();

        assert!(b.apply(&store, &bus, b"TRANSPORT\t0\nVOL\t1\n", Instant::now()));
        let Ok(diff) = rx.try_recv() else {
            panic!("diff expected");
        };
        assert_eq!(diff.payload, "TRANSPORT\t0\nVOL\t1");
        assert_eq!(store.get().as_deref(), Some(&b"TRANSPORT\t0\nVOL\t1\n"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_body_is_not_broadcast() {
        let store = StateStore::new();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut b = Broadcaster::new();

        assert!(b.apply(&store, &bus, b"A\n", Instant::now()));
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(!b.apply(&store, &bus, b"A\n", Instant::now()));
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn only_changed_lines_are_sent() {
        let store = StateStore::new();
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut b = Broadcaster::new();

        b.apply(&store, &bus, b"A\nB\nC", Instant::now());
        tokio::time::advance(Duration::from_millis(80)).await;
        assert!(b.apply(&store, &bus, b"A\nX\nC", Instant::now()));

        let _ = rx.try_recv();
        let Ok(diff) = rx.try_recv() else {
            panic!("second diff expected");
        };
        assert_eq!(diff.payload, "X");
    }

    #[tokio::test(start_paused = true)]
    async fn broadcasts_closer_than_gap_are_dropped_but_state_kept() {
        let store = StateStore::new();
        let bus = EventBus::new(8);
        let mut b = Broadcaster::new();

        assert!(b.apply(&store, &bus, b"A", Instant::now()));
        tokio::time::advance(Duration::from_millis(5)).await;
        assert!(!b.apply(&store, &bus, b"B", Instant::now()));
        assert_eq!(store.get().as_deref(), Some(&b"B"[..]));

        tokio::time::advance(MIN_BROADCAST_GAP).await;
        assert!(b.apply(&store, &bus, b"C", Instant::now()));
    }

    #[tokio::test]
    async fn zero_interval_disables_polling() {
        let Ok(reaper_url) = Url::parse("http://127.0.0.1:9") else {
            panic!("valid url");
        };
        let config = crate::config::ProxyConfig {
            listen_addr: std::net::SocketAddr::from(([127, 0, 0, 1], 0)),
            reaper_url,
            reaper_rc_name: String::new(),
            mdns_service: String::new(),
            poll_keys: "TRANSPORT".to_string(),
            poll_interval: Duration::ZERO,
            ws_path: "/ws".to_string(),
            www_root: "./www".to_string(),
            health_path: "/health".to_string(),
            event_bus_capacity: 4,
        };
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let Ok(state) = AppState::new(config, shutdown_rx) else {
            panic!("state");
        };
        let ran = tokio::time::timeout(Duration::from_secs(1), run_poller(state)).await;
        assert!(ran.is_ok(), "poller should return instead of ticking");
    }
}
