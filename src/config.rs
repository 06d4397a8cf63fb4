//! Proxy and client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Missing or unparseable values fall
//! back to the defaults listed on each field.

use std::net::SocketAddr;
use std::time::Duration;

use url::Url;

use crate::error::SyncError;

/// Default REAPER keys polled by the proxy and pushed to WebSocket clients.
pub const DEFAULT_POLL_KEYS: &str = "TRANSPORT;GET/EXTSTATE/TUX/text;GET/EXTSTATE/TUX/need_refresh";

/// Configuration of the `wwr-proxy` server.
///
/// Loaded once at startup via [`ProxyConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Socket address to bind the HTTP server to (default `0.0.0.0:8090`).
    pub listen_addr: SocketAddr,

    /// Base URL of the REAPER HTTP interface (default `http://localhost:8088`).
    pub reaper_url: Url,

    /// Name registered at `rc.reaper.fm/<name>`; empty disables publishing.
    pub reaper_rc_name: String,

    /// mDNS `_http._tcp` instance name (default `REAPER`); empty disables
    /// advertisement.
    pub mdns_service: String,

    /// Semicolon-separated keys polled from REAPER; empty disables polling.
    pub poll_keys: String,

    /// Interval between polls to REAPER (default 80ms).
    pub poll_interval: Duration,

    /// WebSocket endpoint path (default `/ws`).
    pub ws_path: String,

    /// Directory static files are served from (default `./www`).
    pub www_root: String,

    /// Health check path (default `/health`).
    pub health_path: String,

    /// Capacity of the diff broadcast channel.
    pub event_bus_capacity: usize,
}

impl ProxyConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if `LISTEN_ADDR` is set but is not a
    /// socket address or [`ProxyConfig::validate`] fails, or
    /// [`SyncError::InvalidUrl`] if `REAPER_URL` does not parse.
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();

        let listen_addr: SocketAddr = std::env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8090".to_string())
            .parse()
            .map_err(|e| SyncError::Config(format!("LISTEN_ADDR: {e}")))?;

        let reaper_url = Url::parse(
            &std::env::var("REAPER_URL").unwrap_or_else(|_| "http://localhost:8088".to_string()),
        )?;

        let config = Self {
            listen_addr,
            reaper_url,
            reaper_rc_name: parse_env("REAPER_RC_NAME", "ws".to_string()),
            mdns_service: parse_env("MDNS_SERVICE", "REAPER".to_string()),
            poll_keys: parse_env("POLL_GET_KEYS", DEFAULT_POLL_KEYS.to_string()),
            poll_interval: Duration::from_millis(parse_env("POLL_INTERVAL_MS", 80)),
            ws_path: parse_env("WS_PATH", "/ws".to_string()),
            www_root: parse_env("WWW_ROOT", "./www".to_string()),
            health_path: parse_env("HEALTH_PATH", "/health".to_string()),
            event_bus_capacity: parse_env("EVENT_BUS_CAPACITY", 1024),
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks values that would otherwise fail at runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the poll interval is zero or a route
    /// path does not start with `/`.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_interval.is_zero() {
            return Err(SyncError::Config("POLL_INTERVAL_MS must be > 0".to_string()));
        }
        for (key, path) in [("WS_PATH", &self.ws_path), ("HEALTH_PATH", &self.health_path)] {
            if !path.starts_with('/') {
                return Err(SyncError::Config(format!("{key} must start with '/': {path}")));
            }
        }
        Ok(())
    }

    /// Full URL of the poll request: `<reaper_url>/_/<poll_keys>`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if `reaper_url` cannot carry a
    /// path.
    pub fn poll_url(&self) -> Result<Url, SyncError> {
        let base = self.reaper_url.path().trim_end_matches('/');
        let mut url = self.reaper_url.clone();
        url.set_path(&format!("{base}/_/{}", self.poll_keys));
        if url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!("{url} cannot carry a path")));
        }
        Ok(url)
    }
}

/// Configuration of the live-sync client ([`crate::client::SyncClient`]).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Page origin the client talks to (default `http://localhost:8090`).
    pub base_url: String,

    /// Idle tick interval and backoff base (default 100ms).
    pub base_interval: Duration,

    /// Guard timeout after which an in-flight poll is aborted (default 3s).
    pub request_timeout: Duration,

    /// Route recurring requests over WebSocket (default `true`).
    pub websocket: bool,

    /// Reconnect policy of the WebSocket channel.
    pub reconnect: ReconnectPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            base_interval: Duration::from_millis(100),
            request_timeout: Duration::from_millis(3000),
            websocket: true,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Loads client configuration from `WWR_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ClientConfig::validate`].
    pub fn from_env() -> Result<Self, SyncError> {
        dotenvy::dotenv().ok();

        let config = Self {
            base_url: parse_env("WWR_BASE_URL", "http://localhost:8090".to_string()),
            base_interval: Duration::from_millis(parse_env("WWR_BASE_INTERVAL_MS", 100)),
            request_timeout: Duration::from_millis(parse_env("WWR_REQUEST_TIMEOUT_MS", 3000)),
            websocket: parse_env_bool("WWR_WEBSOCKET", true),
            reconnect: ReconnectPolicy {
                initial: Duration::from_millis(parse_env("WWR_RECONNECT_DELAY_MS", 1000)),
                multiplier: parse_env("WWR_RECONNECT_MULTIPLIER", 1.0),
                max: Duration::from_millis(parse_env("WWR_RECONNECT_MAX_MS", 30_000)),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Checks the base URL and intervals.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if the base URL does not parse, or
    /// [`SyncError::Config`] if the base interval or request timeout is
    /// zero.
    pub fn validate(&self) -> Result<(), SyncError> {
        self.origin()?;
        if self.base_interval.is_zero() {
            return Err(SyncError::Config("WWR_BASE_INTERVAL_MS must be > 0".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(SyncError::Config("WWR_REQUEST_TIMEOUT_MS must be > 0".to_string()));
        }
        Ok(())
    }

    /// Parses [`ClientConfig::base_url`].
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidUrl`] if the base URL does not parse.
    pub fn origin(&self) -> Result<Url, SyncError> {
        Ok(Url::parse(&self.base_url)?)
    }
}

/// Delay schedule between WebSocket reconnect attempts.
///
/// The delay starts at `initial`, is reset to `initial` whenever a
/// connection opens, and after every failed attempt is multiplied by
/// `multiplier` and capped at `max`. A multiplier of `1.0` keeps the delay
/// constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// First delay, and the value restored on every successful open.
    pub initial: Duration,
    /// Growth factor applied after each attempt; `1.0` means constant.
    pub multiplier: f64,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1000),
            multiplier: 1.0,
            max: Duration::from_millis(30_000),
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay that follows `current`.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        if self.multiplier <= 1.0 || !self.multiplier.is_finite() {
            return current;
        }
        let cap = self.max.max(self.initial);
        Duration::try_from_secs_f64(current.as_secs_f64() * self.multiplier)
            .map_or(cap, |next| next.min(cap))
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
