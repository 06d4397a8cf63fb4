//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::config::ProxyConfig;
use crate::domain::{EventBus, StateStore};
use crate::error::SyncError;

/// Shared proxy state available to all handlers via Axum's `State`
/// extractor, and to the background poller.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Proxy configuration.
    pub config: Arc<ProxyConfig>,
    /// HTTP client for REAPER polling and request forwarding.
    pub http: reqwest::Client,
    /// Last full REAPER state, sent to every new WebSocket session.
    pub state_store: Arc<StateStore>,
    /// Diff broadcast for WebSocket sessions.
    pub event_bus: EventBus,
    /// Flips to `true` when the server is shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Builds the state for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] if the HTTP client cannot
    /// be built.
    pub fn new(config: ProxyConfig, shutdown: watch::Receiver<bool>) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;
        let event_bus = EventBus::new(config.event_bus_capacity);

        Ok(Self {
            config: Arc::new(config),
            http,
            state_store: Arc::new(StateStore::new()),
            event_bus,
            shutdown,
        })
    }
}

/// Resolves once `shutdown` holds `true`, or its sender is gone.
///
/// The borrowed value is released before returning, so the future can sit
/// in a `select!` next to other awaits.
pub async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}
