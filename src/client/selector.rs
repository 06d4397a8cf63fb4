//! Transport selection: which path recurring subscriptions take.
//!
//! [`SyncClient`] decides once, at construction, whether WebSocket is
//! available. When it is, every recurring registration goes through one
//! shared [`WsChannel`] (the proxy pushes state diffs there) instead of
//! the polling queue. One-shot requests always use the polling path.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use url::Url;

use super::channel::{WsChannel, ws_url};
use super::reply::ReplyHandler;
use super::scheduler::PollScheduler;
use super::transport::{HttpTransport, PollTransport};
use crate::config::ClientConfig;
use crate::error::SyncError;

/// Path recurring requests take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Recurring names are polled by the scheduler.
    Polling,
    /// Recurring names are served by the shared WebSocket channel.
    WebSocket,
}

/// Live-sync client: polling scheduler plus optional WebSocket channel.
pub struct SyncClient {
    config: ClientConfig,
    origin: Url,
    route: Route,
    scheduler: PollScheduler,
    handler: Arc<dyn ReplyHandler>,
    channel: Mutex<Option<WsChannel>>,
    subscribed: Mutex<Vec<String>>,
}

impl std::fmt::Debug for SyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncClient")
            .field("origin", &self.origin.as_str())
            .field("route", &self.route)
            .field("scheduler", &self.scheduler)
            .field("channel", &self.channel)
            .field("subscribed", &self.subscribed)
            .finish_non_exhaustive()
    }
}

impl SyncClient {
    /// Creates a stopped client and selects the recurring route.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`ClientConfig::validate`].
    pub fn new<H: ReplyHandler>(config: ClientConfig, handler: H) -> Result<Self, SyncError> {
        config.validate()?;
        let origin = config.origin()?;
        let route = select_route(&config, &origin);
        tracing::info!(origin = %origin, ?route, "sync client created");

        Ok(Self {
            scheduler: PollScheduler::from_config(&config),
            config,
            origin,
            route,
            handler: Arc::new(handler),
            channel: Mutex::new(None),
            subscribed: Mutex::new(Vec::new()),
        })
    }

    /// The route chosen for recurring requests.
    #[must_use]
    pub fn route(&self) -> Route {
        self.route
    }

    /// Starts the polling cycle.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] if no HTTP client can be
    /// built. This is fatal: polling does not start and is never retried.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        let transport = HttpTransport::new(self.origin.clone()).inspect(|transport| {
            tracing::debug!(origin = %transport.origin(), "http transport ready");
        });
        self.start_with(transport)
    }

    fn start_with<T: PollTransport>(&self, transport: Result<T, SyncError>) -> Result<(), SyncError> {
        let transport = transport.inspect_err(|err| {
            tracing::error!(error = %err, "no http transport; polling halted");
        })?;
        self.scheduler.start(transport, Arc::clone(&self.handler));
        Ok(())
    }

    /// Stops polling and closes the WebSocket channel, if open.
    pub fn stop(&self) {
        self.scheduler.stop();
        if let Some(channel) = self.channel.lock().take() {
            channel.close();
        }
        self.subscribed.lock().clear();
    }

    /// Enqueues a one-shot request. Always polled.
    pub fn schedule(&self, name: impl Into<String>) {
        self.scheduler.schedule(name);
    }

    /// Registers a recurring request on the selected route.
    ///
    /// On the WebSocket route `interval` is not used: the proxy pushes at
    /// its own poll rate. The shared channel opens on the first
    /// registration.
    ///
    /// # Panics
    ///
    /// Panics if the WebSocket route opens its channel outside a tokio
    /// runtime.
    pub fn schedule_recurring(&self, name: impl Into<String>, interval: Duration) {
        let name = name.into();
        match self.route {
            Route::Polling => self.scheduler.schedule_recurring(name, interval),
            Route::WebSocket => {
                self.subscribed.lock().push(name);
                self.ensure_channel();
            }
        }
    }

    /// Cancels the first recurring registration named `name`.
    ///
    /// On the WebSocket route the shared channel is closed once no
    /// registration is left.
    pub fn cancel_recurring(&self, name: &str) -> bool {
        match self.route {
            Route::Polling => self.scheduler.cancel_recurring(name),
            Route::WebSocket => {
                let mut subscribed = self.subscribed.lock();
                let Some(idx) = subscribed.iter().position(|n| n == name) else {
                    return false;
                };
                subscribed.remove(idx);
                if subscribed.is_empty()
                    && let Some(channel) = self.channel.lock().take()
                {
                    tracing::debug!(url = %channel.url(), "last subscription cancelled");
                    channel.close();
                }
                true
            }
        }
    }

    /// Current consecutive polling failure count.
    #[must_use]
    pub fn error_count(&self) -> u8 {
        self.scheduler.error_count()
    }

    /// Returns `true` if the shared WebSocket channel is open.
    #[must_use]
    pub fn websocket_ready(&self) -> bool {
        self.channel.lock().as_ref().is_some_and(WsChannel::is_ready)
    }

    fn ensure_channel(&self) {
        let mut channel = self.channel.lock();
        if channel.is_some() {
            return;
        }
        let url = match ws_url(&self.origin) {
            Ok(url) => url,
            Err(err) => {
                tracing::error!(error = %err, "cannot derive websocket endpoint");
                return;
            }
        };
        let handler = Arc::clone(&self.handler);
        *channel = Some(WsChannel::open(url, self.config.reconnect, move |data| {
            handler.on_reply(data, None);
        }));
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.stop();
    }
}

/// WebSocket is used when enabled and an endpoint can be derived from the
/// origin.
fn select_route(config: &ClientConfig, origin: &Url) -> Route {
    if config.websocket && ws_url(origin).is_ok() {
        Route::WebSocket
    } else {
        Route::Polling
    }
}
