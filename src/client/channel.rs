//! Auto-reconnecting WebSocket channel.
//!
//! # State machine
//!
//! ```text
//! Connecting ──► Open ──► Closing ──► ReconnectWait ──► Connecting ...
//!      │
//!      └── connect error ──────────────► ReconnectWait
//!
//! close(): any state ──► Closed (terminal, no further attempts)
//! ```
//!
//! Each attempt opens a fresh socket; the previous one is never reused.
//! Inbound text frames are forwarded unfiltered to the message callback.
//! Sends are fire-and-forget: while the socket is not open they are
//! dropped with a warning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::config::ReconnectPolicy;
use crate::error::SyncError;

/// Fixed WebSocket endpoint path.
pub const WS_PATH: &str = "/ws";

/// Callback receiving every inbound text payload.
pub type MessageCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Lifecycle state of a [`WsChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChannelState {
    /// A connection attempt is in progress.
    Connecting = 0,
    /// The socket is open; sends are delivered.
    Open = 1,
    /// The socket is shutting down.
    Closing = 2,
    /// Waiting out the reconnect delay.
    ReconnectWait = 3,
    /// `close()` was called; the channel is finished.
    Closed = 4,
}

impl ChannelState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            3 => Self::ReconnectWait,
            _ => Self::Closed,
        }
    }
}

/// Derives the WebSocket endpoint from a page origin:
/// `wss://<host>/ws` under `https`, `ws://<host>/ws` otherwise.
///
/// # Errors
///
/// Returns [`SyncError::InvalidUrl`] if the origin has no host.
pub fn ws_url(origin: &Url) -> Result<Url, SyncError> {
    let scheme = if origin.scheme() == "https" { "wss" } else { "ws" };
    let host = origin
        .host_str()
        .ok_or_else(|| SyncError::InvalidUrl(format!("{origin} has no host")))?;
    let authority = match origin.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!("{scheme}://{authority}{WS_PATH}"))?)
}

/// State shared between the handle and the connection task.
#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    reconnect: AtomicBool,
    attempts: AtomicU64,
    /// Sender into the live socket; replaced on every connection.
    outgoing: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    close_requested: Notify,
}

impl Shared {
    fn state(&self) -> ChannelState {
        ChannelState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ChannelState) {
        // Closed is terminal.
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != ChannelState::Closed as u8).then_some(state as u8)
            });
    }

    fn should_reconnect(&self) -> bool {
        self.reconnect.load(Ordering::Acquire)
    }
}

/// Handle to an auto-reconnecting WebSocket connection.
///
/// Dropping the handle closes the channel.
#[derive(Debug)]
pub struct WsChannel {
    url: Url,
    shared: Arc<Shared>,
    task: Option<JoinHandle<()>>,
}

impl WsChannel {
    /// Opens a channel to `url` and keeps it connected until
    /// [`WsChannel::close`] is called.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn open<F>(url: Url, policy: ReconnectPolicy, on_message: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(ChannelState::Connecting as u8),
            reconnect: AtomicBool::new(true),
            attempts: AtomicU64::new(0),
            outgoing: Mutex::new(None),
            close_requested: Notify::new(),
        });

        let task = tokio::spawn(run_channel(
            url.clone(),
            policy,
            Arc::clone(&shared),
            Box::new(on_message),
        ));

        Self {
            url,
            shared,
            task: Some(task),
        }
    }

    /// Sends a text frame if the socket is open; otherwise logs a warning
    /// and drops `data`.
    pub fn send(&self, data: impl Into<String>) {
        let data = data.into();
        if self.is_ready()
            && let Some(tx) = self.shared.outgoing.lock().as_ref()
        {
            match tx.send(Message::text(data)) {
                Ok(()) => return,
                Err(mpsc::error::SendError(msg)) => {
                    tracing::warn!(url = %self.url, data = ?msg, "ws not open, cannot send");
                    return;
                }
            }
        }
        tracing::warn!(url = %self.url, %data, "ws not open, cannot send");
    }

    /// Returns `true` while the socket is open.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.shared.state() == ChannelState::Open
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.shared.state()
    }

    /// Number of connection attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Endpoint this channel connects to.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Disables reconnection and closes the live socket.
    ///
    /// Idempotent. No connection attempt happens afterwards, whatever
    /// close or error events follow.
    pub fn close(&self) {
        if self.shared.reconnect.swap(false, Ordering::AcqRel) {
            tracing::debug!(url = %self.url, "ws close requested");
        }
        self.shared.set_state(ChannelState::Closing);
        self.shared.close_requested.notify_one();
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.close();
        // The task exits on its own once it sees the close request; detach.
        drop(self.task.take());
    }
}

/// Connect / serve / wait loop of one channel.
async fn run_channel(
    url: Url,
    policy: ReconnectPolicy,
    shared: Arc<Shared>,
    on_message: MessageCallback,
) {
    let mut delay = policy.initial;

    while shared.should_reconnect() {
        shared.set_state(ChannelState::Connecting);
        shared.attempts.fetch_add(1, Ordering::AcqRel);

        let connected = tokio::select! {
            result = connect_async(url.as_str()) => Some(result),
            () = shared.close_requested.notified() => None,
        };

        match connected {
            None => break,
            Some(Ok((stream, _response))) => {
                tracing::info!(%url, "ws connected");
                delay = policy.initial;
                serve_connection(stream, &shared, &on_message).await;
            }
            Some(Err(err)) => {
                let err = SyncError::from(err);
                tracing::error!(%url, code = err.error_code(), error = %err, "ws error");
            }
        }

        if !shared.should_reconnect() {
            break;
        }

        shared.set_state(ChannelState::ReconnectWait);
        tracing::warn!(%url, delay = ?delay, "ws closed, will try reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = shared.close_requested.notified() => break,
        }
        delay = policy.next_delay(delay);
    }

    shared.outgoing.lock().take();
    shared.state.store(ChannelState::Closed as u8, Ordering::Release);
    tracing::debug!(%url, "ws channel closed");
}

type Stream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// Pumps one live socket until it closes, errors, or close is requested.
async fn serve_connection(stream: Stream, shared: &Shared, on_message: &MessageCallback) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *shared.outgoing.lock() = Some(tx);
    shared.set_state(ChannelState::Open);

    loop {
        tokio::select! {
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => on_message(text.as_str()),
                Some(Ok(Message::Binary(bytes))) => on_message(String::from_utf8_lossy(&bytes).as_ref()),
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => tracing::warn!(code = ?frame.code, reason = frame.reason.as_str(), "ws closed by peer"),
                        None => tracing::warn!("ws closed by peer"),
                    }
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    // Force-close; the reconnect loop takes over.
                    let err = SyncError::from(err);
                    tracing::error!(code = err.error_code(), error = %err, "ws error");
                    break;
                }
                None => break,
            },
            Some(msg) = rx.recv() => {
                if let Err(err) = sink.send(msg).await {
                    tracing::error!(error = %err, "ws send failed");
                    break;
                }
            }
            () = shared.close_requested.notified() => {
                shared.set_state(ChannelState::Closing);
                break;
            }
        }
    }

    shared.outgoing.lock().take();
    shared.set_state(ChannelState::Closing);
    let _ = sink.close().await;
}
