//! Per-session loop of the push endpoint.
//!
//! A new session first receives the full last-known REAPER state, then
//! every changed-lines diff the poller publishes. Client frames are only
//! read to notice close.

use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use crate::app_state::shutdown_requested;
use crate::domain::StateDiff;

/// Identity of one WebSocket session, used in logs.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Random session id.
    pub id: Uuid,
    /// Peer address.
    pub remote: SocketAddr,
    /// `User-Agent` header of the upgrade request, or empty.
    pub user_agent: String,
}

/// Runs the write loop for a single WebSocket session until the peer
/// leaves, the bus closes, or the server shuts down.
pub async fn run_session(
    socket: WebSocket,
    info: SessionInfo,
    initial: Option<Vec<u8>>,
    mut event_rx: broadcast::Receiver<StateDiff>,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!(
        session = %info.id,
        remote = %info.remote,
        user_agent = %info.user_agent,
        "ws connected"
    );
    let (mut ws_tx, mut ws_rx) = socket.split();

    if let Some(state) = initial {
        let text = String::from_utf8_lossy(&state).into_owned();
        if ws_tx.send(Message::text(text)).await.is_err() {
            tracing::info!(session = %info.id, "ws disconnected before initial state");
            return;
        }
    }

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(diff) => {
                        if ws_tx.send(Message::text(diff.payload)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(session = %info.id, lagged = n, "ws session lagged behind diff bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            () = shutdown_requested(&mut shutdown) => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!(session = %info.id, remote = %info.remote, "ws disconnected");
}
