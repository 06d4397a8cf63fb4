//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;
use axum::response::IntoResponse;

use super::connection::{SessionInfo, run_session};
use crate::app_state::AppState;

/// `GET /ws`: upgrades the connection to a push session.
///
/// The receiver is subscribed before the last state is read, so no diff
/// published in between is lost.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let event_rx = state.event_bus.subscribe();
    let initial = state.state_store.get();
    let shutdown = state.shutdown.clone();
    let info = SessionInfo {
        id: uuid::Uuid::new_v4(),
        remote,
        user_agent: headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string(),
    };

    ws.on_upgrade(move |socket| run_session(socket, info, initial, event_rx, shutdown))
}
