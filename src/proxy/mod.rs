//! Proxy server in front of the REAPER web interface.
//!
//! Routes:
//! - `<ws_path>`: WebSocket push of state diffs (see [`crate::ws`]).
//! - `<health_path>`: liveness check.
//! - everything else: static files from `www_root`, then REAPER itself.
//!
//! [`poller::run_poller`] feeds the push endpoint, [`rc::publish`]
//! registers the server at `rc.reaper.fm`, and [`mdns::advertise`] makes it
//! visible on the local network.

pub mod fallback;
pub mod mdns;
pub mod poller;
pub mod rc;
pub mod system;

use axum::Router;
use axum::http::{HeaderName, HeaderValue};
use axum::routing::get;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::ws::ws_handler;

/// Header granting the web remote the screen wake lock.
pub const PERMISSIONS_POLICY: &str = "screen-wake-lock=(self)";

/// Builds the complete proxy router.
///
/// The WebSocket route needs the peer address, so the router must be served
/// with `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn build_router(state: AppState) -> Router {
    let ws_path = state.config.ws_path.clone();
    let health_path = state.config.health_path.clone();

    Router::new()
        .route(&ws_path, get(ws_handler))
        .route(&health_path, get(system::health_handler))
        .fallback(fallback::fallback_handler)
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("permissions-policy"),
            HeaderValue::from_static(PERMISSIONS_POLICY),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
