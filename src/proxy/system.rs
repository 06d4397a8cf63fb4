//! System endpoints.

use axum::http::StatusCode;
use axum::response::IntoResponse;

/// `GET /health`: liveness check, answers `200 ok`.
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
