//! Crate error types with HTTP status code mapping.
//!
//! [`SyncError`] is the central error type for both the client core and the
//! proxy. Proxy handlers return it directly; each variant maps to an HTTP
//! status code and a structured JSON error response.
//!
//! Soft polling failures (empty reply, timeout) are not errors: they feed
//! the scheduler's error counter and never leave the cycle loop.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Result alias using [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3101,
///     "message": "upstream error: connection refused",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`SyncError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Error enum shared by the client core and the proxy.
///
/// # Error Code Ranges
///
/// | Range     | Category   | HTTP Status               |
/// |-----------|------------|---------------------------|
/// | 1000–1999 | Validation | 400 Bad Request           |
/// | 2000–2999 | Transport  | 503 Service Unavailable   |
/// | 3000–3999 | Server     | 500 / 502                 |
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No HTTP client could be built; polling cannot run at all.
    #[error("no http transport available: {0}")]
    TransportUnavailable(String),

    /// A base URL or derived endpoint URL could not be parsed.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// WebSocket handshake or stream failure.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// mDNS advertisement could not be set up.
    #[error("discovery error: {0}")]
    Discovery(String),

    /// The upstream REAPER server failed or timed out.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Invalid configuration value.
    #[error("configuration error: {0}")]
    Config(String),

    /// Filesystem or socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidUrl(_) => 1001,
            Self::TransportUnavailable(_) => 2001,
            Self::WebSocket(_) => 2002,
            Self::Discovery(_) => 2003,
            Self::Config(_) => 3001,
            Self::Io(_) => 3002,
            Self::Upstream(_) => 3101,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidUrl(_) => StatusCode::BAD_REQUEST,
            Self::TransportUnavailable(_) | Self::WebSocket(_) | Self::Discovery(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<mdns_sd::Error> for SyncError {
    fn from(err: mdns_sd::Error) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
