//! HTTP transport for batched poll requests.
//!
//! [`PollTransport`] is the seam between the scheduler and the network;
//! [`HttpTransport`] is the `reqwest` implementation used in production.

use std::future::Future;

use reqwest::header::SERVER;
use url::Url;

use crate::error::SyncError;

/// Result of one batched GET as seen by the scheduler.
///
/// Network-level failures are folded into an empty body without a
/// `Server` header, the same shape a dead server produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollResponse {
    /// Response body; empty means "nothing to report" or failure.
    pub body: String,
    /// Whether the response carried a `Server` header.
    pub has_server_header: bool,
}

impl PollResponse {
    /// A response carrying data.
    #[must_use]
    pub fn with_body(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            has_server_header: true,
        }
    }

    /// An empty reply from a live server ("nothing changed").
    #[must_use]
    pub fn unchanged() -> Self {
        Self {
            body: String::new(),
            has_server_header: true,
        }
    }

    /// An empty reply with no server identification (failure).
    #[must_use]
    pub fn failed() -> Self {
        Self::default()
    }

    /// Returns `true` if the reply counts toward the error counter.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.body.is_empty() && !self.has_server_header
    }
}

/// Issues a GET for a request path (`/_/...`) and reports the outcome.
///
/// Implementations never fail: transport errors become
/// [`PollResponse::failed`]. Dropping the returned future aborts the
/// request.
pub trait PollTransport: Send + Sync + 'static {
    /// Performs the request for `path`.
    fn fetch(&self, path: &str) -> impl Future<Output = PollResponse> + Send;
}

/// `reqwest`-backed [`PollTransport`] rooted at a page origin.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    origin: Url,
}

impl HttpTransport {
    /// Builds the HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportUnavailable`] if the client cannot be
    /// constructed (e.g. no TLS backend could be initialized).
    pub fn new(origin: Url) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;
        Ok(Self { client, origin })
    }

    /// Origin every request path is resolved against.
    #[must_use]
    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

impl PollTransport for HttpTransport {
    async fn fetch(&self, path: &str) -> PollResponse {
        let url = match self.origin.join(path) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(path, error = %err, "cannot resolve poll path");
                return PollResponse::failed();
            }
        };

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::debug!(path, error = %err, "poll request failed");
                return PollResponse::failed();
            }
        };

        let has_server_header = response.headers().contains_key(SERVER);
        let body = response.text().await.unwrap_or_default();
        PollResponse {
            body,
            has_server_header,
        }
    }
}
