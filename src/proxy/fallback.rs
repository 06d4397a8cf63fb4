//! Fallback route: static files first, REAPER second.
//!
//! Static lookup tries `<path>`, then `<path>.html` when the path has no
//! extension, then `<path>/index.html`. Request paths are cleaned
//! lexically, and a candidate outside the web root (or the root itself) is
//! never served.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use axum::response::{IntoResponse, Response};
use tower::ServiceExt;
use tower_http::services::ServeFile;
use url::Url;

use crate::app_state::AppState;
use crate::error::SyncError;

/// Timeout of a forwarded request.
pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(2);

/// Largest request body forwarded upstream.
const MAX_FORWARD_BODY: usize = 16 * 1024 * 1024;

/// Serves a static file if one matches, otherwise forwards to REAPER.
pub async fn fallback_handler(State(state): State<AppState>, req: Request) -> Response {
    let root = Path::new(&state.config.www_root);
    if let Some(file) = resolve_static(root, req.uri().path()).await {
        let served = ServeFile::new(file).oneshot(req).await;
        return match served {
            Ok(resp) => resp.into_response(),
            Err(never) => match never {},
        };
    }

    match forward(&state, req).await {
        Ok(resp) => resp,
        Err(err) => {
            tracing::warn!(error = %err, "proxy error");
            err.into_response()
        }
    }
}

/// Returns the first candidate for `request_path` that is a regular file.
pub async fn resolve_static(root: &Path, request_path: &str) -> Option<PathBuf> {
    for candidate in candidate_paths(root, request_path) {
        if let Ok(meta) = tokio::fs::metadata(&candidate).await
            && meta.is_file()
        {
            return Some(candidate);
        }
    }
    None
}

/// Static file candidates for `request_path`, in lookup order.
///
/// `request_path` is the raw (percent-encoded) URI path. Paths that do not
/// decode as UTF-8 have no candidates.
pub fn candidate_paths(root: &Path, request_path: &str) -> Vec<PathBuf> {
    let Ok(decoded) = urlencoding::decode(request_path) else {
        return Vec::new();
    };

    let mut base = root.to_path_buf();
    for segment in clean_segments(&decoded) {
        base.push(segment);
    }

    let mut candidates = vec![base.clone()];
    if Path::new(decoded.as_ref()).extension().is_none() {
        let mut html = base.clone().into_os_string();
        html.push(".html");
        candidates.push(PathBuf::from(html));
    }
    candidates.push(base.join("index.html"));

    candidates
        .into_iter()
        .filter(|p| p.starts_with(root) && p.as_path() != root)
        .collect()
}

/// Lexically resolves `.` and `..` segments. `..` never climbs above the
/// first segment.
fn clean_segments(path: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                out.pop();
            }
            s => out.push(s),
        }
    }
    out
}

/// Upstream target `<base><path>?<query>`.
///
/// `path` is appended to the base path verbatim, so a path such as
/// `//other-host/x` stays on the REAPER host.
pub fn upstream_url(base: &Url, path: &str, query: Option<&str>) -> Url {
    let mut target = base.clone();
    let joined = format!("{}{path}", base.path().trim_end_matches('/'));
    target.set_path(&joined);
    target.set_query(query);
    target
}

/// Forwards `req` to `<reaper_url><path>?<query>` and copies the reply back.
async fn forward(state: &AppState, req: Request) -> Result<Response, SyncError> {
    let (parts, body) = req.into_parts();

    let target = upstream_url(&state.config.reaper_url, parts.uri.path(), parts.uri.query());

    let body = axum::body::to_bytes(body, MAX_FORWARD_BODY)
        .await
        .map_err(|e| SyncError::Upstream(format!("request body: {e}")))?;

    let mut headers = parts.headers;
    headers.remove(HOST);

    let upstream = state
        .http
        .request(parts.method, target)
        .headers(headers)
        .timeout(UPSTREAM_TIMEOUT)
        .body(body)
        .send()
        .await
        .map_err(|e| SyncError::Upstream(e.to_string()))?;

    let status = upstream.status();
    let mut headers = upstream.headers().clone();
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| SyncError::Upstream(e.to_string()))?;

    let mut resp = Response::new(Body::from(bytes));
    *resp.status_mut() = status;
    *resp.headers_mut() = headers;
    Ok(resp)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        PathBuf::from("/srv/www")
    }

    #[test]
    fn extensionless_path_tries_html_then_index() {
        let c = candidate_paths(&root(), "/mixer");
        assert_eq!(
            c,
            vec![
                PathBuf::from("/srv/www/mixer"),
                PathBuf::from("/srv/www/mixer.html"),
                PathBuf::from("/srv/www/mixer/index.html"),
            ]
        );
    }

    #[test]
    fn path_with_extension_skips_html_candidate() {
        let c = candidate_paths(&root(), "/main.js");
        assert_eq!(
            c,
            vec![
                PathBuf::from("/srv/www/main.js"),
                PathBuf::from("/srv/www/main.js/index.html"),
            ]
        );
    }

    #[test]
    fn root_path_only_offers_index() {
        let c = candidate_paths(&root(), "/");
        assert_eq!(c, vec![PathBuf::from("/srv/www/index.html")]);
    }

    #[test]
    fn traversal_never_leaves_root() {
        for path in ["/../../etc/passwd", "/a/../../../etc/passwd", "/%2e%2e/%2e%2e/etc/passwd"] {
            for candidate in candidate_paths(&root(), path) {
                assert!(candidate.starts_with(root()), "{path} -> {candidate:?}");
            }
        }
        let c = candidate_paths(&root(), "/../etc/passwd");
        assert_eq!(c.first(), Some(&PathBuf::from("/srv/www/etc/passwd")));
    }

    #[test]
    fn percent_encoded_names_are_decoded() {
        let c = candidate_paths(&root(), "/my%20page.html");
        assert_eq!(c.first(), Some(&PathBuf::from("/srv/www/my page.html")));
    }

    fn reaper() -> Url {
        let Ok(url) = Url::parse("http://127.0.0.1:8088") else {
            panic!("valid url");
        };
        url
    }

    #[test]
    fn upstream_url_appends_path_and_query() {
        let url = upstream_url(&reaper(), "/_/TRANSPORT;", Some("x=1"));
        assert_eq!(url.as_str(), "http://127.0.0.1:8088/_/TRANSPORT;?x=1");
    }

    #[test]
    fn double_slash_path_stays_on_reaper_host() {
        let url = upstream_url(&reaper(), "//10.0.0.9:9000/secret", None);
        assert_eq!(url.host_str(), Some("127.0.0.1"));
        assert_eq!(url.port(), Some(8088));
        assert_eq!(url.path(), "//10.0.0.9:9000/secret");
    }

    #[test]
    fn base_path_prefix_is_kept() {
        let Ok(base) = Url::parse("http://reaper.local:8088/remote/") else {
            panic!("valid url");
        };
        let url = upstream_url(&base, "/_/BEATPOS", None);
        assert_eq!(url.as_str(), "http://reaper.local:8088/remote/_/BEATPOS");
    }

    #[tokio::test]
    async fn resolves_existing_file_only() {
        let Ok(dir) = tempfile::tempdir() else {
            panic!("tempdir");
        };
        let Ok(()) = std::fs::write(dir.path().join("mixer.html"), "<html></html>") else {
            panic!("write");
        };
        let Ok(()) = std::fs::create_dir(dir.path().join("sub")) else {
            panic!("mkdir");
        };

        assert_eq!(
            resolve_static(dir.path(), "/mixer").await,
            Some(dir.path().join("mixer.html"))
        );
        assert_eq!(resolve_static(dir.path(), "/sub").await, None);
        assert_eq!(resolve_static(dir.path(), "/missing").await, None);
    }
}
