//! End-to-end tests: a fake REAPER, the proxy in front of it, and the
//! sync client talking to the proxy.

#![allow(clippy::panic, clippy::indexing_slicing)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header::SERVER;
use axum::http::{Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::{any, get};
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, timeout};
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use wwr_sync::app_state::AppState;
use wwr_sync::config::ProxyConfig;
use wwr_sync::proxy::{self, poller};
use wwr_sync::{ClientConfig, Route, SyncClient};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Clone, Default)]
struct FakeReaper {
    state: Arc<Mutex<String>>,
}

impl FakeReaper {
    fn set(&self, body: &str) {
        *self.state.lock() = body.to_string();
    }
}

async fn reaper_poll(State(reaper): State<FakeReaper>) -> impl IntoResponse {
    ([(SERVER, "REAPER")], reaper.state.lock().clone())
}

async fn reaper_echo(method: Method, uri: Uri, body: String) -> impl IntoResponse {
    ([(SERVER, "REAPER")], format!("{method} {uri} {body}"))
}

async fn reaper_fallback(uri: Uri) -> impl IntoResponse {
    ([(SERVER, "REAPER")], format!("REAPER-FALLBACK {uri}"))
}

async fn serve(router: Router) -> SocketAddr {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    addr
}

async fn spawn_reaper(initial: &str) -> (FakeReaper, SocketAddr) {
    let reaper = FakeReaper::default();
    reaper.set(initial);
    let router = Router::new()
        .route("/_/{*keys}", get(reaper_poll))
        .route("/echo", any(reaper_echo))
        .fallback(reaper_fallback)
        .with_state(reaper.clone());
    (reaper, serve(router).await)
}

async fn closed_port() -> SocketAddr {
    let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
        panic!("bind failed");
    };
    let Ok(addr) = listener.local_addr() else {
        panic!("no local addr");
    };
    drop(listener);
    addr
}

struct Proxy {
    addr: SocketAddr,
    _shutdown: watch::Sender<bool>,
}

impl Proxy {
    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

async fn spawn_proxy(reaper: SocketAddr, www_root: &Path, poll_keys: &str) -> Proxy {
    let Ok(reaper_url) = Url::parse(&format!("http://{reaper}")) else {
        panic!("reaper url");
    };
    let config = ProxyConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        reaper_url,
        reaper_rc_name: String::new(),
        mdns_service: String::new(),
        poll_keys: poll_keys.to_string(),
        poll_interval: Duration::from_millis(20),
        ws_path: "/ws".to_string(),
        www_root: www_root.display().to_string(),
        health_path: "/health".to_string(),
        event_bus_capacity: 64,
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let Ok(state) = AppState::new(config, shutdown_rx) else {
        panic!("state");
    };
    tokio::spawn(poller::run_poller(state.clone()));
    let addr = serve(proxy::build_router(state)).await;
    Proxy {
        addr,
        _shutdown: shutdown_tx,
    }
}

fn www() -> tempfile::TempDir {
    let Ok(dir) = tempfile::tempdir() else {
        panic!("tempdir");
    };
    let Ok(()) = std::fs::write(dir.path().join("index.html"), "<html>remote</html>") else {
        panic!("write index");
    };
    let Ok(()) = std::fs::write(dir.path().join("mixer.html"), "<html>mixer</html>") else {
        panic!("write mixer");
    };
    dir
}

async fn http_get(url: &str) -> reqwest::Response {
    let Ok(resp) = reqwest::get(url).await else {
        panic!("GET {url} failed");
    };
    resp
}

#[tokio::test]
async fn health_answers_ok_with_wake_lock_policy() {
    let dir = www();
    let proxy = spawn_proxy(closed_port().await, dir.path(), "").await;

    let resp = http_get(&proxy.url("/health")).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers()
            .get("permissions-policy")
            .and_then(|v| v.to_str().ok()),
        Some("screen-wake-lock=(self)")
    );
    assert_eq!(resp.text().await.ok().as_deref(), Some("ok"));
}

#[tokio::test]
async fn static_files_resolve_before_reaper() {
    let dir = www();
    let proxy = spawn_proxy(closed_port().await, dir.path(), "").await;

    let index = http_get(&proxy.url("/")).await;
    assert_eq!(index.status(), StatusCode::OK);
    assert_eq!(index.text().await.ok().as_deref(), Some("<html>remote</html>"));

    let mixer = http_get(&proxy.url("/mixer")).await;
    assert_eq!(mixer.text().await.ok().as_deref(), Some("<html>mixer</html>"));
}

#[tokio::test]
async fn unknown_paths_are_forwarded_with_method_query_and_body() {
    let dir = www();
    let (_reaper, reaper_addr) = spawn_reaper("").await;
    let proxy = spawn_proxy(reaper_addr, dir.path(), "").await;

    let Ok(resp) = reqwest::Client::new()
        .post(proxy.url("/echo?cmd=40044"))
        .body("payload")
        .send()
        .await
    else {
        panic!("POST failed");
    };
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(SERVER).and_then(|v| v.to_str().ok()),
        Some("REAPER")
    );
    assert!(resp.headers().contains_key("permissions-policy"));
    assert_eq!(
        resp.text().await.ok().as_deref(),
        Some("POST /echo?cmd=40044 payload")
    );
}

async fn raw_get(addr: SocketAddr, target: &str) -> String {
    let Ok(mut stream) = tokio::net::TcpStream::connect(addr).await else {
        panic!("connect failed");
    };
    let request = format!("GET {target} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    let Ok(()) = stream.write_all(request.as_bytes()).await else {
        panic!("write failed");
    };
    let mut response = Vec::new();
    let Ok(Ok(_)) = timeout(WAIT, stream.read_to_end(&mut response)).await else {
        panic!("read failed");
    };
    String::from_utf8_lossy(&response).into_owned()
}

#[tokio::test]
async fn double_slash_paths_stay_on_reaper() {
    let dir = www();
    let (_reaper, reaper_addr) = spawn_reaper("").await;
    let other_hits = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&other_hits);
    let other = Router::new().fallback(move || {
        let hits = Arc::clone(&hits);
        async move {
            hits.fetch_add(1, Ordering::SeqCst);
            "OTHER-HOST-SECRET"
        }
    });
    let other_addr = serve(other).await;
    let proxy = spawn_proxy(reaper_addr, dir.path(), "").await;

    let response = raw_get(proxy.addr, &format!("//{other_addr}/secret")).await;
    assert!(!response.contains("OTHER-HOST-SECRET"), "{response}");
    assert!(response.contains("REAPER-FALLBACK"), "{response}");
    assert_eq!(other_hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unreachable_reaper_is_bad_gateway() {
    let dir = www();
    let proxy = spawn_proxy(closed_port().await, dir.path(), "").await;

    let resp = http_get(&proxy.url("/_/TRANSPORT;")).await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let Ok(body) = resp.json::<serde_json::Value>().await else {
        panic!("json error body");
    };
    assert_eq!(body["error"]["code"], 3101);
}

async fn next_text<S>(ws: &mut S) -> String
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let Ok(Some(Ok(msg))) = timeout(WAIT, ws.next()).await else {
            panic!("no websocket message");
        };
        if let Message::Text(text) = msg {
            return text.as_str().to_owned();
        }
    }
}

#[tokio::test]
async fn websocket_session_gets_state_then_changed_lines() {
    let dir = www();
    let (reaper, reaper_addr) = spawn_reaper("TRANSPORT\t0\nBEATPOS\t1").await;
    let proxy = spawn_proxy(reaper_addr, dir.path(), "TRANSPORT;BEATPOS").await;

    let Ok((mut ws, _)) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws", proxy.addr)).await
    else {
        panic!("ws connect failed");
    };

    assert_eq!(next_text(&mut ws).await, "TRANSPORT\t0\nBEATPOS\t1");

    reaper.set("TRANSPORT\t0\nBEATPOS\t2");
    let deadline = Instant::now() + WAIT;
    loop {
        let text = next_text(&mut ws).await;
        if text == "BEATPOS\t2" {
            break;
        }
        assert_eq!(text, "TRANSPORT\t0\nBEATPOS\t1", "unexpected frame");
        assert!(Instant::now() < deadline, "diff never arrived");
    }
}

async fn recv_reply(rx: &mut mpsc::UnboundedReceiver<(String, bool)>) -> (String, bool) {
    let Ok(Some(reply)) = timeout(WAIT, rx.recv()).await else {
        panic!("no reply");
    };
    reply
}

#[tokio::test]
async fn client_polls_through_proxy() {
    let dir = www();
    let (_reaper, reaper_addr) = spawn_reaper("TRANSPORT\t1\t0.000").await;
    let proxy = spawn_proxy(reaper_addr, dir.path(), "").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = ClientConfig {
        base_url: proxy.url(""),
        websocket: false,
        ..ClientConfig::default()
    };
    let Ok(client) = SyncClient::new(config, move |payload: &str, started: Option<Instant>| {
        let _ = tx.send((payload.to_string(), started.is_some()));
    }) else {
        panic!("client");
    };
    assert_eq!(client.route(), Route::Polling);

    client.schedule("TRANSPORT");
    let Ok(()) = client.start() else {
        panic!("start");
    };

    let (payload, timed) = recv_reply(&mut rx).await;
    assert_eq!(payload, "TRANSPORT\t1\t0.000");
    assert!(timed);
    assert_eq!(client.error_count(), 0);
    client.stop();
}

#[tokio::test]
async fn client_receives_pushed_state_over_websocket() {
    let dir = www();
    let (_reaper, reaper_addr) = spawn_reaper("TRANSPORT\t1").await;
    let proxy = spawn_proxy(reaper_addr, dir.path(), "TRANSPORT").await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let config = ClientConfig {
        base_url: proxy.url(""),
        ..ClientConfig::default()
    };
    let Ok(client) = SyncClient::new(config, move |payload: &str, started: Option<Instant>| {
        let _ = tx.send((payload.to_string(), started.is_some()));
    }) else {
        panic!("client");
    };
    assert_eq!(client.route(), Route::WebSocket);

    client.schedule_recurring("TRANSPORT", Duration::from_secs(1));
    let (payload, timed) = recv_reply(&mut rx).await;
    assert_eq!(payload, "TRANSPORT\t1");
    assert!(!timed);
    assert!(client.websocket_ready());
    client.stop();
}
