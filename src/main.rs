//! wwr-proxy server entry point.
//!
//! Starts the REAPER state poller, the optional `rc.reaper.fm`
//! registration and mDNS advertisement, and the Axum server with the
//! WebSocket, health, static and reverse-proxy routes.

use std::net::SocketAddr;

use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use wwr_sync::app_state::AppState;
use wwr_sync::config::ProxyConfig;
use wwr_sync::proxy::{self, mdns, poller, rc};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::args().skip(1).any(|a| a == "--version" || a == "-version") {
        println!("wwr-proxy {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing();

    let config = ProxyConfig::from_env()?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        reaper = %config.reaper_url,
        "starting wwr-proxy"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let state = AppState::new(config, shutdown_rx)?;

    let poller = tokio::spawn(poller::run_poller(state.clone()));
    tokio::spawn(rc::publish(
        state.http.clone(),
        state.config.reaper_rc_name.clone(),
        state.config.listen_addr.port(),
    ));

    let listener = tokio::net::TcpListener::bind(state.config.listen_addr).await?;
    let port = listener.local_addr()?.port();
    tracing::info!(addr = %state.config.listen_addr, "server listening");
    let advertiser = mdns::advertise(&state.config.mdns_service, port);

    let app = proxy::build_router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!("shutting down");
        if let Some(advertiser) = advertiser {
            advertiser.shutdown();
        }
        shutdown_tx.send_replace(true);
    })
    .await?;

    if let Err(err) = poller.await {
        tracing::warn!(error = %err, "poller task ended abnormally");
    }
    tracing::info!("server stopped");
    Ok(())
}

/// Installs the fmt subscriber; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
