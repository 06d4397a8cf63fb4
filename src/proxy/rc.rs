//! Registration at `rc.reaper.fm`, so the web remote can be reached as
//! `https://rc.reaper.fm/<name>` from the local network.

use std::net::{IpAddr, UdpSocket};

use url::Url;

use crate::error::SyncError;

/// Registration service base URL.
pub const RC_BASE_URL: &str = "https://rc.reaper.fm";

/// User agent REAPER itself sends when registering.
pub const RC_USER_AGENT: &str = "reaper_csurf_www/0.1";

/// Local address of the interface that routes to the internet.
///
/// Connecting a UDP socket sends nothing; it only selects the route.
///
/// # Errors
///
/// Returns [`SyncError::Io`] if no route is available.
pub fn local_ip() -> Result<IpAddr, SyncError> {
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect("1.1.1.1:80")?;
    Ok(socket.local_addr()?.ip())
}

/// Registration URL `<base>/_/<name>/<ip>/<port>`.
///
/// # Errors
///
/// Returns [`SyncError::InvalidUrl`] if the joined URL does not parse.
pub fn registration_url(base: &str, name: &str, ip: IpAddr, port: u16) -> Result<Url, SyncError> {
    Ok(Url::parse(base)?.join(&format!("/_/{name}/{ip}/{port}"))?)
}

/// Registers `<local ip>:<port>` under `name`. Failures are logged only.
pub async fn publish(http: reqwest::Client, name: String, port: u16) {
    if name.is_empty() {
        return;
    }
    if let Err(err) = try_publish(&http, &name, port).await {
        tracing::warn!(error = %err, name = %name, "rc.reaper.fm registration failed");
    }
}

async fn try_publish(http: &reqwest::Client, name: &str, port: u16) -> Result<(), SyncError> {
    let ip = local_ip()?;
    let url = registration_url(RC_BASE_URL, name, ip, port)?;
    let body = http
        .get(url.clone())
        .header(reqwest::header::USER_AGENT, RC_USER_AGENT)
        .send()
        .await
        .map_err(|e| SyncError::Upstream(e.to_string()))?
        .text()
        .await
        .map_err(|e| SyncError::Upstream(e.to_string()))?;
    tracing::info!(url = %url, response = %body.trim(), "registered at rc.reaper.fm");
    Ok(())
}
