//! wwr-watch: prints REAPER replies for the given request names.
//!
//! ```text
//! WWR_BASE_URL=http://studio.local:8090 wwr-watch TRANSPORT GET/EXTSTATE/TUX/text
//! ```
//!
//! Every name is requested once, then registered as a recurring request
//! with a 1s interval.
//! Replies are printed to stdout until Ctrl+C.

use std::io::Write;
use std::time::Duration;

use anyhow::Context;
use tokio::time::Instant;
use tracing_subscriber::EnvFilter;

use wwr_sync::{ClientConfig, SyncClient};

const WATCH_INTERVAL: Duration = Duration::from_secs(1);

fn print_reply(payload: &str, started_at: Option<Instant>) {
    let mut out = std::io::stdout().lock();
    let written = match started_at {
        Some(at) => writeln!(out, "[{:?}] {payload}", at.elapsed()),
        None => writeln!(out, "[push] {payload}"),
    };
    if let Err(err) = written {
        tracing::warn!(error = %err, "stdout write failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let names: Vec<String> = std::env::args().skip(1).collect();
    if names.iter().any(|a| a == "--version" || a == "-version") {
        println!("wwr-watch {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    if names.is_empty() {
        anyhow::bail!("usage: wwr-watch <NAME>...");
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let config = ClientConfig::from_env().context("loading WWR_* configuration")?;
    let client = SyncClient::new(config, print_reply).context("creating sync client")?;
    tracing::info!(route = ?client.route(), names = names.len(), "watching");

    for name in names {
        client.schedule(name.clone());
        client.schedule_recurring(name, WATCH_INTERVAL);
    }
    client.start().context("starting polling")?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    client.stop();
    Ok(())
}
