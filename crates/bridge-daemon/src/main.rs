//! chat-repo-bridge daemon — binds the webhook HTTP server and the ingress
//! worker pools, and runs until signalled to stop.

use anyhow::{Context, Result};
use bridge_core::config::Config;
use bridge_daemon::Daemon;
use tokio::net::TcpListener;
use tracing::info;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    bridge_telemetry::init_logging("bridge-daemon", &config.general.log_level);

    info!(pid = std::process::id(), version = env!("CARGO_PKG_VERSION"), "chat-repo-bridge daemon starting");

    let port = std::env::var("WEBHOOK_PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(config.server.webhook_port);

    let daemon = Daemon::new(config).await.context("failed to wire daemon")?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received shutdown signal");
            shutdown.trigger();
        }
    });

    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind webhook port {port}"))?;
    info!(port, "webhook listener bound");

    daemon.run(listener).await.context("daemon run loop failed")?;
    Ok(())
}
