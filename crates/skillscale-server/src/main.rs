//! SkillScale skill server binary.
//!
//! Loads the catalogue, subscribes to the configured topic downstream of the
//! switch, and dispatches requests until SIGINT/SIGTERM. See
//! [`skillscale_server::ServerConfig`] for the CLI flags and their
//! environment aliases (the CLI wins on conflict).

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use skillscale_server::{ServerConfig, SkillServer};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::parse();
    tracing::info!(
        topic = %config.topic,
        skills_dir = %config.skills_dir.display(),
        proxy_xpub = %config.proxy_xpub,
        proxy_xsub = %config.proxy_xsub,
        workers = config.workers,
        timeout_ms = config.timeout,
        matcher = ?config.matcher,
        "skillscale skill server starting"
    );

    let handle = SkillServer::start(config).await?;

    wait_for_signal().await;

    handle.shutdown();
    handle.join().await;
    Ok(())
}

/// Resolve on SIGINT or SIGTERM.
async fn wait_for_signal() {
    let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
    {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => tracing::info!("received SIGINT"),
        _ = sigterm.recv() => tracing::info!("received SIGTERM"),
    }
}
