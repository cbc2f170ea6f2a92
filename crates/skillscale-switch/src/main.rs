//! SkillScale switch binary.
//!
//! Binds the upstream and downstream listeners, serves the counter export,
//! and runs until SIGINT/SIGTERM. Configuration comes from the environment;
//! see [`skillscale_switch::SwitchConfig`] for the variables and defaults.

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use skillscale_switch::{Switch, SwitchConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = SwitchConfig::from_env()?;
    tracing::info!(
        xsub_bind = %config.xsub_bind,
        xpub_bind = %config.xpub_bind,
        metrics_port = config.metrics_port,
        hwm = config.hwm,
        "skillscale switch starting"
    );

    let handle = Switch::bind(config).await?;

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
