//! meshhubd: hub overlay daemon.
//!
//! Usage: meshhubd [SEED...]
//!
//! Seeds given on the command line are contacted in addition to the ones in
//! the config file.

use anyhow::{Context, Result};

use meshhub_core::config::MeshConfig;
use meshhub_core::Address;
use meshhub_overlay::{Hub, HubConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = MeshConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = MeshConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        MeshConfig::default()
    });

    let mut hub_config = HubConfig::from_config(&config).context("invalid network config")?;
    hub_config
        .seeds
        .extend(std::env::args().skip(1).map(Address::new));
    tracing::info!(
        port = hub_config.port,
        seeds = hub_config.seeds.len(),
        "meshhubd starting"
    );

    let hub = Hub::start(hub_config)
        .await
        .context("failed to start hub")?;

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // Status HTTP endpoint
    let _api_server = if config.api.enabled {
        let state = meshhub_api::ApiState {
            ctx: hub.context().clone(),
            shutdown_tx: shutdown_tx.clone(),
        };
        let port = config.api.port;
        Some(tokio::spawn(async move {
            if let Err(e) = meshhub_api::serve(state, port).await {
                tracing::error!(error = %e, "status server failed");
            }
        }))
    } else {
        None
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    shutdown_rx.recv().await.ok();
    tracing::info!("shutting down");
    hub.end().await;

    Ok(())
}
