//! Locator mode: owns the cluster configuration store.
//!
//! In this mode, the daemon:
//! 1. Opens (or strictly loads) the `cluster_config` store
//! 2. Serves the locator API for joins, deploys, imports and exports
//! 3. On shutdown, stops accepting requests; the store is already durable

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::bail;
use cfgsync_core::config::LocatorConfig;
use cfgsync_coordinator::ConfigCoordinator;
use tracing::info;

/// Run the locator.
pub async fn run_locator(config: LocatorConfig) -> anyhow::Result<()> {
    if !config.enable_cluster_configuration {
        bail!("cluster configuration is disabled (enable_cluster_configuration = false)");
    }
    info!("cfgsync daemon starting in locator mode");

    // ── Configuration store ────────────────────────────────────────
    let coordinator = Arc::new(ConfigCoordinator::open(&config)?);
    info!(
        root = ?coordinator.store().root(),
        records = ?coordinator.store().list_names(),
        "cluster configuration loaded"
    );

    // ── Locator API ────────────────────────────────────────────────
    let router = cfgsync_api::build_router(coordinator);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "locator API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(crate::shutdown_signal())
        .await?;

    info!("locator stopped");
    Ok(())
}
