//! Member mode: receives configuration from a locator.
//!
//! In this mode, the daemon:
//! 1. Opens the member agent, clearing locator-managed files of a previous run
//! 2. Serves the push endpoint the locator uses on deploy
//! 3. Joins the locator, applies the returned bundle and acknowledges it
//! 4. On shutdown, leaves the locator

use std::net::SocketAddr;
use std::sync::Arc;

use cfgsync_api::LocatorClient;
use cfgsync_core::config::MemberConfig;
use cfgsync_member::MemberAgent;
use tokio::sync::watch;
use tracing::{info, warn};

/// Run the member.
pub async fn run_member(config: MemberConfig) -> anyhow::Result<()> {
    info!(groups = %config.groups, "cfgsync daemon starting in member mode");

    // ── Member agent ───────────────────────────────────────────────
    let agent = Arc::new(MemberAgent::open(&config.work_dir, &config.groups)?);
    info!(work_dir = ?config.work_dir, "member agent ready");

    // ── Push endpoint ──────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let listener = tokio::net::TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], config.port))).await?;
    let port = listener.local_addr()?.port();
    let endpoint = format!("http://{}:{port}", config.advertise_address);
    let router = cfgsync_api::member_router(agent.clone());
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });
    info!(%endpoint, "member push endpoint listening");

    // ── Join ───────────────────────────────────────────────────────
    let client = LocatorClient::new(&config.locator)?;
    let member_id = if config.use_cluster_configuration {
        let (member_id, report) = client.join_and_apply(&agent, &endpoint).await?;
        if report.is_success() {
            info!(member = %member_id, installed = report.artifacts_installed.len(), "cluster configuration applied");
        } else {
            warn!(member = %member_id, failures = report.failures.len(), "cluster configuration applied with failures");
        }
        Some(member_id)
    } else {
        info!("use_cluster_configuration is false; not requesting cluster configuration");
        None
    };

    crate::shutdown_signal().await;

    // ── Leave ──────────────────────────────────────────────────────
    if let Some(member_id) = member_id {
        match client.leave(&member_id).await {
            Ok(result) => info!(member = %member_id, message = %result.message, "left locator"),
            Err(e) => warn!(member = %member_id, error = %e, "failed to leave locator"),
        }
    }

    let _ = shutdown_tx.send(true);
    server.await??;
    info!("member stopped");
    Ok(())
}
