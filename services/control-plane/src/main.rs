//! emupool Control Plane
//!
//! Runs on the master host: serves the master's own node surface, owns the
//! pool of every configured host, and drives the daily image refresh.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use emupool_control_plane::{config, LocalNode, PoolManager, RefreshJob, RefreshWorker};
use emupool_node_agent::{router, AgentState, HostManager, MockRuntime};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EMUPOOL_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting emupool control plane");
    info!(
        listen_addr = %config.listen_addr,
        peers = config.pool_nodes.len(),
        registry = ?config.docker_registry,
        "Configuration loaded"
    );

    // Mock runtime until a container runtime collaborator is wired in.
    let runtime = Arc::new(MockRuntime::new());
    let host = Arc::new(HostManager::new(runtime));

    let pool = PoolManager::from_config(&config, Arc::new(LocalNode::new(Arc::clone(&host))));
    for node in pool.nodes_info().await {
        info!(node = %node.id, url = %node.url, state = %node.state, "Pool node");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let schedule = config
        .schedule()
        .ok_or_else(|| anyhow!("invalid refresh schedule"))?;
    let refresh_worker = RefreshWorker::new(
        RefreshJob::new(pool.clone(), config.catalog(), config.docker_registry.clone()),
        schedule,
    );
    let refresh_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            refresh_worker.run(shutdown_rx).await;
        }
    });

    let app = router(AgentState::new(host));
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = Duration::from_secs(10);

    if tokio::time::timeout(shutdown_timeout, refresh_handle)
        .await
        .is_err()
    {
        warn!("Refresh worker did not shut down in time");
    }
    if !server_handle.is_finished()
        && tokio::time::timeout(shutdown_timeout, server_handle)
            .await
            .is_err()
    {
        warn!("Server did not shut down in time");
    }

    info!("Control plane shutdown complete");
    Ok(())
}
