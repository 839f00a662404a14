//! emupool Node Agent
//!
//! Runs on every emulator host and serves the node control surface to the
//! pool manager.
//!
//! ## Architecture
//!
//! - **Control surface**: axum router over the host manager
//! - **Host manager**: id allocation and launch/pull rules for this host
//! - **Runtime**: container operations (mock in dev)

use std::sync::Arc;

use anyhow::Result;
use emupool_node_agent::{config::Config, router, AgentState, HostManager, MockRuntime};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        listen_addr = %config.listen_addr,
        hostname = %config.hostname,
        registry_images = config.registry_images.len(),
        "Starting emupool node agent"
    );

    // Create the runtime (mock for now)
    let runtime = config
        .registry_images
        .iter()
        .fold(MockRuntime::new().with_hostname(&config.hostname), |runtime, image| {
            runtime.with_registry_image(image.clone())
        });

    let host = Arc::new(HostManager::new(Arc::new(runtime)));
    let app = router(AgentState::new(host));

    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let mut server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            match result {
                Ok(Ok(())) => info!("Control surface exited"),
                Ok(Err(e)) => error!(error = %e, "Control surface error"),
                Err(e) => error!(error = %e, "Control surface task panicked"),
            }
            return Ok(());
        }
    }

    // Signal shutdown to the server
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(std::time::Duration::from_secs(5), server_handle).await {
        Ok(Ok(Ok(()))) => info!("Control surface stopped"),
        Ok(Ok(Err(e))) => error!(error = %e, "Control surface error"),
        Ok(Err(e)) => error!(error = %e, "Control surface task panicked"),
        Err(_) => error!("Control surface did not stop in time"),
    }

    info!("Node agent shutdown complete");
    Ok(())
}
