// Main entry point for API server

use anyhow::{Context, Result};
use dm_core::domains::connections::ConnectionTemplates;
use dm_core::domains::executions::BatchDispatcher;
use dm_core::kernel::{DittoAdapter, ServerDeps};
use dm_core::{server::build_app, Config};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,dm_core=debug,saga=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Device Management API");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!(
        ditto = %config.ditto_host_port,
        namespace = %config.ditto_namespace,
        template = %config.connection_template,
        "Configuration loaded"
    );

    // Wire the twin platform behind the kernel traits
    let adapter = Arc::new(DittoAdapter::new(Arc::new(config.ditto_client())));
    let deps = Arc::new(ServerDeps::from_ditto(
        adapter.clone(),
        Arc::new(ConnectionTemplates::builtin()),
        config.provisioning_settings(),
    ));
    let dispatcher = BatchDispatcher::new(deps).context("Invalid saga definition")?;

    // Build application
    let app = build_app(dispatcher.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Running sagas stop moving forward but finish compensating
    dispatcher.shutdown().await;
    if let Err(e) = adapter.close().await {
        tracing::warn!(error = %e, "Failed to close protocol channel");
    }
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
