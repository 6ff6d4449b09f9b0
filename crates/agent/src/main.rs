//! Usage Agent - container-aware CPU and memory usage exporter
//!
//! Runs next to (or inside) a service container, refreshing CPU and memory
//! figures on a fixed interval and serving them as Prometheus gauges.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use usage_agent::{api, config::AgentConfig};
use usage_engine::{
    exporter, health::HealthMonitor, observability::StructuredLogger, MetricCallback,
    RefresherBuilder,
};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting usage-agent");

    let config = AgentConfig::load()?;
    info!(
        service_name = %config.service_name,
        cgroup_root = %config.cgroup_root.display(),
        proc_stat_fallback = config.proc_stat_fallback,
        "Agent configured"
    );

    let logger = StructuredLogger::new(&config.service_name);
    let pid = config.target_pid();
    logger.log_startup(AGENT_VERSION, pid, config.refresh_interval());

    let mut refresher = RefresherBuilder::new()
        .source_config(config.source_config())
        .interval(config.refresh_interval())
        .pid(pid)
        .service_name(&config.service_name)
        .build()?;
    let store = refresher.store().clone();

    exporter::register_default(MetricCallback::new(
        store.clone(),
        &config.service_name,
        config.refresh_interval(),
    ))
    .context("Failed to register usage gauges")?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let refresher_handle = tokio::spawn(async move {
        refresher.run(shutdown_rx).await;
    });

    let app_state = Arc::new(api::AppState::new(HealthMonitor::new(
        store,
        config.refresh_interval(),
    )));
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = api_handle => {
            match result {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => {
                    warn!(error = %e, "API server failed");
                    logger.log_shutdown("API server failed");
                }
                Err(e) => warn!(error = %e, "API server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Err(e) = refresher_handle.await {
        warn!(error = %e, "Refresher task panicked");
    }
    info!("Shutting down");

    Ok(())
}
