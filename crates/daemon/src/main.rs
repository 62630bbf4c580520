//! Gearflow scheduler daemon - Main Entry Point

use anyhow::{Context, Result};
use gearflow_api_rpc::{RpcServer, RpcServerConfig};
use gearflow_core::application::{shutdown_channel, OrphanSweeper};
use gearflow_daemon::settings::{DaemonSettings, LogSettings};
use gearflow_daemon::telemetry::{self, TelemetryStatus};
use gearflow_daemon::wiring::build_services;
use gearflow_infra_sqlite::{create_pool, run_migrations};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "gearflow=info";
const LOG_FORMAT_ENV: &str = "GEARFLOW_LOG_FORMAT";
const LOG_FILE_PREFIX: &str = "gearflow-scheduler.log";
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Stdout plus an optional daily-rotated JSON file; the guard must outlive main
fn init_logging(settings: &LogSettings) -> Result<(Option<WorkerGuard>, TelemetryStatus)> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("invalid log filter")?;

    let (file_writer, guard) = match &settings.directory {
        Some(dir) => {
            let appender =
                tracing_appender::rolling::daily(shellexpand::tilde(dir).into_owned(), LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard))
        }
        None => (None, None),
    };
    let file_layer = file_writer.map(|w| fmt::layer().json().with_ansi(false).with_writer(w));

    let (otel_layer, status) = telemetry::otel_layer()?;
    let registry = tracing_subscriber::registry()
        .with(otel_layer)
        .with(env_filter)
        .with(file_layer);

    let log_format = std::env::var(LOG_FORMAT_ENV).unwrap_or_else(|_| "pretty".to_string());
    let installed = match log_format.as_str() {
        // Production: JSON structured logging
        "json" => registry.with(fmt::layer().json()).try_init(),
        _ => registry.with(fmt::layer().pretty()).try_init(),
    };
    installed.context("failed to install tracing subscriber")?;

    Ok((guard, status))
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = DaemonSettings::load().context("failed to load settings")?;
    let (_log_guard, telemetry_status) = init_logging(&settings.log)?;

    info!("Gearflow scheduler v{} starting...", VERSION);
    match &telemetry_status {
        TelemetryStatus::Disabled => {}
        TelemetryStatus::Unsupported { endpoint } => {
            warn!(endpoint = %endpoint, "OTLP endpoint set but feature 'telemetry' not enabled");
        }
        TelemetryStatus::Enabled {
            endpoint,
            service_name,
        } => info!(endpoint = %endpoint, service_name = %service_name, "OpenTelemetry initialized"),
    }

    // 1. Database
    let database_url = settings.database.url();
    if !settings.database.is_in_memory() {
        if let Some(parent) = settings.database.expanded_path().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
    }
    info!(database = %database_url, "Initializing database...");
    let pool = create_pool(&database_url)
        .await
        .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
    run_migrations(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;

    // 2. Services
    let wiring = build_services(pool, &settings);
    let services = wiring.services;

    // 3. Orphan sweeper
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let sweeper_handle = if settings.sweeper.enabled {
        let sweeper = OrphanSweeper::new(services.scheduler.clone(), settings.sweeper.interval());
        Some(tokio::spawn(sweeper.run(shutdown_rx)))
    } else {
        info!("Orphan sweeper disabled");
        None
    };

    // 4. JSON-RPC server
    let rpc_config = RpcServerConfig::from(&settings.rpc);
    let (addr, rpc_handle) = RpcServer::new(rpc_config, services)
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "Scheduler ready");
    info!("Press Ctrl+C to shutdown");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    if let Err(e) = rpc_handle.stop() {
        error!(error = %e, "RPC server stop failed");
    }
    rpc_handle.stopped().await;
    if let Some(handle) = sweeper_handle {
        if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
            warn!("Orphan sweeper did not stop in time");
        }
    }
    telemetry::shutdown();

    info!("Shutdown complete.");
    Ok(())
}
