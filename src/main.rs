//! # Drive Logger
//!
//! Logs OBD-II engine data, position and fuel economy once per second to
//! removable storage, one file per drive, and serves the log tree over HTTP.
//!
//! # Threads
//!
//! - **acquisition**: a dedicated OS thread with its own single-threaded
//!   runtime, running the calibration gate and the sampling loop
//! - **main runtime**: the HTTP query service and the logging switch sampler
//!
//! The two sides share only the storage gateway and three `watch` cells
//! (calibration state, logging flag, shutdown).
//!
//! # Examples
//!
//! ```bash
//! drive-logger --config config/default.toml
//! RUST_LOG=drive_logger=debug drive-logger
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use drive_logger::calibration::{CalibrationGate, CalibrationState};
use drive_logger::config::{Config, LoggingConfig, PositionSource};
use drive_logger::control::{self, LoggingFlag};
use drive_logger::obd::ReconnectingObd;
use drive_logger::position::NoReceiver;
use drive_logger::scheduler::{AcquisitionScheduler, SchedulerSettings};
use drive_logger::server::{self, QueryState};
use drive_logger::storage::StorageGateway;

/// File name prefix of the daily diagnostic log
const LOG_FILE_PREFIX: &str = "drive-logger.log";

#[derive(Debug, Parser)]
#[command(name = "drive-logger", version, about)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config/default.toml")]
    config: PathBuf,
}

/// Load `path`, or fall back to built-in defaults when it does not exist
fn load_config(path: &Path) -> Result<(Config, bool)> {
    if path.exists() {
        let config = Config::load(path).with_context(|| format!("loading {}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((Config::from_toml("")?, false))
    }
}

/// Install the fmt subscriber, plus a daily file writer when `dir` is set
///
/// `RUST_LOG` overrides the configured level. The returned guard must live
/// until exit so buffered file output is flushed.
fn init_tracing(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    if config.dir.is_empty() {
        registry.init();
        return Ok(None);
    }

    let appender = tracing_appender::rolling::daily(&config.dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    registry
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
    Ok(Some(guard))
}

/// Start the acquisition thread
fn spawn_acquisition(
    config: &Config,
    gateway: Arc<StorageGateway>,
    logging: watch::Receiver<LoggingFlag>,
    shutdown: watch::Receiver<bool>,
) -> Result<(JoinHandle<()>, watch::Receiver<CalibrationState>)> {
    let (gate, calibration) = CalibrationGate::new(config.acquisition.calibration_poll());
    let obd = config.obd.clone();
    let source = config.position.source;
    let settings = SchedulerSettings::from(config);

    let handle = std::thread::Builder::new()
        .name("acquisition".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!("Failed to start acquisition runtime: {}", e);
                    return;
                }
            };

            runtime.block_on(async move {
                let engine = ReconnectingObd::new(&obd);
                let position = match source {
                    PositionSource::None => NoReceiver,
                };
                AcquisitionScheduler::new(engine, position, gate, gateway, logging, settings)
                    .run(shutdown)
                    .await;
            });
        })
        .context("spawning acquisition thread")?;

    Ok((handle, calibration))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, loaded) = load_config(&cli.config)?;
    let _log_guard = init_tracing(&config.logging)?;

    info!("Drive Logger v{} starting...", env!("CARGO_PKG_VERSION"));
    if !loaded {
        warn!("{} not found, using built-in defaults", cli.config.display());
    }

    let gateway = Arc::new(StorageGateway::new(&config.storage.root, config.storage.lock_timeout()));
    gateway
        .ensure_root()
        .await
        .with_context(|| format!("creating storage root {}", config.storage.root))?;
    info!("Logging to {}", gateway.root().display());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (logging_tx, logging_rx) = watch::channel(LoggingFlag::default());

    let (acquisition, calibration) =
        spawn_acquisition(&config, Arc::clone(&gateway), logging_rx, shutdown_rx.clone())?;

    let mut input = control::from_config(&config.control);
    let poll = config.control.poll_interval();
    let control_shutdown = shutdown_rx.clone();
    let control_task = tokio::spawn(async move {
        control::run_control_loop(input.as_mut(), calibration, logging_tx, poll, control_shutdown).await;
    });

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding query service to {}", addr))?;

    let served = server::serve(listener, QueryState::new(gateway), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down...");
    })
    .await;

    shutdown_tx.send_replace(true);
    if let Err(e) = control_task.await {
        warn!("Control loop ended abnormally: {}", e);
    }
    match tokio::task::spawn_blocking(move || acquisition.join()).await {
        Ok(Ok(())) => info!("Acquisition stopped"),
        _ => warn!("Acquisition thread ended abnormally"),
    }

    served?;
    info!("Shutdown complete");
    Ok(())
}
