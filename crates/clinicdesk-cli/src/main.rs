//! ClinicDesk - command-line front end for the clinic admin core.
//!
//! Every command works offline: when the API server cannot be reached,
//! calls are served locally and the cache keeps the last synced data.

mod commands;

use std::io;
use std::path::Path;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clinicdesk_core::{AppContext, Config};
use commands::Cli;

/// File name prefix for the rolling log file
const LOG_FILE_PREFIX: &str = "clinicdesk.log";

/// Initialize the tracing subscriber for logging.
///
/// The returned guard flushes the log file and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let loaded = Config::load();
    let mut config = match &loaded {
        Ok(c) => c.clone(),
        Err(_) => Config::default(),
    };
    if let Some(ref dir) = cli.data_dir {
        config.data_dir = Some(dir.clone());
    }

    let log_dir = if cli.log_file { config.data_dir().ok() } else { None };
    let _guard = init_tracing(log_dir.as_deref());
    if let Err(e) = loaded {
        warn!(error = %e, "Failed to load config, using defaults");
    }
    info!(version = env!("CARGO_PKG_VERSION"), "ClinicDesk starting");

    let mut ctx = AppContext::from_config(config)?;
    ctx.start_session().await;

    commands::run(&mut ctx, cli.command, cli.json).await
}
