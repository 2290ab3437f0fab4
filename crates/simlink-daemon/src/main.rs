//! SimLink daemon entry point.
//!
//! Loads the config, binds the hub and steps the simulation until Ctrl-C or
//! the requested number of steps.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use clap::Parser;
use simlink_core::config::{Config, default_config_path};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// SimLink daemon - hosts endpoints for remote controllers
#[derive(Parser, Debug)]
#[command(name = "simlink-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Override the hub listen port
    #[arg(long)]
    port: Option<u16>,

    /// Accept connections on all interfaces, not just localhost
    #[arg(long)]
    bind_all: bool,

    /// Dump all wire traffic at trace level
    #[arg(long)]
    log_traffic: bool,

    /// Stop after this many steps
    #[arg(long, value_name = "N")]
    steps: Option<u64>,
}

/// Set up logging with file output for debugging.
/// In debug builds, defaults to debug level and logs to timestamped file.
/// In release builds, defaults to info level and logs to stderr.
fn setup_logging() {
    let default_level = if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("simlink={default_level}")));

    if cfg!(debug_assertions) {
        let temp_dir = std::env::temp_dir();
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let log_filename = format!("simlink-daemon-{timestamp}.log");
        let log_path = temp_dir.join(&log_filename);

        #[cfg(unix)]
        {
            let symlink_path = temp_dir.join("simlink-daemon.log");
            let _ = std::fs::remove_file(&symlink_path);
            let _ = std::os::unix::fs::symlink(&log_path, &symlink_path);
        }

        let file_appender = tracing_appender::rolling::never(&temp_dir, &log_filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        std::mem::forget(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .with_line_number(true);

        let stderr_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .with_target(true)
            .with_line_number(true);

        tracing_subscriber::registry()
            .with(file_layer)
            .with(stderr_layer)
            .with(filter)
            .init();

        eprintln!("Logging to: {} (and stderr)", log_path.display());
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }
}

/// Flip `flag` on Ctrl-C. The host loop is synchronous, so the signal is
/// awaited on a small runtime of its own.
fn watch_ctrl_c(flag: Arc<AtomicBool>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Cannot listen for Ctrl-C: {e}");
                    return;
                }
                info!("Ctrl-C received, stopping after this step");
                flag.store(true, Ordering::Relaxed);
            });
        })
        .context("failed to spawn signal thread")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    setup_logging();

    let config_path = args
        .config
        .unwrap_or_else(|| default_config_path());
    let mut config = Config::load(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;
    info!("Using config {}", config_path.display());

    if let Some(port) = args.port {
        config.hub.listen_port = port;
    }
    if args.bind_all {
        config.hub.listen_only_on_localhost = false;
    }
    if args.log_traffic {
        config.transport.log_all_communications = true;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    watch_ctrl_c(Arc::clone(&shutdown))?;

    info!("Starting simlink daemon...");
    simlink_daemon::run(&config, args.steps, &shutdown)?;
    info!("Simlink daemon stopped");
    Ok(())
}
