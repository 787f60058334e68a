//! duck-run - Long-running posting daemon
//!
//! Generates posts, publishes them from a rotating set of identities and
//! amplifies each one from every identity, until it is told to stop.

use anyhow::Context;
use clap::Parser;
use libduckcast::logging::LoggingConfig;
use libduckcast::{Config, DuckcastError, Runtime};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "duck-run")]
#[command(version)]
#[command(about = "Long-running daemon that generates, publishes and amplifies posts")]
#[command(long_about = "\
duck-run - Long-running posting daemon

DESCRIPTION:
    duck-run logs every configured identity in, then loops forever:
    generate a post, publish it from the next identity, have every
    identity like and repost it, sleep, and post replies the same way.

    Generation credentials are rotated under a per-key usage cap and
    taken out of rotation after repeated errors. A failed cycle is
    logged and retried after a short delay; it never stops the daemon.

USAGE:
    # Run in foreground (logs to stderr)
    duck-run

    # Use a specific config file
    duck-run --config ./duckcast.toml

    # Enable verbose logging
    duck-run --verbose

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current step)

CONFIGURATION:
    Configuration file: ~/.config/duckcast/config.toml
    (override with --config or DUCKCAST_CONFIG)

    When the file is missing, generation settings are read from
    GOOGLE_API_KEYS, LLM_MODEL, LLM_TEMPERATURE, LLM_MAX_TOKENS,
    MAX_REQUESTS_PER_KEY, LOG_LEVEL and ENVIRONMENT.

    Log output format: DUCKCAST_LOG_FORMAT=text|json|pretty

EXIT CODES:
    0 - Clean shutdown
    1 - Setup failed (configuration, credentials or identity login)
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    #[arg(help = "Enable verbose logging (useful for debugging)")]
    verbose: bool,

    /// Run a single cycle and exit (for testing)
    #[arg(long, hide = true)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("duck-run: {:#}", e);
        std::process::exit(exit_code(&e));
    }
}

fn exit_code(error: &anyhow::Error) -> i32 {
    error
        .downcast_ref::<DuckcastError>()
        .map(DuckcastError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load_or_env(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    // A subscriber may already be installed when embedded; keep going
    let _ = LoggingConfig::from_config(&config, cli.verbose).init();

    info!(environment = %config.environment, "duck-run starting");

    let runtime = Runtime::build(config)
        .await
        .context("Failed to start runtime")?;

    runtime.smoke_test().await;
    let stats = runtime.stats().await;
    match serde_json::to_string(&stats) {
        Ok(json) => info!(stats = %json, "Runtime ready"),
        Err(e) => error!(error = %e, "Failed to serialize runtime stats"),
    }

    setup_signal_handlers(runtime.shutdown_handle()).context("Signal setup failed")?;

    if cli.once {
        runtime.orchestrator().run_once().await?;
        info!("duck-run: ran one cycle, exiting");
    } else {
        runtime.run().await?;
    }

    info!("duck-run stopped");
    Ok(())
}

/// Set the shutdown flag on SIGINT or SIGTERM
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    use futures::stream::StreamExt;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook_tokio::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    tokio::spawn(async move {
        if let Some(signal) = signals.next().await {
            info!(signal, "Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::SeqCst);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> std::io::Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::SeqCst);
        }
    });
    Ok(())
}
