#![forbid(unsafe_code)]

//! `script-runtime`: JSON-RPC script runtime binary.
//!
//! Loads configuration, then serves requests from stdin and writes responses
//! to stdout until stdin closes or a shutdown signal arrives. Logs go to
//! stderr.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use script_runtime::dispatcher::Dispatcher;
use script_runtime::remote::HttpRemoteClient;
use script_runtime::script::DirectiveEngine;
use script_runtime::{AppError, Result, RuntimeConfig};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "script-runtime", about = "JSON-RPC script runtime over stdio", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Inventory service URL used until a request supplies its own.
    #[arg(long)]
    server_url: Option<String>,

    /// Default execution timeout in seconds (0 disables it).
    #[arg(long)]
    timeout: Option<u64>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("script-runtime bootstrap");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;

    let result = runtime.block_on(run(args));

    // The stdin reader may still be parked in a blocking read.
    runtime.shutdown_timeout(Duration::from_millis(100));
    result
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = load_config(&args)?;
    info!(
        server_url = %config.server_url,
        default_timeout_seconds = config.default_timeout_seconds,
        "configuration loaded"
    );

    // ── Wire collaborators ──────────────────────────────
    let remote = HttpRemoteClient::new(config.remote_timeout())?;
    let mut dispatcher = Dispatcher::new(&config, Arc::new(DirectiveEngine::new()), Arc::new(remote));

    // ── Shutdown coordination ───────────────────────────
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_token.cancel();
    });

    // ── Serve stdio ─────────────────────────────────────
    let result = dispatcher
        .serve(tokio::io::stdin(), tokio::io::stdout(), shutdown)
        .await;

    match &result {
        Ok(()) => info!("script-runtime stopped"),
        Err(err) => error!(%err, "script-runtime stopped with error"),
    }
    result
}

/// Defaults, then the file, then the environment, then CLI flags.
fn load_config(args: &Cli) -> Result<RuntimeConfig> {
    let mut config = match &args.config {
        Some(path) => RuntimeConfig::load_from_path(path)?,
        None => RuntimeConfig::default(),
    };
    config.apply_env_overrides()?;

    if let Some(url) = &args.server_url {
        config.server_url.clone_from(url);
    }
    if let Some(timeout) = args.timeout {
        config.default_timeout_seconds = timeout;
    }

    config.validate()?;
    Ok(config)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
