#![forbid(unsafe_code)]

//! `nacos-mcp-router`: MCP router server binary.
//!
//! Loads configuration, then serves one transport binding (stdio, SSE or
//! streamable HTTP) until input ends or a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use nacos_mcp_router::config::GlobalConfig;
use nacos_mcp_router::mode::ServerMode;
use nacos_mcp_router::router::{RegistryRouterFactory, RouterFactory};
use nacos_mcp_router::session::{SessionRouter, SessionTable};
use nacos_mcp_router::transport::http::ServeOptions;
use nacos_mcp_router::transport::{sse, stdio, streamable};
use nacos_mcp_router::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "nacos-mcp-router", about = "MCP router server", version, long_about = None)]
struct Cli {
    /// Path to a JSON or TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport binding to serve; overrides the configured mode.
    #[arg(long, value_enum)]
    mode: Option<ServerMode>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let mut config = GlobalConfig::load(args.config.as_deref())?;
    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    init_tracing(args.log_format, &config.log_level)?;
    info!(mode = %config.mode, "nacos-mcp-router bootstrap");

    let grace = config.shutdown_grace();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    let result = runtime.block_on(run(config));
    // The stdin reader runs on a blocking thread that never sees EOF on its own.
    runtime.shutdown_timeout(grace + Duration::from_secs(1));
    result
}

async fn run(config: GlobalConfig) -> Result<()> {
    let factory: Arc<dyn RouterFactory> =
        Arc::new(RegistryRouterFactory::new(config.router_config()));

    let ct = CancellationToken::new();
    let signal_ct = ct.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_ct.cancel();
    });

    let options = ServeOptions {
        shutdown_grace: config.shutdown_grace(),
        idle_timeout: config.session_idle_timeout(),
    };

    match config.mode {
        ServerMode::Stdio => stdio::serve_stdio(factory, ct.clone()).await?,
        ServerMode::Sse => {
            let sessions = Arc::new(SessionRouter::new(Arc::new(SessionTable::new()), factory));
            sse::serve_sse(sessions, config.sse_addr(), options, ct.clone()).await?;
        }
        ServerMode::Streamable => {
            let sessions = Arc::new(SessionRouter::new(Arc::new(SessionTable::new()), factory));
            streamable::serve_streamable(sessions, config.streamable_addr(), options, ct.clone())
                .await?;
        }
    }

    ct.cancel();
    info!("nacos-mcp-router shut down");
    Ok(())
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
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
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

/// Logs go to stderr; stdout carries the stdio binding's protocol stream.
fn init_tracing(log_format: LogFormat, default_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
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
