//! HTTP server plumbing shared by the SSE and streamable bindings.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::session::reaper::spawn_idle_reaper;
use crate::session::SessionRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::{AppError, Result};

/// Handler for `GET /health`: returns 200 OK with a plain-text body.
///
/// Useful for probing liveness without opening a session.
pub async fn health() -> &'static str {
    "ok"
}

/// Lifecycle options for an HTTP binding.
#[derive(Debug, Clone, Copy)]
pub struct ServeOptions {
    /// Upper bound on the shutdown sweep.
    pub shutdown_grace: Duration,
    /// Idle eviction threshold, if enabled.
    pub idle_timeout: Option<Duration>,
}

/// Bind a TCP listener on `addr`.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Config(format!("failed to bind {addr}: {err}")))
}

/// Serve `app` on `listener` until `ct` fires, then sweep every session.
///
/// New sessions are refused once `ct` fires. The sweep runs before the
/// server waits for open connections, so push streams end and graceful
/// shutdown can complete. Connections still busy one grace period after the
/// sweep are abandoned.
///
/// # Errors
///
/// Returns `AppError::Transport` if the server fails.
pub async fn serve_listener(
    listener: TcpListener,
    app: axum::Router,
    sessions: Arc<SessionRouter>,
    options: ServeOptions,
    ct: CancellationToken,
) -> Result<()> {
    let reaper = options
        .idle_timeout
        .map(|timeout| spawn_idle_reaper(Arc::clone(&sessions), timeout, ct.clone()));

    let coordinator = ShutdownCoordinator::new(Arc::clone(sessions.table()), options.shutdown_grace);
    let swept = CancellationToken::new();
    let shutdown = {
        let ct = ct.clone();
        let swept = swept.clone();
        async move {
            ct.cancelled().await;
            info!("shutting down server");
            sessions.begin_shutdown();
            let report = coordinator.sweep().await;
            info!(
                closed = report.closed,
                failed = report.failed,
                timed_out = report.timed_out,
                "server shutdown complete"
            );
            swept.cancel();
        }
    };

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .into_future();
    let drain_deadline = async {
        swept.cancelled().await;
        tokio::time::sleep(options.shutdown_grace).await;
    };

    tokio::select! {
        result = server => {
            result.map_err(|err| AppError::Transport(format!("http server error: {err}")))?;
        }
        () = drain_deadline => {
            warn!(
                grace_ms = u64::try_from(options.shutdown_grace.as_millis()).unwrap_or(u64::MAX),
                "connections still open after grace period; abandoning them"
            );
        }
    }

    if let Some(reaper) = reaper {
        let _ = reaper.await;
    }
    Ok(())
}
