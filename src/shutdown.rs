//! Orderly teardown of every live session on process termination.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::session::SessionTable;

/// Outcome of one shutdown sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Sessions present when the sweep started.
    pub total: usize,
    /// Sessions whose close completed successfully.
    pub closed: usize,
    /// Sessions whose close returned an error.
    pub failed: usize,
    /// Whether the grace period elapsed before every close finished.
    pub timed_out: bool,
}

impl ShutdownReport {
    /// Sessions still closing when the grace period elapsed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.closed + self.failed)
    }
}

/// Closes all sessions in a table within a bounded grace period.
#[derive(Debug, Clone)]
pub struct ShutdownCoordinator {
    table: Arc<SessionTable>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator sweeping `table` within `grace`.
    #[must_use]
    pub fn new(table: Arc<SessionTable>, grace: Duration) -> Self {
        Self { table, grace }
    }

    /// Remove and close every session present when the sweep starts.
    ///
    /// Sessions close concurrently; a failing or stuck session never holds
    /// back the others. Failures are logged and counted, never returned.
    pub async fn sweep(&self) -> ShutdownReport {
        let sessions = self.table.snapshot();
        let total = sessions.len();
        if total == 0 {
            info!("no live sessions to close");
            return ShutdownReport::default();
        }

        info!(sessions = total, "closing live sessions");
        let closed = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        let closes = sessions.into_iter().map(|session| {
            let (closed, failed) = (&closed, &failed);
            async move {
                self.table.remove(session.id());
                info!(session_id = %session.id(), "closing session");
                match session.close().await {
                    Ok(()) => {
                        closed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        failed.fetch_add(1, Ordering::Relaxed);
                        error!(session_id = %session.id(), %err, "error closing session");
                    }
                }
            }
        });

        let timed_out = tokio::time::timeout(self.grace, join_all(closes))
            .await
            .is_err();

        let report = ShutdownReport {
            total,
            closed: closed.load(Ordering::Relaxed),
            failed: failed.load(Ordering::Relaxed),
            timed_out,
        };

        if timed_out {
            warn!(
                grace_ms = u64::try_from(self.grace.as_millis()).unwrap_or(u64::MAX),
                pending = report.pending(),
                "shutdown grace period elapsed with sessions still closing"
            );
        }
        info!(
            closed = report.closed,
            failed = report.failed,
            "session sweep complete"
        );
        report
    }
}
