//! Optional idle-session eviction.
//!
//! Runs as a background task terminating sessions whose last inbound
//! message is older than the configured idle timeout. Disabled unless
//! `sessionIdleTimeoutSeconds` is set.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::SessionRouter;

const MIN_TICK: Duration = Duration::from_secs(1);

/// Spawn the idle reaper.
///
/// The task ticks at half the idle timeout and stops when `cancel` fires.
#[must_use]
pub fn spawn_idle_reaper(
    sessions: Arc<SessionRouter>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval((idle_timeout / 2).max(MIN_TICK));
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("idle reaper shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let evicted = evict_idle(&sessions, idle_timeout).await;
                    if evicted > 0 {
                        info!(evicted, "idle sessions evicted");
                    }
                }
            }
        }
    })
}

/// Terminate every session idle for longer than `idle_timeout`.
///
/// Returns the number of sessions this call terminated.
pub async fn evict_idle(sessions: &SessionRouter, idle_timeout: Duration) -> usize {
    let Ok(timeout) = chrono::Duration::from_std(idle_timeout) else {
        return 0;
    };
    let cutoff = Utc::now() - timeout;

    let mut evicted = 0;
    for id in sessions.table().idle_since(cutoff) {
        match sessions.terminate(&id).await {
            Ok(true) => evicted += 1,
            Ok(false) => {}
            Err(err) => {
                evicted += 1;
                warn!(session_id = %id, %err, "idle session closed with error");
            }
        }
    }
    evicted
}
