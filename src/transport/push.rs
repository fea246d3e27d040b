//! Server-Sent-Events push streams shared by the SSE and streamable bindings.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::jsonrpc::JsonRpcMessage;
use crate::session::{OutboundStream, SessionRouter};

/// SSE event name for the endpoint announcement.
pub const ENDPOINT_EVENT: &str = "endpoint";
/// SSE event name for JSON-RPC messages.
pub const MESSAGE_EVENT: &str = "message";

/// Terminates a session when the client side of its push stream goes away.
///
/// Dropping the guard removes the session from the table synchronously and
/// closes it on the current runtime. If the session was already terminated
/// by another path, dropping does nothing.
pub struct TeardownGuard {
    sessions: Arc<SessionRouter>,
    session_id: String,
}

impl TeardownGuard {
    /// Guard the session `session_id` registered in `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<SessionRouter>, session_id: impl Into<String>) -> Self {
        Self {
            sessions,
            session_id: session_id.into(),
        }
    }
}

impl Drop for TeardownGuard {
    fn drop(&mut self) {
        let Some(session) = self.sessions.detach(&self.session_id) else {
            return;
        };
        info!(session_id = %self.session_id, "push stream disconnected; closing session");
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = session.close().await {
                        warn!(session_id = %session.id(), %err, "error closing disconnected session");
                    }
                });
            }
            Err(_) => {
                warn!(session_id = %self.session_id, "no runtime to close disconnected session");
            }
        }
    }
}

/// A push stream that keeps an optional [`TeardownGuard`] alive with it.
pub struct PushStream {
    inner: Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>,
    _guard: Option<TeardownGuard>,
}

impl Stream for PushStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

/// Build the SSE event stream for a session's outbound queue.
///
/// When `endpoint` is given it is sent first as an `endpoint` event. The
/// stream ends when `closed` fires.
#[must_use]
pub fn event_stream(
    endpoint: Option<String>,
    outbound: OutboundStream,
    closed: CancellationToken,
    guard: Option<TeardownGuard>,
) -> PushStream {
    let head = stream::iter(endpoint.map(|path| Event::default().event(ENDPOINT_EVENT).data(path)));

    let messages = stream::unfold(outbound, |mut rx| async move {
        rx.recv().await.map(|message| (message, rx))
    })
    .filter_map(|message| std::future::ready(message_event(&message)));

    let inner = head
        .chain(messages)
        .take_until(closed.cancelled_owned())
        .map(Ok);

    PushStream {
        inner: Box::pin(inner),
        _guard: guard,
    }
}

/// Encode one JSON-RPC message as a `message` event.
#[must_use]
pub fn message_event(message: &JsonRpcMessage) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(data) => Some(Event::default().event(MESSAGE_EVENT).data(data)),
        Err(err) => {
            debug!(%err, "dropping unencodable outbound message");
            None
        }
    }
}
