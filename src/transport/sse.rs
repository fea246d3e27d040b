//! Legacy HTTP/SSE binding: a push stream plus a separate message endpoint.
//!
//! `GET /sse` opens a session and streams it. The first event announces the
//! endpoint (`/messages?sessionId=<id>`) the client posts its JSON-RPC
//! messages to. Replies travel back over the stream, never in the POST
//! response. `GET /mcp` is kept as an alias for older clients.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::http::{self, ServeOptions};
use super::push::{event_stream, TeardownGuard};
use super::TransportBinding;
use crate::jsonrpc::{parse_message, JsonRpcError, JsonRpcMessage, INTERNAL_ERROR};
use crate::session::{Session, SessionRouter, TransportKind};
use crate::{AppError, Result};

/// Path clients post messages to.
pub const MESSAGES_PATH: &str = "/messages";

/// The SSE binding.
pub struct SseBinding {
    sessions: Arc<SessionRouter>,
}

impl SseBinding {
    /// Create a binding registering sessions through `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<SessionRouter>) -> Self {
        Self { sessions }
    }

    /// The session router this binding resolves against.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionRouter> {
        &self.sessions
    }
}

impl TransportBinding for SseBinding {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send + '_>> {
        Box::pin(self.sessions.open(TransportKind::Sse))
    }

    /// Dispatches in the background and acknowledges immediately.
    fn deliver(
        &self,
        session: Arc<Session>,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>> {
        Box::pin(async move {
            if session.is_closed() {
                return Err(AppError::SessionNotFound(session.id().to_owned()));
            }
            let sessions = Arc::clone(&self.sessions);
            tokio::spawn(async move {
                let request_id = message.id().cloned().filter(|_| message.expects_reply());
                let reply = match sessions.dispatch(&session, message).await {
                    Ok(reply) => reply,
                    Err(err) if err.is_transport() => return,
                    Err(err) => {
                        error!(session_id = %session.id(), %err, "error handling message");
                        request_id.map(|id| {
                            JsonRpcMessage::error(
                                Some(id),
                                JsonRpcError::new(INTERNAL_ERROR, "Internal server error"),
                            )
                        })
                    }
                };
                if let Some(reply) = reply {
                    if let Err(err) = session.push(reply) {
                        warn!(session_id = %session.id(), %err, "reply could not be queued");
                    }
                }
            });
            Ok(None)
        })
    }

    fn close<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.sessions.terminate(session_id).await.map(|_| ()) })
    }
}

/// Build the axum router for the SSE binding.
pub fn router(binding: Arc<SseBinding>) -> axum::Router {
    axum::Router::new()
        .route("/sse", get(open_stream))
        .route("/mcp", get(open_stream))
        .route(MESSAGES_PATH, post(post_message))
        .route("/health", get(http::health))
        .with_state(binding)
}

/// Serve the SSE binding on `addr` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound and
/// `AppError::Transport` if the server fails.
pub async fn serve_sse(
    sessions: Arc<SessionRouter>,
    addr: SocketAddr,
    options: ServeOptions,
    ct: CancellationToken,
) -> Result<()> {
    let listener = http::bind(addr).await?;
    info!(%addr, "SSE server listening");
    let app = router(Arc::new(SseBinding::new(Arc::clone(&sessions))));
    http::serve_listener(listener, app, sessions, options, ct).await?;
    info!("SSE server shut down");
    Ok(())
}

/// `GET /sse`: open a session and stream it.
async fn open_stream(State(binding): State<Arc<SseBinding>>) -> Response {
    let session = match binding.open().await {
        Ok(session) => session,
        Err(AppError::ShuttingDown) => {
            debug!("refusing SSE stream during shutdown");
            return (StatusCode::SERVICE_UNAVAILABLE, "Server is shutting down").into_response();
        }
        Err(err) => {
            error!(%err, "error establishing SSE stream");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Error establishing SSE stream")
                .into_response();
        }
    };

    let Some(outbound) = session.attach_stream() else {
        error!(session_id = %session.id(), "fresh session already has a stream attached");
        if let Err(err) = binding.close(session.id()).await {
            warn!(session_id = %session.id(), %err, "error closing unstreamable session");
        }
        return (StatusCode::INTERNAL_SERVER_ERROR, "Error establishing SSE stream")
            .into_response();
    };

    let endpoint = format!("{MESSAGES_PATH}?sessionId={}", session.id());
    let guard = TeardownGuard::new(Arc::clone(&binding.sessions), session.id());
    let stream = event_stream(Some(endpoint), outbound, session.closed_token(), Some(guard));

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

/// `POST /messages?sessionId=<id>`: deliver one message to a session.
async fn post_message(State(binding): State<Arc<SseBinding>>, uri: Uri, body: Bytes) -> Response {
    debug!("received POST request to {MESSAGES_PATH}");

    let session = match binding.sessions.lookup(extract_session_id(&uri).as_deref()) {
        Ok(session) => session,
        Err(AppError::MissingSessionId) => {
            warn!("no session id provided in request URL");
            return (StatusCode::BAD_REQUEST, "Missing sessionId parameter").into_response();
        }
        Err(err) => {
            warn!(%err, "no active session for message");
            return (StatusCode::NOT_FOUND, "Session not found").into_response();
        }
    };

    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!(session_id = %session.id(), code = err.code, "rejecting malformed message");
            return (StatusCode::BAD_REQUEST, "Invalid message").into_response();
        }
    };

    match binding.deliver(session, message).await {
        Ok(_) => (StatusCode::ACCEPTED, "Accepted").into_response(),
        Err(AppError::SessionNotFound(_)) => {
            (StatusCode::NOT_FOUND, "Session not found").into_response()
        }
        Err(err) => {
            error!(%err, "error handling request");
            (StatusCode::INTERNAL_SERVER_ERROR, "Error handling request").into_response()
        }
    }
}

/// Extract `sessionId` from a URI query string.
///
/// Returns `None` when the parameter is absent or empty.
fn extract_session_id(uri: &Uri) -> Option<String> {
    uri.query().and_then(|q| {
        q.split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == "sessionId")
            .map(|(_, v)| v.to_owned())
            .filter(|v| !v.is_empty())
    })
}
