//! Streamable HTTP binding: one endpoint, session selected by header.
//!
//! | Verb     | Session header | Behaviour                                   |
//! |----------|----------------|---------------------------------------------|
//! | `POST`   | live id        | resume: route to the session's router       |
//! | `POST`   | absent         | `initialize` creates a session, else 400    |
//! | `POST`   | unknown id     | 400, unknown or expired session             |
//! | `GET`    | live id        | attach the server → client SSE stream       |
//! | `DELETE` | live id        | terminate the session                       |
//!
//! `GET` and `DELETE` reject a missing header exactly like an unknown id.
//! Every rejection uses the JSON-RPC error envelope with `id: null`.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::http::{self, ServeOptions};
use super::push::event_stream;
use super::TransportBinding;
use crate::jsonrpc::{
    parse_message, JsonRpcError, JsonRpcMessage, INTERNAL_ERROR, SESSION_ERROR,
};
use crate::session::{Resolution, Session, SessionRouter, TransportKind};
use crate::{AppError, Result};

/// Header carrying the session id in both directions.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Message for requests without a session that are not `initialize`.
pub const NO_SESSION_MESSAGE: &str = "Bad Request: No valid session ID provided";
/// Message for requests naming an unknown or expired session.
pub const UNKNOWN_SESSION_MESSAGE: &str = "Bad Request: Unknown or expired session ID";

/// The streamable HTTP binding.
pub struct StreamableBinding {
    sessions: Arc<SessionRouter>,
}

impl StreamableBinding {
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

    /// Create a session for an `initialize` request and answer it.
    async fn initialize(&self, message: JsonRpcMessage) -> Response {
        let session = match self.open().await {
            Ok(session) => session,
            Err(AppError::ShuttingDown) => {
                debug!("refusing new session during shutdown");
                return envelope(
                    StatusCode::SERVICE_UNAVAILABLE,
                    JsonRpcError::new(SESSION_ERROR, "Service Unavailable: server is shutting down"),
                );
            }
            Err(err) => {
                error!(%err, "failed to create session");
                return internal_error();
            }
        };

        let Ok(header) = HeaderValue::from_str(session.id()) else {
            error!(session_id = %session.id(), "session id is not a valid header value");
            self.discard(&session).await;
            return internal_error();
        };

        match self.deliver(Arc::clone(&session), message).await {
            Ok(reply) => {
                let mut response = reply_response(reply);
                response.headers_mut().insert(SESSION_HEADER, header);
                response
            }
            Err(err) => {
                error!(session_id = %session.id(), %err, "initialize failed; discarding session");
                self.discard(&session).await;
                internal_error()
            }
        }
    }

    async fn discard(&self, session: &Session) {
        if let Err(err) = self.close(session.id()).await {
            warn!(session_id = %session.id(), %err, "error closing discarded session");
        }
    }

    /// Route a message to an existing session and answer with its reply.
    async fn resume(&self, session: Arc<Session>, message: JsonRpcMessage) -> Response {
        let session_id = session.id().to_owned();
        match self.deliver(session, message).await {
            Ok(reply) => reply_response(reply),
            Err(err @ AppError::SessionNotFound(_)) => reject(&err),
            Err(err) => {
                error!(%session_id, %err, "error handling MCP request");
                internal_error()
            }
        }
    }
}

impl TransportBinding for StreamableBinding {
    fn kind(&self) -> TransportKind {
        TransportKind::Streamable
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send + '_>> {
        Box::pin(self.sessions.open(TransportKind::Streamable))
    }

    fn deliver(
        &self,
        session: Arc<Session>,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>> {
        Box::pin(async move { self.sessions.dispatch(&session, message).await })
    }

    fn close<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move { self.sessions.terminate(session_id).await.map(|_| ()) })
    }
}

/// Build the axum router for the streamable binding.
pub fn router(binding: Arc<StreamableBinding>) -> axum::Router {
    axum::Router::new()
        .route(
            "/mcp",
            post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route("/health", get(http::health))
        .with_state(binding)
}

/// Serve the streamable binding on `addr` until `ct` fires.
///
/// # Errors
///
/// Returns `AppError::Config` if the address cannot be bound and
/// `AppError::Transport` if the server fails.
pub async fn serve_streamable(
    sessions: Arc<SessionRouter>,
    addr: SocketAddr,
    options: ServeOptions,
    ct: CancellationToken,
) -> Result<()> {
    let listener = http::bind(addr).await?;
    info!(%addr, "MCP streamable HTTP server listening");
    let app = router(Arc::new(StreamableBinding::new(Arc::clone(&sessions))));
    http::serve_listener(listener, app, sessions, options, ct).await?;
    info!("MCP streamable HTTP server shut down");
    Ok(())
}

/// `POST /mcp`: create, resume or reject.
async fn handle_post(
    State(binding): State<Arc<StreamableBinding>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match parse_message(&body) {
        Ok(message) => message,
        Err(err) => {
            warn!(code = err.code, "rejecting malformed MCP request");
            return envelope(StatusCode::BAD_REQUEST, err);
        }
    };

    match binding.sessions.resolve(session_header(&headers), &message) {
        Resolution::Resume(session) => binding.resume(session, message).await,
        Resolution::Create => binding.initialize(message).await,
        Resolution::Reject(err) => {
            debug!(%err, "rejecting MCP request");
            reject(&err)
        }
    }
}

/// `GET /mcp`: attach the server-initiated message stream.
async fn handle_get(State(binding): State<Arc<StreamableBinding>>, headers: HeaderMap) -> Response {
    let Ok(session) = binding.sessions.lookup(session_header(&headers)) else {
        return unknown_session();
    };

    let Some(outbound) = session.attach_stream() else {
        return envelope(
            StatusCode::CONFLICT,
            JsonRpcError::new(
                SESSION_ERROR,
                "Conflict: Only one SSE stream is allowed per session",
            ),
        );
    };

    debug!(session_id = %session.id(), "server stream attached");
    let stream = event_stream(None, outbound, session.closed_token(), None);
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Ok(header) = HeaderValue::from_str(session.id()) {
        response.headers_mut().insert(SESSION_HEADER, header);
    }
    response
}

/// `DELETE /mcp`: terminate a session.
async fn handle_delete(
    State(binding): State<Arc<StreamableBinding>>,
    headers: HeaderMap,
) -> Response {
    let Ok(session) = binding.sessions.lookup(session_header(&headers)) else {
        return unknown_session();
    };

    match binding.close(session.id()).await {
        Ok(()) => {
            info!(session_id = %session.id(), "session terminated by client");
            StatusCode::OK.into_response()
        }
        Err(err) => {
            error!(session_id = %session.id(), %err, "error processing session termination");
            internal_error()
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn reply_response(reply: Option<JsonRpcMessage>) -> Response {
    match reply {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

fn envelope(status: StatusCode, error: JsonRpcError) -> Response {
    (status, Json(JsonRpcMessage::error(None, error))).into_response()
}

fn internal_error() -> Response {
    envelope(
        StatusCode::INTERNAL_SERVER_ERROR,
        JsonRpcError::new(INTERNAL_ERROR, "Internal server error"),
    )
}

/// Map a resolution failure onto its client-visible rejection.
fn reject(err: &AppError) -> Response {
    match err {
        AppError::SessionRequired | AppError::MissingSessionId => envelope(
            StatusCode::BAD_REQUEST,
            JsonRpcError::new(SESSION_ERROR, NO_SESSION_MESSAGE),
        ),
        AppError::SessionNotFound(_) => unknown_session(),
        _ => internal_error(),
    }
}

fn unknown_session() -> Response {
    envelope(
        StatusCode::BAD_REQUEST,
        JsonRpcError::new(SESSION_ERROR, UNKNOWN_SESSION_MESSAGE),
    )
}
