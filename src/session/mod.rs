//! Live client sessions and the bookkeeping around them.
//!
//! A [`Session`] binds one client conversation to one [`Router`] and one
//! outbound push channel. Sessions are registered in a [`SessionTable`] by
//! the HTTP bindings and resolved per request by the [`SessionRouter`].

pub mod reaper;
pub mod router;
pub mod table;

use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::jsonrpc::JsonRpcMessage;
use crate::router::{Router, RouterFactory};
use crate::{AppError, Result};

pub use router::{Resolution, SessionRouter};
pub use table::SessionTable;

/// Capacity of each session's outbound push queue.
pub const OUTBOUND_CAPACITY: usize = 256;

/// Receiving half of a session's push channel, held by whoever streams it.
pub type OutboundStream = OwnedMutexGuard<mpsc::Receiver<JsonRpcMessage>>;

/// Wire binding a session was opened on.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Process standard streams.
    Stdio,
    /// Legacy HTTP + Server-Sent-Events.
    Sse,
    /// Streamable HTTP.
    Streamable,
}

impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Sse => f.write_str("sse"),
            Self::Streamable => f.write_str("streamable"),
        }
    }
}

/// Generate a fresh session id.
///
/// 122 random bits from the OS generator, rendered as 32 hex characters.
#[must_use]
pub fn new_session_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A router's handle for pushing server-initiated messages to its client.
#[derive(Clone)]
pub struct SessionPeer {
    session_id: Arc<str>,
    tx: mpsc::Sender<JsonRpcMessage>,
    closed: CancellationToken,
}

impl SessionPeer {
    /// Id of the session this peer belongs to.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Queue `message` for delivery on the session's push stream.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Transport` if the session is closed or its
    /// outbound queue is full.
    pub fn send(&self, message: JsonRpcMessage) -> Result<()> {
        if self.is_closed() {
            return Err(AppError::Transport(format!(
                "session {} is closed",
                self.session_id
            )));
        }
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => {
                AppError::Transport(format!("outbound queue full for session {}", self.session_id))
            }
            TrySendError::Closed(_) => AppError::Transport(format!(
                "outbound channel closed for session {}",
                self.session_id
            )),
        })
    }
}

impl Debug for SessionPeer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPeer")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// One logical client conversation.
pub struct Session {
    id: String,
    kind: TransportKind,
    router: Arc<dyn Router>,
    peer: SessionPeer,
    outbound: Arc<tokio::sync::Mutex<mpsc::Receiver<JsonRpcMessage>>>,
    closed: CancellationToken,
    close_started: AtomicBool,
    created_at: DateTime<Utc>,
    last_activity: Mutex<DateTime<Utc>>,
}

impl Session {
    /// Build a session and start a router for it through `factory`.
    ///
    /// The session is not registered anywhere; callers decide whether it
    /// goes into a [`SessionTable`].
    ///
    /// # Errors
    ///
    /// Propagates the factory's error if the router cannot be started.
    pub async fn start(
        id: String,
        kind: TransportKind,
        factory: &dyn RouterFactory,
    ) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let closed = CancellationToken::new();
        let peer = SessionPeer {
            session_id: Arc::from(id.as_str()),
            tx,
            closed: closed.clone(),
        };
        let router = factory.create(peer.clone()).await?;
        let now = Utc::now();

        Ok(Arc::new(Self {
            id,
            kind,
            router,
            peer,
            outbound: Arc::new(tokio::sync::Mutex::new(rx)),
            closed,
            close_started: AtomicBool::new(false),
            created_at: now,
            last_activity: Mutex::new(now),
        }))
    }

    /// Session id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Binding this session was opened on.
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// The router bound to this session.
    #[must_use]
    pub fn router(&self) -> &Arc<dyn Router> {
        &self.router
    }

    /// When the session was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the session last delivered an inbound message.
    #[must_use]
    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Utc::now();
    }

    /// Hand `message` to the bound router.
    ///
    /// # Errors
    ///
    /// Returns `AppError::SessionNotFound` if the session has already been
    /// closed, otherwise whatever the router returns.
    pub async fn handle(&self, message: JsonRpcMessage) -> Result<Option<JsonRpcMessage>> {
        if self.is_closed() {
            return Err(AppError::SessionNotFound(self.id.clone()));
        }
        self.touch();
        self.router.handle(message).await
    }

    /// Queue a message on this session's push stream.
    ///
    /// # Errors
    ///
    /// See [`SessionPeer::send`].
    pub fn push(&self, message: JsonRpcMessage) -> Result<()> {
        self.peer.send(message)
    }

    /// Take exclusive hold of the push stream.
    ///
    /// Returns `None` while another stream is attached. Dropping the guard
    /// detaches the stream and lets the next caller attach.
    #[must_use]
    pub fn attach_stream(&self) -> Option<OutboundStream> {
        Arc::clone(&self.outbound).try_lock_owned().ok()
    }

    /// Whether the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Completion signal fired when the session closes.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Close the session: end its push stream and close its router.
    ///
    /// Idempotent: only the first call reaches the router.
    ///
    /// # Errors
    ///
    /// Returns the router's close error from the first call.
    pub async fn close(&self) -> Result<()> {
        if self.close_started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.closed.cancel();
        self.router.close().await
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("created_at", &self.created_at)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
