//! Session resolution: create, resume or reject per inbound request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{new_session_id, Session, SessionTable, TransportKind};
use crate::jsonrpc::JsonRpcMessage;
use crate::router::RouterFactory;
use crate::{AppError, Result};

/// Outcome of resolving a request against the session table.
#[derive(Debug)]
pub enum Resolution {
    /// The request names a live session.
    Resume(Arc<Session>),
    /// The request carries no session id and is an `initialize` request.
    Create,
    /// The request cannot be routed.
    ///
    /// Carries `AppError::SessionRequired` when no id was given and the
    /// message is not `initialize`, `AppError::SessionNotFound` when the id
    /// is unknown.
    Reject(AppError),
}

/// Resolves inbound requests to sessions and owns the teardown path.
pub struct SessionRouter {
    table: Arc<SessionTable>,
    factory: Arc<dyn RouterFactory>,
    shutting_down: AtomicBool,
}

impl SessionRouter {
    /// Create a session router over `table`, starting routers with `factory`.
    #[must_use]
    pub fn new(table: Arc<SessionTable>, factory: Arc<dyn RouterFactory>) -> Self {
        Self {
            table,
            factory,
            shutting_down: AtomicBool::new(false),
        }
    }

    /// The session table this router resolves against.
    #[must_use]
    pub fn table(&self) -> &Arc<SessionTable> {
        &self.table
    }

    /// The factory routers are started with.
    #[must_use]
    pub fn factory(&self) -> &Arc<dyn RouterFactory> {
        &self.factory
    }

    /// Refuse new sessions from now on. Sessions already open are untouched.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    /// Whether [`begin_shutdown`](Self::begin_shutdown) has been called.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Create, register and return a new session with a fresh router.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ShuttingDown` once shutdown has begun, the
    /// factory's error if the router cannot be started, or
    /// `AppError::DuplicateSession` if the generated id collides.
    pub async fn open(&self, kind: TransportKind) -> Result<Arc<Session>> {
        if self.is_shutting_down() {
            return Err(AppError::ShuttingDown);
        }
        let session = Session::start(new_session_id(), kind, self.factory.as_ref()).await?;

        if let Err(err) = self.table.put(Arc::clone(&session)) {
            warn!(session_id = %session.id(), %err, "session id collision; discarding session");
            if let Err(close_err) = session.close().await {
                warn!(session_id = %session.id(), %close_err, "failed to close discarded session");
            }
            return Err(err);
        }

        // A sweep that started while the router was starting missed this entry.
        if self.is_shutting_down() {
            debug!(session_id = %session.id(), "shutdown began during open; discarding session");
            if let Err(err) = self.terminate(session.id()).await {
                warn!(session_id = %session.id(), %err, "failed to close discarded session");
            }
            return Err(AppError::ShuttingDown);
        }

        info!(
            session_id = %session.id(),
            %kind,
            live = self.table.len(),
            "session opened"
        );
        Ok(session)
    }

    /// Look up a live session by a caller-supplied id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::MissingSessionId` for a missing or empty id and
    /// `AppError::SessionNotFound` for an unknown one.
    pub fn lookup(&self, id: Option<&str>) -> Result<Arc<Session>> {
        let id = id
            .filter(|id| !id.is_empty())
            .ok_or(AppError::MissingSessionId)?;
        self.table
            .get(id)
            .ok_or_else(|| AppError::SessionNotFound(id.to_owned()))
    }

    /// Decide how a request carrying `id` and `message` should be routed.
    ///
    /// Pure lookup: never creates or removes a table entry.
    #[must_use]
    pub fn resolve(&self, id: Option<&str>, message: &JsonRpcMessage) -> Resolution {
        match id.filter(|id| !id.is_empty()) {
            Some(id) => match self.table.get(id) {
                Some(session) => Resolution::Resume(session),
                None => Resolution::Reject(AppError::SessionNotFound(id.to_owned())),
            },
            None if message.is_initialize() => Resolution::Create,
            None => Resolution::Reject(AppError::SessionRequired),
        }
    }

    /// Forward `message` to the session's router.
    ///
    /// A transport failure is treated as an implicit close of the session.
    ///
    /// # Errors
    ///
    /// Returns whatever [`Session::handle`] returns.
    pub async fn dispatch(
        &self,
        session: &Session,
        message: JsonRpcMessage,
    ) -> Result<Option<JsonRpcMessage>> {
        let result = session.handle(message).await;
        if let Err(err) = &result {
            if err.is_transport() {
                warn!(session_id = %session.id(), %err, "transport failure; closing session");
                if let Err(close_err) = self.terminate(session.id()).await {
                    warn!(session_id = %session.id(), %close_err, "close after transport failure failed");
                }
            }
        }
        result
    }

    /// Remove `id` from the table, then close it.
    ///
    /// Returns `Ok(false)` when the session was already gone, so repeated
    /// calls are harmless.
    ///
    /// # Errors
    ///
    /// Returns the session's close error. The table entry is removed
    /// regardless.
    pub async fn terminate(&self, id: &str) -> Result<bool> {
        let Some(session) = self.detach(id) else {
            debug!(session_id = %id, "session already terminated");
            return Ok(false);
        };
        session.close().await?;
        Ok(true)
    }

    /// Remove `id` from the table without closing it.
    ///
    /// Used by drop guards that cannot await; the caller owns the close.
    pub fn detach(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.table.remove(id)?;
        info!(
            session_id = %id,
            kind = %session.kind(),
            live = self.table.len(),
            "session removed"
        );
        Some(session)
    }
}
