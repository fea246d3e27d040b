//! Router collaborator interface.
//!
//! A router owns tool discovery and dispatch for exactly one session. The
//! transport layer never looks inside `params` or `result`; it hands each
//! inbound message to the session's router and writes whatever comes back
//! through the same binding.

pub mod registry;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::jsonrpc::JsonRpcMessage;
use crate::session::SessionPeer;
use crate::Result;

pub use registry::{RegistryRouter, RegistryRouterFactory};

/// Per-session message handler.
pub trait Router: Send + Sync {
    /// Handle one inbound message.
    ///
    /// Returns `Some(reply)` for requests and `None` for notifications and
    /// client responses.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Router`](crate::AppError::Router) if the message
    /// could not be handled at all. Protocol-level failures (unknown method,
    /// bad params) are returned as JSON-RPC error replies instead.
    fn handle(
        &self,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>>;

    /// Release everything the router holds for its session.
    ///
    /// Called at most once per session, after the session has been removed
    /// from the session table.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Router`](crate::AppError::Router) if teardown fails.
    /// Callers log and otherwise ignore the failure.
    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Builds one [`Router`] per session.
///
/// `peer` is the router's handle for pushing server-initiated messages to
/// its client; binding the router to it starts the router's lifetime.
pub trait RouterFactory: Send + Sync {
    /// Create and start a router bound to `peer`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Router`](crate::AppError::Router) if the router
    /// cannot be started.
    fn create(
        &self,
        peer: SessionPeer,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Router>>> + Send + '_>>;
}
