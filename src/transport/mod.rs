//! Transport bindings carrying MCP messages.
//!
//! All three bindings implement [`TransportBinding`]: open a session,
//! deliver an inbound message to it, close it. They differ only in wire
//! framing and in where replies are written.

pub mod codec;
pub mod http;
pub mod push;
pub mod sse;
pub mod stdio;
pub mod streamable;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::jsonrpc::JsonRpcMessage;
use crate::session::{Session, TransportKind};
use crate::Result;

pub use sse::SseBinding;
pub use stdio::StdioBinding;
pub use streamable::StreamableBinding;

/// Capability set shared by every wire binding.
pub trait TransportBinding: Send + Sync {
    /// Which binding this is.
    fn kind(&self) -> TransportKind;

    /// Open a new session with a freshly started router.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot be started or the session
    /// cannot be registered.
    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send + '_>>;

    /// Deliver an inbound message to `session`.
    ///
    /// Returns the reply when this binding answers synchronously, `None`
    /// when the reply (if any) travels over the push stream instead.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is gone or its router fails.
    fn deliver(
        &self,
        session: Arc<Session>,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>>;

    /// Close the session named `session_id`. Closing twice is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the router's close error.
    fn close<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}
