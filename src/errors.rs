//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// JSON encoding or decoding failure.
    Json(String),
    /// Underlying stream or connection failure while sending or receiving.
    Transport(String),
    /// The session's router failed while handling a message.
    Router(String),
    /// A session with this id is already registered.
    DuplicateSession(String),
    /// No live session is registered under this id.
    SessionNotFound(String),
    /// The caller did not supply a session id at all.
    MissingSessionId,
    /// A session is required but the message was not an `initialize` request.
    SessionRequired,
    /// The server is shutting down and accepts no new sessions.
    ShuttingDown,
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Json(msg) => write!(f, "json: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Router(msg) => write!(f, "router: {msg}"),
            Self::DuplicateSession(id) => write!(f, "duplicate session: {id}"),
            Self::SessionNotFound(id) => write!(f, "session not found: {id}"),
            Self::MissingSessionId => write!(f, "missing session id"),
            Self::SessionRequired => write!(f, "session required: first message must be initialize"),
            Self::ShuttingDown => write!(f, "shutting down: no new sessions accepted"),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Whether this error originated from the transport itself.
    ///
    /// Transport failures are treated as an implicit close of the session;
    /// every other failure leaves the session open.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Io(_))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}
