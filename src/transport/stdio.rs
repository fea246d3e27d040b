//! Stdio binding: one session for the lifetime of the process.
//!
//! Messages are newline-delimited JSON on the process's standard streams.
//! The single session is never registered in the session table; it is
//! created when serving starts and closed when input ends or the server
//! shuts down.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::codec::NdjsonCodec;
use super::TransportBinding;
use crate::jsonrpc::{parse_message, JsonRpcError, JsonRpcMessage, INTERNAL_ERROR, PARSE_ERROR};
use crate::router::RouterFactory;
use crate::session::{Session, TransportKind};
use crate::{AppError, Result};

/// Id of the process-wide stdio session.
pub const STDIO_SESSION_ID: &str = "stdio";

/// The stdio binding. Holds at most one session.
pub struct StdioBinding {
    factory: Arc<dyn RouterFactory>,
    session: Mutex<Option<Arc<Session>>>,
}

impl StdioBinding {
    /// Create a binding that starts its router through `factory`.
    #[must_use]
    pub fn new(factory: Arc<dyn RouterFactory>) -> Self {
        Self {
            factory,
            session: Mutex::new(None),
        }
    }

    /// The live session, if one is open.
    #[must_use]
    pub fn session(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serve messages from `input`, writing replies and pushed messages to
    /// `output`, until input ends or `ct` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the router cannot be started or either stream
    /// fails. The session is closed in every case.
    pub async fn serve<R, W>(&self, input: R, mut output: W, ct: CancellationToken) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let session = self.open().await?;
        info!(session_id = %session.id(), "stdio session opened");

        let result = match session.attach_stream() {
            Some(mut outbound) => {
                let mut reader = FramedRead::new(input, NdjsonCodec::new());
                // FramedRead yields one `None` after a decode error before it
                // resumes reading; that `None` is not end of input.
                let mut recovering = false;
                loop {
                    tokio::select! {
                        biased;
                        () = ct.cancelled() => {
                            debug!("stdio transport cancelled");
                            break Ok(());
                        }
                        Some(message) = outbound.recv() => {
                            if let Err(err) = write_message(&mut output, &message).await {
                                break Err(err);
                            }
                        }
                        frame = reader.next() => {
                            let outcome = match frame {
                                None if recovering => {
                                    recovering = false;
                                    continue;
                                }
                                None => {
                                    info!("stdin closed");
                                    break Ok(());
                                }
                                Some(Ok(line)) => self.handle_line(&session, &line).await,
                                Some(Err(AppError::Transport(detail))) => {
                                    warn!(%detail, "discarding oversized line");
                                    recovering = true;
                                    Ok(Some(JsonRpcMessage::error(
                                        None,
                                        JsonRpcError::new(PARSE_ERROR, "Parse error: line too long"),
                                    )))
                                }
                                Some(Err(err)) => break Err(err),
                            };
                            let written = match outcome {
                                Ok(Some(reply)) => write_message(&mut output, &reply).await,
                                Ok(None) => Ok(()),
                                Err(err) => Err(err),
                            };
                            if let Err(err) = written {
                                break Err(err);
                            }
                        }
                    }
                }
            }
            None => Err(AppError::Transport(
                "stdio session stream already attached".into(),
            )),
        };

        if let Err(err) = self.close(session.id()).await {
            warn!(%err, "error closing stdio session");
        }
        info!("stdio transport shut down");
        result
    }

    /// Decode and route one input line, producing the reply to write.
    ///
    /// Transport failures are returned as errors and end the session.
    async fn handle_line(&self, session: &Arc<Session>, line: &str) -> Result<Option<JsonRpcMessage>> {
        if line.trim().is_empty() {
            return Ok(None);
        }

        let message = match parse_message(line.as_bytes()) {
            Ok(message) => message,
            Err(err) => {
                warn!(code = err.code, "rejecting malformed stdio message");
                return Ok(Some(JsonRpcMessage::error(None, err)));
            }
        };

        let request_id = message.id().cloned().filter(|_| message.expects_reply());
        match self.deliver(Arc::clone(session), message).await {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_transport() => Err(err),
            Err(err) => {
                error!(%err, "error handling stdio message");
                Ok(request_id.map(|id| {
                    JsonRpcMessage::error(
                        Some(id),
                        JsonRpcError::new(INTERNAL_ERROR, "Internal server error"),
                    )
                }))
            }
        }
    }
}

impl TransportBinding for StdioBinding {
    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn open(&self) -> Pin<Box<dyn Future<Output = Result<Arc<Session>>> + Send + '_>> {
        Box::pin(async move {
            if self.session().is_some() {
                return Err(AppError::DuplicateSession(STDIO_SESSION_ID.to_owned()));
            }
            let session = Session::start(
                STDIO_SESSION_ID.to_owned(),
                TransportKind::Stdio,
                self.factory.as_ref(),
            )
            .await?;

            let installed = {
                let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_some() {
                    false
                } else {
                    *slot = Some(Arc::clone(&session));
                    true
                }
            };
            if !installed {
                if let Err(err) = session.close().await {
                    warn!(session_id = %session.id(), %err, "error closing duplicate stdio session");
                }
                return Err(AppError::DuplicateSession(STDIO_SESSION_ID.to_owned()));
            }
            Ok(session)
        })
    }

    fn deliver(
        &self,
        session: Arc<Session>,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>> {
        Box::pin(async move { session.handle(message).await })
    }

    fn close<'a>(
        &'a self,
        session_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let taken = {
                let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
                match slot.as_ref() {
                    Some(session) if session.id() == session_id => slot.take(),
                    _ => None,
                }
            };
            match taken {
                Some(session) => session.close().await,
                None => Ok(()),
            }
        })
    }
}

/// Serve the stdio binding on the process's stdin and stdout.
///
/// # Errors
///
/// See [`StdioBinding::serve`].
pub async fn serve_stdio(factory: Arc<dyn RouterFactory>, ct: CancellationToken) -> Result<()> {
    info!("starting stdio MCP transport");
    StdioBinding::new(factory)
        .serve(tokio::io::stdin(), tokio::io::stdout(), ct)
        .await
}

async fn write_message<W>(output: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    output
        .write_all(&line)
        .await
        .map_err(|err| AppError::Transport(format!("stdout write failed: {err}")))?;
    output
        .flush()
        .await
        .map_err(|err| AppError::Transport(format!("stdout flush failed: {err}")))
}
