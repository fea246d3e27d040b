//! Server transport mode: which binding the process serves MCP over.
//!
//! `ServerMode` is both the `--mode` CLI flag value and the `mode` key of the
//! merged configuration.

use std::fmt::{Display, Formatter};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Top-level transport mode for the server.
///
/// Defaults to [`ServerMode::Stdio`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    /// Single implicit session on the process's standard streams. Default mode.
    #[default]
    Stdio,
    /// Legacy two-endpoint HTTP + Server-Sent-Events binding.
    Sse,
    /// Single-endpoint streamable HTTP binding.
    Streamable,
}

impl Display for ServerMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdio => f.write_str("stdio"),
            Self::Sse => f.write_str("sse"),
            Self::Streamable => f.write_str("streamable"),
        }
    }
}
