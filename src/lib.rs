#![forbid(unsafe_code)]

//! `nacos-mcp-router`: MCP session transport layer.
//!
//! Serves the Model Context Protocol over stdio, legacy HTTP/SSE or
//! streamable HTTP, giving every client session its own router instance.

pub mod config;
pub mod errors;
pub mod jsonrpc;
pub mod mode;
pub mod router;
pub mod session;
pub mod shutdown;
pub mod transport;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
