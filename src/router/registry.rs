//! Default router backed by the configured service registry.
//!
//! Answers the MCP lifecycle methods itself and advertises the tools known
//! to the registry. Registry discovery lives outside this crate, so the
//! advertised tool list is empty and every tool call is rejected.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rmcp::model::{Implementation, ListToolsResult, ServerCapabilities, ServerInfo};
use serde_json::Value;
use tracing::{debug, info};

use super::{Router, RouterFactory};
use crate::config::RouterConfig;
use crate::jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcRequest, INVALID_PARAMS, METHOD_NOT_FOUND,
};
use crate::session::SessionPeer;
use crate::{AppError, Result};

/// Router answering lifecycle methods for one session.
pub struct RegistryRouter {
    config: RouterConfig,
    peer: SessionPeer,
    initialized: AtomicBool,
}

impl RegistryRouter {
    /// Create a router for the session behind `peer`.
    #[must_use]
    pub fn new(config: RouterConfig, peer: SessionPeer) -> Self {
        Self {
            config,
            peer,
            initialized: AtomicBool::new(false),
        }
    }

    /// Whether the client has sent `notifications/initialized`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(format!(
                "Routes tool calls to MCP servers registered in {}.",
                self.config.registry.server_addr
            )),
            ..Default::default()
        }
    }

    fn handle_request(&self, request: JsonRpcRequest) -> Result<JsonRpcMessage> {
        debug!(
            session_id = %self.peer.session_id(),
            method = %request.method,
            id = %request.id,
            "routing request"
        );

        let result = match request.method.as_str() {
            "initialize" => to_value(&self.server_info())?,
            "ping" => Value::Object(serde_json::Map::new()),
            "tools/list" => to_value(&ListToolsResult::with_all_items(Vec::new()))?,
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|params| params.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Ok(JsonRpcMessage::error(
                    Some(request.id),
                    JsonRpcError::new(INVALID_PARAMS, format!("Unknown tool: {name}")),
                ));
            }
            _ => {
                return Ok(JsonRpcMessage::error(
                    Some(request.id),
                    JsonRpcError::new(METHOD_NOT_FOUND, "Method not found"),
                ));
            }
        };

        Ok(JsonRpcMessage::response(request.id, result))
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|err| AppError::Router(format!("failed to encode result: {err}")))
}

impl Router for RegistryRouter {
    fn handle(
        &self,
        message: JsonRpcMessage,
    ) -> Pin<Box<dyn Future<Output = Result<Option<JsonRpcMessage>>> + Send + '_>> {
        Box::pin(async move {
            match message {
                JsonRpcMessage::Request(request) => self.handle_request(request).map(Some),
                JsonRpcMessage::Notification(notification) => {
                    if notification.method == "notifications/initialized" {
                        self.initialized.store(true, Ordering::Release);
                    }
                    debug!(
                        session_id = %self.peer.session_id(),
                        method = %notification.method,
                        "notification received"
                    );
                    Ok(None)
                }
                JsonRpcMessage::Response(_) | JsonRpcMessage::Error(_) => Ok(None),
            }
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            debug!(session_id = %self.peer.session_id(), "registry router closed");
            Ok(())
        })
    }
}

/// Factory producing one [`RegistryRouter`] per session.
#[derive(Debug, Clone)]
pub struct RegistryRouterFactory {
    config: RouterConfig,
}

impl RegistryRouterFactory {
    /// Create a factory sharing `config` across all routers it builds.
    #[must_use]
    pub fn new(config: RouterConfig) -> Self {
        info!(
            registry = %config.registry.server_addr,
            log_level = %config.log_level,
            "router factory configured"
        );
        Self { config }
    }
}

impl RouterFactory for RegistryRouterFactory {
    fn create(
        &self,
        peer: SessionPeer,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Router>>> + Send + '_>> {
        Box::pin(async move {
            let router: Arc<dyn Router> = Arc::new(RegistryRouter::new(self.config.clone(), peer));
            Ok(router)
        })
    }
}
