//! Global configuration: environment variables merged with an optional config file.
//!
//! Precedence, lowest to highest: built-in defaults, environment variables,
//! the config file. Objects are deep-merged so a file may override a single
//! nested key (for example `nacos.serverAddr`) without restating the rest.

use std::fmt::{Debug, Formatter};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::mode::ServerMode;
use crate::{AppError, Result};

const DEFAULT_SSE_PORT: u16 = 3001;
const DEFAULT_STREAMABLE_PORT: u16 = 3002;

/// Service registry connection settings handed to every router instance.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryConfig {
    /// Registry address as `host:port`.
    pub server_addr: String,
    /// Registry user name.
    pub username: String,
    /// Registry password.
    pub password: String,
}

impl Debug for RegistryConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryConfig")
            .field("server_addr", &self.server_addr)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The subset of configuration a router is constructed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Service registry the router discovers tools from.
    pub registry: RegistryConfig,
    /// Log level the router was started with.
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_bind_addr() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_shutdown_grace_seconds() -> u64 {
    10
}

/// Fully merged process configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GlobalConfig {
    /// Service registry settings.
    pub nacos: RegistryConfig,
    /// Default log filter when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Fallback HTTP port for either HTTP mode.
    #[serde(default)]
    pub port: Option<u16>,
    /// HTTP port for SSE mode.
    #[serde(default)]
    pub sse_port: Option<u16>,
    /// HTTP port for streamable mode.
    #[serde(default)]
    pub streamable_port: Option<u16>,
    /// Transport binding to serve.
    #[serde(default)]
    pub mode: ServerMode,
    /// Address the HTTP listener binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: IpAddr,
    /// Upper bound on the shutdown sweep.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Idle eviction threshold; absent disables eviction.
    #[serde(default)]
    pub session_idle_timeout_seconds: Option<u64>,
}

impl GlobalConfig {
    /// Load configuration from the process environment and an optional file.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an environment value cannot be parsed,
    /// the file cannot be read or parsed, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    /// Load configuration using `lookup` in place of the process environment.
    ///
    /// # Errors
    ///
    /// See [`GlobalConfig::load`].
    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = env_layer(lookup)?;
        if let Some(path) = path {
            merge_values(&mut merged, file_layer(path)?);
        }
        Self::from_value(merged)
    }

    /// Deserialize and validate an already merged configuration document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the document does not match the schema
    /// or validation fails.
    pub fn from_value(value: Value) -> Result<Self> {
        let config: Self = serde_json::from_value(value)
            .map_err(|err| AppError::Config(format!("invalid config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Router construction parameters derived from this configuration.
    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            registry: self.nacos.clone(),
            log_level: self.log_level.clone(),
        }
    }

    /// Listen address for SSE mode: `ssePort`, then `port`, then 3001.
    #[must_use]
    pub fn sse_addr(&self) -> SocketAddr {
        let port = self.sse_port.or(self.port).unwrap_or(DEFAULT_SSE_PORT);
        SocketAddr::new(self.bind_addr, port)
    }

    /// Listen address for streamable mode: `streamablePort`, then `port`, then 3002.
    #[must_use]
    pub fn streamable_addr(&self) -> SocketAddr {
        let port = self
            .streamable_port
            .or(self.port)
            .unwrap_or(DEFAULT_STREAMABLE_PORT);
        SocketAddr::new(self.bind_addr, port)
    }

    /// Shutdown sweep grace period.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    /// Idle eviction threshold, if enabled.
    #[must_use]
    pub fn session_idle_timeout(&self) -> Option<Duration> {
        self.session_idle_timeout_seconds.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.shutdown_grace_seconds == 0 {
            return Err(AppError::Config(
                "shutdownGraceSeconds must be greater than zero".into(),
            ));
        }

        if self.session_idle_timeout_seconds == Some(0) {
            return Err(AppError::Config(
                "sessionIdleTimeoutSeconds must be greater than zero when set".into(),
            ));
        }

        if self.nacos.server_addr.trim().is_empty() {
            return Err(AppError::Config("nacos.serverAddr must not be empty".into()));
        }

        Ok(())
    }
}

/// Build the environment layer, filling registry defaults for unset variables.
fn env_layer<F>(lookup: F) -> Result<Value>
where
    F: Fn(&str) -> Option<String>,
{
    // An empty variable counts as unset.
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
    let string_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());

    let mut layer = json!({
        "nacos": {
            "serverAddr": string_or("NACOS_SERVER_ADDR", "localhost:8848"),
            "username": string_or("NACOS_USERNAME", "nacos"),
            "password": string_or("NACOS_PASSWORD", "nacos_password"),
        },
        "logLevel": string_or("LOG_LEVEL", "info"),
        "mode": string_or("MODE", "stdio"),
    });

    let numeric = [
        ("PORT", "port"),
        ("SSE_PORT", "ssePort"),
        ("STREAMABLE_PORT", "streamablePort"),
        ("SHUTDOWN_GRACE_SECONDS", "shutdownGraceSeconds"),
        ("SESSION_IDLE_TIMEOUT_SECONDS", "sessionIdleTimeoutSeconds"),
    ];
    for (env_key, config_key) in numeric {
        if let Some(raw) = lookup(env_key) {
            let value: u64 = raw.trim().parse().map_err(|err| {
                AppError::Config(format!("{env_key} must be a non-negative integer: {err}"))
            })?;
            layer[config_key] = Value::from(value);
        }
    }

    if let Some(raw) = lookup("BIND_ADDR") {
        layer["bindAddr"] = Value::String(raw);
    }

    Ok(layer)
}

/// Read a config file as JSON, or TOML when the extension is `.toml`.
fn file_layer(path: &Path) -> Result<Value> {
    let raw = fs::read_to_string(path).map_err(|err| {
        AppError::Config(format!("failed to read config {}: {err}", path.display()))
    })?;

    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

    if is_toml {
        let table: toml::Table = toml::from_str(&raw)?;
        serde_json::to_value(table)
            .map_err(|err| AppError::Config(format!("invalid config: {err}")))
    } else {
        serde_json::from_str(&raw)
            .map_err(|err| AppError::Config(format!("invalid config {}: {err}", path.display())))
    }
}

/// Deep-merge `overlay` into `base`; overlay values win on conflict.
pub fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => merge_maps(base, overlay),
        (base, overlay) => *base = overlay,
    }
}

fn merge_maps(base: &mut Map<String, Value>, overlay: Map<String, Value>) {
    for (key, value) in overlay {
        match base.get_mut(&key) {
            Some(existing) => merge_values(existing, value),
            None => {
                base.insert(key, value);
            }
        }
    }
}
