// Configuration File Support
//
// TOML configuration for the harness CLI and for tests that want a shared
// client/server setup. Environment variables override file values.
// The default file lives in the XDG config directory:
// ~/.config/mcp-harness/config.toml (or $MCP_HARNESS_CONFIG)

use crate::mcp::transport::ResponseFormat;
use crate::server::manager::ServerManagerConfig;
use crate::server::readiness::{HealthEndpointReadiness, LivenessReadiness};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "MCP_HARNESS_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HarnessConfig {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Client used to talk to the server under test
    pub client: ClientConfig,

    /// Server process to supervise (`--spawn`, `check`)
    pub server: ServerConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// JSON-RPC endpoint of the server under test
    pub base_url: String,

    /// Sent as `Authorization: Bearer <token>`
    pub auth_token: Option<String>,

    /// Extra headers for every call
    pub headers: BTreeMap<String, String>,

    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,

    pub response_format: ResponseFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000/mcp".to_string(),
            auth_token: None,
            headers: BTreeMap::new(),
            timeout_ms: 10_000,
            response_format: ResponseFormat::Json,
        }
    }
}

/// Server process configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Command to spawn the MCP server (e.g., "node")
    pub command: String,

    pub args: Vec<String>,

    pub env: BTreeMap<String, String>,

    pub cwd: Option<PathBuf>,

    /// Exported to the server as `PORT`
    pub port: Option<u16>,

    pub startup_timeout_ms: u64,

    pub shutdown_timeout_ms: u64,

    pub readiness: ReadinessConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
            port: None,
            startup_timeout_ms: 10_000,
            shutdown_timeout_ms: 5_000,
            readiness: ReadinessConfig::default(),
        }
    }
}

/// Readiness strategy selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadinessKind {
    /// Ready once the process survives a short grace period
    #[default]
    Liveness,
    /// Ready once `GET http://127.0.0.1:<port><health_path>` succeeds
    Health,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReadinessConfig {
    pub strategy: ReadinessKind,

    pub health_path: String,

    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            strategy: ReadinessKind::Liveness,
            health_path: "/health".to_string(),
            poll_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Health endpoint URL for the `health` strategy
    ///
    /// Falls back to port 3000 when no port is configured.
    pub fn health_url(&self) -> String {
        let port = self.port.unwrap_or(3000);
        let path = if self.readiness.health_path.starts_with('/') {
            self.readiness.health_path.clone()
        } else {
            format!("/{}", self.readiness.health_path)
        };
        format!("http://127.0.0.1:{}{}", port, path)
    }
}

impl From<&ServerConfig> for ServerManagerConfig {
    fn from(server: &ServerConfig) -> Self {
        let mut config = ServerManagerConfig::new(server.command.clone())
            .args(server.args.iter().cloned())
            .startup_timeout(Duration::from_millis(server.startup_timeout_ms))
            .shutdown_timeout(Duration::from_millis(server.shutdown_timeout_ms));

        for (key, value) in &server.env {
            config = config.env(key.clone(), value.clone());
        }
        if let Some(cwd) = &server.cwd {
            config = config.cwd(cwd.clone());
        }
        if let Some(port) = server.port {
            config = config.port(port);
        }

        match server.readiness.strategy {
            ReadinessKind::Liveness => config.readiness(LivenessReadiness::new()),
            ReadinessKind::Health => config.readiness(HealthEndpointReadiness::new(
                server.health_url(),
                Duration::from_millis(server.readiness.poll_interval_ms),
            )),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from the default location
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the defaults.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation. A missing file yields the defaults (with
    /// environment overrides applied).
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: HarnessConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration file path
    ///
    /// `$MCP_HARNESS_CONFIG` if set, otherwise
    /// `~/.config/mcp-harness/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        if let Some(proj_dirs) = directories::ProjectDirs::from("dev", "mcp-harness", "mcp-harness")
        {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("mcp-harness")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - MCP_HARNESS_LOG_LEVEL
    /// - MCP_HARNESS_LOG_FORMAT
    /// - MCP_HARNESS_BASE_URL
    /// - MCP_HARNESS_AUTH_TOKEN
    /// - MCP_HARNESS_TIMEOUT_MS
    /// - MCP_HARNESS_SERVER_COMMAND
    /// - MCP_HARNESS_STARTUP_TIMEOUT_MS
    /// - MCP_HARNESS_SHUTDOWN_TIMEOUT_MS
    ///
    /// Unparseable or zero timeouts are ignored.
    fn apply_env_overrides(mut self) -> Self {
        if let Ok(level) = std::env::var("MCP_HARNESS_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MCP_HARNESS_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Ok(url) = std::env::var("MCP_HARNESS_BASE_URL") {
            if !url.is_empty() {
                self.client.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("MCP_HARNESS_AUTH_TOKEN") {
            self.client.auth_token = if token.is_empty() { None } else { Some(token) };
        }
        if let Some(timeout) = positive_ms("MCP_HARNESS_TIMEOUT_MS") {
            self.client.timeout_ms = timeout;
        }

        if let Ok(command) = std::env::var("MCP_HARNESS_SERVER_COMMAND") {
            if !command.is_empty() {
                self.server.command = command;
            }
        }
        if let Some(timeout) = positive_ms("MCP_HARNESS_STARTUP_TIMEOUT_MS") {
            self.server.startup_timeout_ms = timeout;
        }
        if let Some(timeout) = positive_ms("MCP_HARNESS_SHUTDOWN_TIMEOUT_MS") {
            self.server.shutdown_timeout_ms = timeout;
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.client.base_url.is_empty() {
            anyhow::bail!("Client base_url must not be empty");
        }
        if !self.client.base_url.starts_with("http://")
            && !self.client.base_url.starts_with("https://")
        {
            anyhow::bail!(
                "Client base_url must be an http(s) URL: {}",
                self.client.base_url
            );
        }
        if self.client.timeout_ms == 0 {
            anyhow::bail!("Client timeout must be > 0");
        }

        if self.server.startup_timeout_ms == 0 {
            anyhow::bail!("Server startup timeout must be > 0");
        }
        if self.server.shutdown_timeout_ms == 0 {
            anyhow::bail!("Server shutdown timeout must be > 0");
        }
        if self.server.readiness.strategy == ReadinessKind::Health {
            if self.server.readiness.health_path.is_empty() {
                anyhow::bail!("Health readiness requires a health_path");
            }
            if self.server.readiness.poll_interval_ms == 0 {
                anyhow::bail!("Readiness poll interval must be > 0");
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// The `[server]` section as a supervisor configuration
    ///
    /// # Errors
    ///
    /// Returns an error if no server command is configured.
    pub fn server_manager_config(&self) -> Result<ServerManagerConfig> {
        if self.server.command.is_empty() {
            anyhow::bail!(
                "No server command configured (set [server].command or MCP_HARNESS_SERVER_COMMAND)"
            );
        }
        Ok(ServerManagerConfig::from(&self.server))
    }
}

fn positive_ms(var: &str) -> Option<u64> {
    std::env::var(var)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|ms| *ms > 0)
}
