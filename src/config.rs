//! Client configuration.
//!
//! Loaded from `config.json` in the config directory, then overridden by
//! environment variables:
//!
//! | Variable                          | Field                  |
//! |-----------------------------------|------------------------|
//! | `MANGO_CHAT_SERVER_URL`           | `server_url`           |
//! | `MANGO_CHAT_TRANSPORT`            | `transport`            |
//! | `MANGO_CHAT_CONNECT_TIMEOUT_SECS` | `connect_timeout_ms`   |
//! | `MANGO_CHAT_HEARTBEAT_MS`         | both heart-beat fields |
//! | `MANGO_CHAT_CONFIG_DIR`           | config directory       |

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::connection::HandshakeRetry;

/// Which framing the transport uses on top of the WebSocket.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// STOMP frames directly on a WebSocket (`{endpoint}/websocket`).
    #[default]
    Websocket,
    /// SockJS session framing over a WebSocket.
    Sockjs,
}

impl std::str::FromStr for TransportKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Ok(Self::Websocket),
            "sockjs" => Ok(Self::Sockjs),
            other => anyhow::bail!("unknown transport kind: {other}"),
        }
    }
}

/// Configuration for [`crate::ChatClient`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the chat server (`http(s)://` or `ws(s)://`).
    pub server_url: String,
    /// STOMP endpoint path on the server.
    pub endpoint_path: String,
    /// Framing used on the WebSocket.
    pub transport: TransportKind,
    /// `host` header for CONNECT. Derived from `server_url` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Wait for CONNECTED after the primary CONNECT.
    pub connect_timeout_ms: u64,
    /// Wait for CONNECTED after the alternate CONNECT.
    pub retry_timeout_ms: u64,
    /// Heart-beat interval the client offers to send (0 disables).
    pub heartbeat_send_ms: u64,
    /// Heart-beat interval the client asks to receive (0 disables).
    pub heartbeat_receive_ms: u64,
    /// What to do when the first CONNECT goes unanswered.
    pub handshake_retry: HandshakeRetry,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8080".to_string(),
            endpoint_path: "/ws-chat".to_string(),
            transport: TransportKind::default(),
            host: None,
            connect_timeout_ms: 10_000,
            retry_timeout_ms: 5_000,
            heartbeat_send_ms: 10_000,
            heartbeat_receive_ms: 10_000,
            handshake_retry: HandshakeRetry::OneAlternateRetry,
        }
    }
}

impl ClientConfig {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `MANGO_CHAT_CONFIG_DIR` wins; otherwise the platform config dir.
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("MANGO_CHAT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("mango-chat")
        };
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create config dir {}", dir.display()))?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file falls back to defaults; a malformed file is an error.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from a specific JSON file, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("invalid config in {}", path.display()))
    }

    /// Persist to a JSON file.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Apply `MANGO_CHAT_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary lookup. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("MANGO_CHAT_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(transport) = lookup("MANGO_CHAT_TRANSPORT") {
            match transport.parse() {
                Ok(kind) => self.transport = kind,
                Err(e) => log::warn!("[Config] Ignoring MANGO_CHAT_TRANSPORT: {}", e),
            }
        }

        if let Some(timeout) = lookup("MANGO_CHAT_CONNECT_TIMEOUT_SECS") {
            match timeout.parse::<u64>() {
                Ok(secs) => self.connect_timeout_ms = secs.saturating_mul(1000),
                Err(e) => log::warn!("[Config] Ignoring MANGO_CHAT_CONNECT_TIMEOUT_SECS: {}", e),
            }
        }

        if let Some(heartbeat) = lookup("MANGO_CHAT_HEARTBEAT_MS") {
            match heartbeat.parse::<u64>() {
                Ok(ms) => {
                    self.heartbeat_send_ms = ms;
                    self.heartbeat_receive_ms = ms;
                }
                Err(e) => log::warn!("[Config] Ignoring MANGO_CHAT_HEARTBEAT_MS: {}", e),
            }
        }
    }

    /// Connect timeout for the primary CONNECT.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Connect timeout for the alternate CONNECT.
    #[must_use]
    pub fn retry_timeout(&self) -> Duration {
        Duration::from_millis(self.retry_timeout_ms)
    }

    /// `host` header value: explicit setting, else the host part of
    /// `server_url`.
    #[must_use]
    pub fn stomp_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        let without_scheme = self
            .server_url
            .split_once("://")
            .map_or(self.server_url.as_str(), |(_, rest)| rest);
        let authority = without_scheme.split('/').next().unwrap_or_default();
        let host = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
        host.split(':').next().unwrap_or_default().to_string()
    }
}
