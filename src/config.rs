use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::KALSHI_API_BASE;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Pump and upstream settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Seconds between update cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Base URL of the market listing API.
    #[serde(default = "default_upstream_base_url")]
    pub upstream_base_url: String,
    /// Delay before the first cycle after startup.
    #[serde(default = "default_initial_delay")]
    pub initial_delay_secs: u64,
    /// Pause between consecutive listing pages.
    #[serde(default = "default_page_delay")]
    pub page_delay_ms: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Per-subscriber heartbeat cadence.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
}

/// Listener settings for the HTTP API and the WebSocket stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
    /// When set, data routes require a matching `X-API-Key` header.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_poll_interval() -> u64 {
    120
}

fn default_upstream_base_url() -> String {
    KALSHI_API_BASE.to_string()
}

fn default_initial_delay() -> u64 {
    5
}

fn default_page_delay() -> u64 {
    500
}

fn default_request_timeout() -> u64 {
    10
}

fn default_heartbeat() -> u64 {
    30
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_ws_port() -> u16 {
    8001
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            upstream_base_url: default_upstream_base_url(),
            initial_delay_secs: default_initial_delay(),
            page_delay_ms: default_page_delay(),
            request_timeout_secs: default_request_timeout(),
            heartbeat_secs: default_heartbeat(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ws_port: default_ws_port(),
            api_key: None,
        }
    }
}

impl SettingsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_secs(self.initial_delay_secs)
    }

    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }
}

impl ServerConfig {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ws_addr(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Load config from `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides on top of the file values.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var("KALSHI_API_BASE") {
            self.settings.upstream_base_url = url;
        }
        if let Some(secs) = var("UPDATE_INTERVAL_SECONDS") {
            self.settings.poll_interval_secs = secs
                .parse()
                .with_context(|| format!("invalid UPDATE_INTERVAL_SECONDS: {secs}"))?;
        }
        if let Some(host) = var("HOST") {
            self.server.host = host;
        }
        if let Some(port) = var("PORT") {
            self.server.port = port
                .parse()
                .with_context(|| format!("invalid PORT: {port}"))?;
        }
        if let Some(port) = var("WS_PORT") {
            self.server.ws_port = port
                .parse()
                .with_context(|| format!("invalid WS_PORT: {port}"))?;
        }
        if let Some(key) = var("API_KEY") {
            self.server.api_key = Some(key).filter(|k| !k.is_empty());
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.settings.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be positive");
        }
        if self.settings.heartbeat_secs == 0 {
            anyhow::bail!("heartbeat_secs must be positive");
        }
        url::Url::parse(&self.settings.upstream_base_url).with_context(|| {
            format!(
                "invalid upstream_base_url: {}",
                self.settings.upstream_base_url
            )
        })?;
        Ok(())
    }
}
