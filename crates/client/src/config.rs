//! Client configuration from environment variables.

use std::path::PathBuf;
use std::time::Duration;

/// Which transport the connection manager should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    /// WebSocket first, long-polling if the WebSocket cannot be opened.
    Auto,
    /// WebSocket only.
    WebSocket,
    /// Long-polling only.
    Polling,
}

impl TransportMode {
    fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "websocket" | "ws" => TransportMode::WebSocket,
            "polling" | "poll" => TransportMode::Polling,
            _ => TransportMode::Auto,
        }
    }
}

/// Configuration for auto-reconnect behavior
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive reconnect attempts before giving up
    pub max_attempts: u32,
    /// Initial delay in milliseconds
    pub initial_delay_ms: u64,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 1000,
            max_delay_ms: 5000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculate delay for a given attempt number (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((delay as u64).min(self.max_delay_ms))
    }
}

/// Configuration for the history fetch retry.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadRetryConfig {
    /// Retries allowed while credentials are not cached yet
    pub max_retries: u32,
    /// Delay between retries in milliseconds
    pub delay_ms: u64,
}

impl Default for LoadRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 500,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:3000/api`
    pub api_url: String,
    /// Base URL of the push server, e.g. `ws://localhost:3000`
    pub socket_url: String,
    pub transport: TransportMode,
    pub reconnect: ReconnectConfig,
    pub load_retry: LoadRetryConfig,
    /// Directory for the file-backed session store. `None` uses the
    /// platform config directory.
    pub storage_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://localhost:3000/api".to_string(),
            socket_url: "ws://localhost:3000".to_string(),
            transport: TransportMode::Auto,
            reconnect: ReconnectConfig::default(),
            load_retry: LoadRetryConfig::default(),
            storage_dir: None,
        }
    }
}

impl ClientConfig {
    /// Build configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PIZARRA_API_URL`: HTTP API base (default: "http://localhost:3000/api")
    /// - `PIZARRA_SOCKET_URL`: push server base (default: "ws://localhost:3000")
    /// - `PIZARRA_TRANSPORT`: "auto" | "websocket" | "polling" (default: "auto")
    /// - `PIZARRA_RECONNECT_ATTEMPTS`: reconnect budget (default: 5)
    /// - `PIZARRA_RECONNECT_DELAY_MS`: base reconnect delay (default: 1000)
    /// - `PIZARRA_STORAGE_DIR`: session store directory (default: platform config dir)
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let mut reconnect = defaults.reconnect.clone();
        if let Some(attempts) = lookup("PIZARRA_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            reconnect.max_attempts = attempts;
        }
        if let Some(delay) = lookup("PIZARRA_RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            reconnect.initial_delay_ms = delay;
            reconnect.max_delay_ms = reconnect.max_delay_ms.max(delay);
        }

        Self {
            api_url: lookup("PIZARRA_API_URL").unwrap_or(defaults.api_url),
            socket_url: lookup("PIZARRA_SOCKET_URL").unwrap_or(defaults.socket_url),
            transport: lookup("PIZARRA_TRANSPORT")
                .map(|v| TransportMode::parse(&v))
                .unwrap_or(defaults.transport),
            reconnect,
            load_retry: defaults.load_retry,
            storage_dir: lookup("PIZARRA_STORAGE_DIR").map(PathBuf::from),
        }
    }
}
