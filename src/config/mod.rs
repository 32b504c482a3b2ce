use anyhow::{Context, Result};
use serde::Deserialize;

pub use crate::connection::{Backoff, ConnectionConfig};
pub use crate::state::StoreConfig;

/// Complete client configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl ClientConfig {
    /// Defaults with environment overrides applied
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.apply_env();
        cfg
    }

    /// Override fields from `EMOTION_*` variables that are set and parse.
    ///
    /// `EMOTION_WS_URL` is honored here as well as in the defaults, so it
    /// also wins over a URL from a config file.
    pub fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("EMOTION_WS_URL") {
            if !v.is_empty() {
                self.connection.url = v;
            }
        }
        if let Ok(v) = std::env::var("EMOTION_MAX_RECONNECT_ATTEMPTS") {
            if let Ok(n) = v.parse::<u32>() {
                self.connection.max_reconnect_attempts = n;
            }
        }
        if let Ok(v) = std::env::var("EMOTION_RECONNECT_DELAY_MS") {
            if let Ok(n) = v.parse::<u64>() {
                self.connection.reconnect_delay_ms = n;
            }
        }
        if let Ok(v) = std::env::var("EMOTION_STORE_MAX_ENTRIES") {
            if let Ok(n) = v.parse::<usize>() {
                self.store.max_entries = Some(n);
            }
        }
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<ClientConfig> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path))?;
    let config: ClientConfig =
        toml::from_str(&contents).with_context(|| format!("Failed to parse config file {}", path))?;
    Ok(config)
}
