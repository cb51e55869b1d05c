//! Configuration management for tgwa-relay
//!
//! Configuration is loaded from `~/.tgwa-relay/config.json` (or an explicit
//! path) with environment variable overrides of the form `TGWA_SECTION_KEY`.

mod types;
pub mod validate;

pub use types::*;

use crate::error::{RelayError, Result};
use std::path::{Path, PathBuf};

impl Config {
    /// Returns the relay configuration directory path (~/.tgwa-relay)
    pub fn dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tgwa-relay")
    }

    /// Returns the path to the config file (~/.tgwa-relay/config.json)
    pub fn path() -> PathBuf {
        Self::dir().join("config.json")
    }

    /// Load configuration from the default path with environment overrides.
    ///
    /// If the config file doesn't exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::path())
    }

    /// Load configuration from a specific path with environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content).map_err(|e| {
                RelayError::Config(format!("failed to parse {}: {}", path.display(), e))
            })?
        } else {
            Config::default()
        };

        config.apply_overrides_from(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Archive location for the `file` session backend.
    pub fn session_file_path(&self) -> PathBuf {
        if self.session.file_path.trim().is_empty() {
            Self::dir().join("session.zip")
        } else {
            PathBuf::from(&self.session.file_path)
        }
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production, a map in tests).
    pub fn apply_overrides_from<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        // Telegram
        if let Some(val) = get("TGWA_TELEGRAM_TOKEN") {
            self.telegram.token = val;
        }
        if let Some(v) = parsed(&get, "TGWA_TELEGRAM_SOURCE_CHAT_ID") {
            self.telegram.source_chat_id = Some(v);
        }
        if let Some(val) = get("TGWA_TELEGRAM_ADMIN_IDS") {
            self.telegram.admin_ids = split_list(&val);
        }

        // WhatsApp
        if let Some(val) = get("TGWA_WHATSAPP_BRIDGE_URL") {
            self.whatsapp.bridge_url = val;
        }
        if let Some(val) = get("TGWA_WHATSAPP_TARGET_CHAT") {
            self.whatsapp.target_chat = val;
        }
        if let Some(v) = parsed(&get, "TGWA_WHATSAPP_GROUPS_ONLY") {
            self.whatsapp.groups_only = v;
        }

        // Relay
        if let Some(v) = parsed(&get, "TGWA_RELAY_CONCURRENT_MESSAGES") {
            self.relay.concurrent_messages = v;
        }
        if let Some(v) = parsed(&get, "TGWA_RELAY_BATCH_DELAY_MS") {
            self.relay.batch_delay_ms = v;
        }
        if let Some(v) = parsed(&get, "TGWA_RELAY_SEND_TIMEOUT_SECS") {
            self.relay.send_timeout_secs = v;
        }
        if let Some(v) = parsed(&get, "TGWA_RELAY_MAX_ATTEMPTS") {
            self.relay.max_attempts = if v == 0 { None } else { Some(v) };
        }
        if let Some(v) = parsed(&get, "TGWA_RELAY_MAX_QUEUE_SIZE") {
            self.relay.max_queue_size = if v == 0 { None } else { Some(v) };
        }

        // Session
        if let Some(val) = get("TGWA_SESSION_BACKEND") {
            match serde_json::from_value(serde_json::Value::String(val.to_lowercase())) {
                Ok(backend) => self.session.backend = backend,
                Err(_) => tracing::warn!(value = %val, "Ignoring unknown TGWA_SESSION_BACKEND"),
            }
        }
        if let Some(val) = get("TGWA_SESSION_AUTH_DIR") {
            self.session.auth_dir = val;
        }
        if let Some(val) = get("TGWA_SESSION_URL") {
            self.session.url = Some(val);
        }
        if let Some(val) = get("TGWA_SESSION_AUTH_TOKEN") {
            self.session.auth_token = Some(val);
        }

        // Health
        if let Some(v) = parsed(&get, "TGWA_HEALTH_PORT") {
            self.health.port = v;
        }
        // PORT is what most PaaS hosts inject.
        if let Some(v) = parsed(&get, "PORT") {
            self.health.port = v;
        }

        // Logging
        if let Some(val) = get("TGWA_LOGGING_LEVEL") {
            self.logging.level = val;
        }
    }
}

fn parsed<F, T>(get: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key = key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
