//! Configuration types for tgwa-relay

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Telegram bot (inbound) configuration
    pub telegram: TelegramConfig,
    /// WhatsApp bridge (outbound) configuration
    pub whatsapp: WhatsAppConfig,
    /// Delivery queue and dispatch loop tuning
    pub relay: RelayConfig,
    /// Media download limits
    pub media: MediaConfig,
    /// WhatsApp session persistence
    pub session: SessionConfig,
    /// Outbound reconnect backoff
    pub reconnect: ReconnectConfig,
    /// Health endpoint
    pub health: HealthConfig,
    /// Logging output
    pub logging: LoggingConfig,
}

// ============================================================================
// Telegram
// ============================================================================

/// Telegram channel configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from BotFather
    pub token: String,
    /// Only relay posts from this chat (None = any channel the bot sits in)
    pub source_chat_id: Option<i64>,
    /// User IDs allowed to run `/status` and `/clear` in a private chat
    pub admin_ids: Vec<String>,
}

// ============================================================================
// WhatsApp
// ============================================================================

/// How the configured target name is compared against chat names.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive equality only
    Exact,
    /// Case-insensitive equality, falling back to substring match
    #[default]
    Contains,
}

/// WhatsApp bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// WebSocket bridge URL
    pub bridge_url: String,
    /// Name (or JID) of the destination group/community
    pub target_chat: String,
    /// Name matching strategy for `target_chat`
    pub match_mode: MatchMode,
    /// Only consider group chats when resolving the destination
    pub groups_only: bool,
    /// Per-request timeout for bridge replies
    pub request_timeout_secs: u64,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            bridge_url: "ws://localhost:3001".to_string(),
            target_chat: String::new(),
            match_mode: MatchMode::default(),
            groups_only: true,
            request_timeout_secs: 30,
        }
    }
}

impl WhatsAppConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

// ============================================================================
// Relay
// ============================================================================

/// What the dispatch loop does with a job whose send failed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Put the job back at the head of the queue for the next batch
    #[default]
    Requeue,
    /// Log and discard the job
    Drop,
}

/// What `enqueue` does when the queue is at capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Evict the job at the head to make room
    #[default]
    DropOldest,
    /// Discard the incoming job
    DropNewest,
    /// Refuse the incoming job with `RelayError::QueueFull`
    Reject,
}

/// Delivery queue and dispatch loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Jobs sent concurrently per batch
    pub concurrent_messages: usize,
    /// Minimum delay between batches
    pub batch_delay_ms: u64,
    /// Cap for the inter-batch delay after failed batches
    pub max_retry_delay_ms: u64,
    /// Start offset between jobs within one batch
    pub stagger_ms: u64,
    /// Timeout for a single send
    pub send_timeout_secs: u64,
    /// Fallback poll interval for the drain worker
    pub poll_interval_secs: u64,
    /// Failed-send handling
    pub failure_policy: FailurePolicy,
    /// Drop a job after this many failed attempts (None = retry forever)
    pub max_attempts: Option<u32>,
    /// Queue capacity (None = unbounded)
    pub max_queue_size: Option<usize>,
    /// Behaviour when `max_queue_size` is reached
    pub overflow_policy: OverflowPolicy,
    /// How long `stop` waits for an in-flight batch
    pub shutdown_grace_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            concurrent_messages: 5,
            batch_delay_ms: 1000,
            max_retry_delay_ms: 30_000,
            stagger_ms: 50,
            send_timeout_secs: 30,
            poll_interval_secs: 5,
            failure_policy: FailurePolicy::default(),
            max_attempts: Some(5),
            max_queue_size: Some(1000),
            overflow_policy: OverflowPolicy::default(),
            shutdown_grace_secs: 10,
        }
    }
}

impl RelayConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms.max(self.batch_delay_ms))
    }

    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs.max(1))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

// ============================================================================
// Media
// ============================================================================

/// 100 MiB, the largest document WhatsApp accepts.
const DEFAULT_MEDIA_MAX_BYTES: u64 = 100 * 1024 * 1024;

/// Media download limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Maximum payload size in bytes
    pub max_bytes: u64,
    /// Timeout for one fetch, including the download
    pub fetch_timeout_secs: u64,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MEDIA_MAX_BYTES,
            fetch_timeout_secs: 30,
        }
    }
}

impl MediaConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

// ============================================================================
// Session
// ============================================================================

/// Where the zipped WhatsApp auth directory is persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionBackend {
    /// No persistence; a QR scan is needed after every redeploy
    #[default]
    None,
    /// Local file
    File,
    /// Remote blob URL (GET/PUT)
    Http,
    /// Base64 blob in an environment variable (read-only)
    Env,
}

/// WhatsApp session persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub backend: SessionBackend,
    /// Directory the bridge keeps its login state in
    pub auth_dir: String,
    /// Archive path for the `file` backend (empty = ~/.tgwa-relay/session.zip)
    pub file_path: String,
    /// Blob URL for the `http` backend
    pub url: Option<String>,
    /// Bearer token for the `http` backend
    pub auth_token: Option<String>,
    /// Variable name for the `env` backend
    pub env_var: String,
    /// Periodic backup interval (0 = only on authentication)
    pub backup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::default(),
            auth_dir: ".wa-session".to_string(),
            file_path: String::new(),
            url: None,
            auth_token: None,
            env_var: "TGWA_SESSION_BLOB".to_string(),
            backup_interval_secs: 300,
        }
    }
}

// ============================================================================
// Reconnect
// ============================================================================

/// Outbound reconnect backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First reconnect delay
    pub base_delay_ms: u64,
    /// Backoff ceiling
    pub max_delay_ms: u64,
    /// Consecutive auth failures before logging at error level
    pub escalate_after: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            escalate_after: 5,
        }
    }
}

// ============================================================================
// Health
// ============================================================================

/// Health endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Log output format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable text
    Pretty,
    /// Compact text with `component` fields
    #[default]
    Component,
    /// JSON lines for log aggregators
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub format: LogFormat,
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
    /// Append logs to this file instead of stderr
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            file: None,
        }
    }
}
