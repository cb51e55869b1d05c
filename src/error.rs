//! Error types for tgwa-relay
//!
//! This module defines all error types used throughout the relay.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Media Error Classification
// ============================================================================

/// Structured media resolution error.
///
/// Every variant is reported to the dispatch loop as a per-job send failure;
/// the classification only feeds logging and the status counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// The source file id is unknown to the inbound transport
    NotFound(String),
    /// Network or API failure while downloading
    DownloadFailed(String),
    /// Payload exceeds the configured byte limit
    TooLarge { size: u64, limit: u64 },
    /// Fetch did not complete within the configured timeout
    Timeout(Duration),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::NotFound(id) => write!(f, "media not found: {}", id),
            MediaError::DownloadFailed(msg) => write!(f, "media download failed: {}", msg),
            MediaError::TooLarge { size, limit } => {
                write!(f, "media too large: {} bytes (limit {})", size, limit)
            }
            MediaError::Timeout(d) => write!(f, "media fetch timed out after {:?}", d),
        }
    }
}

impl MediaError {
    /// Returns `true` if a later attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MediaError::DownloadFailed(_) | MediaError::Timeout(_))
    }
}

impl From<MediaError> for RelayError {
    fn from(err: MediaError) -> Self {
        RelayError::Media(err)
    }
}

// ============================================================================
// Primary Error Type
// ============================================================================

/// The primary error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration-related errors (invalid config, missing required fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Inbound channel errors (Telegram polling, admin replies)
    #[error("Channel error: {0}")]
    Channel(String),

    /// Outbound transport errors (bridge socket, send rejected, ack timeout)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Media resolution failure
    #[error("Media error: {0}")]
    Media(MediaError),

    /// Session persistence errors (store unavailable, corrupt archive, etc.)
    #[error("Session error: {0}")]
    Session(String),

    /// Delivery queue is at capacity under the `reject` overflow policy
    #[error("Delivery queue full ({0} jobs)")]
    QueueFull(usize),

    /// Configured destination chat did not match any available chat
    #[error("Destination '{target}' not found; available chats: {}", .available.join(", "))]
    DestinationNotFound {
        target: String,
        available: Vec<String>,
    },

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay is shutting down and no longer accepts work
    #[error("Relay is shutting down")]
    Shutdown,
}

/// A specialized `Result` type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;
