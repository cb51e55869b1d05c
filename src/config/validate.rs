//! Configuration validation with unknown field detection.

use serde_json::Value;
use std::collections::HashSet;

use super::{Config, SessionBackend};

/// Known top-level config field names.
const KNOWN_TOP_LEVEL: &[&str] = &[
    "telegram",
    "whatsapp",
    "relay",
    "media",
    "session",
    "reconnect",
    "health",
    "logging",
];

/// Known fields for each section.
const KNOWN_SECTIONS: &[(&str, &[&str])] = &[
    ("telegram", &["token", "source_chat_id", "admin_ids"]),
    (
        "whatsapp",
        &[
            "bridge_url",
            "target_chat",
            "match_mode",
            "groups_only",
            "request_timeout_secs",
        ],
    ),
    (
        "relay",
        &[
            "concurrent_messages",
            "batch_delay_ms",
            "max_retry_delay_ms",
            "stagger_ms",
            "send_timeout_secs",
            "poll_interval_secs",
            "failure_policy",
            "max_attempts",
            "max_queue_size",
            "overflow_policy",
            "shutdown_grace_secs",
        ],
    ),
    ("media", &["max_bytes", "fetch_timeout_secs"]),
    (
        "session",
        &[
            "backend",
            "auth_dir",
            "file_path",
            "url",
            "auth_token",
            "env_var",
            "backup_interval_secs",
        ],
    ),
    ("reconnect", &["base_delay_ms", "max_delay_ms", "escalate_after"]),
    ("health", &["enabled", "host", "port"]),
    ("logging", &["format", "level", "file"]),
];

/// A validation diagnostic.
#[derive(Debug)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub path: String,
    pub message: String,
}

#[derive(Debug, PartialEq)]
pub enum DiagnosticLevel {
    Ok,
    Warn,
    Error,
}

impl Diagnostic {
    fn new(level: DiagnosticLevel, path: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            path: path.to_string(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.level {
            DiagnosticLevel::Ok => "[OK]",
            DiagnosticLevel::Warn => "[WARN]",
            DiagnosticLevel::Error => "[ERROR]",
        };
        if self.path.is_empty() {
            write!(f, "{} {}", prefix, self.message)
        } else {
            write!(f, "{} {}: {}", prefix, self.path, self.message)
        }
    }
}

/// Simple Levenshtein distance for "did you mean?" suggestions.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Suggest the closest known field name (if distance <= 3).
pub fn suggest_field(unknown: &str, known: &[&str]) -> Option<String> {
    known
        .iter()
        .map(|k| (k, levenshtein(unknown, k)))
        .filter(|(_, d)| *d <= 3)
        .min_by_key(|(_, d)| *d)
        .map(|(k, _)| format!("did you mean '{}'?", k))
}

fn unknown_keys(
    obj: &serde_json::Map<String, Value>,
    known: &[&str],
    prefix: &str,
    out: &mut Vec<Diagnostic>,
) -> bool {
    let known_set: HashSet<&str> = known.iter().copied().collect();
    let mut found = false;
    for key in obj.keys() {
        if known_set.contains(key.as_str()) {
            continue;
        }
        found = true;
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };
        let msg = match suggest_field(key, known) {
            Some(suggestion) => format!("Unknown field '{}' ({})", key, suggestion),
            None => format!("Unknown field '{}'", key),
        };
        out.push(Diagnostic::new(DiagnosticLevel::Error, &path, msg));
    }
    found
}

/// Validate a raw JSON config value against known field names.
pub fn validate_config(raw: &Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    let Some(obj) = raw.as_object() else {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "",
            "Config must be a JSON object",
        ));
        return diagnostics;
    };

    diagnostics.push(Diagnostic::new(DiagnosticLevel::Ok, "", "Valid JSON"));

    let mut has_unknown = unknown_keys(obj, KNOWN_TOP_LEVEL, "", &mut diagnostics);
    for (section, known) in KNOWN_SECTIONS {
        if let Some(inner) = obj.get(*section).and_then(|v| v.as_object()) {
            has_unknown |= unknown_keys(inner, known, section, &mut diagnostics);
        }
    }

    if !has_unknown {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Ok,
            "",
            "All fields recognized",
        ));
    }

    diagnostics
}

/// Semantic checks on a loaded config (after env overrides).
pub fn validate_semantics(config: &Config) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    if config.telegram.token.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "telegram.token",
            "Bot token is empty",
        ));
    }
    if config.whatsapp.target_chat.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "whatsapp.target_chat",
            "Destination chat name is empty",
        ));
    }
    if config.whatsapp.bridge_url.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "whatsapp.bridge_url",
            "Bridge URL is empty",
        ));
    }
    if config.relay.concurrent_messages == 0 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Error,
            "relay.concurrent_messages",
            "Must be at least 1",
        ));
    }
    if config.relay.max_attempts.is_none() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "relay.max_attempts",
            "Unset: a permanently failing job is retried forever",
        ));
    }
    if config.relay.max_queue_size.is_none() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "relay.max_queue_size",
            "Unset: the queue grows without bound during an outage",
        ));
    }
    if config.reconnect.base_delay_ms < 1000 {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "reconnect.base_delay_ms",
            "Below 1000; the 1s floor applies",
        ));
    }
    match config.session.backend {
        SessionBackend::Http if config.session.url.is_none() => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "session.url",
                "Required for the http backend",
            ));
        }
        SessionBackend::Env if config.session.env_var.trim().is_empty() => {
            diagnostics.push(Diagnostic::new(
                DiagnosticLevel::Error,
                "session.env_var",
                "Required for the env backend",
            ));
        }
        _ => {}
    }
    if config.telegram.admin_ids.is_empty() {
        diagnostics.push(Diagnostic::new(
            DiagnosticLevel::Warn,
            "telegram.admin_ids",
            "Empty: admin commands are disabled",
        ));
    }

    diagnostics
}

/// Returns `true` if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(|d| d.level == DiagnosticLevel::Error)
}
