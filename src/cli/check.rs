//! Config check command handler.

use std::path::PathBuf;

use anyhow::{Context, Result};

use tgwa_relay::config::validate::{has_errors, validate_config, validate_semantics, DiagnosticLevel};

use super::load_config;

/// Validate the config file: unknown fields first, then semantic checks on
/// the loaded config with environment overrides applied.
pub(crate) fn cmd_check(config_path: PathBuf) -> Result<()> {
    println!("Config file: {}", config_path.display());

    let mut diagnostics = Vec::new();
    if config_path.exists() {
        let content =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let raw: serde_json::Value = match serde_json::from_str(&content) {
            Ok(v) => v,
            Err(e) => {
                println!("[ERROR] Invalid JSON: {}", e);
                anyhow::bail!("configuration is not valid JSON");
            }
        };
        diagnostics.extend(validate_config(&raw));
    } else {
        println!("[OK] No config file found (using defaults and environment)");
    }

    let config = load_config(&config_path)?;
    diagnostics.extend(validate_semantics(&config));

    for diag in &diagnostics {
        println!("{}", diag);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Error)
        .count();
    let warnings = diagnostics
        .iter()
        .filter(|d| d.level == DiagnosticLevel::Warn)
        .count();

    if errors == 0 && warnings == 0 {
        println!("\nConfiguration looks good!");
    } else {
        println!("\nFound {} error(s), {} warning(s)", errors, warnings);
    }

    if has_errors(&diagnostics) {
        anyhow::bail!("configuration has {} error(s)", errors);
    }
    Ok(())
}
