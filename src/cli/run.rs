//! Run command handler (the relay process).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use tgwa_relay::config::validate::{has_errors, validate_semantics, DiagnosticLevel};
use tgwa_relay::health::start_health_server;
use tgwa_relay::inbound::{build_bot, TelegramInbound};
use tgwa_relay::media::TelegramFileFetcher;
use tgwa_relay::relay::RelayService;
use tgwa_relay::session::{self, SessionBackup, SessionStore};
use tgwa_relay::transport::WhatsAppBridge;
use tgwa_relay::utils::logging::init_logging;
use tgwa_relay::utils::string::mask_secret;

use super::load_config;

/// Start the relay and block until Ctrl+C.
pub(crate) async fn cmd_run(config_path: PathBuf) -> Result<()> {
    let config = load_config(&config_path)?;
    init_logging(&config.logging).context("Failed to initialize logging")?;

    let diagnostics = validate_semantics(&config);
    for diag in &diagnostics {
        match diag.level {
            DiagnosticLevel::Error => error!(path = %diag.path, "{}", diag.message),
            DiagnosticLevel::Warn => warn!(path = %diag.path, "{}", diag.message),
            DiagnosticLevel::Ok => {}
        }
    }
    if has_errors(&diagnostics) {
        anyhow::bail!(
            "Invalid configuration; run `tgwa-relay check --config {}` for details",
            config_path.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        target = %config.whatsapp.target_chat,
        bridge = %config.whatsapp.bridge_url,
        token = %mask_secret(&config.telegram.token),
        "Starting tgwa-relay"
    );

    let bot = build_bot(&config.telegram.token)?;
    let fetcher = Arc::new(TelegramFileFetcher::new(bot.clone()));
    let transport = Arc::new(WhatsAppBridge::new(config.whatsapp.clone()));

    let mut service = RelayService::new(&config, transport, fetcher);
    if let Some(store) = session::from_config(&config)? {
        info!(store = store.name(), "Session persistence enabled");
        service = service.with_session_backup(SessionBackup::new(
            store,
            &config.session.auth_dir,
            Duration::from_secs(config.session.backup_interval_secs),
        ));
    }
    service
        .start()
        .await
        .with_context(|| "Failed to start relay")?;
    let handle = service.handle();

    let health_handle = if config.health.enabled {
        match start_health_server(&config.health.host, config.health.port, handle.clone()).await {
            Ok(h) => Some(h),
            Err(e) => {
                warn!(error = %e, "Failed to start health server (non-fatal)");
                None
            }
        }
    } else {
        None
    };

    let mut inbound = TelegramInbound::new(config.telegram.clone(), bot, handle.clone());
    if let Err(e) = inbound.start().await {
        if let Err(stop_err) = service.stop().await {
            warn!("Relay stop after failed start: {}", stop_err);
        }
        return Err(e).context("Failed to start Telegram inbound");
    }

    println!();
    println!("Relay is running. Press Ctrl+C to stop.");
    println!();

    tokio::signal::ctrl_c()
        .await
        .with_context(|| "Failed to listen for Ctrl+C")?;

    println!();
    println!("Shutting down...");

    if let Err(e) = inbound.stop().await {
        warn!("Failed to stop Telegram inbound: {}", e);
    }
    service
        .stop()
        .await
        .with_context(|| "Failed to stop relay")?;

    if let Some(h) = health_handle {
        h.abort();
    }

    println!("Relay stopped.");
    Ok(())
}
