//! Telegram inbound adapter
//!
//! Long-polls the Bot API with teloxide and feeds channel posts into the
//! relay. The bot must be an administrator of the source channel to receive
//! `channel_post` updates.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  channel_post   ┌──────────────────┐
//! │   Telegram API   │ ──────────────> │ TelegramInbound  │
//! │                  │ <────────────── │   (teloxide)     │
//! └──────────────────┘  admin replies  └────────┬─────────┘
//!                                               │ InboundPost
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │   RelayHandle    │
//!                                      └──────────────────┘
//! ```
//!
//! Private messages from configured admins accept two commands:
//! `/status` replies with the relay status snapshot and `/clear` drops every
//! pending job.

use futures::FutureExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatKind, FileMeta};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::error::{RelayError, Result};
use crate::relay::{InboundFile, InboundPost, PollContent, RelayHandle};
use crate::utils::string::preview;

/// Maximum number of startup connectivity retries before giving up.
const MAX_STARTUP_RETRIES: u32 = 10;
/// Base delay (in seconds) for exponential backoff on startup retries.
const BASE_RETRY_DELAY_SECS: u64 = 2;
/// Maximum delay (in seconds) for exponential backoff on startup retries.
const MAX_RETRY_DELAY_SECS: u64 = 120;

/// Build a Telegram bot client with system proxy detection disabled.
pub fn build_bot(token: &str) -> Result<Bot> {
    if token.trim().is_empty() {
        return Err(RelayError::Config("Telegram bot token is empty".into()));
    }
    let client = teloxide::net::default_reqwest_settings()
        .no_proxy()
        .build()
        .map_err(|e| RelayError::Channel(format!("Failed to build Telegram HTTP client: {}", e)))?;
    Ok(Bot::with_client(token.trim().to_string(), client))
}

// ---------------------------------------------------------------------------
// Admin commands
// ---------------------------------------------------------------------------

/// Commands accepted from admins in a private chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCommand {
    Status,
    Clear,
}

impl AdminCommand {
    /// Parse the leading command word, tolerating a `@botname` suffix.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let command = word.split('@').next().unwrap_or(word);
        match command {
            "/status" => Some(AdminCommand::Status),
            "/clear" => Some(AdminCommand::Clear),
            _ => None,
        }
    }
}

/// Update filters shared with the dispatcher.
#[derive(Debug, Clone, Default)]
struct InboundFilter {
    source_chat_id: Option<i64>,
    admin_ids: Vec<String>,
}

impl InboundFilter {
    fn from_config(config: &TelegramConfig) -> Self {
        Self {
            source_chat_id: config.source_chat_id,
            admin_ids: config
                .admin_ids
                .iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
        }
    }

    fn accepts_source(&self, chat: ChatId) -> bool {
        self.source_chat_id.is_none_or(|id| id == chat.0)
    }

    /// Private chat with a sender whose id (or `@username`) is listed.
    fn is_admin(&self, msg: &Message) -> bool {
        if !matches!(msg.chat.kind, ChatKind::Private(_)) {
            return false;
        }
        let Some(user) = msg.from.as_ref() else {
            return false;
        };
        let user_id = user.id.0.to_string();
        self.admin_ids.iter().any(|allowed| {
            *allowed == user_id
                || user.username.as_deref().is_some_and(|name| {
                    name.eq_ignore_ascii_case(allowed.strip_prefix('@').unwrap_or(allowed))
                })
        })
    }
}

// ---------------------------------------------------------------------------
// Message mapping
// ---------------------------------------------------------------------------

fn inbound_file(meta: &FileMeta) -> InboundFile {
    InboundFile {
        file_id: meta.id.to_string(),
        mime_type: None,
        file_name: None,
        size: Some(u64::from(meta.size)).filter(|s| *s > 0),
    }
}

/// Map a Telegram message to the transport-neutral post shape.
fn post_from_message(msg: &Message) -> InboundPost {
    InboundPost {
        text: msg.text().map(str::to_string),
        caption: msg.caption().map(str::to_string),
        // Telegram lists photo sizes smallest first.
        photo: msg.photo().and_then(|sizes| sizes.last()).map(|p| inbound_file(&p.file)),
        video: msg.video().map(|v| InboundFile {
            mime_type: v.mime_type.as_ref().map(|m| m.to_string()),
            file_name: v.file_name.clone(),
            ..inbound_file(&v.file)
        }),
        document: msg.document().map(|d| InboundFile {
            mime_type: d.mime_type.as_ref().map(|m| m.to_string()),
            file_name: d.file_name.clone(),
            ..inbound_file(&d.file)
        }),
        sticker: msg.sticker().map(|s| inbound_file(&s.file)),
        voice: msg.voice().map(|v| InboundFile {
            mime_type: v.mime_type.as_ref().map(|m| m.to_string()),
            ..inbound_file(&v.file)
        }),
        poll: msg.poll().map(|p| PollContent {
            question: p.question.clone(),
            options: p.options.iter().map(|o| o.text.clone()).collect(),
            allows_multiple_answers: p.allows_multiple_answers,
        }),
    }
}

fn relay_channel_post(msg: &Message, handle: &RelayHandle, filter: &InboundFilter) {
    if !filter.accepts_source(msg.chat.id) {
        debug!(chat_id = msg.chat.id.0, "Ignoring post from unconfigured chat");
        return;
    }

    match handle.submit(post_from_message(msg)) {
        Ok(Some(job_id)) => info!(
            %job_id,
            chat_id = msg.chat.id.0,
            message_id = msg.id.0,
            preview = %preview(msg.text().or(msg.caption()).unwrap_or_default(), 50),
            "Channel post queued"
        ),
        Ok(None) => debug!(message_id = msg.id.0, "Channel post has nothing to relay"),
        Err(RelayError::Shutdown) => debug!("Relay shutting down, channel post ignored"),
        Err(e) => warn!(message_id = msg.id.0, "Failed to queue channel post: {}", e),
    }
}

async fn handle_admin_message(bot: &Bot, msg: &Message, handle: &RelayHandle, filter: &InboundFilter) {
    let Some(command) = msg.text().and_then(AdminCommand::parse) else {
        return;
    };
    if !filter.is_admin(msg) {
        info!(chat_id = msg.chat.id.0, "Ignoring admin command from non-admin");
        return;
    }

    let reply = match command {
        AdminCommand::Status => serde_json::to_string_pretty(&handle.status())
            .unwrap_or_else(|e| format!("Failed to render status: {}", e)),
        AdminCommand::Clear => {
            let cleared = handle.clear_queue();
            info!(cleared, "Queue cleared by admin");
            format!("Cleared {} pending job(s).", cleared)
        }
    };

    if let Err(e) = bot.send_message(msg.chat.id, reply).await {
        warn!("Failed to reply to admin command: {}", e);
    }
}

// ---------------------------------------------------------------------------
// TelegramInbound
// ---------------------------------------------------------------------------

/// Telegram long-polling adapter feeding a [`RelayHandle`].
pub struct TelegramInbound {
    config: TelegramConfig,
    bot: Bot,
    handle: RelayHandle,
    /// Shared with the polling task so it can clear the flag on exit.
    running: Arc<AtomicBool>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl TelegramInbound {
    pub fn new(config: TelegramConfig, bot: Bot, handle: RelayHandle) -> Self {
        Self {
            config,
            bot,
            handle,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Calculates the exponential backoff delay for a startup retry attempt.
    fn startup_backoff_delay(attempt: u32) -> Duration {
        let delay_secs = BASE_RETRY_DELAY_SECS
            .saturating_mul(2u64.saturating_pow(attempt))
            .min(MAX_RETRY_DELAY_SECS);
        Duration::from_secs(delay_secs)
    }

    /// Spawn the polling task. Returns immediately.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            info!("Telegram inbound already running");
            return Ok(());
        }

        if self.config.token.trim().is_empty() {
            error!("Telegram bot token is empty");
            self.running.store(false, Ordering::SeqCst);
            return Err(RelayError::Config("Telegram bot token is empty".into()));
        }

        info!(
            source_chat_id = ?self.config.source_chat_id,
            admins = self.config.admin_ids.len(),
            "Starting Telegram inbound"
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let bot = self.bot.clone();
        let handle = self.handle.clone();
        let filter = Arc::new(InboundFilter::from_config(&self.config));
        let running = Arc::clone(&self.running);

        tokio::spawn(async move {
            let task_result = std::panic::AssertUnwindSafe(async move {
                // Transient errors (DNS not ready, network still coming up)
                // are retried; API errors such as a bad token are not.
                let mut attempt: u32 = 0;
                loop {
                    match bot.get_me().await {
                        Ok(me) => {
                            info!(bot = %me.username(), "Telegram bot authenticated");
                            break;
                        }
                        Err(e) => {
                            use teloxide::RequestError;

                            let is_transient = matches!(
                                &e,
                                RequestError::Network(_)
                                    | RequestError::Io(_)
                                    | RequestError::RetryAfter(_)
                            );

                            if !is_transient || attempt >= MAX_STARTUP_RETRIES {
                                error!(
                                    "Telegram startup check failed after {} attempt(s): {}",
                                    attempt + 1,
                                    e
                                );
                                return;
                            }

                            let delay = if let RequestError::RetryAfter(d) = &e {
                                d.duration()
                            } else {
                                TelegramInbound::startup_backoff_delay(attempt)
                            };
                            warn!(
                                "Telegram startup check failed (attempt {}/{}), retrying in {}s: {}",
                                attempt + 1,
                                MAX_STARTUP_RETRIES,
                                delay.as_secs(),
                                e
                            );
                            tokio::select! {
                                _ = shutdown_rx.recv() => {
                                    info!("Telegram inbound shutdown during startup retry");
                                    return;
                                }
                                _ = tokio::time::sleep(delay) => {}
                            }
                            attempt += 1;
                        }
                    }
                }

                let handler = dptree::entry()
                    .branch(Update::filter_channel_post().endpoint(
                        |msg: Message, handle: RelayHandle, filter: Arc<InboundFilter>| async move {
                            relay_channel_post(&msg, &handle, &filter);
                            respond(())
                        },
                    ))
                    .branch(Update::filter_message().endpoint(
                        |bot: Bot,
                         msg: Message,
                         handle: RelayHandle,
                         filter: Arc<InboundFilter>| async move {
                            handle_admin_message(&bot, &msg, &handle, &filter).await;
                            respond(())
                        },
                    ));

                let mut dispatcher = Dispatcher::builder(bot, handler)
                    .dependencies(dptree::deps![handle, filter])
                    .default_handler(|_| async {})
                    .build();

                info!("Telegram dispatcher started, waiting for channel posts...");

                tokio::select! {
                    _ = dispatcher.dispatch() => {
                        info!("Telegram dispatcher completed");
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Telegram inbound shutdown signal received");
                    }
                }
            })
            .catch_unwind()
            .await;

            if task_result.is_err() {
                error!("Telegram polling task panicked");
            }

            running.store(false, Ordering::SeqCst);
            info!("Telegram polling task stopped");
        });

        Ok(())
    }

    /// Signal the polling task to stop.
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            info!("Telegram inbound already stopped");
            return Ok(());
        }

        if let Some(tx) = self.shutdown_tx.take() {
            if tx.send(()).await.is_err() {
                warn!("Telegram shutdown channel already closed");
            }
        }

        info!("Telegram inbound stopped");
        Ok(())
    }
}
