//! Telegram file download through the Bot API.

use async_trait::async_trait;
use futures::StreamExt;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::FileId;
use teloxide::RequestError;

use crate::error::MediaError;

use super::MediaFetcher;

/// Fetches channel attachments with `getFile` and a streamed download.
#[derive(Clone)]
pub struct TelegramFileFetcher {
    bot: Bot,
}

impl TelegramFileFetcher {
    pub fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

/// API errors mean the file id is unusable; anything else may succeed later.
fn classify(file_id: &str, err: RequestError) -> MediaError {
    match err {
        RequestError::Api(api) => MediaError::NotFound(format!("{} ({})", file_id, api)),
        other => MediaError::DownloadFailed(other.to_string()),
    }
}

#[async_trait]
impl MediaFetcher for TelegramFileFetcher {
    async fn fetch(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, MediaError> {
        let file = self
            .bot
            .get_file(FileId(file_id.to_string()))
            .await
            .map_err(|e| classify(file_id, e))?;

        let reported = file.size as u64;
        if reported > max_bytes {
            return Err(MediaError::TooLarge {
                size: reported,
                limit: max_bytes,
            });
        }

        let mut buf = Vec::with_capacity(reported as usize);
        let mut stream = self.bot.download_file_stream(&file.path);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| MediaError::DownloadFailed(e.to_string()))?;
            let size = (buf.len() + chunk.len()) as u64;
            if size > max_bytes {
                return Err(MediaError::TooLarge {
                    size,
                    limit: max_bytes,
                });
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(buf)
    }
}
