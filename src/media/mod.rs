//! Media resolution.
//!
//! Jobs carrying photos, videos, documents, stickers or voice notes hold a
//! [`MediaRef`] until the dispatch loop sends them. [`MediaResolver`] turns
//! that reference into bytes through a [`MediaFetcher`], enforcing the
//! configured size limit and fetch timeout.

pub mod telegram;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::MediaConfig;
use crate::error::MediaError;
use crate::relay::{MediaRef, ResolvedMedia};

pub use telegram::TelegramFileFetcher;

/// Downloads a file from the inbound transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch the file `file_id`.
    ///
    /// Implementations should stop reading once `max_bytes` is exceeded and
    /// return [`MediaError::TooLarge`].
    async fn fetch(&self, file_id: &str, max_bytes: u64) -> Result<Vec<u8>, MediaError>;
}

/// Resolves [`MediaRef`]s into [`ResolvedMedia`].
#[derive(Clone)]
pub struct MediaResolver {
    fetcher: Arc<dyn MediaFetcher>,
    max_bytes: u64,
    timeout: Duration,
}

impl std::fmt::Debug for MediaResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaResolver")
            .field("max_bytes", &self.max_bytes)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl MediaResolver {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, config: &MediaConfig) -> Self {
        Self {
            fetcher,
            max_bytes: config.max_bytes,
            timeout: config.fetch_timeout(),
        }
    }

    /// Download the referenced media.
    pub async fn resolve(&self, media: &MediaRef) -> Result<ResolvedMedia, MediaError> {
        if let Some(size) = media.size_hint {
            if size > self.max_bytes {
                return Err(MediaError::TooLarge {
                    size,
                    limit: self.max_bytes,
                });
            }
        }

        let bytes = tokio::time::timeout(
            self.timeout,
            self.fetcher.fetch(&media.source_id, self.max_bytes),
        )
        .await
        .map_err(|_| MediaError::Timeout(self.timeout))??;

        let size = bytes.len() as u64;
        if size > self.max_bytes {
            return Err(MediaError::TooLarge {
                size,
                limit: self.max_bytes,
            });
        }

        debug!(
            file_id = %media.source_id,
            kind = ?media.kind,
            size,
            "Media resolved"
        );

        Ok(ResolvedMedia {
            kind: media.kind,
            bytes,
            mime: media
                .mime_hint
                .clone()
                .unwrap_or_else(|| media.kind.default_mime().to_string()),
            filename: media.filename.clone(),
            caption: media.caption.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MediaKind;

    fn resolver(fetcher: impl MediaFetcher + 'static, max_bytes: u64) -> MediaResolver {
        MediaResolver::new(
            Arc::new(fetcher),
            &MediaConfig {
                max_bytes,
                fetch_timeout_secs: 1,
            },
        )
    }

    #[tokio::test]
    async fn test_resolve_success_fills_defaults() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|id, _| id == "ph1")
            .times(1)
            .returning(|_, _| Ok(vec![0xff, 0xd8, 0xff]));

        let media = MediaRef::new(MediaKind::Photo, "ph1").with_caption("hello");
        let resolved = resolver(fetcher, 1024).resolve(&media).await.unwrap();

        assert_eq!(resolved.bytes.len(), 3);
        assert_eq!(resolved.mime, "image/jpeg");
        assert_eq!(resolved.caption.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_resolve_keeps_mime_hint() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().returning(|_, _| Ok(vec![1]));

        let media = MediaRef::new(MediaKind::Document, "d")
            .with_mime("application/pdf")
            .with_filename("a.pdf");
        let resolved = resolver(fetcher, 1024).resolve(&media).await.unwrap();
        assert_eq!(resolved.mime, "application/pdf");
        assert_eq!(resolved.filename.as_deref(), Some("a.pdf"));
    }

    #[tokio::test]
    async fn test_size_hint_rejected_before_download() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().never();

        let media = MediaRef::new(MediaKind::Video, "v").with_size(2048);
        let err = resolver(fetcher, 1024).resolve(&media).await.unwrap_err();
        assert_eq!(
            err,
            MediaError::TooLarge {
                size: 2048,
                limit: 1024
            }
        );
    }

    #[tokio::test]
    async fn test_oversized_download_rejected() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher.expect_fetch().returning(|_, _| Ok(vec![0u8; 10]));

        let media = MediaRef::new(MediaKind::Voice, "v");
        let err = resolver(fetcher, 4).resolve(&media).await.unwrap_err();
        assert!(matches!(err, MediaError::TooLarge { size: 10, limit: 4 }));
    }

    #[tokio::test]
    async fn test_fetch_error_passes_through() {
        let mut fetcher = MockMediaFetcher::new();
        fetcher
            .expect_fetch()
            .returning(|id, _| Err(MediaError::NotFound(id.to_string())));

        let media = MediaRef::new(MediaKind::Sticker, "gone");
        let err = resolver(fetcher, 1024).resolve(&media).await.unwrap_err();
        assert_eq!(err, MediaError::NotFound("gone".into()));
    }

    struct StalledFetcher;

    #[async_trait]
    impl MediaFetcher for StalledFetcher {
        async fn fetch(&self, _file_id: &str, _max_bytes: u64) -> Result<Vec<u8>, MediaError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let media = MediaRef::new(MediaKind::Photo, "slow");
        let err = resolver(StalledFetcher, 1024)
            .resolve(&media)
            .await
            .unwrap_err();
        assert_eq!(err, MediaError::Timeout(Duration::from_secs(1)));
    }
}
