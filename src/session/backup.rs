//! Session backup and restore around a [`SessionStore`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RelayError, Result};

use super::{archive, SessionStore};

/// Moves the bridge auth directory in and out of a session store.
pub struct SessionBackup {
    store: Arc<dyn SessionStore>,
    auth_dir: PathBuf,
    interval: Duration,
    in_flight: AtomicBool,
}

impl SessionBackup {
    pub fn new(
        store: Arc<dyn SessionStore>,
        auth_dir: impl Into<PathBuf>,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            auth_dir: auth_dir.into(),
            interval,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn auth_dir(&self) -> &Path {
        &self.auth_dir
    }

    fn has_local_session(&self) -> bool {
        std::fs::read_dir(&self.auth_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }

    /// Restore the stored session when the auth directory is absent or empty.
    ///
    /// Returns `true` when files were restored.
    pub async fn restore_if_missing(&self) -> Result<bool> {
        if self.has_local_session() {
            debug!(dir = %self.auth_dir.display(), "Local session present, skipping restore");
            return Ok(false);
        }

        let Some(blob) = self.store.load().await? else {
            info!(store = self.store.name(), "No stored session, pairing will be required");
            return Ok(false);
        };

        let files = archive::unpack(blob, self.auth_dir.clone()).await?;
        info!(
            store = self.store.name(),
            files,
            dir = %self.auth_dir.display(),
            "Session restored"
        );
        Ok(true)
    }

    /// Pack the auth directory and save it. Returns the blob size, or 0 when
    /// there was nothing to save.
    pub async fn backup_now(&self) -> Result<usize> {
        if !self.store.writable() {
            debug!(store = self.store.name(), "Session store is read-only, skipping backup");
            return Ok(0);
        }
        if !self.has_local_session() {
            debug!(dir = %self.auth_dir.display(), "No local session to back up");
            return Ok(0);
        }
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Session backup already running");
            return Ok(0);
        }

        let result = async {
            let blob = archive::pack(self.auth_dir.clone()).await?;
            self.store.save(&blob).await?;
            Ok::<_, RelayError>(blob.len())
        }
        .await;
        self.in_flight.store(false, Ordering::SeqCst);

        if let Ok(bytes) = result {
            info!(store = self.store.name(), bytes, "Session backed up");
        }
        result
    }

    /// Fire-and-forget backup; failures are only logged.
    pub fn backup_in_background(self: &Arc<Self>) {
        let backup = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = backup.backup_now().await {
                warn!("Session backup failed: {}", e);
            }
        });
    }

    /// Back up every `interval` until shutdown. `None` when periodic backup
    /// is disabled or the store cannot be written.
    pub fn spawn_periodic(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() || !self.store.writable() {
            return None;
        }
        let backup = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(backup.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = backup.backup_now().await {
                            warn!("Periodic session backup failed: {}", e);
                        }
                    }
                    Ok(()) = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Periodic session backup stopped");
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{EnvSessionStore, FileSessionStore};
    use tempfile::TempDir;

    fn backup_for(tmp: &TempDir) -> (SessionBackup, PathBuf) {
        let auth = tmp.path().join("auth");
        let store = Arc::new(FileSessionStore::new(tmp.path().join("store/session.zip")));
        (SessionBackup::new(store, &auth, Duration::ZERO), auth)
    }

    #[tokio::test]
    async fn test_backup_then_restore() {
        let tmp = TempDir::new().unwrap();
        let (backup, auth) = backup_for(&tmp);

        std::fs::create_dir_all(&auth).unwrap();
        std::fs::write(auth.join("creds.json"), b"secret").unwrap();
        assert!(backup.backup_now().await.unwrap() > 0);

        std::fs::remove_dir_all(&auth).unwrap();
        assert!(backup.restore_if_missing().await.unwrap());
        assert_eq!(std::fs::read(auth.join("creds.json")).unwrap(), b"secret");
    }

    #[tokio::test]
    async fn test_restore_skipped_when_local_session_exists() {
        let tmp = TempDir::new().unwrap();
        let (backup, auth) = backup_for(&tmp);
        std::fs::create_dir_all(&auth).unwrap();
        std::fs::write(auth.join("creds.json"), b"local").unwrap();

        assert!(!backup.restore_if_missing().await.unwrap());
    }

    #[tokio::test]
    async fn test_restore_with_empty_store() {
        let tmp = TempDir::new().unwrap();
        let (backup, _) = backup_for(&tmp);
        assert!(!backup.restore_if_missing().await.unwrap());
    }

    #[tokio::test]
    async fn test_backup_without_local_session_is_noop() {
        let tmp = TempDir::new().unwrap();
        let (backup, _) = backup_for(&tmp);
        assert_eq!(backup.backup_now().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_only_store_skips_backup_and_periodic() {
        let tmp = TempDir::new().unwrap();
        let auth = tmp.path().join("auth");
        std::fs::create_dir_all(&auth).unwrap();
        std::fs::write(auth.join("creds.json"), b"x").unwrap();
        let backup = Arc::new(SessionBackup::new(
            Arc::new(EnvSessionStore::new("TGWA_TEST_SESSION_BLOB_UNSET_91C2")),
            &auth,
            Duration::from_secs(60),
        ));

        assert_eq!(backup.backup_now().await.unwrap(), 0);
        let (_tx, rx) = watch::channel(false);
        assert!(backup.spawn_periodic(rx).is_none());
    }

    #[tokio::test]
    async fn test_periodic_backup_stops_on_shutdown() {
        let tmp = TempDir::new().unwrap();
        let auth = tmp.path().join("auth");
        let store = Arc::new(FileSessionStore::new(tmp.path().join("s.zip")));
        let backup = Arc::new(SessionBackup::new(store, &auth, Duration::from_millis(10)));

        let (tx, rx) = watch::channel(false);
        let task = backup.spawn_periodic(rx).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
