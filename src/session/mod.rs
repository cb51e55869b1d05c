//! WhatsApp session persistence.
//!
//! The bridge keeps its login state in an auth directory. To survive
//! redeploys without a new QR scan, that directory is zipped into a blob and
//! saved to a [`SessionStore`]:
//!
//! - at startup the blob is restored if the directory is missing,
//! - after each successful authentication a backup runs in the background,
//! - a periodic task backs up again on an interval.
//!
//! Backup failures are logged and never touch the delivery path.

pub mod archive;
mod backup;
mod store;

pub use backup::SessionBackup;
pub use store::{from_config, EnvSessionStore, FileSessionStore, HttpSessionStore, SessionStore};
