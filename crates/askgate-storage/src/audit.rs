//! Audit Log Sink: one append-only JSON list per provider identity.
//!
//! Appends never fail the caller. Errors are logged and swallowed because
//! audit logging must not affect a user-facing request.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, error, warn};

use askgate_core::error::{AskgateError, Result};
use askgate_core::types::ProviderLogEntry;

use crate::fs::{read_json, storage_key, write_json_atomic};
use crate::locks::KeyedLocks;

/// Per-provider audit log stored under `root/provider_logs/<provider>.json`.
pub struct AuditLogSink {
    logs_dir: PathBuf,
    locks: KeyedLocks,
}

impl AuditLogSink {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            logs_dir: root.as_ref().join("provider_logs"),
            locks: KeyedLocks::new(),
        }
    }

    /// Append `entry` to the provider's log. Failures are logged, not returned.
    pub async fn append(&self, provider: &str, entry: ProviderLogEntry) {
        if let Err(e) = self.try_append(provider, entry).await {
            error!(provider, error = %e, "Failed to append provider log entry");
        }
    }

    /// Append `entry`, reporting any failure to the caller.
    pub async fn try_append(&self, provider: &str, entry: ProviderLogEntry) -> Result<()> {
        let key = storage_key(provider);
        let path = self.log_path(&key);
        let _guard = self.locks.acquire(&key).await;

        let mut entries = match read_json::<Vec<ProviderLogEntry>>(&path).await {
            Ok(Some(list)) => list,
            Ok(None) => Vec::new(),
            Err(AskgateError::Serialization(msg)) => {
                warn!(provider, error = %msg, "Provider log unreadable; starting a new one");
                self.quarantine(&path).await;
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        entries.push(entry);
        write_json_atomic(&path, &entries).await?;
        debug!(provider, entries = entries.len(), "Provider log appended");
        Ok(())
    }

    /// Read every entry logged for `provider`, oldest first.
    pub async fn entries(&self, provider: &str) -> Result<Vec<ProviderLogEntry>> {
        let path = self.log_path(&storage_key(provider));
        Ok(read_json(&path).await?.unwrap_or_default())
    }

    fn log_path(&self, key: &str) -> PathBuf {
        self.logs_dir.join(format!("{}.json", key))
    }

    /// Move a corrupt log aside so it can be inspected instead of overwritten.
    async fn quarantine(&self, path: &Path) {
        let aside = path.with_extension(format!("corrupt-{}.json", Utc::now().timestamp_millis()));
        if let Err(e) = tokio::fs::rename(path, &aside).await {
            warn!(path = %path.display(), error = %e, "Could not move corrupt provider log aside");
        }
    }
}
