//! JSON document helpers: filesystem-safe keys, tolerant loads, atomic saves.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use askgate_core::error::{AskgateError, Result};

/// Longest session id accepted before touching disk.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Map an arbitrary identity (usually an email) to a single safe path segment.
///
/// The identity is trimmed, lowercased and percent-encoded, so distinct
/// identities always get distinct keys. A leading `.` is encoded as well so
/// the result is never hidden or `..`.
pub fn storage_key(raw: &str) -> String {
    let mut key = urlencoding::encode(&raw.trim().to_lowercase()).into_owned();
    if key.is_empty() {
        key.push('%');
    }
    if key.starts_with('.') {
        key.replace_range(0..1, "%2E");
    }
    key
}

/// Session ids come from clients, so only `[A-Za-z0-9_-]` is allowed.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Load a JSON document. A missing or empty file is `Ok(None)`; any other
/// content that is not valid JSON, including invalid UTF-8, is
/// `AskgateError::Serialization`.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    // Undecodable bytes surface as a serialization error, same as bad JSON.
    let value = serde_json::from_slice(&bytes)?;
    Ok(Some(value))
}

/// Write a JSON document through a sibling temp file and an atomic rename.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| AskgateError::Storage(format!("no parent dir for {}", path.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = tmp_path(path);

    let mut file = tokio::fs::File::create(&tmp).await?;
    file.write_all(&bytes).await?;
    file.sync_all().await?;
    drop(file);

    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(AskgateError::Storage(format!(
            "failed to replace {}: {}",
            path.display(),
            e
        )));
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
    path.with_file_name(name)
}
