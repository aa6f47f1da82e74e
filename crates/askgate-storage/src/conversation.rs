//! Conversation Store: one JSON document per (owner, session).
//!
//! Directory structure:
//! ```text
//! root/
//! └── sessions/
//!     └── student%40uni.edu/
//!         ├── 1718000000000-a1b2c3d4.json
//!         └── 1718000500000-e5f6a7b8.json
//! ```
//!
//! Owner directories are named with [`storage_key`]. Reads also check the
//! record's `owner_email`, so a file never reaches anyone but its owner.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, warn};

use askgate_core::error::{AskgateError, Result};
use askgate_core::types::{derive_session_name, Message, Session, SessionSummary};

use crate::fs::{is_valid_session_id, read_json, storage_key, write_json_atomic};
use crate::locks::KeyedLocks;

/// File-backed, append-only session history.
pub struct ConversationStore {
    sessions_dir: PathBuf,
    locks: KeyedLocks,
}

impl ConversationStore {
    /// Create a store rooted at `root`; sessions live under `root/sessions`.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            sessions_dir: root.as_ref().join("sessions"),
            locks: KeyedLocks::new(),
        }
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    /// Write a new, empty session record.
    ///
    /// An existing record for the same id is never overwritten; it is
    /// returned unchanged instead.
    pub async fn create_session(
        &self,
        owner: &str,
        session_id: &str,
        name: &str,
    ) -> Result<Session> {
        let path = self.session_path(owner, session_id)?;
        let _guard = self.locks.acquire(&lock_key(owner, session_id)).await;

        if let Some(existing) = read_json::<Session>(&path).await? {
            warn!(owner, session_id, "Session already exists; keeping existing record");
            return Ok(existing);
        }

        let session = Session::new(owner, session_id, name);
        write_json_atomic(&path, &session).await?;
        debug!(owner, session_id, name, "Session created");
        Ok(session)
    }

    /// Append `message` to the session, creating the record if it is missing.
    pub async fn append_message(
        &self,
        owner: &str,
        session_id: &str,
        message: Message,
    ) -> Result<Session> {
        let path = self.session_path(owner, session_id)?;
        let _guard = self.locks.acquire(&lock_key(owner, session_id)).await;

        let mut session = match read_json::<Session>(&path).await? {
            Some(s) => s,
            None => {
                debug!(owner, session_id, "No session record; synthesizing one for append");
                Session::new(owner, session_id, derive_session_name(&message.question))
            }
        };

        session.messages.push(message);
        session.updated_at = Utc::now();
        write_json_atomic(&path, &session).await?;
        debug!(
            owner,
            session_id,
            messages = session.messages.len(),
            "Message appended"
        );
        Ok(session)
    }

    /// List the owner's sessions, newest first by creation time.
    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>> {
        let dir = self.sessions_dir.join(storage_key(owner));
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Session>(&path).await {
                Ok(Some(session)) if owned_by(&session, owner) => {
                    summaries.push(session.summary())
                }
                Ok(Some(session)) => {
                    warn!(
                        path = %path.display(),
                        owner_email = %session.owner_email,
                        "Skipping session owned by someone else"
                    )
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable session file")
                }
            }
        }

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    /// Load a full session record.
    pub async fn get_session(&self, owner: &str, session_id: &str) -> Result<Session> {
        if !is_valid_session_id(session_id) {
            return Err(not_found(owner, session_id));
        }
        let path = self.session_path(owner, session_id)?;
        match read_json::<Session>(&path).await? {
            Some(session) if owned_by(&session, owner) => Ok(session),
            Some(session) => {
                warn!(
                    owner,
                    session_id,
                    owner_email = %session.owner_email,
                    "Session record belongs to another owner"
                );
                Err(not_found(owner, session_id))
            }
            None => Err(not_found(owner, session_id)),
        }
    }

    fn session_path(&self, owner: &str, session_id: &str) -> Result<PathBuf> {
        if !is_valid_session_id(session_id) {
            return Err(AskgateError::Validation(format!(
                "invalid session id '{}'",
                session_id
            )));
        }
        Ok(self
            .sessions_dir
            .join(storage_key(owner))
            .join(format!("{}.json", session_id)))
    }
}

fn owned_by(session: &Session, owner: &str) -> bool {
    session.owner_email.trim().to_lowercase() == owner.trim().to_lowercase()
}

fn lock_key(owner: &str, session_id: &str) -> String {
    format!("{}/{}", storage_key(owner), session_id)
}

fn not_found(owner: &str, session_id: &str) -> AskgateError {
    AskgateError::NotFound(format!("session '{}' for {}", session_id, owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const OWNER: &str = "student@uni.edu";

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path());
        (dir, store)
    }

    fn message(question: &str, answer: &str) -> Message {
        let mut m = Message::assistant(question, answer);
        m.stores_used = vec!["library".to_string()];
        m
    }

    #[tokio::test]
    async fn test_create_then_get_empty_session() {
        let (_dir, store) = store();
        store.create_session(OWNER, "s-1", "Library hours").await.unwrap();

        let session = store.get_session(OWNER, "s-1").await.unwrap();
        assert_eq!(session.session_name, "Library hours");
        assert_eq!(session.owner_email, OWNER);
        assert!(session.messages.is_empty());
    }

    #[tokio::test]
    async fn test_append_round_trip_preserves_fields() {
        let (_dir, store) = store();
        store.create_session(OWNER, "s-1", "q").await.unwrap();

        let m = message("When does the library open?", "8am-10pm");
        store.append_message(OWNER, "s-1", m.clone()).await.unwrap();

        let session = store.get_session(OWNER, "s-1").await.unwrap();
        assert_eq!(session.messages, vec![m]);
    }

    #[tokio::test]
    async fn test_append_keeps_insertion_order() {
        let (_dir, store) = store();
        store.create_session(OWNER, "s-1", "q").await.unwrap();

        let m1 = message("first", "one");
        let m2 = message("second", "two");
        store.append_message(OWNER, "s-1", m1.clone()).await.unwrap();
        store.append_message(OWNER, "s-1", m2.clone()).await.unwrap();

        let session = store.get_session(OWNER, "s-1").await.unwrap();
        assert_eq!(session.messages, vec![m1, m2]);
        assert!(session.updated_at >= session.created_at);
    }

    #[tokio::test]
    async fn test_append_without_create_synthesizes_session() {
        let (_dir, store) = store();
        let q = "Where can I find the admissions office on the main campus today";
        store.append_message(OWNER, "s-9", message(q, "Hall A")).await.unwrap();

        let session = store.get_session(OWNER, "s-9").await.unwrap();
        assert_eq!(
            session.session_name,
            "Where can I find the admissions office on the main..."
        );
        assert_eq!(session.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_create_does_not_overwrite_existing() {
        let (_dir, store) = store();
        store.create_session(OWNER, "s-1", "original").await.unwrap();
        store.append_message(OWNER, "s-1", message("q", "a")).await.unwrap();

        let again = store.create_session(OWNER, "s-1", "replacement").await.unwrap();
        assert_eq!(again.session_name, "original");
        assert_eq!(again.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_session_is_not_found() {
        let (_dir, store) = store();
        let err = store.get_session(OWNER, "nope").await.unwrap_err();
        assert!(matches!(err, AskgateError::NotFound(_)));

        let err = store.get_session(OWNER, "../../etc/passwd").await.unwrap_err();
        assert!(matches!(err, AskgateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_append_rejects_unsafe_session_id() {
        let (_dir, store) = store();
        let err = store
            .append_message(OWNER, "../escape", message("q", "a"))
            .await
            .unwrap_err();
        assert!(matches!(err, AskgateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_sessions_newest_first_and_scoped_to_owner() {
        let (_dir, store) = store();
        store.create_session(OWNER, "older", "Older").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        store.create_session(OWNER, "newer", "Newer").await.unwrap();
        store
            .create_session("someone@uni.edu", "other", "Other")
            .await
            .unwrap();

        let list = store.list_sessions(OWNER).await.unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["newer", "older"]);
        assert_eq!(list[0].session_name, "Newer");
    }

    #[tokio::test]
    async fn test_lookalike_owners_do_not_share_history() {
        let (_dir, store) = store();
        store
            .create_session("alice+1@uni.edu", "s-1", "Plus")
            .await
            .unwrap();
        store
            .append_message("alice+1@uni.edu", "s-1", message("private", "plus only"))
            .await
            .unwrap();

        assert!(store.list_sessions("alice_1@uni.edu").await.unwrap().is_empty());
        let err = store.get_session("alice_1@uni.edu", "s-1").await.unwrap_err();
        assert!(matches!(err, AskgateError::NotFound(_)));

        store
            .create_session("alice_1@uni.edu", "s-1", "Underscore")
            .await
            .unwrap();
        let plus = store.get_session("alice+1@uni.edu", "s-1").await.unwrap();
        let underscore = store.get_session("alice_1@uni.edu", "s-1").await.unwrap();
        assert_eq!(plus.session_name, "Plus");
        assert_eq!(plus.messages.len(), 1);
        assert_eq!(underscore.session_name, "Underscore");
        assert!(underscore.messages.is_empty());
    }

    #[tokio::test]
    async fn test_record_with_foreign_owner_is_hidden() {
        let (_dir, store) = store();
        store.create_session("mallory@uni.edu", "s-1", "Theirs").await.unwrap();

        // A record under this owner's directory that names someone else.
        let foreign = store
            .sessions_dir()
            .join("mallory%40uni.edu")
            .join("s-1.json");
        let target = store.sessions_dir().join(storage_key(OWNER)).join("s-1.json");
        tokio::fs::create_dir_all(target.parent().unwrap()).await.unwrap();
        tokio::fs::copy(&foreign, &target).await.unwrap();

        assert!(store.list_sessions(OWNER).await.unwrap().is_empty());
        let err = store.get_session(OWNER, "s-1").await.unwrap_err();
        assert!(matches!(err, AskgateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_owner_lookup_ignores_case() {
        let (_dir, store) = store();
        store.create_session("Student@Uni.edu", "s-1", "Mixed").await.unwrap();
        assert_eq!(store.list_sessions(OWNER).await.unwrap().len(), 1);
        assert!(store.get_session(OWNER, "s-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_list_sessions_unknown_owner_is_empty() {
        let (_dir, store) = store();
        assert!(store.list_sessions("ghost@uni.edu").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_appends_lose_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ConversationStore::new(dir.path()));
        store.create_session(OWNER, "busy", "busy").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .append_message(OWNER, "busy", message(&format!("q{}", i), "a"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let session = store.get_session(OWNER, "busy").await.unwrap();
        assert_eq!(session.messages.len(), 20);
    }
}
