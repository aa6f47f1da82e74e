//! Session Query Service: read-only views over conversation history.

use std::sync::Arc;

use askgate_core::error::AskgateError;
use askgate_core::types::{Session, SessionSummary};
use askgate_storage::ConversationStore;

use crate::error::ChatError;

pub struct SessionQueryService {
    store: Arc<ConversationStore>,
}

impl SessionQueryService {
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self { store }
    }

    /// The owner's sessions, newest first.
    pub async fn list_sessions(&self, owner: &str) -> Result<Vec<SessionSummary>, ChatError> {
        let owner = required_owner(owner)?;
        Ok(self.store.list_sessions(owner).await?)
    }

    pub async fn get_session(&self, owner: &str, session_id: &str) -> Result<Session, ChatError> {
        let owner = required_owner(owner)?;
        self.store
            .get_session(owner, session_id)
            .await
            .map_err(|e| match e {
                AskgateError::NotFound(_) => ChatError::SessionNotFound {
                    owner: owner.to_string(),
                    session_id: session_id.to_string(),
                },
                other => other.into(),
            })
    }
}

fn required_owner(owner: &str) -> Result<&str, ChatError> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(ChatError::Validation("ownerEmail is required".to_string()));
    }
    Ok(owner)
}
