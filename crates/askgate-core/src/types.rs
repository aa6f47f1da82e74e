use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of question words kept in a derived session name.
pub const SESSION_NAME_MAX_WORDS: usize = 10;

/// Marker appended to a session name that was cut short.
pub const SESSION_NAME_ELLIPSIS: &str = "...";

/// Provider identity recorded when a store's owner cannot be resolved.
pub const UNKNOWN_PROVIDER: &str = "unknown";

// =============================================================================
// Conversation history
// =============================================================================

/// Who authored a logged message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The gateway's final answer to a question.
    #[default]
    Assistant,
}

/// A piece of evidence returned by a knowledge store alongside its answer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingChunk {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl GroundingChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            title: None,
            uri: None,
        }
    }
}

/// A question fragment no accessible store can address.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnansweredPart {
    pub text: String,
    #[serde(default)]
    pub reason: String,
}

/// One logged exchange. Immutable once appended to a session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default)]
    pub role: MessageRole,
    pub question: String,
    pub answer: String,
    #[serde(default)]
    pub stores_used: Vec<String>,
    #[serde(default)]
    pub grounding: Vec<GroundingChunk>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unresolved_parts: Option<Vec<UnansweredPart>>,
    /// Provider whose store was searched without producing an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searched_in: Option<String>,
}

impl Message {
    /// Build an assistant message stamped with the current time.
    pub fn assistant(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            question: question.into(),
            answer: answer.into(),
            stores_used: Vec::new(),
            grounding: Vec::new(),
            timestamp: Utc::now(),
            unresolved_parts: None,
            searched_in: None,
        }
    }
}

/// A named, ordered conversation thread between one user and the gateway.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub session_name: String,
    pub owner_email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Session {
    /// Create an empty session record.
    pub fn new(
        owner_email: impl Into<String>,
        session_id: impl Into<String>,
        session_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            session_name: session_name.into(),
            owner_email: owner_email.into(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.session_id.clone(),
            session_name: self.session_name.clone(),
            created_at: self.created_at,
        }
    }
}

/// Listing projection of a session for chat-history views.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub session_name: String,
    pub created_at: DateTime<Utc>,
}

/// Derive a session's display name from its first question.
///
/// Questions of up to ten words are used verbatim; longer ones keep the
/// first ten words joined by single spaces plus a trailing ellipsis.
pub fn derive_session_name(question: &str) -> String {
    let words: Vec<&str> = question.split_whitespace().collect();
    if words.len() <= SESSION_NAME_MAX_WORDS {
        return question.trim().to_string();
    }
    format!(
        "{}{}",
        words[..SESSION_NAME_MAX_WORDS].join(" "),
        SESSION_NAME_ELLIPSIS
    )
}

// =============================================================================
// Classification
// =============================================================================

/// Partition of a question across the stores offered to the classifier.
///
/// Transient: lives for one request only.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Selected stores, in the order the classifier emitted them. Required:
    /// an object without it is not a classification.
    pub stores: Vec<String>,
    /// Rewritten sub-question per store, only where it differs from the original.
    #[serde(default, alias = "splitQuestions")]
    pub split_questions: BTreeMap<String, String>,
    #[serde(default)]
    pub unanswered: Vec<UnansweredPart>,
}

impl ClassificationResult {
    /// Select every offered store with no splitting and nothing unanswered.
    pub fn all_stores(store_names: &[String]) -> Self {
        Self {
            stores: store_names.to_vec(),
            split_questions: BTreeMap::new(),
            unanswered: Vec::new(),
        }
    }

    /// The question to send to `store`: its rewrite if present, else `original`.
    pub fn question_for<'a>(&'a self, store: &str, original: &'a str) -> &'a str {
        self.split_questions
            .get(store)
            .map(String::as_str)
            .unwrap_or(original)
    }
}

// =============================================================================
// Audit log
// =============================================================================

/// One audit record per (provider, question routed to that provider's store).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderLogEntry {
    pub id: Uuid,
    pub provider_identity: String,
    pub user_email: String,
    pub store_name: String,
    pub question_sent_to_store: String,
    /// `None` when the store produced no answer.
    pub response: Option<String>,
    #[serde(default)]
    pub grounding: Vec<GroundingChunk>,
    pub asked_at: DateTime<Utc>,
}

// =============================================================================
// Accounts (read-only, owned outside the ask pipeline)
// =============================================================================

/// A knowledge store the account may query, and the provider that owns it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessibleStore {
    pub store_name: String,
    pub account_email: String,
}

/// An end-user account as seen by the gateway.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub email: String,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub accessible_stores: Vec<AccessibleStore>,
}

impl Account {
    pub fn store_names(&self) -> Vec<String> {
        self.accessible_stores
            .iter()
            .map(|s| s.store_name.clone())
            .collect()
    }

    /// Provider identity owning `store_name`, or [`UNKNOWN_PROVIDER`].
    pub fn provider_for(&self, store_name: &str) -> String {
        self.accessible_stores
            .iter()
            .find(|s| s.store_name == store_name)
            .map(|s| s.account_email.clone())
            .unwrap_or_else(|| UNKNOWN_PROVIDER.to_string())
    }
}

/// An organization and the credential it serves retrieval requests with.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub serving_credential: Option<String>,
}
