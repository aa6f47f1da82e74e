//! Request and response shapes of the ask pipeline.

use serde::{Deserialize, Serialize};

use askgate_core::types::{GroundingChunk, UnansweredPart};

/// An inbound question. Fields are optional so missing ones can be reported
/// as validation errors rather than deserialization failures.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskRequest {
    #[serde(default)]
    pub owner_email: Option<String>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AskRequest {
    pub fn new(owner_email: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            owner_email: Some(owner_email.into()),
            question: Some(question.into()),
            session_id: None,
        }
    }

    pub fn in_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// The answer returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AskResponse {
    pub session_id: String,
    pub answer: String,
    pub stores_used: Vec<String>,
    pub grounding: Vec<GroundingChunk>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unanswered: Option<Vec<UnansweredPart>>,
}
