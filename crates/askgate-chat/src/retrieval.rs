//! Retrieval Adapter: asks one knowledge store one question.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use askgate_core::config::RetrievalConfig;
use askgate_core::types::GroundingChunk;

/// A store's answer and the evidence it cited.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalAnswer {
    pub answer_text: String,
    pub grounding: Vec<GroundingChunk>,
}

impl RetrievalAnswer {
    pub fn new(answer_text: impl Into<String>) -> Self {
        Self {
            answer_text: answer_text.into(),
            grounding: Vec::new(),
        }
    }

    pub fn with_grounding(mut self, grounding: Vec<GroundingChunk>) -> Self {
        self.grounding = grounding;
        self
    }

    /// Whether the answer carries any text a user could read.
    pub fn is_usable(&self) -> bool {
        !self.answer_text.trim().is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    #[error("retrieval request failed: {0}")]
    Transport(String),
    #[error("retrieval service returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("malformed retrieval response: {0}")]
    Malformed(String),
    #[error("store produced no answer")]
    NoAnswer,
}

/// Queries a single knowledge store.
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    async fn query(
        &self,
        credential: Option<&str>,
        store_name: &str,
        question: &str,
    ) -> Result<RetrievalAnswer, RetrievalError>;
}

/// Retrieval backend that posts `{store, question}` to a query endpoint.
#[derive(Clone)]
pub struct HttpRetrievalBackend {
    client: Client,
    endpoint: String,
}

impl HttpRetrievalBackend {
    pub fn new(config: &RetrievalConfig) -> Result<Self, RetrievalError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl RetrievalBackend for HttpRetrievalBackend {
    async fn query(
        &self,
        credential: Option<&str>,
        store_name: &str,
        question: &str,
    ) -> Result<RetrievalAnswer, RetrievalError> {
        let mut request = self.client.post(&self.endpoint).json(&QueryRequest {
            store: store_name,
            question,
        });
        if let Some(credential) = credential {
            request = request.bearer_auth(credential);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RetrievalError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(RetrievalError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Malformed(e.to_string()))?;
        body.into_answer()
    }
}

#[derive(Serialize)]
struct QueryRequest<'a> {
    store: &'a str,
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    grounding: Vec<GroundingChunk>,
    #[serde(default)]
    error: Option<String>,
}

fn default_success() -> bool {
    true
}

impl QueryResponse {
    fn into_answer(self) -> Result<RetrievalAnswer, RetrievalError> {
        if !self.success {
            return Err(self
                .error
                .map(RetrievalError::Malformed)
                .unwrap_or(RetrievalError::NoAnswer));
        }
        let answer = RetrievalAnswer::new(self.answer.unwrap_or_default())
            .with_grounding(self.grounding);
        if answer.is_usable() {
            Ok(answer)
        } else {
            Err(RetrievalError::NoAnswer)
        }
    }
}
