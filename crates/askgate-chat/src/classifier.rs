//! Classifier Adapter.
//!
//! Wraps the external classification service that partitions a question
//! across knowledge stores. The adapter never fails: a missing credential,
//! a service error, or output that cannot be parsed all degrade to
//! "select every offered store".

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use askgate_core::config::ClassifierConfig;
use askgate_core::types::ClassificationResult;

const SYSTEM_PROMPT: &str = "You route student questions to university department knowledge stores. \
Reply with a single JSON object and nothing else, using exactly these keys:\n\
\"stores\": array of store names, chosen only from the list provided, that can answer part of the question;\n\
\"split_questions\": object mapping a store name to the part of the question meant for that store, \
only when it differs from the full question;\n\
\"unanswered\": array of {\"text\": fragment, \"reason\": why no listed store can answer it}.\n\
Do not add commentary, markdown, or keys beyond these.";

static FENCED_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z]*\s*(.*?)```").expect("Invalid fenced block regex")
});

/// Errors from the raw classification service call.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("classifier returned HTTP {status}: {message}")]
    Status { status: u16, message: String },
    #[error("classifier returned no content")]
    EmptyResponse,
}

/// Why a classification fell back to selecting every store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DegradeReason {
    MissingCredential,
    ServiceError(String),
    Unparseable,
}

impl std::fmt::Display for DegradeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DegradeReason::MissingCredential => write!(f, "no serving credential"),
            DegradeReason::ServiceError(e) => write!(f, "service error: {}", e),
            DegradeReason::Unparseable => write!(f, "unparseable classifier output"),
        }
    }
}

/// The raw text-completion call behind the adapter.
#[async_trait]
pub trait ClassifierBackend: Send + Sync {
    async fn complete(
        &self,
        credential: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ClassifierError>;
}

/// Turns classifier service output into a [`ClassificationResult`].
#[derive(Clone)]
pub struct ClassifierAdapter {
    backend: Arc<dyn ClassifierBackend>,
}

impl ClassifierAdapter {
    pub fn new(backend: Arc<dyn ClassifierBackend>) -> Self {
        Self { backend }
    }

    /// Partition `question` across `store_names`. Never fails.
    pub async fn classify(
        &self,
        credential: Option<&str>,
        store_names: &[String],
        question: &str,
    ) -> ClassificationResult {
        match self.try_classify(credential, store_names, question).await {
            Ok(result) => {
                debug!(
                    stores = ?result.stores,
                    split = result.split_questions.len(),
                    unanswered = result.unanswered.len(),
                    "Question classified"
                );
                result
            }
            Err(reason) => {
                warn!(reason = %reason, "Classification degraded; selecting all stores");
                ClassificationResult::all_stores(store_names)
            }
        }
    }

    /// Classify, reporting why the result would have to be degraded.
    pub async fn try_classify(
        &self,
        credential: Option<&str>,
        store_names: &[String],
        question: &str,
    ) -> Result<ClassificationResult, DegradeReason> {
        let credential = credential
            .filter(|c| !c.trim().is_empty())
            .ok_or(DegradeReason::MissingCredential)?;

        let raw = self
            .backend
            .complete(credential, SYSTEM_PROMPT, &user_prompt(store_names, question))
            .await
            .map_err(|e| DegradeReason::ServiceError(e.to_string()))?;

        parse_classification(&raw, store_names)
    }
}

fn user_prompt(store_names: &[String], question: &str) -> String {
    let stores = serde_json::to_string(store_names).unwrap_or_else(|_| "[]".to_string());
    format!("Stores: {}\nQuestion: {}", stores, question)
}

// =============================================================================
// Parsing fallback chain
// =============================================================================

type ParseStage = fn(&str) -> Option<ClassificationResult>;

/// Parse stages tried in order; the first that yields a result wins.
const PARSE_STAGES: [(&str, ParseStage); 3] = [
    ("direct", parse_direct),
    ("fenced", parse_fenced),
    ("balanced", parse_balanced),
];

/// Run the parse chain over raw classifier output and restrict the result to
/// the offered stores.
pub fn parse_classification(
    raw: &str,
    store_names: &[String],
) -> Result<ClassificationResult, DegradeReason> {
    for (stage, parse) in PARSE_STAGES {
        if let Some(result) = parse(raw) {
            debug!(stage, "Classifier output parsed");
            return Ok(sanitize(result, store_names));
        }
    }
    Err(DegradeReason::Unparseable)
}

/// Stage 1: the whole output is the JSON object.
pub fn parse_direct(raw: &str) -> Option<ClassificationResult> {
    serde_json::from_str(raw.trim()).ok()
}

/// Stage 2: the object is wrapped in a markdown code fence.
pub fn parse_fenced(raw: &str) -> Option<ClassificationResult> {
    let inner = FENCED_BLOCK.captures(raw)?.get(1)?.as_str();
    parse_direct(inner)
}

/// Stage 3: the first balanced `{...}` anywhere in the output.
pub fn parse_balanced(raw: &str) -> Option<ClassificationResult> {
    extract_balanced_object(raw).and_then(parse_direct)
}

/// Return the first balanced top-level `{...}` in `raw`, honoring JSON
/// string literals and escapes.
pub fn extract_balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keep only offered stores (matched case-insensitively, first occurrence
/// wins) and drop rewrites or fragments that no longer apply.
fn sanitize(result: ClassificationResult, store_names: &[String]) -> ClassificationResult {
    let canonical = |name: &str| -> Option<String> {
        let name = name.trim();
        store_names
            .iter()
            .find(|s| s.as_str() == name)
            .or_else(|| store_names.iter().find(|s| s.eq_ignore_ascii_case(name)))
            .cloned()
    };

    let mut seen = HashSet::new();
    let stores: Vec<String> = result
        .stores
        .iter()
        .filter_map(|s| canonical(s.as_str()))
        .filter(|s| seen.insert(s.clone()))
        .collect();

    let split_questions = result
        .split_questions
        .into_iter()
        .filter_map(|(store, q)| {
            let store = canonical(store.as_str())?;
            let q = q.trim().to_string();
            (seen.contains(&store) && !q.is_empty()).then_some((store, q))
        })
        .collect();

    let unanswered = result
        .unanswered
        .into_iter()
        .filter(|u| !u.text.trim().is_empty())
        .collect();

    ClassificationResult {
        stores,
        split_questions,
        unanswered,
    }
}

// =============================================================================
// HTTP backend (OpenAI-compatible chat completions)
// =============================================================================

/// Classifier backend that calls an OpenAI-compatible chat completions API.
#[derive(Clone)]
pub struct HttpClassifierBackend {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl HttpClassifierBackend {
    pub fn new(config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl ClassifierBackend for HttpClassifierBackend {
    async fn complete(
        &self,
        credential: &str,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, ClassifierError> {
        let body = CompletionRequest {
            model: &self.model,
            temperature: self.temperature,
            messages: vec![
                CompletionMessage {
                    role: "system",
                    content: system_prompt,
                },
                CompletionMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unreadable error body".to_string());
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Transport(format!("invalid response body: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(ClassifierError::EmptyResponse)
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Serialize)]
struct CompletionMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
