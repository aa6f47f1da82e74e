//! Ask Orchestrator - validates a question, routes it across the caller's
//! knowledge stores and builds the reply.
//!
//! Flow: validate → resolve account → classify → query selected stores in
//! order → merge → respond. History and audit writes are queued after the
//! reply is built and never awaited.

use std::sync::Arc;

use chrono::Utc;
use rand::distr::Alphanumeric;
use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use askgate_core::types::{
    derive_session_name, Account, ClassificationResult, GroundingChunk, Message,
    ProviderLogEntry, UnansweredPart,
};
use askgate_storage::fs::is_valid_session_id;
use askgate_storage::AccountLookup;

use crate::classifier::ClassifierAdapter;
use crate::error::ChatError;
use crate::merge::{flatten_grounding, merge_answers, StoreAnswer};
use crate::persistence::{PersistJob, PersistenceQueue};
use crate::retrieval::{RetrievalBackend, RetrievalError};
use crate::types::{AskRequest, AskResponse};

/// Longest question accepted, in characters.
pub const MAX_QUESTION_CHARS: usize = 4000;

/// Reply when the account cannot query any store.
pub const NO_STORES_ANSWER: &str =
    "You don't have access to any knowledge stores yet. Please contact your administrator.";

/// Reply when no accessible store is relevant to the question.
pub const NO_DEPARTMENT_ANSWER: &str =
    "None of the departments available to you can answer this question.";

const SESSION_SUFFIX_LEN: usize = 8;

fn apology(provider: &str) -> String {
    format!(
        "Sorry, I couldn't get an answer from {} right now. Please try again later.",
        provider
    )
}

/// Coordinates one question from request to response.
pub struct AskOrchestrator {
    accounts: Arc<dyn AccountLookup>,
    classifier: ClassifierAdapter,
    retrieval: Arc<dyn RetrievalBackend>,
    persistence: PersistenceQueue,
}

/// Session identity resolved for a request.
struct SessionTarget {
    id: String,
    new_name: Option<String>,
}

/// Outcome of querying the selected stores in order.
enum FanOut {
    Answered(Vec<StoreAnswer>),
    Failed {
        store: String,
        question: String,
        error: RetrievalError,
    },
}

impl AskOrchestrator {
    pub fn new(
        accounts: Arc<dyn AccountLookup>,
        classifier: ClassifierAdapter,
        retrieval: Arc<dyn RetrievalBackend>,
        persistence: PersistenceQueue,
    ) -> Self {
        Self {
            accounts,
            classifier,
            retrieval,
            persistence,
        }
    }

    /// Answer `request`, queueing its history and audit records.
    pub async fn ask(&self, request: AskRequest) -> Result<AskResponse, ChatError> {
        let (owner, question, session_id) = validate(request)?;

        let account = self
            .accounts
            .find_account(&owner)
            .await?
            .ok_or_else(|| ChatError::AccountNotFound(owner.clone()))?;

        let store_names = account.store_names();
        let session = resolve_session(session_id, &question);

        if store_names.is_empty() {
            info!(owner = %owner, "Account has no accessible stores");
            return Ok(AskResponse {
                session_id: session.id,
                answer: NO_STORES_ANSWER.to_string(),
                stores_used: Vec::new(),
                grounding: Vec::new(),
                unanswered: None,
            });
        }

        let credential = self.credential_for(&account).await;
        let classification = self
            .classifier
            .classify(credential.as_deref(), &store_names, &question)
            .await;

        if classification.stores.is_empty() {
            return Ok(self.respond_no_department(&owner, &question, session, classification));
        }

        let fan_out = self
            .query_stores(credential.as_deref(), &classification, &question)
            .await;

        let response = match fan_out {
            FanOut::Answered(answers) => {
                self.respond_merged(&owner, &account, &question, session, classification, answers)
            }
            FanOut::Failed {
                store,
                question: sent,
                error,
            } => {
                let provider = account.provider_for(&store);
                warn!(
                    owner = %owner,
                    store = %store,
                    provider = %provider,
                    error = %error,
                    "Store failed; abandoning remaining stores"
                );
                self.respond_failed(&owner, &question, session, store, sent, provider)
            }
        };
        Ok(response)
    }

    async fn credential_for(&self, account: &Account) -> Option<String> {
        let org = account.organization_id.as_deref()?;
        match self.accounts.serving_credential(org).await {
            Ok(credential) => credential,
            Err(e) => {
                warn!(organization = org, error = %e, "Serving credential lookup failed");
                None
            }
        }
    }

    /// Query each selected store strictly in order, stopping at the first
    /// failure or unusable answer.
    async fn query_stores(
        &self,
        credential: Option<&str>,
        classification: &ClassificationResult,
        original: &str,
    ) -> FanOut {
        let mut answers = Vec::with_capacity(classification.stores.len());
        for store in &classification.stores {
            let question = classification.question_for(store, original).to_string();
            let result = self
                .retrieval
                .query(credential, store, &question)
                .await
                .and_then(|a| {
                    if a.is_usable() {
                        Ok(a)
                    } else {
                        Err(RetrievalError::NoAnswer)
                    }
                });
            match result {
                Ok(answer) => {
                    debug!(store = %store, grounding = answer.grounding.len(), "Store answered");
                    answers.push(StoreAnswer {
                        store: store.clone(),
                        question,
                        answer,
                    });
                }
                Err(error) => {
                    return FanOut::Failed {
                        store: store.clone(),
                        question,
                        error,
                    }
                }
            }
        }
        FanOut::Answered(answers)
    }

    fn respond_no_department(
        &self,
        owner: &str,
        question: &str,
        session: SessionTarget,
        classification: ClassificationResult,
    ) -> AskResponse {
        info!(
            owner,
            unanswered = classification.unanswered.len(),
            "No store selected for question"
        );
        let unanswered = classification.unanswered;

        let mut message = Message::assistant(question, NO_DEPARTMENT_ANSWER);
        message.unresolved_parts = Some(unanswered.clone());
        self.persist(owner, &session, message, Vec::new());

        AskResponse {
            session_id: session.id,
            answer: NO_DEPARTMENT_ANSWER.to_string(),
            stores_used: Vec::new(),
            grounding: Vec::new(),
            unanswered: Some(unanswered),
        }
    }

    fn respond_merged(
        &self,
        owner: &str,
        account: &Account,
        question: &str,
        session: SessionTarget,
        classification: ClassificationResult,
        answers: Vec<StoreAnswer>,
    ) -> AskResponse {
        let answer = merge_answers(&answers);
        let grounding = flatten_grounding(&answers);
        let unanswered = non_empty(classification.unanswered);

        let logs = answers
            .iter()
            .map(|a| {
                log_entry(
                    account.provider_for(&a.store),
                    owner,
                    &a.store,
                    &a.question,
                    Some(a.answer.answer_text.clone()),
                    a.answer.grounding.clone(),
                )
            })
            .collect();

        let mut message = Message::assistant(question, answer.clone());
        message.stores_used = classification.stores.clone();
        message.grounding = grounding.clone();
        message.unresolved_parts = unanswered.clone();
        self.persist(owner, &session, message, logs);

        info!(owner, session_id = %session.id, stores = ?classification.stores, "Question answered");
        AskResponse {
            session_id: session.id,
            answer,
            stores_used: classification.stores,
            grounding,
            unanswered,
        }
    }

    fn respond_failed(
        &self,
        owner: &str,
        question: &str,
        session: SessionTarget,
        store: String,
        sent: String,
        provider: String,
    ) -> AskResponse {
        let answer = apology(&provider);
        let log = log_entry(provider.clone(), owner, &store, &sent, None, Vec::new());

        let mut message = Message::assistant(question, answer.clone());
        message.stores_used = vec![store.clone()];
        message.searched_in = Some(provider);
        self.persist(owner, &session, message, vec![log]);

        AskResponse {
            session_id: session.id,
            answer,
            stores_used: vec![store],
            grounding: Vec::new(),
            unanswered: None,
        }
    }

    fn persist(
        &self,
        owner: &str,
        session: &SessionTarget,
        message: Message,
        provider_logs: Vec<ProviderLogEntry>,
    ) {
        self.persistence.submit(PersistJob {
            owner: owner.to_string(),
            session_id: session.id.clone(),
            new_session_name: session.new_name.clone(),
            message,
            provider_logs,
        });
    }
}

fn validate(request: AskRequest) -> Result<(String, String, Option<String>), ChatError> {
    let owner = request
        .owner_email
        .map(|o| o.trim().to_string())
        .filter(|o| !o.is_empty())
        .ok_or_else(|| ChatError::Validation("ownerEmail is required".to_string()))?;

    let question = request
        .question
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ChatError::Validation("question is required".to_string()))?;

    if question.chars().count() > MAX_QUESTION_CHARS {
        return Err(ChatError::Validation(format!(
            "question must be at most {} characters",
            MAX_QUESTION_CHARS
        )));
    }

    let session_id = request
        .session_id
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());
    if let Some(id) = &session_id {
        if !is_valid_session_id(id) {
            return Err(ChatError::Validation(
                "sessionId may only contain letters, digits, '-' and '_'".to_string(),
            ));
        }
    }

    Ok((owner, question, session_id))
}

fn resolve_session(session_id: Option<String>, question: &str) -> SessionTarget {
    match session_id {
        Some(id) => SessionTarget { id, new_name: None },
        None => SessionTarget {
            id: mint_session_id(),
            new_name: Some(derive_session_name(question)),
        },
    }
}

/// `<unix millis>-<random alphanumeric suffix>`.
pub fn mint_session_id() -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("{}-{}", Utc::now().timestamp_millis(), suffix)
}

fn log_entry(
    provider: String,
    owner: &str,
    store: &str,
    question: &str,
    response: Option<String>,
    grounding: Vec<GroundingChunk>,
) -> ProviderLogEntry {
    ProviderLogEntry {
        id: Uuid::new_v4(),
        provider_identity: provider,
        user_email: owner.to_string(),
        store_name: store.to_string(),
        question_sent_to_store: question.to_string(),
        response,
        grounding,
        asked_at: Utc::now(),
    }
}

fn non_empty(parts: Vec<UnansweredPart>) -> Option<Vec<UnansweredPart>> {
    (!parts.is_empty()).then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use askgate_core::types::{AccessibleStore, Organization};
    use askgate_storage::{AccountDirectory, AuditLogSink, ConversationStore};

    use crate::classifier::{ClassifierBackend, ClassifierError};
    use crate::retrieval::RetrievalAnswer;

    const OWNER: &str = "student@uni.edu";

    struct FixedClassifier {
        reply: String,
    }

    #[async_trait]
    impl ClassifierBackend for FixedClassifier {
        async fn complete(&self, _: &str, _: &str, _: &str) -> Result<String, ClassifierError> {
            Ok(self.reply.clone())
        }
    }

    /// Answers from a per-store table; stores missing from it fail.
    #[derive(Default)]
    struct TableRetrieval {
        answers: HashMap<String, String>,
        calls: AtomicUsize,
        questions: Mutex<Vec<(String, String)>>,
    }

    impl TableRetrieval {
        fn with(answers: &[(&str, &str)]) -> Arc<Self> {
            Arc::new(Self {
                answers: answers
                    .iter()
                    .map(|(s, a)| (s.to_string(), a.to_string()))
                    .collect(),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl RetrievalBackend for TableRetrieval {
        async fn query(
            &self,
            _: Option<&str>,
            store: &str,
            question: &str,
        ) -> Result<RetrievalAnswer, RetrievalError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.questions
                .lock()
                .unwrap()
                .push((store.to_string(), question.to_string()));
            match self.answers.get(store) {
                Some(a) => Ok(RetrievalAnswer::new(a.clone())
                    .with_grounding(vec![GroundingChunk::new(format!("{} source", store))])),
                None => Err(RetrievalError::Transport("connection refused".to_string())),
            }
        }
    }

    struct Harness {
        orchestrator: AskOrchestrator,
        retrieval: Arc<TableRetrieval>,
        queue: PersistenceQueue,
        conversations: Arc<ConversationStore>,
        audit: Arc<AuditLogSink>,
        _dir: tempfile::TempDir,
    }

    fn account(stores: &[&str]) -> Account {
        Account {
            email: OWNER.to_string(),
            organization_id: Some("uni".to_string()),
            accessible_stores: stores
                .iter()
                .map(|s| AccessibleStore {
                    store_name: s.to_string(),
                    account_email: format!("{}@uni.edu", s),
                })
                .collect(),
        }
    }

    fn harness(stores: &[&str], classifier_reply: &str, retrieval: Arc<TableRetrieval>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let conversations = Arc::new(ConversationStore::new(dir.path()));
        let audit = Arc::new(AuditLogSink::new(dir.path()));
        let (queue, _worker) =
            PersistenceQueue::start(Arc::clone(&conversations), Arc::clone(&audit), 16);
        let accounts = AccountDirectory::from_records(
            vec![account(stores)],
            vec![Organization {
                id: "uni".to_string(),
                name: "University".to_string(),
                serving_credential: Some("key".to_string()),
            }],
        );
        let classifier = ClassifierAdapter::new(Arc::new(FixedClassifier {
            reply: classifier_reply.to_string(),
        }));
        let orchestrator = AskOrchestrator::new(
            Arc::new(accounts),
            classifier,
            retrieval.clone(),
            queue.clone(),
        );
        Harness {
            orchestrator,
            retrieval,
            queue,
            conversations,
            audit,
            _dir: dir,
        }
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_missing_fields_are_validation_errors() {
        let h = harness(&["library"], "{}", TableRetrieval::with(&[]));

        let err = h
            .orchestrator
            .ask(AskRequest {
                question: Some("hi".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "ownerEmail is required");

        let err = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "   "))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "question is required");

        let err = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "x".repeat(MAX_QUESTION_CHARS + 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        let err = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "hi").in_session("../../etc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert_eq!(h.retrieval.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let h = harness(&["library"], "{}", TableRetrieval::with(&[]));
        let err = h
            .orchestrator
            .ask(AskRequest::new("ghost@uni.edu", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AccountNotFound(e) if e == "ghost@uni.edu"));
    }

    // ---- Branches ----

    #[tokio::test]
    async fn test_no_accessible_stores_persists_nothing() {
        let h = harness(&[], "{}", TableRetrieval::with(&[]));
        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "Where is the gym?"))
            .await
            .unwrap();
        assert_eq!(response.answer, NO_STORES_ANSWER);
        assert!(response.stores_used.is_empty());
        assert!(!response.session_id.is_empty());

        h.queue.wait_idle().await;
        assert!(h.conversations.list_sessions(OWNER).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_no_department_records_unresolved_parts() {
        let reply = r#"{"stores":[],"unanswered":[{"text":"Where is the gym?","reason":"no athletics store"}]}"#;
        let h = harness(&["library"], reply, TableRetrieval::with(&[]));

        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "Where is the gym?"))
            .await
            .unwrap();
        assert_eq!(response.answer, NO_DEPARTMENT_ANSWER);
        let unanswered = response.unanswered.unwrap();
        assert_eq!(unanswered[0].reason, "no athletics store");
        assert_eq!(h.retrieval.calls.load(Ordering::SeqCst), 0);

        h.queue.wait_idle().await;
        let session = h
            .conversations
            .get_session(OWNER, &response.session_id)
            .await
            .unwrap();
        assert_eq!(session.session_name, "Where is the gym?");
        assert_eq!(session.messages[0].unresolved_parts, Some(unanswered));
    }

    #[tokio::test]
    async fn test_single_store_answer_is_verbatim() {
        let reply = r#"{"stores":["library"],"split_questions":{},"unanswered":[]}"#;
        let h = harness(
            &["admissions", "library"],
            reply,
            TableRetrieval::with(&[("library", "Open 8am to 10pm.")]),
        );

        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "What time does the library open?"))
            .await
            .unwrap();
        assert_eq!(response.answer, "Open 8am to 10pm.");
        assert_eq!(response.stores_used, vec!["library"]);
        assert_eq!(response.grounding.len(), 1);
        assert!(response.unanswered.is_none());

        h.queue.wait_idle().await;
        let logs = h.audit.entries("library@uni.edu").await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].response.as_deref(), Some("Open 8am to 10pm."));
        assert_eq!(logs[0].user_email, OWNER);
    }

    #[tokio::test]
    async fn test_reply_is_returned_before_history_is_written() {
        let reply = r#"{"stores":["library"]}"#;
        let h = harness(&["library"], reply, TableRetrieval::with(&[("library", "8am.")]));

        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "When does the library open?"))
            .await
            .unwrap();

        // The worker has not run yet on this single-threaded runtime.
        let path = h
            .conversations
            .sessions_dir()
            .join(askgate_storage::fs::storage_key(OWNER))
            .join(format!("{}.json", response.session_id));
        assert_eq!(h.queue.pending(), 1);
        assert!(!path.exists());

        h.queue.wait_idle().await;
        assert!(path.exists());
        assert_eq!(h.queue.pending(), 0);
    }

    #[tokio::test]
    async fn test_multi_store_merge_uses_split_questions() {
        let reply = r#"{"stores":["admissions","library"],
            "split_questions":{"library":"When does the library open?"},"unanswered":[]}"#;
        let h = harness(
            &["admissions", "library"],
            reply,
            TableRetrieval::with(&[("admissions", "March 1."), ("library", "8am.")]),
        );
        let question = "When is the application deadline and when does the library open?";

        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, question))
            .await
            .unwrap();
        assert_eq!(response.answer, "**admissions**\nMarch 1.\n\n**library**\n8am.");
        assert_eq!(response.stores_used, vec!["admissions", "library"]);
        let grounding: Vec<_> = response.grounding.iter().map(|g| g.text.as_str()).collect();
        assert_eq!(grounding, vec!["admissions source", "library source"]);

        let asked = h.retrieval.questions.lock().unwrap().clone();
        assert_eq!(
            asked,
            vec![
                ("admissions".to_string(), question.to_string()),
                ("library".to_string(), "When does the library open?".to_string()),
            ]
        );

        h.queue.wait_idle().await;
        assert_eq!(h.audit.entries("admissions@uni.edu").await.unwrap().len(), 1);
        let lib = h.audit.entries("library@uni.edu").await.unwrap();
        assert_eq!(lib[0].question_sent_to_store, "When does the library open?");
    }

    #[tokio::test]
    async fn test_first_failure_short_circuits() {
        let reply = r#"{"stores":["admissions","housing","library"]}"#;
        let h = harness(
            &["admissions", "housing", "library"],
            reply,
            TableRetrieval::with(&[("admissions", "March 1."), ("library", "8am.")]),
        );

        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "Deadlines, dorms and hours?"))
            .await
            .unwrap();
        assert!(response.answer.contains("housing@uni.edu"));
        assert!(!response.answer.contains("admissions"));
        assert_eq!(response.stores_used, vec!["housing"]);
        assert_eq!(h.retrieval.calls.load(Ordering::SeqCst), 2);

        h.queue.wait_idle().await;
        let housing = h.audit.entries("housing@uni.edu").await.unwrap();
        assert_eq!(housing.len(), 1);
        assert!(housing[0].response.is_none());
        assert!(h.audit.entries("admissions@uni.edu").await.unwrap().is_empty());
        assert!(h.audit.entries("library@uni.edu").await.unwrap().is_empty());

        let session = h
            .conversations
            .get_session(OWNER, &response.session_id)
            .await
            .unwrap();
        assert_eq!(
            session.messages[0].searched_in.as_deref(),
            Some("housing@uni.edu")
        );
    }

    #[tokio::test]
    async fn test_blank_store_answer_counts_as_failure() {
        let h = harness(
            &["library"],
            r#"{"stores":["library"]}"#,
            TableRetrieval::with(&[("library", "  ")]),
        );
        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "Hours?"))
            .await
            .unwrap();
        assert_eq!(response.answer, apology("library@uni.edu"));
    }

    #[tokio::test]
    async fn test_unparseable_classification_queries_all_stores() {
        let h = harness(
            &["admissions", "library"],
            "I'm not sure.",
            TableRetrieval::with(&[("admissions", "a"), ("library", "b")]),
        );
        let response = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "Anything?"))
            .await
            .unwrap();
        assert_eq!(response.stores_used, vec!["admissions", "library"]);
        assert_eq!(h.retrieval.calls.load(Ordering::SeqCst), 2);
    }

    // ---- Sessions ----

    #[tokio::test]
    async fn test_existing_session_is_continued() {
        let reply = r#"{"stores":["library"]}"#;
        let h = harness(&["library"], reply, TableRetrieval::with(&[("library", "8am.")]));

        let first = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "When does the library open?"))
            .await
            .unwrap();
        h.queue.wait_idle().await;

        let second = h
            .orchestrator
            .ask(AskRequest::new(OWNER, "And on Sunday?").in_session(first.session_id.clone()))
            .await
            .unwrap();
        assert_eq!(second.session_id, first.session_id);
        h.queue.wait_idle().await;

        let session = h
            .conversations
            .get_session(OWNER, &first.session_id)
            .await
            .unwrap();
        assert_eq!(session.session_name, "When does the library open?");
        assert_eq!(session.messages.len(), 2);
        assert_eq!(session.messages[1].question, "And on Sunday?");
    }

    #[test]
    fn test_minted_session_ids_are_unique_and_valid() {
        let a = mint_session_id();
        let b = mint_session_id();
        assert_ne!(a, b);
        assert!(is_valid_session_id(&a));
        let (millis, suffix) = a.split_once('-').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), SESSION_SUFFIX_LEN);
    }
}
