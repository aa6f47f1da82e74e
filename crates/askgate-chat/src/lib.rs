//! Ask-and-route pipeline for askgate.
//!
//! Classifies a question across the caller's knowledge stores, queries each
//! selected store in order, merges the answers, and hands history and audit
//! writes to a background persistence queue.

pub mod classifier;
pub mod error;
pub mod merge;
pub mod orchestrator;
pub mod persistence;
pub mod retrieval;
pub mod sessions;
pub mod types;

pub use classifier::{ClassifierAdapter, ClassifierBackend, DegradeReason, HttpClassifierBackend};
pub use error::ChatError;
pub use orchestrator::AskOrchestrator;
pub use persistence::{PersistJob, PersistenceQueue};
pub use retrieval::{HttpRetrievalBackend, RetrievalAnswer, RetrievalBackend, RetrievalError};
pub use sessions::SessionQueryService;
pub use types::{AskRequest, AskResponse};
