//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::Instant;

use askgate_chat::{AskOrchestrator, SessionQueryService};
use askgate_core::config::AskgateConfig;

/// Shared application state. Cloned into every handler task.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AskgateConfig>,
    pub orchestrator: Arc<AskOrchestrator>,
    pub sessions: Arc<SessionQueryService>,
    /// Bearer token required on protected routes.
    pub api_token: String,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: AskgateConfig,
        orchestrator: AskOrchestrator,
        sessions: SessionQueryService,
        api_token: String,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(sessions),
            api_token,
            start_time: Instant::now(),
        }
    }
}
