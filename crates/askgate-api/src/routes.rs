//! Router setup with all API routes and middleware.

use std::future::Future;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use askgate_core::config::ServerConfig;
use askgate_core::error::{AskgateError, Result};

use crate::handlers;
use crate::rate_limit::{rate_limit_middleware, RateLimiter};
use crate::state::AppState;

/// Create the axum Router with all routes and middleware.
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins(server)))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);
    let limiter = RateLimiter::new(server.rate_limit_per_sec);
    let max_body_bytes = server.max_body_bytes;

    let public_routes = Router::new().route("/health", get(handlers::health));

    let protected_routes = Router::new()
        .route("/ask", post(handlers::ask))
        .route("/sessions", get(handlers::list_sessions))
        .route("/sessions/{session_id}", get(handlers::get_session))
        .layer(axum::middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(limiter))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_auth,
        ));

    public_routes
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Configured CORS origins, or localhost on the server port when none are set.
fn allowed_origins(server: &ServerConfig) -> Vec<HeaderValue> {
    let origins = if server.allowed_origins.is_empty() {
        vec![
            format!("http://127.0.0.1:{}", server.port),
            format!("http://localhost:{}", server.port),
        ]
    } else {
        server.allowed_origins.clone()
    };
    origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

/// Serve `state` on the configured address until `shutdown` resolves.
pub async fn start_server(
    state: AppState,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| AskgateError::Api(format!("Failed to bind {}: {}", addr, e)))?;
    info!(addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| AskgateError::Api(format!("Server error: {}", e)))?;
    Ok(())
}
