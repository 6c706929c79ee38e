//! Brim Web Server
//!
//! Axum-based REST API exposing the analysis core to reporting/UI
//! layers: per-account and per-user summaries, upcoming bills, enriched
//! transactions, recurring patterns, and an on-demand sync trigger.
//! Authentication and session management live in an outer layer; error
//! responses are sanitized.

use std::sync::Arc;

use axum::{
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::error;

use brim_core::{ServerConfig, SyncEngine};

mod handlers;
mod scheduler;

pub use scheduler::start_sync_scheduler;

/// Shared application state
pub struct AppState {
    pub engine: Arc<SyncEngine>,
    pub config: ServerConfig,
}

/// Build the API router
pub fn build_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Analysis summaries
        .route("/accounts/:id/summary", get(handlers::get_account_summary))
        .route("/users/:id/summary", get(handlers::get_user_summary))
        // Bills and recurring patterns
        .route("/users/:id/bills", get(handlers::list_bills))
        .route("/users/:id/patterns", get(handlers::list_patterns))
        .route(
            "/users/:id/patterns/dismiss",
            post(handlers::dismiss_pattern),
        )
        // Transactions
        .route("/users/:id/transactions", get(handlers::list_transactions))
        // Sync
        .route("/accounts/:id/sync", post(handlers::trigger_sync))
        .with_state(state.clone());

    let cors = if state.config.allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST])
    };

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<AppState>, listen_addr: &str) -> anyhow::Result<()> {
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = listen_addr, "server listening");
    axum::serve(listener, router).await?;
    Ok(())
}

/// Sanitized API error
///
/// Internal details are logged, never returned to the client.
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(err) = &self.internal {
            error!(error = %err, "internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "An internal error occurred".to_string(),
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
