/// Mailgraph API - HTTP surface for collaborators
///
/// Thin by design: request handlers validate, enqueue, or read; all heavy
/// paths run in the worker. Authentication is owned by the gateway in front
/// of this service.
pub mod api;
pub mod context;
pub mod error;

pub use context::ApiContext;
pub use error::ApiError;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Builds the Axum router with all API routes
pub fn router(ctx: Arc<ApiContext>) -> Router {
    Router::new()
        // Health endpoint (no auth required)
        .route("/api/health", get(api::health::handler))
        // Sync endpoints
        .route("/api/sync", post(api::sync::start))
        .route(
            "/api/messages/{id}/process",
            post(api::sync::process_message),
        )
        // Qualification activity
        .route("/api/qualifications", get(api::activity::recent))
        // Metrics
        .route("/api/metrics/summary", get(api::metrics::summary))
        // Documents
        .route("/api/documents/{id}", get(api::documents::get))
        // Fixed graph queries
        .route("/api/queries/spend", get(api::queries::total_spend))
        .route("/api/queries/top-vendors", get(api::queries::top_vendors))
        .route(
            "/api/queries/transactions-above",
            get(api::queries::transactions_above),
        )
        // Config endpoint
        .route("/api/config", get(api::config::get_config))
        // Add CORS middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(ctx)
}
