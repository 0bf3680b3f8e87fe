/// Health check endpoint
use axum::Json;
use serde_json::{json, Value};

pub async fn handler() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "mailgraph-api",
        "version": mailgraph_core::VERSION,
    }))
}
