/// Configuration endpoint (secrets redacted)
use crate::context::ApiContext;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/config
pub async fn get_config(State(ctx): State<Arc<ApiContext>>) -> Json<Value> {
    let config = &ctx.config;
    Json(json!({
        "sync": {
            "window_months": config.sync.window_months,
            "max_emails_per_sync": config.sync.max_emails_per_sync,
            "overlap_window_hours": config.sync.overlap_window_hours,
        },
        "worker": {
            "worker_concurrency": config.worker.worker_concurrency,
            "soft_time_limit_s": config.worker.soft_time_limit_s,
            "hard_time_limit_s": config.worker.hard_time_limit_s,
        },
        "cost_policy": config.cost_policy,
        "template_ttl_days": config.template_ttl_days,
        "llm": {
            "model": config.llm.model,
            "llm_per_user_rpm": config.llm.llm_per_user_rpm,
            "llm_global_rpm": config.llm.llm_global_rpm,
        },
    }))
}
