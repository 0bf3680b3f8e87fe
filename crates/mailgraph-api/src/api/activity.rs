/// Recent qualification activity
use crate::context::{user_id_from_headers, ApiContext};
use crate::error::ApiError;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: u32,
}

fn default_limit() -> u32 {
    50
}

/// GET /api/qualifications - last N decided messages with their
/// qualification fields, newest first
pub async fn recent(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let limit = query.limit.min(500);

    let messages = ctx
        .store
        .recent_qualification_activity(&user_id, limit)
        .await?;

    let items: Vec<Value> = messages
        .iter()
        .map(|m| {
            json!({
                "message_id": m.id,
                "subject": m.subject,
                "sender": m.sender,
                "received_at": m.received_at,
                "is_qualified": m.is_qualified,
                "qualification_stage": m.qualification_stage.map(|s| s.as_str()),
                "qualification_confidence": m.qualification_confidence,
                "qualification_reason": m.qualification_reason,
                "qualified_at": m.qualified_at,
            })
        })
        .collect();

    Ok(Json(json!({ "items": items })))
}
