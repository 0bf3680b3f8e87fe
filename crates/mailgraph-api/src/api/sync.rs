/// Sync endpoints: start a sync, reprocess a message's attachments
use crate::context::{user_id_from_headers, ApiContext};
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use mailgraph_core::constants::LANE_ATTACHMENTS;
use mailgraph_core::models::{JobKind, ProcessAttachmentPayload};
use mailgraph_core::providers::ProviderKind;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
pub struct StartSyncRequest {
    pub provider: String,
}

/// POST /api/sync - kick off a sync and return a handle immediately.
/// The heavy work happens off the request path.
pub async fn start(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<StartSyncRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let provider = ProviderKind::parse(&request.provider)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown provider {}", request.provider)))?;

    let handle = uuid::Uuid::new_v4().to_string();
    let coordinator = ctx.coordinator.clone();
    let task_user = user_id.clone();
    let task_handle = handle.clone();
    tokio::spawn(async move {
        match coordinator.sync_user(&task_user, provider).await {
            Ok(report) => info!(
                sync_handle = %task_handle,
                fetched = report.fetched,
                inserted = report.inserted,
                "Background sync finished"
            ),
            Err(e) => error!(sync_handle = %task_handle, error = %e, "Background sync failed"),
        }
    });

    Ok(Json(json!({
        "sync_handle": handle,
        "user_id": user_id,
        "provider": provider.as_str(),
        "status": "started",
    })))
}

/// POST /api/messages/{id}/process - enqueue extraction for every supported
/// attachment on a message. Enqueue-only; workers do the rest.
pub async fn process_message(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(message_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;

    let message = ctx
        .store
        .get_message(&message_id)
        .await?
        .filter(|m| m.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("message {}", message_id)))?;

    let attachments = ctx.store.attachments_for_message(&message.id).await?;
    let mut enqueued = 0;
    for attachment in attachments.iter().filter(|a| a.is_supported_document()) {
        let payload = serde_json::to_value(ProcessAttachmentPayload {
            message_id: message.id.clone(),
            attachment_id: attachment.id.clone(),
        })
        .map_err(|e| ApiError::Internal(e.to_string()))?;
        ctx.queue
            .enqueue(
                JobKind::ProcessAttachment,
                LANE_ATTACHMENTS,
                &user_id,
                &payload,
                message.received_at.timestamp(),
            )
            .await?;
        enqueued += 1;
    }

    Ok(Json(json!({
        "message_id": message.id,
        "jobs_enqueued": enqueued,
    })))
}
