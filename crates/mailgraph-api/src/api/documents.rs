/// Document endpoints
use crate::context::{user_id_from_headers, ApiContext};
use crate::error::ApiError;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// GET /api/documents/{id} - a document with its linked transactions and
/// source messages
pub async fn get(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Path(document_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;

    let document = ctx
        .store
        .get_document(&document_id)
        .await?
        .filter(|d| d.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("document {}", document_id)))?;

    let transactions = ctx.store.transactions_for_document(&document.id).await?;
    let message_ids = ctx.store.message_ids_for_document(&document.id).await?;

    Ok(Json(json!({
        "document": {
            "id": document.id,
            "filename": document.filename,
            "mime_type": document.mime_type,
            "content_hash": document.content_hash,
            "state": document.state.as_str(),
            "extraction_status": document.extraction_status(),
            "extraction_method": document.extraction_method.map(|m| m.as_str()),
            "document_type": document.document_type.map(|t| t.as_str()),
            "confidence": document.confidence,
            "page_count": document.page_count,
            "character_count": document.character_count,
            "extracted_fields": document.extracted_fields,
            "skipped_reason": document.skipped_reason,
            "last_error": document.last_error,
            "created_at": document.created_at,
        },
        "transactions": transactions,
        "message_ids": message_ids,
    })))
}
