/// Processing metrics aggregate
use crate::context::{user_id_from_headers, ApiContext};
use crate::error::ApiError;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use mailgraph_core::store::ProcessingMetrics;
use std::sync::Arc;

/// GET /api/metrics/summary
pub async fn summary(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
) -> Result<Json<ProcessingMetrics>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let metrics = ctx.store.processing_metrics(&user_id).await?;
    Ok(Json(metrics))
}
