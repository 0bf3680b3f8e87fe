/// Fixed graph query endpoints
use crate::context::{user_id_from_headers, ApiContext};
use crate::error::ApiError;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct TrailingQuery {
    #[serde(default = "default_months")]
    pub months: u32,
    #[serde(default = "default_top")]
    pub limit: usize,
}

fn default_months() -> u32 {
    3
}

fn default_top() -> usize {
    10
}

/// GET /api/queries/spend?months=N
pub async fn total_spend(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TrailingQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let total = ctx
        .store
        .total_spend_trailing_months(&user_id, query.months)
        .await?;
    Ok(Json(json!({
        "months": query.months,
        "total": total,
    })))
}

/// GET /api/queries/top-vendors?months=N&limit=K
pub async fn top_vendors(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<TrailingQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let vendors = ctx
        .store
        .top_vendors(&user_id, query.months, query.limit.min(100))
        .await?;
    Ok(Json(json!({ "vendors": vendors })))
}

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    pub amount: String,
}

/// GET /api/queries/transactions-above?amount=X
pub async fn transactions_above(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Query(query): Query<ThresholdQuery>,
) -> Result<Json<Value>, ApiError> {
    let user_id = user_id_from_headers(&headers)?;
    let threshold = Decimal::from_str(&query.amount)
        .map_err(|_| ApiError::BadRequest(format!("bad amount {}", query.amount)))?;

    let transactions = ctx.store.transactions_above(&user_id, threshold).await?;
    Ok(Json(json!({ "transactions": transactions })))
}
