/// API Error types
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// API Error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Convert mailgraph-core errors to API errors
impl From<mailgraph_core::MailgraphError> for ApiError {
    fn from(err: mailgraph_core::MailgraphError) -> Self {
        use mailgraph_core::MailgraphError as E;
        match &err {
            E::SyncInProgress(_) => ApiError::Conflict(err.to_string()),
            E::Validation(_) => ApiError::BadRequest(err.to_string()),
            E::CredentialRevoked(_) => ApiError::Unauthorized(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailgraph_core::MailgraphError;

    #[test]
    fn test_error_mapping() {
        let err: ApiError = MailgraphError::SyncInProgress("user-1".to_string()).into();
        assert!(matches!(err, ApiError::Conflict(_)));

        let err: ApiError = MailgraphError::CredentialRevoked("x".to_string()).into();
        assert!(matches!(err, ApiError::Unauthorized(_)));

        let err: ApiError = MailgraphError::Database("x".to_string()).into();
        assert!(matches!(err, ApiError::Internal(_)));
    }
}
