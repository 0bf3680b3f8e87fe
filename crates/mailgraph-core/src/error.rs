/// Error types for the Mailgraph system
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailgraphError {
    #[error("Credential revoked: {0}")]
    CredentialRevoked(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Provider transient error: {0}")]
    ProviderTransient(String),

    #[error("Provider permanent error: {0}")]
    ProviderPermanent(String),

    #[error("LLM transient error: {0}")]
    LlmTransient(String),

    #[error("LLM permanent error: {0}")]
    LlmPermanent(String),

    #[error("Cost cap exceeded: {0}")]
    CostCapExceeded(String),

    #[error("Encrypted PDF: {0}")]
    EncryptedPdf(String),

    #[error("Corrupted document: {0}")]
    CorruptedDocument(String),

    #[error("Scanned PDF skipped: {0}")]
    ScannedSkipped(String),

    #[error("Image skipped: {0}")]
    ImageSkipped(String),

    #[error("Document out of scope: {0}")]
    OutOfScope(String),

    #[error("Duplicate content: {0}")]
    Duplicate(String),

    #[error("Sync already in progress for user {0}")]
    SyncInProgress(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Email parsing error: {0}")]
    EmailParsing(String),

    #[error("Lease lost: {0}")]
    LeaseLost(String),
}

impl MailgraphError {
    /// Determines if an error is retriable via the job-queue backoff machinery
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ProviderTransient(_) => true,
            Self::LlmTransient(_) => true,
            Self::Storage(_) => true,
            Self::Database(_) => true,
            Self::Queue(_) => true,
            Self::CredentialRevoked(_) => false,
            Self::ProviderPermanent(_) => false,
            Self::LlmPermanent(_) => false,
            Self::CostCapExceeded(_) => false,
            Self::EncryptedPdf(_) => false,
            Self::CorruptedDocument(_) => false,
            Self::ScannedSkipped(_) => false,
            Self::ImageSkipped(_) => false,
            Self::OutOfScope(_) => false,
            Self::Duplicate(_) => false,
            Self::SyncInProgress(_) => false,
            Self::Config(_) => false,
            Self::Validation(_) => false,
            Self::EmailParsing(_) => false,
            Self::LeaseLost(_) => false,
        }
    }

    /// Terminal skips: the document ends in `skipped`, not `failed`
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::ScannedSkipped(_) | Self::ImageSkipped(_) | Self::OutOfScope(_) | Self::Duplicate(_)
        )
    }

    /// Short machine-readable kind used in structured `last_error` records
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CredentialRevoked(_) => "credential_revoked",
            Self::RateLimited { .. } => "rate_limited",
            Self::ProviderTransient(_) => "provider_transient",
            Self::ProviderPermanent(_) => "provider_permanent",
            Self::LlmTransient(_) => "llm_transient",
            Self::LlmPermanent(_) => "llm_permanent",
            Self::CostCapExceeded(_) => "cost_cap_exceeded",
            Self::EncryptedPdf(_) => "encrypted_pdf",
            Self::CorruptedDocument(_) => "corrupted_document",
            Self::ScannedSkipped(_) => "scanned_skipped",
            Self::ImageSkipped(_) => "image_skipped",
            Self::OutOfScope(_) => "out_of_scope",
            Self::Duplicate(_) => "duplicate",
            Self::SyncInProgress(_) => "sync_in_progress",
            Self::Storage(_) => "storage",
            Self::Database(_) => "database",
            Self::Queue(_) => "queue",
            Self::Config(_) => "config",
            Self::Validation(_) => "validation",
            Self::EmailParsing(_) => "email_parsing",
            Self::LeaseLost(_) => "lease_lost",
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after,
        }
    }
}

// Implement conversions for common error types
impl From<sqlx::Error> for MailgraphError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for MailgraphError {
    fn from(err: serde_json::Error) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<std::io::Error> for MailgraphError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Map a reqwest failure into the taxonomy at the HTTP boundary
impl From<reqwest::Error> for MailgraphError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            return Self::ProviderTransient(err.to_string());
        }
        match err.status() {
            Some(status) if status.as_u16() == 429 => Self::rate_limited(err.to_string(), None),
            Some(status) if status.is_server_error() => Self::ProviderTransient(err.to_string()),
            Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => {
                Self::CredentialRevoked(err.to_string())
            }
            Some(_) => Self::ProviderPermanent(err.to_string()),
            None => Self::ProviderTransient(err.to_string()),
        }
    }
}

/// Structured error record persisted on failed documents and jobs
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_details: Option<String>,
}

impl ErrorRecord {
    pub fn from_error(err: &MailgraphError) -> Self {
        Self {
            kind: err.kind().to_string(),
            message: err.to_string(),
            upstream_details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.upstream_details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_errors() {
        assert!(MailgraphError::ProviderTransient("test".to_string()).is_retriable());
        assert!(MailgraphError::LlmTransient("test".to_string()).is_retriable());
        assert!(MailgraphError::rate_limited("test", None).is_retriable());
        assert!(!MailgraphError::CredentialRevoked("test".to_string()).is_retriable());
        assert!(!MailgraphError::EncryptedPdf("test".to_string()).is_retriable());
        assert!(!MailgraphError::CostCapExceeded("test".to_string()).is_retriable());
    }

    #[test]
    fn test_skips_are_not_failures() {
        assert!(MailgraphError::Duplicate("same bytes".to_string()).is_skip());
        assert!(MailgraphError::OutOfScope("other".to_string()).is_skip());
        assert!(MailgraphError::ScannedSkipped("policy".to_string()).is_skip());
        assert!(!MailgraphError::CorruptedDocument("bad xref".to_string()).is_skip());
    }

    #[test]
    fn test_error_record_kind() {
        let err = MailgraphError::EncryptedPdf("password required".to_string());
        let record = ErrorRecord::from_error(&err);
        assert_eq!(record.kind, "encrypted_pdf");
        assert!(record.message.contains("password required"));
    }

    #[test]
    fn test_rate_limited_carries_retry_after() {
        let err = MailgraphError::rate_limited("slow down", Some(Duration::from_secs(30)));
        match err {
            MailgraphError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(30)));
            }
            _ => panic!("expected RateLimited"),
        }
    }
}
