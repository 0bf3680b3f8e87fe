/// Message and attachment-descriptor models
use crate::constants::{SUPPORTED_DOCUMENT_EXTENSIONS, SUPPORTED_DOCUMENT_MIME_TYPES};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per email observed, keyed by `(user_id, provider_message_id)`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    /// Text body; HTML bodies are stripped to text before landing here
    pub body_text: Option<String>,
    pub snippet: Option<String>,
    /// Tri-state: None = pending, Some(true/false) = decided
    pub is_qualified: Option<bool>,
    pub qualification_stage: Option<QualificationStage>,
    pub qualification_confidence: Option<f64>,
    pub qualification_reason: Option<String>,
    pub qualified_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Qualification fields are written exactly once
    pub fn is_qualification_pending(&self) -> bool {
        self.is_qualified.is_none()
    }
}

/// Which tier of the qualification engine decided the message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualificationStage {
    Subject,
    Body,
    Llm,
}

impl QualificationStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Body => "body",
            Self::Llm => "llm",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "subject" => Some(Self::Subject),
            "body" => Some(Self::Body),
            "llm" => Some(Self::Llm),
            _ => None,
        }
    }
}

/// The decision produced by the qualification engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualificationOutcome {
    pub qualified: bool,
    pub stage: QualificationStage,
    pub confidence: f64,
    pub reason: String,
}

/// Lightweight record of an attachment discovered on a message, prior to
/// byte download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentDescriptor {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub declared_size: Option<i64>,
    pub download_state: DownloadState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    Pending,
    Downloading,
    Downloaded,
    Skipped,
    Failed,
}

impl DownloadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "downloading" => Some(Self::Downloading),
            "downloaded" => Some(Self::Downloaded),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl AttachmentDescriptor {
    /// Whether the extraction pipeline accepts this attachment as a document
    pub fn is_supported_document(&self) -> bool {
        let mime = self.mime_type.to_ascii_lowercase();
        if SUPPORTED_DOCUMENT_MIME_TYPES.contains(&mime.as_str()) {
            return true;
        }
        // Generic or absent MIME types fall back to the extension
        if mime.is_empty() || mime == "application/octet-stream" {
            if let Some(ext) = self.filename.rsplit('.').next() {
                return SUPPORTED_DOCUMENT_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str());
            }
        }
        false
    }

    pub fn is_pdf(&self) -> bool {
        self.mime_type.eq_ignore_ascii_case("application/pdf")
            || self
                .filename
                .rsplit('.')
                .next()
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
    }
}
