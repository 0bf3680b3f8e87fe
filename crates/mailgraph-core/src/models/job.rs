/// Job queue models
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of queued work. Claimed under a visibility lease; redelivered on
/// lease expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub kind: JobKind,
    pub lane: String,
    pub user_id: String,
    pub payload: serde_json::Value,
    pub attempt: u32,
    /// Lanes are FIFO by priority score, then enqueue time. For attachment
    /// jobs the score is the message's received_at epoch (newer first).
    pub priority: i64,
    pub not_before: DateTime<Utc>,
    pub status: JobStatus,
    /// Incremented on every claim; stale-epoch writes are fenced out
    pub lease_epoch: i64,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ProcessAttachment,
    ProcessUpload,
    TemplateSweep,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessAttachment => "process_attachment",
            Self::ProcessUpload => "process_upload",
            Self::TemplateSweep => "template_sweep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "process_attachment" => Some(Self::ProcessAttachment),
            "process_upload" => Some(Self::ProcessUpload),
            "template_sweep" => Some(Self::TemplateSweep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Payload for one attachment-extraction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessAttachmentPayload {
    pub message_id: String,
    pub attachment_id: String,
}

/// Payload for a direct-upload job; the document row already exists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessUploadPayload {
    pub document_id: String,
}
