/// Document model and the extraction state machine vocabulary
use crate::error::ErrorRecord;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The processed form of an attachment (or a direct upload), identified
/// within a user by its content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub user_id: String,
    /// None for direct uploads
    pub source_attachment_id: Option<String>,
    pub storage_key: String,
    /// SHA-256 over the raw bytes, hex-encoded
    pub content_hash: String,
    pub filename: String,
    pub mime_type: String,
    pub state: PipelineState,
    pub document_type: Option<DocumentType>,
    pub extraction_method: Option<ExtractionMethod>,
    pub confidence: Option<f64>,
    pub page_count: Option<i64>,
    pub character_count: Option<i64>,
    pub extracted_text: Option<String>,
    pub extracted_fields: Option<ExtractedFields>,
    pub skipped_reason: Option<String>,
    pub last_error: Option<ErrorRecord>,
    pub attempt_count: i64,
    /// Fencing token; a worker's writes are rejected once its epoch is stale
    pub lease_epoch: i64,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Coarse status derived from the fine-grained pipeline state
    pub fn extraction_status(&self) -> ExtractionStatus {
        match self.state {
            PipelineState::Queued => ExtractionStatus::Queued,
            PipelineState::Fetching
            | PipelineState::Extracting
            | PipelineState::Classifying
            | PipelineState::Populating
            | PipelineState::Resolving => ExtractionStatus::Extracting,
            PipelineState::Completed => ExtractionStatus::Extracted,
            PipelineState::Skipped => ExtractionStatus::Skipped,
            PipelineState::Failed => ExtractionStatus::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            PipelineState::Completed | PipelineState::Skipped | PipelineState::Failed
        )
    }
}

/// Fine-grained states of the per-document state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Queued,
    Fetching,
    Extracting,
    Classifying,
    Populating,
    Resolving,
    Completed,
    Skipped,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Fetching => "fetching",
            Self::Extracting => "extracting",
            Self::Classifying => "classifying",
            Self::Populating => "populating",
            Self::Resolving => "resolving",
            Self::Completed => "completed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(Self::Queued),
            "fetching" => Some(Self::Fetching),
            "extracting" => Some(Self::Extracting),
            "classifying" => Some(Self::Classifying),
            "populating" => Some(Self::Populating),
            "resolving" => Some(Self::Resolving),
            "completed" => Some(Self::Completed),
            "skipped" => Some(Self::Skipped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Coarse extraction status exposed to collaborators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Queued,
    Extracting,
    Extracted,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    PdfText,
    Template,
    VisionOcr,
    Llm,
    None,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PdfText => "pdf_text",
            Self::Template => "template",
            Self::VisionOcr => "vision_ocr",
            Self::Llm => "llm",
            Self::None => "none",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pdf_text" => Some(Self::PdfText),
            "template" => Some(Self::Template),
            "vision_ocr" => Some(Self::VisionOcr),
            "llm" => Some(Self::Llm),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Invoice,
    Receipt,
    BankStatement,
    PurchaseOrder,
    SalesOrder,
    DeliveryNote,
    Quote,
    Contract,
    TaxDocument,
    Other,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Invoice => "invoice",
            Self::Receipt => "receipt",
            Self::BankStatement => "bank_statement",
            Self::PurchaseOrder => "purchase_order",
            Self::SalesOrder => "sales_order",
            Self::DeliveryNote => "delivery_note",
            Self::Quote => "quote",
            Self::Contract => "contract",
            Self::TaxDocument => "tax_document",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "invoice" => Some(Self::Invoice),
            "receipt" => Some(Self::Receipt),
            "bank_statement" => Some(Self::BankStatement),
            "purchase_order" => Some(Self::PurchaseOrder),
            "sales_order" => Some(Self::SalesOrder),
            "delivery_note" => Some(Self::DeliveryNote),
            "quote" => Some(Self::Quote),
            "contract" => Some(Self::Contract),
            "tax_document" => Some(Self::TaxDocument),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn all() -> &'static [DocumentType] {
        &[
            Self::Invoice,
            Self::Receipt,
            Self::BankStatement,
            Self::PurchaseOrder,
            Self::SalesOrder,
            Self::DeliveryNote,
            Self::Quote,
            Self::Contract,
            Self::TaxDocument,
            Self::Other,
        ]
    }
}

/// Structured fields produced by field extraction. Named fields are typed;
/// `extra` is the only open-ended sidecar and never carries control flow.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub vendor_name: Option<String>,
    pub invoice_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub total_amount: Option<Decimal>,
    pub currency: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ExtractedFields {
    /// Required fields for a template application to verify
    pub fn has_required_fields(&self) -> bool {
        self.total_amount.is_some() && self.vendor_name.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
}
