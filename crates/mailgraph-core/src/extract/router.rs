//! Extractor router - decides which extractor touches a document, and owns
//! every LLM call site.
//!
//! Other components are forbidden from talking to the model directly; the
//! router fronts the governor so rate caps, dollar caps, and the circuit
//! breaker apply uniformly to qualification, classification, and field
//! extraction.

use crate::constants::{
    PDF_TEXT_MIN_CHARS, PDF_TEXT_MIN_PRINTABLE_RATIO, SKIP_REASON_IMAGE, SKIP_REASON_SCANNED_PDF,
};
use crate::error::MailgraphError;
use crate::extract::classify::keyword_classify;
use crate::extract::fields::fields_from_llm_json;
use crate::extract::llm::LlmGovernor;
use crate::extract::pdf_text::analyze_pdf;
use crate::models::{CostPolicy, DocumentType, ExtractedFields, ExtractionMethod};
use crate::utils::normalize::printable_ratio;
use std::sync::Arc;
use tracing::{debug, info};

const QUALIFY_SYSTEM_PROMPT: &str = r#"You decide whether an email is about a business document such as an invoice, receipt, bank statement, purchase order, or contract.
Reply with ONLY a JSON object: {"qualified": bool, "confidence": number between 0 and 1, "reason": "short explanation"}."#;

const CLASSIFY_SYSTEM_PROMPT: &str = r#"You classify a business document from its extracted text.
Reply with ONLY a JSON object: {"document_type": one of ["invoice","receipt","bank_statement","purchase_order","sales_order","delivery_note","quote","contract","tax_document","other"], "confidence": number between 0 and 1}."#;

const FIELDS_SYSTEM_PROMPT: &str = r#"You extract structured data from a business document's text.
Reply with ONLY a JSON object matching this schema:
{
  "vendor_name": "string or null",
  "invoice_number": "string or null",
  "issue_date": "YYYY-MM-DD or null",
  "due_date": "YYYY-MM-DD or null",
  "total_amount": number or null,
  "currency": "ISO-4217 code or null",
  "line_items": [{"description": "string", "quantity": number, "unit_price": number, "amount": number}]
}
Notes:
- The text may be garbled by PDF column extraction. Reconstruct what you can.
- Use null for fields you cannot determine.
- Return ONLY the JSON object, no markdown fences, no commentary."#;

/// Result of the text-extraction stage
#[derive(Debug, Clone)]
pub struct TextExtraction {
    pub text: String,
    pub method: ExtractionMethod,
    pub confidence: f64,
    pub page_count: i64,
    pub character_count: i64,
}

pub struct ExtractorRouter {
    governor: Arc<LlmGovernor>,
    default_policy: CostPolicy,
}

impl ExtractorRouter {
    pub fn new(governor: Arc<LlmGovernor>, default_policy: CostPolicy) -> Self {
        Self {
            governor,
            default_policy,
        }
    }

    pub fn default_policy(&self) -> CostPolicy {
        self.default_policy
    }

    /// Text extraction with the cost skip rules. `policy` overrides the
    /// default per call site; pass None for the configured default.
    pub async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        is_pdf: bool,
        policy: Option<CostPolicy>,
    ) -> Result<TextExtraction, MailgraphError> {
        let policy = policy.unwrap_or(self.default_policy);

        if is_pdf {
            return self.extract_pdf(bytes.to_vec(), policy).await;
        }

        if mime_type.starts_with("image/") {
            return match policy {
                CostPolicy::CostConservative => {
                    debug!(mime_type = %mime_type, "Image suppressed by cost policy");
                    Err(MailgraphError::ImageSkipped(SKIP_REASON_IMAGE.to_string()))
                }
                CostPolicy::AccuracyFirst => self.vision_ocr().await,
            };
        }

        Err(MailgraphError::Validation(format!(
            "unsupported document type: {}",
            mime_type
        )))
    }

    async fn extract_pdf(
        &self,
        bytes: Vec<u8>,
        policy: CostPolicy,
    ) -> Result<TextExtraction, MailgraphError> {
        // lopdf parsing is CPU-bound
        let analysis = tokio::task::spawn_blocking(move || analyze_pdf(&bytes))
            .await
            .map_err(|e| MailgraphError::CorruptedDocument(format!("pdf task: {}", e)))??;

        let char_count = analysis.text.chars().count();
        let acceptable = char_count >= PDF_TEXT_MIN_CHARS
            && printable_ratio(&analysis.text) >= PDF_TEXT_MIN_PRINTABLE_RATIO
            && !analysis.has_embedded_images;

        if acceptable {
            return Ok(TextExtraction {
                character_count: char_count as i64,
                page_count: analysis.page_count as i64,
                text: analysis.text,
                method: ExtractionMethod::PdfText,
                confidence: 1.0,
            });
        }

        // No usable text layer: a scan in PDF clothing
        match policy {
            CostPolicy::CostConservative => {
                debug!(
                    pages = analysis.page_count,
                    chars = char_count,
                    has_images = analysis.has_embedded_images,
                    "Scanned PDF suppressed by cost policy"
                );
                Err(MailgraphError::ScannedSkipped(
                    SKIP_REASON_SCANNED_PDF.to_string(),
                ))
            }
            CostPolicy::AccuracyFirst => self.vision_ocr().await,
        }
    }

    /// The accuracy-first escape hatch. No vision backend ships with the
    /// core; deployments that want it wire one in here.
    async fn vision_ocr(&self) -> Result<TextExtraction, MailgraphError> {
        Err(MailgraphError::LlmPermanent(
            "vision OCR backend not configured".to_string(),
        ))
    }

    /// Stage 2 qualification adjudicator
    pub async fn adjudicate_qualification(
        &self,
        user_id: &str,
        subject: &str,
        body_prefix: &str,
    ) -> Result<(bool, f64, String), MailgraphError> {
        let user_prompt = format!("Subject: {}\n\nBody:\n{}", subject, body_prefix);
        let value = self
            .governor
            .complete_json(user_id, None, QUALIFY_SYSTEM_PROMPT, &user_prompt)
            .await?;

        let qualified = value
            .get("qualified")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| {
                MailgraphError::LlmPermanent("adjudicator response missing 'qualified'".to_string())
            })?;
        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);
        let reason = value
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("llm adjudication")
            .to_string();

        Ok((qualified, confidence, reason))
    }

    /// Classifier: keyword pre-filter, LLM fallback
    pub async fn classify_document(
        &self,
        user_id: &str,
        document_id: &str,
        text: &str,
    ) -> Result<(DocumentType, f64), MailgraphError> {
        if let Some((document_type, confidence)) = keyword_classify(text) {
            debug!(
                document_id = %document_id,
                document_type = %document_type.as_str(),
                "Classified by keyword"
            );
            return Ok((document_type, confidence));
        }

        let prompt: String = text.chars().take(4000).collect();
        let value = self
            .governor
            .complete_json(user_id, Some(document_id), CLASSIFY_SYSTEM_PROMPT, &prompt)
            .await?;

        let document_type = value
            .get("document_type")
            .and_then(|v| v.as_str())
            .and_then(DocumentType::parse)
            .unwrap_or(DocumentType::Other);
        let confidence = value
            .get("confidence")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        info!(
            document_id = %document_id,
            document_type = %document_type.as_str(),
            confidence = confidence,
            "Classified by LLM"
        );
        Ok((document_type, confidence))
    }

    /// LLM field extraction; the template path lives with the cache, this is
    /// the fallback when no template fits
    pub async fn extract_fields_llm(
        &self,
        user_id: &str,
        document_id: &str,
        text: &str,
    ) -> Result<(ExtractedFields, f64), MailgraphError> {
        let prompt: String = text.chars().take(12_000).collect();
        let value = self
            .governor
            .complete_json(user_id, Some(document_id), FIELDS_SYSTEM_PROMPT, &prompt)
            .await?;

        let fields = fields_from_llm_json(&value);
        // The model does not self-report calibrated confidence for field
        // extraction; completeness of the required fields is the proxy
        let confidence = if fields.has_required_fields() { 0.85 } else { 0.4 };
        Ok((fields, confidence))
    }
}
