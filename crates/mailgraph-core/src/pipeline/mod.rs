/// Extraction pipeline - the per-document state machine
///
/// `queued → fetching → extracting → classifying → populating → resolving →
/// completed`, with terminal `skipped` and `failed`. One worker at a time
/// drives a document, serialized by the per-document lease; every write is
/// fenced by the lease epoch. Transient failures rewind to the start of the
/// failing transition and surface to the job queue for backoff.
use crate::constants::{
    MAX_ATTACHMENT_SIZE_BYTES, SKIP_REASON_DUPLICATE, SKIP_REASON_OUT_OF_SCOPE,
};
use crate::error::{ErrorRecord, MailgraphError};
use crate::extract::template::{
    apply_template, synthesize_template, verify_application, TemplateKey,
};
use crate::extract::{ExtractorRouter, TemplateCache};
use crate::credentials::CredentialStore;
use crate::models::{
    AttachmentDescriptor, Document, DocumentType, DownloadState, ExtractedFields,
    ExtractionMethod, Message, PipelineState, PartyType, ProcessAttachmentPayload,
    ProcessUploadPayload, Transaction, TransactionKind,
};
use crate::providers::{ProviderKind, ProviderRegistry};
use crate::storage::{content_hash, StorageService};
use crate::store::GraphStore;
use crate::utils::normalize::{document_file_name, is_blocked_attachment, sender_domain};
use chrono::{Duration, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How a pipeline run ended, when it did not error
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Completed,
    Skipped(String),
    /// Replay of an already-terminal document; the graph is untouched
    AlreadyDone,
}

pub struct ExtractionPipeline {
    store: GraphStore,
    storage: Arc<dyn StorageService>,
    router: Arc<ExtractorRouter>,
    templates: Arc<TemplateCache>,
    providers: Arc<dyn ProviderRegistry>,
    credentials: Arc<CredentialStore>,
    lease: Duration,
}

impl ExtractionPipeline {
    pub fn new(
        store: GraphStore,
        storage: Arc<dyn StorageService>,
        router: Arc<ExtractorRouter>,
        templates: Arc<TemplateCache>,
        providers: Arc<dyn ProviderRegistry>,
        credentials: Arc<CredentialStore>,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            router,
            templates,
            providers,
            credentials,
            lease,
        }
    }

    /// Entry point for `attachments`-lane jobs
    pub async fn process_attachment(
        &self,
        payload: &ProcessAttachmentPayload,
        soft_deadline: Option<Instant>,
    ) -> Result<PipelineOutcome, MailgraphError> {
        let message = self
            .store
            .get_message(&payload.message_id)
            .await?
            .ok_or_else(|| {
                MailgraphError::Validation(format!("no message {}", payload.message_id))
            })?;
        let attachment = self
            .store
            .get_attachment(&payload.attachment_id)
            .await?
            .ok_or_else(|| {
                MailgraphError::Validation(format!("no attachment {}", payload.attachment_id))
            })?;

        // Resume path: a document already exists for this attachment
        if let Some(document) = self.document_for_attachment(&attachment.id).await? {
            if document.is_terminal() {
                debug!(document_id = %document.id, "Replay of terminal document is a no-op");
                return Ok(PipelineOutcome::AlreadyDone);
            }
            return self
                .drive_document(document, Some(&message), soft_deadline)
                .await;
        }

        if is_blocked_attachment(&attachment.filename, &attachment.mime_type) {
            warn!(
                attachment_id = %attachment.id,
                filename = %attachment.filename,
                "Blocked attachment type, not downloading"
            );
            self.store
                .set_attachment_state(&attachment.id, DownloadState::Skipped)
                .await?;
            return Ok(PipelineOutcome::Skipped("blocked_type".to_string()));
        }

        // queued → fetching: pull bytes, hash, dedup
        let document = match self.fetch_and_persist(&message, &attachment).await? {
            FetchResult::Deduplicated(existing_id) => {
                self.store
                    .link_message_document(&message.id, &existing_id)
                    .await?;
                info!(
                    message_id = %message.id,
                    document_id = %existing_id,
                    "Duplicate content, linked to existing document"
                );
                return Ok(PipelineOutcome::Skipped(SKIP_REASON_DUPLICATE.to_string()));
            }
            FetchResult::Created(document) => document,
        };

        self.store
            .link_message_document(&message.id, &document.id)
            .await?;
        self.drive_document(document, Some(&message), soft_deadline)
            .await
    }

    /// Entry point for `documents`-lane jobs (direct uploads). The document
    /// row and its blob already exist.
    pub async fn process_upload(
        &self,
        payload: &ProcessUploadPayload,
        soft_deadline: Option<Instant>,
    ) -> Result<PipelineOutcome, MailgraphError> {
        let document = self
            .store
            .get_document(&payload.document_id)
            .await?
            .ok_or_else(|| {
                MailgraphError::Validation(format!("no document {}", payload.document_id))
            })?;

        if document.is_terminal() {
            return Ok(PipelineOutcome::AlreadyDone);
        }
        self.drive_document(document, None, soft_deadline).await
    }

    async fn document_for_attachment(
        &self,
        attachment_id: &str,
    ) -> Result<Option<Document>, MailgraphError> {
        use sqlx::Row;
        let row = sqlx::query("SELECT id FROM documents WHERE source_attachment_id = ?")
            .bind(attachment_id)
            .fetch_optional(self.store.pool())
            .await?;
        match row {
            Some(row) => self.store.get_document(row.try_get::<String, _>("id")?.as_str()).await,
            None => Ok(None),
        }
    }

    async fn fetch_and_persist(
        &self,
        message: &Message,
        attachment: &AttachmentDescriptor,
    ) -> Result<FetchResult, MailgraphError> {
        let kind = ProviderKind::parse(&message.provider).ok_or_else(|| {
            MailgraphError::Validation(format!("unknown provider {}", message.provider))
        })?;

        self.store
            .set_attachment_state(&attachment.id, DownloadState::Downloading)
            .await?;

        let download = async {
            let token = self
                .credentials
                .get_access_token(&message.user_id, kind)
                .await?;
            let provider = self.providers.provider_for(&message.user_id, kind).await?;
            provider
                .fetch_attachment(
                    &message.user_id,
                    &token.token,
                    &message.provider_message_id,
                    &attachment.provider_attachment_id,
                )
                .await
        };

        let content = match download.await {
            Ok(content) => content,
            Err(e) => {
                let state = if e.is_retriable() {
                    DownloadState::Pending
                } else {
                    DownloadState::Failed
                };
                self.store.set_attachment_state(&attachment.id, state).await?;
                return Err(e);
            }
        };

        if content.bytes.len() > MAX_ATTACHMENT_SIZE_BYTES {
            self.store
                .set_attachment_state(&attachment.id, DownloadState::Failed)
                .await?;
            return Err(MailgraphError::Validation(format!(
                "attachment {} is {} bytes, over the {} limit",
                attachment.id,
                content.bytes.len(),
                MAX_ATTACHMENT_SIZE_BYTES
            )));
        }

        let hash = content_hash(&content.bytes);

        // Content-addressed dedup within the user
        if let Some(existing) = self
            .store
            .find_document_by_hash(&message.user_id, &hash)
            .await?
        {
            self.store
                .set_attachment_state(&attachment.id, DownloadState::Downloaded)
                .await?;
            return Ok(FetchResult::Deduplicated(existing.id));
        }

        // Bytes first, row second: a crash between the two leaves an
        // orphaned blob, never a document without bytes
        self.storage.put(&hash, &content.bytes).await?;

        let mime_type = if attachment.mime_type.is_empty() {
            content.mime_type.clone()
        } else {
            attachment.mime_type.clone()
        };

        let now = Utc::now();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: message.user_id.clone(),
            source_attachment_id: Some(attachment.id.clone()),
            storage_key: hash.clone(),
            // The provider's name stays on the descriptor; the document is
            // named by its content
            filename: document_file_name(&hash, &attachment.filename),
            content_hash: hash,
            mime_type,
            state: PipelineState::Queued,
            document_type: None,
            extraction_method: None,
            confidence: None,
            page_count: None,
            character_count: None,
            extracted_text: None,
            extracted_fields: None,
            skipped_reason: None,
            last_error: None,
            attempt_count: 0,
            lease_epoch: 0,
            lease_expires_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_document(&document).await?;
        self.store
            .set_attachment_state(&attachment.id, DownloadState::Downloaded)
            .await?;

        Ok(FetchResult::Created(document))
    }

    /// Runs the state machine from the document's current state to a
    /// terminal state, under a fresh lease
    async fn drive_document(
        &self,
        document: Document,
        message: Option<&Message>,
        soft_deadline: Option<Instant>,
    ) -> Result<PipelineOutcome, MailgraphError> {
        let Some(epoch) = self
            .store
            .claim_document_lease(&document.id, self.lease)
            .await?
        else {
            // Another worker holds the document; transient so the job backs off
            return Err(MailgraphError::Queue(format!(
                "document {} is leased by another worker",
                document.id
            )));
        };

        let document_id = document.id.clone();

        // Re-read under the lease: a redelivered job must see the state and
        // side effects the previous attempt persisted
        let current = self
            .store
            .get_document(&document_id)
            .await?
            .ok_or_else(|| MailgraphError::Validation(format!("no document {}", document_id)))?;
        if current.is_terminal() {
            self.store
                .release_document_lease(&document_id, epoch)
                .await?;
            return Ok(PipelineOutcome::AlreadyDone);
        }

        match self
            .run_transitions(&current, epoch, message, soft_deadline)
            .await
        {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_skip() => {
                let reason = skip_reason(&e);
                self.store
                    .mark_document_skipped(&document_id, epoch, &reason)
                    .await?;
                info!(document_id = %document_id, reason = %reason, "Document skipped");
                Ok(PipelineOutcome::Skipped(reason))
            }
            Err(e) if e.is_retriable() => {
                // Rewind to the start of the failing transition; persisted
                // side effects (bytes, hash) are reused on redelivery
                let rewind_state = self
                    .store
                    .get_document(&document_id)
                    .await?
                    .map(|d| d.state)
                    .unwrap_or(PipelineState::Queued);
                self.store
                    .rewind_document(&document_id, epoch, rewind_state, &ErrorRecord::from_error(&e))
                    .await?;
                Err(e)
            }
            Err(e) => {
                self.store
                    .mark_document_failed(&document_id, epoch, &ErrorRecord::from_error(&e))
                    .await?;
                warn!(document_id = %document_id, error = %e, "Document failed terminally");
                Err(e)
            }
        }
    }

    async fn run_transitions(
        &self,
        document: &Document,
        epoch: i64,
        message: Option<&Message>,
        soft_deadline: Option<Instant>,
    ) -> Result<PipelineOutcome, MailgraphError> {
        let check_deadline = || -> Result<(), MailgraphError> {
            if let Some(deadline) = soft_deadline {
                if Instant::now() >= deadline {
                    return Err(MailgraphError::Queue(
                        "soft time limit reached, surrendering at transition boundary".to_string(),
                    ));
                }
            }
            Ok(())
        };

        // fetching/extracting: a redelivered job reuses the text an earlier
        // attempt persisted; bytes are content-addressed either way
        let extraction = match (
            &document.extracted_text,
            document.extraction_method,
            document.page_count,
            document.character_count,
        ) {
            (Some(text), Some(method), Some(pages), Some(chars)) => {
                debug!(document_id = %document.id, "Reusing persisted extraction");
                crate::extract::TextExtraction {
                    text: text.clone(),
                    method,
                    confidence: document.confidence.unwrap_or(1.0),
                    page_count: pages,
                    character_count: chars,
                }
            }
            _ => {
                self.store
                    .set_document_state(&document.id, epoch, PipelineState::Fetching)
                    .await?;
                let bytes = self.storage.get(&document.storage_key).await?;

                self.store
                    .set_document_state(&document.id, epoch, PipelineState::Extracting)
                    .await?;
                let is_pdf = document.mime_type.eq_ignore_ascii_case("application/pdf")
                    || document.filename.to_ascii_lowercase().ends_with(".pdf");

                let extraction = self
                    .router
                    .extract_text(&bytes, &document.mime_type, is_pdf, None)
                    .await?;
                self.store
                    .set_document_extraction(
                        &document.id,
                        epoch,
                        extraction.method,
                        extraction.confidence,
                        &extraction.text,
                        extraction.page_count,
                        extraction.character_count,
                    )
                    .await?;
                extraction
            }
        };
        check_deadline()?;

        // classifying
        let document_type = match document.document_type {
            Some(existing) => existing,
            None => {
                let (document_type, _confidence) = self
                    .router
                    .classify_document(&document.user_id, &document.id, &extraction.text)
                    .await?;
                if document_type == DocumentType::Other {
                    return Err(MailgraphError::OutOfScope(
                        SKIP_REASON_OUT_OF_SCOPE.to_string(),
                    ));
                }
                self.store
                    .set_document_type(&document.id, epoch, document_type)
                    .await?;
                document_type
            }
        };
        check_deadline()?;

        // populating: template first, LLM fallback
        let (fields, field_method, confidence) = self
            .populate_fields(document, message, document_type, &extraction.text)
            .await?;
        self.store
            .set_document_fields(&document.id, epoch, &fields, confidence)
            .await?;
        check_deadline()?;

        // resolving: party, transactions, links
        self.resolve_graph(document, epoch, document_type, &fields)
            .await?;

        self.store.mark_document_completed(&document.id, epoch).await?;
        info!(
            document_id = %document.id,
            document_type = %document_type.as_str(),
            text_method = %extraction.method.as_str(),
            field_method = %field_method.as_str(),
            "Document extracted"
        );
        Ok(PipelineOutcome::Completed)
    }

    async fn populate_fields(
        &self,
        document: &Document,
        message: Option<&Message>,
        document_type: DocumentType,
        text: &str,
    ) -> Result<(ExtractedFields, ExtractionMethod, f64), MailgraphError> {
        let template_key = message
            .and_then(|m| sender_domain(&m.sender))
            .map(|domain| TemplateKey {
                user_id: document.user_id.clone(),
                sender_domain: domain,
                document_type,
                layout_fingerprint: crate::extract::template::layout_fingerprint(text),
            });

        if let Some(key) = &template_key {
            if let Some(recipe) = self.templates.lookup(key).await? {
                let (fields, confidence) = apply_template(&recipe, text);
                if verify_application(&fields, confidence) {
                    debug!(document_id = %document.id, "Template hit");
                    self.templates.record_success(key).await?;
                    return Ok((fields, ExtractionMethod::Template, confidence));
                }
                debug!(document_id = %document.id, "Template failed verification");
                self.templates.record_failure(key).await?;
            }
        }

        let (fields, confidence) = self
            .router
            .extract_fields_llm(&document.user_id, &document.id, text)
            .await?;

        // A successful LLM extraction seeds the cache for next time
        if let Some(key) = &template_key {
            if fields.has_required_fields() {
                if let Some(recipe) = synthesize_template(&fields, text) {
                    self.templates.store(key, &recipe).await?;
                }
            }
        }

        Ok((fields, ExtractionMethod::Llm, confidence))
    }

    async fn resolve_graph(
        &self,
        document: &Document,
        epoch: i64,
        document_type: DocumentType,
        fields: &ExtractedFields,
    ) -> Result<(), MailgraphError> {
        self.store
            .set_document_state(&document.id, epoch, PipelineState::Resolving)
            .await?;

        let party_id = match &fields.vendor_name {
            Some(vendor) => match self
                .store
                .upsert_party(&document.user_id, vendor, PartyType::Vendor)
                .await
            {
                Ok(party) => Some(party.id),
                Err(MailgraphError::Validation(_)) => None,
                Err(e) => return Err(e),
            },
            None => None,
        };

        let amount = fields.total_amount.or_else(|| {
            let item_sum: rust_decimal::Decimal =
                fields.line_items.iter().filter_map(|item| item.amount).sum();
            (!fields.line_items.is_empty() && !item_sum.is_zero()).then_some(item_sum)
        });

        let transactions = match amount {
            Some(amount) => vec![Transaction {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: document.user_id.clone(),
                document_id: document.id.clone(),
                party_id,
                row_index: 0,
                amount,
                currency: fields
                    .currency
                    .clone()
                    .unwrap_or_else(|| "USD".to_string()),
                transaction_date: fields.issue_date,
                kind: TransactionKind::from_document_type(document_type),
                line_items: fields.line_items.clone(),
                metadata: BTreeMap::new(),
                created_at: Utc::now(),
            }],
            None => {
                debug!(document_id = %document.id, "No amount extracted, no transaction row");
                Vec::new()
            }
        };

        // Replacement is atomic and keyed by (document_id, row_index), so a
        // replayed resolve produces identical rows
        self.store
            .replace_document_transactions(&document.id, &transactions)
            .await
    }
}

enum FetchResult {
    Created(Document),
    Deduplicated(String),
}

fn skip_reason(error: &MailgraphError) -> String {
    match error {
        MailgraphError::ScannedSkipped(reason)
        | MailgraphError::ImageSkipped(reason)
        | MailgraphError::OutOfScope(reason)
        | MailgraphError::Duplicate(reason) => reason.clone(),
        other => other.kind().to_string(),
    }
}
