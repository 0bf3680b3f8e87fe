//! Shared test harness: a full component stack wired to fakes.
//!
//! The provider is a canned mailbox, the LLM is a scripted client, storage
//! is in-memory, and the database is in-memory SQLite. Only the component
//! boundaries are faked; everything between them is the real code.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document as PdfDocument, Object, Stream};
use mailgraph_core::credentials::{CredentialStore, RefreshedToken, TokenCipher, TokenRefresher};
use mailgraph_core::error::MailgraphError;
use mailgraph_core::extract::llm::{ChatOutcome, ChatRequest, LlmClient};
use mailgraph_core::extract::{ExtractorRouter, LlmGovernor, TemplateCache};
use mailgraph_core::models::{CostPolicy, LlmConfig, MailgraphConfig};
use mailgraph_core::pipeline::ExtractionPipeline;
use mailgraph_core::providers::{
    AttachmentContent, FetchedAttachmentMeta, FetchedMessage, MailProvider, MessageMeta,
    MessagePage, ProviderKind, ProviderRegistry,
};
use mailgraph_core::qualify::QualificationEngine;
use mailgraph_core::queue::JobQueue;
use mailgraph_core::storage::InMemoryStorageService;
use mailgraph_core::store::GraphStore;
use mailgraph_core::sync::SyncCoordinator;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub const USER: &str = "user-1";

/// Builds a minimal single-page PDF whose text layer contains `text`
pub fn pdf_with_text(text: &str) -> Vec<u8> {
    let mut doc = PdfDocument::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 12.into()]),
            Operation::new("Td", vec![50.into(), 700.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        content.encode().expect("encode content"),
    ));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save pdf");
    bytes
}

/// Same, plus a full-page image XObject so the router treats it as scanned
pub fn scanned_pdf() -> Vec<u8> {
    let bytes = pdf_with_text("");
    let mut doc = PdfDocument::load_mem(&bytes).expect("reload");
    doc.add_object(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => 1700,
            "Height" => 2200,
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8,
        },
        vec![0u8; 16],
    ));
    let mut out = Vec::new();
    doc.save_to(&mut out).expect("save pdf");
    out
}

/// Invoice body long enough to clear the 100-char pdf_text acceptance bar
pub fn invoice_pdf_text() -> String {
    let mut text = String::from("Acme Corp   Invoice Number: A-1029   ");
    text.push_str("Issue Date: 2026-06-15   ");
    text.push_str("Services rendered during June, itemized on the attached schedule.   ");
    text.push_str("Total: $1,234.56");
    text
}

pub struct StaticRefresher;

#[async_trait]
impl TokenRefresher for StaticRefresher {
    async fn refresh(
        &self,
        _provider: ProviderKind,
        _refresh_token: &str,
    ) -> Result<RefreshedToken, MailgraphError> {
        Ok(RefreshedToken {
            access_token: "tok".to_string(),
            expires_in_seconds: 3600,
        })
    }
}

/// Scripted LLM shared across the whole stack
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, MailgraphError>>>,
    calls: AtomicU32,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<Result<String, MailgraphError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicU32::new(0),
        }
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatOutcome, MailgraphError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self
            .responses
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| Err(MailgraphError::LlmTransient("script dry".to_string())));
        next.map(|content| ChatOutcome {
            content,
            prompt_tokens: 100,
            completion_tokens: 50,
        })
    }
}

/// A canned mailbox with bodies and attachment bytes
#[derive(Default)]
pub struct FakeMailbox {
    pub metas: Vec<MessageMeta>,
    pub bodies: HashMap<String, FetchedMessage>,
    pub attachments: HashMap<(String, String), AttachmentContent>,
}

impl FakeMailbox {
    pub fn add_email(
        &mut self,
        provider_message_id: &str,
        subject: &str,
        sender: &str,
        body: &str,
        attachments: Vec<(&str, &str, Vec<u8>)>,
    ) {
        let meta = MessageMeta {
            provider_message_id: provider_message_id.to_string(),
            provider_thread_id: None,
            received_at: Utc::now() - Duration::hours(1),
            subject: subject.to_string(),
            sender: sender.to_string(),
        };

        let attachment_metas = attachments
            .iter()
            .map(|(id, filename, bytes)| {
                self.attachments.insert(
                    (provider_message_id.to_string(), id.to_string()),
                    AttachmentContent {
                        bytes: bytes.clone(),
                        mime_type: "application/pdf".to_string(),
                        size: bytes.len(),
                    },
                );
                FetchedAttachmentMeta {
                    provider_attachment_id: id.to_string(),
                    filename: filename.to_string(),
                    mime_type: "application/pdf".to_string(),
                    size: Some(bytes.len() as i64),
                }
            })
            .collect();

        self.bodies.insert(
            provider_message_id.to_string(),
            FetchedMessage {
                meta: meta.clone(),
                recipient: "me@example.com".to_string(),
                body_text: Some(body.to_string()),
                body_html: None,
                attachments: attachment_metas,
            },
        );
        self.metas.push(meta);
    }
}

#[async_trait]
impl MailProvider for FakeMailbox {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn list_messages(
        &self,
        _user_id: &str,
        _token: &str,
        since: DateTime<Utc>,
        _page_cursor: Option<&str>,
        _max: u32,
    ) -> Result<MessagePage, MailgraphError> {
        Ok(MessagePage {
            messages: self
                .metas
                .iter()
                .filter(|m| m.received_at >= since)
                .cloned()
                .collect(),
            next_cursor: None,
        })
    }

    async fn fetch_message(
        &self,
        _user_id: &str,
        _token: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, MailgraphError> {
        self.bodies
            .get(message_id)
            .cloned()
            .ok_or_else(|| MailgraphError::ProviderPermanent("not found".to_string()))
    }

    async fn fetch_attachment(
        &self,
        _user_id: &str,
        _token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentContent, MailgraphError> {
        self.attachments
            .get(&(message_id.to_string(), attachment_id.to_string()))
            .cloned()
            .ok_or_else(|| MailgraphError::ProviderPermanent("no attachment".to_string()))
    }
}

pub struct FakeRegistry {
    pub mailbox: Arc<FakeMailbox>,
}

#[async_trait]
impl ProviderRegistry for FakeRegistry {
    async fn provider_for(
        &self,
        _user_id: &str,
        _kind: ProviderKind,
    ) -> Result<Arc<dyn MailProvider>, MailgraphError> {
        Ok(self.mailbox.clone())
    }
}

/// The whole stack, wired to the fakes above
pub struct TestEnv {
    pub store: GraphStore,
    pub queue: JobQueue,
    pub coordinator: SyncCoordinator,
    pub pipeline: ExtractionPipeline,
    pub llm: Arc<ScriptedLlm>,
}

impl TestEnv {
    pub async fn new(
        mailbox: FakeMailbox,
        llm_responses: Vec<Result<String, MailgraphError>>,
    ) -> Self {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let cipher = TokenCipher::from_hex_key(&"00".repeat(32)).unwrap();
        let credentials = Arc::new(CredentialStore::new(
            store.clone(),
            cipher,
            Arc::new(StaticRefresher),
        ));
        credentials
            .store_initial_credential(USER, ProviderKind::Gmail, "refresh", None, None)
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(llm_responses));
        let governor = Arc::new(LlmGovernor::new(llm.clone(), LlmConfig::default()));
        let router = Arc::new(ExtractorRouter::new(governor, CostPolicy::CostConservative));
        let qualifier = Arc::new(QualificationEngine::new(store.clone(), router.clone()));
        let queue = JobQueue::new(store.clone());
        let templates = Arc::new(TemplateCache::new(store.clone(), 90));
        let storage = Arc::new(InMemoryStorageService::new());
        let registry = Arc::new(FakeRegistry {
            mailbox: Arc::new(mailbox),
        });

        let pipeline = ExtractionPipeline::new(
            store.clone(),
            storage,
            router,
            templates,
            registry.clone(),
            credentials.clone(),
            Duration::minutes(10),
        );

        let coordinator = SyncCoordinator::new(
            store.clone(),
            credentials,
            registry,
            qualifier,
            queue.clone(),
            MailgraphConfig::for_tests(PathBuf::from("/tmp/mailgraph-e2e")),
        );

        Self {
            store,
            queue,
            coordinator,
            pipeline,
            llm,
        }
    }

    /// Claims and runs queued jobs until the queue is drained or `max`
    /// jobs have run; failed jobs go through the queue's retry policy
    pub async fn drain_jobs(&self, max: usize) -> usize {
        let mut ran = 0;
        while ran < max {
            let Some(job) = self.queue.claim_next(Duration::minutes(10)).await.unwrap() else {
                break;
            };
            ran += 1;

            let payload: mailgraph_core::models::ProcessAttachmentPayload =
                serde_json::from_value(job.payload.clone()).unwrap();
            match self.pipeline.process_attachment(&payload, None).await {
                Ok(_) => self.queue.complete(&job.id, job.lease_epoch).await.unwrap(),
                Err(e) => {
                    self.queue.handle_failure(&job, &e).await.unwrap();
                }
            }
        }
        ran
    }
}

/// LLM field-extraction response matching the invoice fixture
pub fn invoice_fields_json() -> String {
    serde_json::json!({
        "vendor_name": "Acme Corp",
        "invoice_number": "A-1029",
        "issue_date": "2026-06-15",
        "due_date": null,
        "total_amount": 1234.56,
        "currency": "USD",
        "line_items": []
    })
    .to_string()
}
