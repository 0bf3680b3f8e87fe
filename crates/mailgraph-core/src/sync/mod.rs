/// Sync coordinator - brings a user's message table up to date with their
/// mailbox over the rolling window
///
/// Incremental: `since = max(last_sync_at - overlap, now - window)`. Paging
/// resumes from a persisted cursor after partial failures. At most one sync
/// runs per user; a concurrent call gets `SyncInProgress` immediately.
use crate::constants::{LANE_ATTACHMENTS, SYNC_LIST_PAGE_SIZE, SYNC_MAX_TRANSIENT_RETRIES};
use crate::credentials::CredentialStore;
use crate::error::MailgraphError;
use crate::models::{
    AttachmentDescriptor, DownloadState, JobKind, MailgraphConfig, Message,
    ProcessAttachmentPayload,
};
use crate::providers::{FetchedMessage, MessageMeta, ProviderKind, ProviderRegistry};
use crate::qualify::QualificationEngine;
use crate::queue::JobQueue;
use crate::store::GraphStore;
use crate::utils::html::snippet;
use crate::utils::retry::{retry_with_backoff, RetryConfig};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncReport {
    /// Message metas paged from the provider
    pub fetched: u64,
    /// New message rows created
    pub inserted: u64,
    /// Attachment jobs enqueued for qualified messages
    pub qualified_submitted: u64,
    /// True when the sync stopped early (cap, backpressure, rate limit) and
    /// left a cursor behind
    pub partial: bool,
}

struct Ingested {
    created: bool,
    jobs: u64,
}

/// Releases the per-user in-flight slot when the sync ends, however it ends
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    user_id: String,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().expect("in-flight lock").remove(&self.user_id);
    }
}

pub struct SyncCoordinator {
    store: GraphStore,
    credentials: Arc<CredentialStore>,
    providers: Arc<dyn ProviderRegistry>,
    qualifier: Arc<QualificationEngine>,
    queue: JobQueue,
    config: MailgraphConfig,
    in_flight: Arc<Mutex<HashSet<String>>>,
    /// Set when a sync paused on the high-water mark; syncs stay paused
    /// until the lane drains below the low-water mark
    backpressured: Arc<Mutex<bool>>,
}

impl SyncCoordinator {
    pub fn new(
        store: GraphStore,
        credentials: Arc<CredentialStore>,
        providers: Arc<dyn ProviderRegistry>,
        qualifier: Arc<QualificationEngine>,
        queue: JobQueue,
        config: MailgraphConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            providers,
            qualifier,
            queue,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            backpressured: Arc::new(Mutex::new(false)),
        }
    }

    /// Backpressure hysteresis: once tripped at the high-water mark, syncs
    /// hold off until the attachments lane drains below the low-water mark
    async fn backpressure_active(&self) -> Result<bool, MailgraphError> {
        let tripped = *self.backpressured.lock().expect("backpressure lock");
        if !tripped {
            return Ok(false);
        }

        let depth = self.queue.lane_depth(LANE_ATTACHMENTS).await?;
        if depth <= self.config.worker.queue_low_water_mark {
            *self.backpressured.lock().expect("backpressure lock") = false;
            return Ok(false);
        }
        Ok(true)
    }

    pub async fn sync_user(
        &self,
        user_id: &str,
        provider_kind: ProviderKind,
    ) -> Result<SyncReport, MailgraphError> {
        let _guard = {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock");
            if !in_flight.insert(user_id.to_string()) {
                return Err(MailgraphError::SyncInProgress(user_id.to_string()));
            }
            InFlightGuard {
                set: self.in_flight.clone(),
                user_id: user_id.to_string(),
            }
        };

        if self.backpressure_active().await? {
            warn!(user_id = %user_id, "Attachments lane still draining, sync deferred");
            return Ok(SyncReport {
                partial: true,
                ..Default::default()
            });
        }

        self.store.ensure_user(user_id).await?;
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| MailgraphError::Validation(format!("no user {}", user_id)))?;

        let started_at = Utc::now();
        let window_months = user.window_months.unwrap_or(self.config.sync.window_months);
        let overlap = Duration::hours(self.config.sync.overlap_window_hours as i64);
        let window_start = started_at
            .checked_sub_months(Months::new(window_months))
            .unwrap_or(started_at - Duration::days(window_months as i64 * 31));

        // The window lower bound is measured from now; overlap applies only
        // to the incremental cursor
        let since = match user.last_sync_at {
            Some(last) => (last - overlap).max(window_start),
            None => window_start,
        };

        let cap = user
            .max_emails_per_sync
            .unwrap_or(self.config.sync.max_emails_per_sync);

        info!(
            user_id = %user_id,
            provider = provider_kind.as_str(),
            since = %since,
            cap = cap,
            resuming = user.sync_cursor.is_some(),
            "Starting sync"
        );

        let provider = self.providers.provider_for(user_id, provider_kind).await?;
        let mut report = SyncReport::default();
        let mut cursor = user.sync_cursor.clone();

        loop {
            let token = self
                .credentials
                .get_access_token(user_id, provider_kind)
                .await?;

            let page_cursor = cursor.clone();
            let page = match retry_with_backoff(
                || {
                    let provider = provider.clone();
                    let token = token.token.clone();
                    let page_cursor = page_cursor.clone();
                    let user_id = user_id.to_string();
                    async move {
                        provider
                            .list_messages(
                                &user_id,
                                &token,
                                since,
                                page_cursor.as_deref(),
                                SYNC_LIST_PAGE_SIZE,
                            )
                            .await
                    }
                },
                RetryConfig::new(SYNC_MAX_TRANSIENT_RETRIES, 500, 15_000),
                "list_messages",
            )
            .await
            {
                Ok(page) => page,
                Err(e @ MailgraphError::CredentialRevoked(_)) => return Err(e),
                Err(e) if e.is_retriable() => {
                    // Out of in-sync retries; persist the cursor and let the
                    // next sync resume here
                    warn!(user_id = %user_id, error = %e, "Sync pausing on transient failure");
                    self.store
                        .set_sync_progress(user_id, None, cursor.as_deref())
                        .await?;
                    report.partial = true;
                    return Ok(report);
                }
                Err(e) => return Err(e),
            };

            report.fetched += page.messages.len() as u64;
            let mut crossed_boundary = page.messages.is_empty();

            for meta in &page.messages {
                if meta.received_at < since {
                    crossed_boundary = true;
                    continue;
                }

                if let Some(ingested) = self
                    .ingest_message(user_id, provider_kind, &provider, &token.token, meta)
                    .await?
                {
                    if ingested.created {
                        report.inserted += 1;
                    }
                    report.qualified_submitted += ingested.jobs;
                }

                if cap > 0 && report.inserted >= cap as u64 {
                    info!(user_id = %user_id, cap = cap, "Per-sync cap reached");
                    self.store
                        .set_sync_progress(user_id, None, page.next_cursor.as_deref())
                        .await?;
                    report.partial = true;
                    return Ok(report);
                }

                // Backpressure: stop feeding a saturated lane
                let depth = self.queue.lane_depth(LANE_ATTACHMENTS).await?;
                if depth >= self.config.worker.queue_high_water_mark {
                    warn!(
                        user_id = %user_id,
                        depth = depth,
                        "Attachments lane over high-water mark, pausing sync"
                    );
                    *self.backpressured.lock().expect("backpressure lock") = true;
                    self.store
                        .set_sync_progress(user_id, None, page.next_cursor.as_deref())
                        .await?;
                    report.partial = true;
                    return Ok(report);
                }
            }

            cursor = page.next_cursor;
            if cursor.is_none() || crossed_boundary {
                break;
            }
        }

        // Full completion: advance the incremental cursor, clear the page
        // cursor
        self.store
            .set_sync_progress(user_id, Some(started_at), None)
            .await?;

        info!(
            user_id = %user_id,
            fetched = report.fetched,
            inserted = report.inserted,
            submitted = report.qualified_submitted,
            "Sync complete"
        );
        Ok(report)
    }

    /// Returns None when the message already existed with a body
    async fn ingest_message(
        &self,
        user_id: &str,
        provider_kind: ProviderKind,
        provider: &Arc<dyn crate::providers::MailProvider>,
        token: &str,
        meta: &MessageMeta,
    ) -> Result<Option<Ingested>, MailgraphError> {
        let existing = self
            .store
            .get_message_by_provider_id(user_id, &meta.provider_message_id)
            .await?;
        if let Some(existing) = &existing {
            if existing.body_text.is_some() {
                // A deferred LLM decision gets another chance on later syncs
                if existing.is_qualification_pending() {
                    let jobs = self.requalify_existing(user_id, existing).await?;
                    return Ok(Some(Ingested {
                        created: false,
                        jobs,
                    }));
                }
                return Ok(None);
            }
        }
        let created = existing.is_none();

        let message_id = match &existing {
            Some(existing) => existing.id.clone(),
            None => {
                let message = Message {
                    id: uuid::Uuid::new_v4().to_string(),
                    user_id: user_id.to_string(),
                    provider: provider_kind.as_str().to_string(),
                    provider_message_id: meta.provider_message_id.clone(),
                    provider_thread_id: meta.provider_thread_id.clone(),
                    sender: meta.sender.clone(),
                    recipient: String::new(),
                    subject: meta.subject.clone(),
                    received_at: meta.received_at,
                    body_text: None,
                    snippet: None,
                    is_qualified: None,
                    qualification_stage: None,
                    qualification_confidence: None,
                    qualification_reason: None,
                    qualified_at: None,
                    created_at: Utc::now(),
                };
                if !self.store.insert_message_if_new(&message).await? {
                    // Raced with a concurrent insert; treat as pre-existing
                    return Ok(None);
                }
                message.id
            }
        };

        // The only step that pulls bodies. A per-message fetch failure does
        // not abort the sync; the body stays empty and qualification waits.
        let fetched = match provider
            .fetch_message(user_id, token, &meta.provider_message_id)
            .await
        {
            Ok(fetched) => fetched,
            Err(e @ MailgraphError::CredentialRevoked(_)) => return Err(e),
            Err(e) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "Body fetch failed, deferring qualification"
                );
                return Ok(Some(Ingested { created, jobs: 0 }));
            }
        };

        let jobs = self
            .hydrate_and_qualify(user_id, &message_id, &fetched)
            .await?;
        Ok(Some(Ingested { created, jobs }))
    }

    /// Qualification for a message whose body is already stored but whose
    /// decision was deferred by an earlier transient failure
    async fn requalify_existing(
        &self,
        user_id: &str,
        message: &Message,
    ) -> Result<u64, MailgraphError> {
        let outcome = match self.qualifier.qualify(message).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retriable() => {
                debug!(message_id = %message.id, error = %e, "Qualification deferred again");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        if !outcome.qualified {
            return Ok(0);
        }

        let descriptors = self.store.attachments_for_message(&message.id).await?;
        let mut enqueued = 0;
        for descriptor in descriptors.iter().filter(|d| d.is_supported_document()) {
            let payload = serde_json::to_value(ProcessAttachmentPayload {
                message_id: message.id.clone(),
                attachment_id: descriptor.id.clone(),
            })?;
            self.queue
                .enqueue(
                    JobKind::ProcessAttachment,
                    LANE_ATTACHMENTS,
                    user_id,
                    &payload,
                    message.received_at.timestamp(),
                )
                .await?;
            enqueued += 1;
        }
        Ok(enqueued)
    }

    async fn hydrate_and_qualify(
        &self,
        user_id: &str,
        message_id: &str,
        fetched: &FetchedMessage,
    ) -> Result<u64, MailgraphError> {
        let body = fetched.effective_body();
        let body_snippet = body.as_deref().map(|b| snippet(b, 200));
        self.store
            .update_message_body(message_id, body.as_deref(), body_snippet.as_deref())
            .await?;

        let mut descriptors = Vec::new();
        for attachment in &fetched.attachments {
            let descriptor = AttachmentDescriptor {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: user_id.to_string(),
                message_id: message_id.to_string(),
                provider_attachment_id: attachment.provider_attachment_id.clone(),
                filename: attachment.filename.clone(),
                mime_type: attachment.mime_type.clone(),
                declared_size: attachment.size,
                download_state: DownloadState::Pending,
            };
            self.store.insert_attachment(&descriptor).await?;
            descriptors.push(descriptor);
        }

        // Qualification is synchronous; only the LLM tier can fail here, and
        // a transient failure just defers the decision
        let message = self
            .store
            .get_message(message_id)
            .await?
            .ok_or_else(|| MailgraphError::Validation(format!("no message {}", message_id)))?;
        let outcome = match self.qualifier.qualify(&message).await {
            Ok(outcome) => outcome,
            Err(e) if e.is_retriable() => {
                debug!(message_id = %message_id, error = %e, "Qualification deferred");
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        if !outcome.qualified {
            return Ok(0);
        }

        let mut enqueued = 0;
        for descriptor in descriptors
            .iter()
            .filter(|d| d.is_supported_document())
        {
            let payload = serde_json::to_value(ProcessAttachmentPayload {
                message_id: message_id.to_string(),
                attachment_id: descriptor.id.clone(),
            })?;
            self.queue
                .enqueue(
                    JobKind::ProcessAttachment,
                    LANE_ATTACHMENTS,
                    user_id,
                    &payload,
                    message.received_at.timestamp(),
                )
                .await?;
            enqueued += 1;
        }

        Ok(enqueued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{RefreshedToken, TokenCipher, TokenRefresher};
    use crate::extract::llm::test_support::ScriptedLlm;
    use crate::extract::{ExtractorRouter, LlmGovernor};
    use crate::models::{CostPolicy, LlmConfig};
    use crate::providers::{
        AttachmentContent, FetchedAttachmentMeta, MailProvider, MessagePage,
    };
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct StaticRefresher;

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

    /// Canned mailbox: one page of messages, bodies and attachments by id
    struct FakeMailbox {
        metas: Vec<MessageMeta>,
        bodies: std::collections::HashMap<String, FetchedMessage>,
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
            _message_id: &str,
            _attachment_id: &str,
        ) -> Result<AttachmentContent, MailgraphError> {
            Ok(AttachmentContent {
                bytes: b"pdf".to_vec(),
                mime_type: "application/pdf".to_string(),
                size: 3,
            })
        }
    }

    struct FakeRegistry {
        mailbox: Arc<FakeMailbox>,
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

    fn meta(id: &str, subject: &str, sender: &str, minutes_ago: i64) -> MessageMeta {
        MessageMeta {
            provider_message_id: id.to_string(),
            provider_thread_id: None,
            received_at: Utc::now() - Duration::minutes(minutes_ago),
            subject: subject.to_string(),
            sender: sender.to_string(),
        }
    }

    fn fetched(meta: &MessageMeta, body: &str, pdf_attachments: usize) -> FetchedMessage {
        FetchedMessage {
            meta: meta.clone(),
            recipient: "me@example.com".to_string(),
            body_text: Some(body.to_string()),
            body_html: None,
            attachments: (0..pdf_attachments)
                .map(|i| FetchedAttachmentMeta {
                    provider_attachment_id: format!("pa-{}", i),
                    filename: format!("doc-{}.pdf", i),
                    mime_type: "application/pdf".to_string(),
                    size: Some(1024),
                })
                .collect(),
        }
    }

    async fn coordinator(mailbox: FakeMailbox) -> (SyncCoordinator, GraphStore, JobQueue) {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let cipher = TokenCipher::from_hex_key(&"00".repeat(32)).unwrap();
        let credentials = Arc::new(CredentialStore::new(
            store.clone(),
            cipher,
            Arc::new(StaticRefresher),
        ));
        credentials
            .store_initial_credential("user-1", ProviderKind::Gmail, "refresh", None, None)
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let governor = Arc::new(LlmGovernor::new(llm, LlmConfig::default()));
        let router = Arc::new(ExtractorRouter::new(governor, CostPolicy::CostConservative));
        let qualifier = Arc::new(QualificationEngine::new(store.clone(), router));
        let queue = JobQueue::new(store.clone());
        let config = MailgraphConfig::for_tests(PathBuf::from("/tmp/mailgraph-sync-test"));

        let coordinator = SyncCoordinator::new(
            store.clone(),
            credentials,
            Arc::new(FakeRegistry {
                mailbox: Arc::new(mailbox),
            }),
            qualifier,
            queue.clone(),
            config,
        );
        (coordinator, store, queue)
    }

    #[tokio::test]
    async fn test_sync_inserts_qualifies_and_enqueues() {
        let invoice = meta("p1", "Invoice #A-1029 from Acme Corp", "billing@acme.example.com", 60);
        let marketing = meta("p2", "Limited time offer - click here", "promo@shop.example.com", 50);
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("p1".to_string(), fetched(&invoice, "Total: $1,234.56", 1));
        bodies.insert("p2".to_string(), fetched(&marketing, "buy now", 0));

        let (coordinator, store, queue) = coordinator(FakeMailbox {
            metas: vec![invoice, marketing],
            bodies,
        })
        .await;

        let report = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.qualified_submitted, 1);
        assert!(!report.partial);

        // The invoice message is qualified with the expected stage-1 fields
        let message = store
            .get_message_by_provider_id("user-1", "p1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.is_qualified, Some(true));
        assert_eq!(message.qualification_reason.as_deref(), Some("keyword:invoice"));

        // The marketing message got no jobs
        let rejected = store
            .get_message_by_provider_id("user-1", "p2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rejected.is_qualified, Some(false));

        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 1);

        // last_sync_at advanced, no cursor left behind
        let user = store.get_user("user-1").await.unwrap().unwrap();
        assert!(user.last_sync_at.is_some());
        assert!(user.sync_cursor.is_none());
    }

    #[tokio::test]
    async fn test_double_sync_inserts_no_duplicates() {
        let invoice = meta("p1", "Invoice attached", "billing@acme.example.com", 60);
        let mut bodies = std::collections::HashMap::new();
        bodies.insert("p1".to_string(), fetched(&invoice, "Total: $10", 1));

        let (coordinator, _store, queue) = coordinator(FakeMailbox {
            metas: vec![invoice],
            bodies,
        })
        .await;

        let first = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap();
        assert_eq!(first.inserted, 1);

        let second = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap();
        assert_eq!(second.inserted, 0);

        // No second job either
        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_sync_rejected() {
        let (coordinator, _store, _queue) = coordinator(FakeMailbox {
            metas: vec![],
            bodies: Default::default(),
        })
        .await;
        let coordinator = Arc::new(coordinator);

        // Hold the slot manually to simulate an in-flight sync
        coordinator
            .in_flight
            .lock()
            .unwrap()
            .insert("user-1".to_string());

        let err = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::SyncInProgress(_)));
    }

    #[tokio::test]
    async fn test_cap_counts_new_messages_and_leaves_cursor() {
        let metas: Vec<MessageMeta> = (0..5)
            .map(|i| {
                meta(
                    &format!("p{}", i),
                    "Invoice attached",
                    "billing@acme.example.com",
                    60 + i,
                )
            })
            .collect();
        let bodies = metas
            .iter()
            .map(|m| (m.provider_message_id.clone(), fetched(m, "Total: $10", 0)))
            .collect();

        let (coordinator, store, _queue) = coordinator(FakeMailbox { metas, bodies }).await;
        store.ensure_user("user-1").await.unwrap();
        store
            .set_sync_preferences("user-1", None, Some(2))
            .await
            .unwrap();

        let report = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap();
        assert_eq!(report.inserted, 2);
        assert!(report.partial);

        // last_sync_at untouched on partial completion
        let user = store.get_user("user-1").await.unwrap().unwrap();
        assert!(user.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_revoked_credential_aborts_but_keeps_messages() {
        struct RevokedRefresher;

        #[async_trait]
        impl TokenRefresher for RevokedRefresher {
            async fn refresh(
                &self,
                _provider: ProviderKind,
                _refresh_token: &str,
            ) -> Result<RefreshedToken, MailgraphError> {
                Err(MailgraphError::CredentialRevoked("invalid_grant".to_string()))
            }
        }

        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let cipher = TokenCipher::from_hex_key(&"00".repeat(32)).unwrap();
        let credentials = Arc::new(CredentialStore::new(
            store.clone(),
            cipher,
            Arc::new(RevokedRefresher),
        ));
        credentials
            .store_initial_credential("user-1", ProviderKind::Gmail, "refresh", None, None)
            .await
            .unwrap();

        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let governor = Arc::new(LlmGovernor::new(llm, LlmConfig::default()));
        let router = Arc::new(ExtractorRouter::new(governor, CostPolicy::CostConservative));
        let qualifier = Arc::new(QualificationEngine::new(store.clone(), router));
        let queue = JobQueue::new(store.clone());

        let coordinator = SyncCoordinator::new(
            store.clone(),
            credentials,
            Arc::new(FakeRegistry {
                mailbox: Arc::new(FakeMailbox {
                    metas: vec![],
                    bodies: Default::default(),
                }),
            }),
            qualifier,
            queue,
            MailgraphConfig::for_tests(PathBuf::from("/tmp/mailgraph-sync-test")),
        );

        let err = coordinator
            .sync_user("user-1", ProviderKind::Gmail)
            .await
            .unwrap_err();
        assert!(matches!(err, MailgraphError::CredentialRevoked(_)));
    }
}
