/// Mail provider adapters - uniform interface over Gmail, Outlook Graph,
/// and IMAP
///
/// Adapters translate provider-specific errors into the common taxonomy at
/// their boundary and enforce per-user token-bucket rate limits. Paging is
/// monotone: a stable cursor returns each message at most once per scan.
pub mod gmail;
pub mod imap;
pub mod outlook;
pub mod rate_limit;

pub use gmail::GmailProvider;
pub use imap::ImapProvider;
pub use outlook::OutlookProvider;
pub use rate_limit::RateLimiterRegistry;

use crate::constants::{DEFAULT_PROVIDER_RATE_PER_SECOND, GMAIL_QUOTA_UNITS_PER_SECOND};
use crate::error::MailgraphError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
    Imap,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Imap => "imap",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gmail" => Some(Self::Gmail),
            "outlook" => Some(Self::Outlook),
            "imap" => Some(Self::Imap),
            _ => None,
        }
    }

    /// Sustained request budget per user; Gmail is quota-unit based
    pub fn rate_per_second(&self) -> f64 {
        match self {
            Self::Gmail => GMAIL_QUOTA_UNITS_PER_SECOND,
            _ => DEFAULT_PROVIDER_RATE_PER_SECOND,
        }
    }
}

/// Listing metadata only; bodies are fetched separately
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub provider_message_id: String,
    pub provider_thread_id: Option<String>,
    pub received_at: DateTime<Utc>,
    pub subject: String,
    pub sender: String,
}

#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<MessageMeta>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedAttachmentMeta {
    pub provider_attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: Option<i64>,
}

/// Full message: headers, best-effort text body, attachment descriptors
#[derive(Debug, Clone)]
pub struct FetchedMessage {
    pub meta: MessageMeta,
    pub recipient: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub attachments: Vec<FetchedAttachmentMeta>,
}

impl FetchedMessage {
    /// Text body, stripping the HTML part when no text/plain part exists
    pub fn effective_body(&self) -> Option<String> {
        if let Some(text) = &self.body_text {
            if !text.trim().is_empty() {
                return Some(text.clone());
            }
        }
        self.body_html
            .as_deref()
            .map(crate::utils::html::html_to_text)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct AttachmentContent {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub size: usize,
}

#[async_trait]
pub trait MailProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Lists message metadata received at or after `since`, newest first.
    /// `page_cursor` continues a prior scan; `max` bounds the page size.
    async fn list_messages(
        &self,
        user_id: &str,
        token: &str,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
        max: u32,
    ) -> Result<MessagePage, MailgraphError>;

    async fn fetch_message(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, MailgraphError>;

    async fn fetch_attachment(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentContent, MailgraphError>;
}

/// Resolves the adapter for a user's provider. IMAP adapters are built per
/// user (the session needs the mailbox account); Gmail and Graph are
/// singletons.
#[async_trait]
pub trait ProviderRegistry: Send + Sync {
    async fn provider_for(
        &self,
        user_id: &str,
        kind: ProviderKind,
    ) -> Result<std::sync::Arc<dyn MailProvider>, MailgraphError>;
}

pub struct StaticProviderRegistry {
    gmail: std::sync::Arc<dyn MailProvider>,
    outlook: std::sync::Arc<dyn MailProvider>,
    imap_host: Option<(String, u16)>,
    limiter: std::sync::Arc<RateLimiterRegistry>,
    store: crate::store::GraphStore,
}

impl StaticProviderRegistry {
    pub fn new(
        limiter: std::sync::Arc<RateLimiterRegistry>,
        store: crate::store::GraphStore,
        imap_host: Option<(String, u16)>,
    ) -> Self {
        Self {
            gmail: std::sync::Arc::new(GmailProvider::new(limiter.clone())),
            outlook: std::sync::Arc::new(OutlookProvider::new(limiter.clone())),
            imap_host,
            limiter,
            store,
        }
    }

    /// Test seam: swap in adapters pointed at fakes
    pub fn with_adapters(
        mut self,
        gmail: std::sync::Arc<dyn MailProvider>,
        outlook: std::sync::Arc<dyn MailProvider>,
    ) -> Self {
        self.gmail = gmail;
        self.outlook = outlook;
        self
    }
}

#[async_trait]
impl ProviderRegistry for StaticProviderRegistry {
    async fn provider_for(
        &self,
        user_id: &str,
        kind: ProviderKind,
    ) -> Result<std::sync::Arc<dyn MailProvider>, MailgraphError> {
        match kind {
            ProviderKind::Gmail => Ok(self.gmail.clone()),
            ProviderKind::Outlook => Ok(self.outlook.clone()),
            ProviderKind::Imap => {
                let (host, port) = self.imap_host.clone().ok_or_else(|| {
                    MailgraphError::Config("imap host not configured".to_string())
                })?;
                let user = self.store.get_user(user_id).await?.ok_or_else(|| {
                    MailgraphError::Validation(format!("no user {}", user_id))
                })?;
                let email = user.email.ok_or_else(|| {
                    MailgraphError::Config(format!("user {} has no mailbox address", user_id))
                })?;
                Ok(std::sync::Arc::new(ImapProvider::new(
                    host,
                    port,
                    email,
                    self.limiter.clone(),
                )))
            }
        }
    }
}

/// Maps an HTTP status from a provider REST API into the taxonomy
pub(crate) fn classify_status(
    status: reqwest::StatusCode,
    retry_after: Option<std::time::Duration>,
    context: &str,
) -> MailgraphError {
    match status.as_u16() {
        429 => MailgraphError::rate_limited(format!("{}: provider throttled", context), retry_after),
        401 | 403 => MailgraphError::CredentialRevoked(format!("{}: {}", context, status)),
        s if (500..600).contains(&s) => {
            MailgraphError::ProviderTransient(format!("{}: {}", context, status))
        }
        _ => MailgraphError::ProviderPermanent(format!("{}: {}", context, status)),
    }
}

/// Reads a Retry-After header (seconds form) when the provider sends one
pub(crate) fn retry_after_header(response: &reqwest::Response) -> Option<std::time::Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(std::time::Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_round_trip() {
        for kind in [ProviderKind::Gmail, ProviderKind::Outlook, ProviderKind::Imap] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS, None, "x"),
            MailgraphError::RateLimited { .. }
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::UNAUTHORIZED, None, "x"),
            MailgraphError::CredentialRevoked(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY, None, "x"),
            MailgraphError::ProviderTransient(_)
        ));
        assert!(matches!(
            classify_status(reqwest::StatusCode::NOT_FOUND, None, "x"),
            MailgraphError::ProviderPermanent(_)
        ));
    }

    #[test]
    fn test_effective_body_prefers_text() {
        let message = FetchedMessage {
            meta: MessageMeta {
                provider_message_id: "1".to_string(),
                provider_thread_id: None,
                received_at: Utc::now(),
                subject: "s".to_string(),
                sender: "a@b.com".to_string(),
            },
            recipient: "me@x.com".to_string(),
            body_text: Some("plain".to_string()),
            body_html: Some("<p>html</p>".to_string()),
            attachments: vec![],
        };
        assert_eq!(message.effective_body().as_deref(), Some("plain"));

        let html_only = FetchedMessage {
            body_text: None,
            ..message
        };
        assert_eq!(html_only.effective_body().as_deref(), Some("html"));
    }
}
