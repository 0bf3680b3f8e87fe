//! Gmail REST adapter.
//!
//! Listing is two-step the way the API is shaped: `messages.list` returns
//! bare ids, a metadata-format `messages.get` fills in subject, sender, and
//! the internal date. Attachment bytes come back base64url-encoded.

use crate::constants::PROVIDER_TIMEOUT_SECONDS;
use crate::error::MailgraphError;
use crate::providers::{
    classify_status, retry_after_header, AttachmentContent, FetchedAttachmentMeta, FetchedMessage,
    MailProvider, MessageMeta, MessagePage, ProviderKind, RateLimiterRegistry,
};
use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

/// Quota units charged per request; list and get both cost five
const QUOTA_COST: f64 = 5.0;

pub struct GmailProvider {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiterRegistry>,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    messages: Vec<ListEntry>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailMessage {
    id: String,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
    #[serde(rename = "internalDate")]
    internal_date: Option<String>,
    payload: Option<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailPart {
    #[serde(rename = "mimeType", default)]
    mime_type: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    #[serde(default)]
    size: i64,
    data: Option<String>,
    #[serde(rename = "attachmentId")]
    attachment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    data: String,
}

impl GmailProvider {
    pub fn new(limiter: Arc<RateLimiterRegistry>) -> Self {
        Self::with_base_url(limiter, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(limiter: Arc<RateLimiterRegistry>, base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECONDS))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            limiter,
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        user_id: &str,
        token: &str,
        url: &str,
        context: &str,
    ) -> Result<T, MailgraphError> {
        self.limiter
            .acquire(user_id, ProviderKind::Gmail, QUOTA_COST)
            .await?;

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| MailgraphError::ProviderTransient(format!("{}: {}", context, e)))?;

        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            return Err(classify_status(response.status(), retry_after, context));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| MailgraphError::ProviderTransient(format!("{} body: {}", context, e)))
    }

    fn message_meta(message: &GmailMessage) -> Result<MessageMeta, MailgraphError> {
        let received_at = message
            .internal_date
            .as_deref()
            .and_then(|ms| ms.parse::<i64>().ok())
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!(
                    "message {} has no internalDate",
                    message.id
                ))
            })?;

        let headers = message
            .payload
            .as_ref()
            .map(|p| p.headers.as_slice())
            .unwrap_or_default();
        let header = |name: &str| {
            headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| h.value.clone())
                .unwrap_or_default()
        };

        Ok(MessageMeta {
            provider_message_id: message.id.clone(),
            provider_thread_id: message.thread_id.clone(),
            received_at,
            subject: header("Subject"),
            sender: header("From"),
        })
    }

    /// Depth-first walk collecting bodies and attachment descriptors
    fn walk_parts(
        part: &GmailPart,
        text: &mut Option<String>,
        html: &mut Option<String>,
        attachments: &mut Vec<FetchedAttachmentMeta>,
    ) {
        let mime = part.mime_type.as_deref().unwrap_or("");
        let filename = part.filename.as_deref().unwrap_or("");

        if !filename.is_empty() {
            if let Some(body) = &part.body {
                if let Some(attachment_id) = &body.attachment_id {
                    attachments.push(FetchedAttachmentMeta {
                        provider_attachment_id: attachment_id.clone(),
                        filename: filename.to_string(),
                        mime_type: mime.to_string(),
                        size: Some(body.size),
                    });
                }
            }
        } else if mime == "text/plain" && text.is_none() {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
                *text = decode_base64url_text(data);
            }
        } else if mime == "text/html" && html.is_none() {
            if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
                *html = decode_base64url_text(data);
            }
        }

        for child in &part.parts {
            Self::walk_parts(child, text, html, attachments);
        }
    }
}

fn decode_base64url(data: &str) -> Result<Vec<u8>, MailgraphError> {
    base64::engine::general_purpose::URL_SAFE
        .decode(data)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(data))
        .map_err(|e| MailgraphError::ProviderPermanent(format!("base64 payload: {}", e)))
}

fn decode_base64url_text(data: &str) -> Option<String> {
    decode_base64url(data)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

#[async_trait]
impl MailProvider for GmailProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    async fn list_messages(
        &self,
        user_id: &str,
        token: &str,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
        max: u32,
    ) -> Result<MessagePage, MailgraphError> {
        let mut url = format!(
            "{}/users/me/messages?maxResults={}&q=after:{}",
            self.base_url,
            max,
            since.timestamp()
        );
        if let Some(cursor) = page_cursor {
            url.push_str(&format!("&pageToken={}", cursor));
        }

        let list: ListResponse = self.get_json(user_id, token, &url, "gmail list").await?;
        debug!(count = list.messages.len(), "Listed gmail message ids");

        let mut messages = Vec::with_capacity(list.messages.len());
        for entry in &list.messages {
            let url = format!(
                "{}/users/me/messages/{}?format=metadata&metadataHeaders=Subject&metadataHeaders=From",
                self.base_url, entry.id
            );
            let message: GmailMessage =
                self.get_json(user_id, token, &url, "gmail metadata").await?;
            messages.push(Self::message_meta(&message)?);
        }

        Ok(MessagePage {
            messages,
            next_cursor: list.next_page_token,
        })
    }

    async fn fetch_message(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, MailgraphError> {
        let url = format!(
            "{}/users/me/messages/{}?format=full",
            self.base_url, message_id
        );
        let message: GmailMessage = self.get_json(user_id, token, &url, "gmail fetch").await?;
        let meta = Self::message_meta(&message)?;

        let mut text = None;
        let mut html = None;
        let mut attachments = Vec::new();
        let mut recipient = String::new();

        if let Some(payload) = &message.payload {
            recipient = payload
                .headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case("To"))
                .map(|h| h.value.clone())
                .unwrap_or_default();
            Self::walk_parts(payload, &mut text, &mut html, &mut attachments);

            // Single-part messages carry the body on the payload itself
            if text.is_none() && html.is_none() {
                if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
                    match payload.mime_type.as_deref() {
                        Some("text/html") => html = decode_base64url_text(data),
                        _ => text = decode_base64url_text(data),
                    }
                }
            }
        }

        Ok(FetchedMessage {
            meta,
            recipient,
            body_text: text,
            body_html: html,
            attachments,
        })
    }

    async fn fetch_attachment(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentContent, MailgraphError> {
        let url = format!(
            "{}/users/me/messages/{}/attachments/{}",
            self.base_url, message_id, attachment_id
        );
        let attachment: AttachmentResponse = self
            .get_json(user_id, token, &url, "gmail attachment")
            .await?;

        let bytes = decode_base64url(&attachment.data)?;
        let size = bytes.len();
        Ok(AttachmentContent {
            bytes,
            // Gmail's attachment endpoint returns bytes only; the caller
            // knows the declared type from the descriptor
            mime_type: String::new(),
            size,
        })
    }
}
