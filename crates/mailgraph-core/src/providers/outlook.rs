//! Microsoft Graph adapter.
//!
//! Paging rides `@odata.nextLink` verbatim: the link is the cursor. File
//! attachments deliver their bytes inline as base64 `contentBytes`.

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

const DEFAULT_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

pub struct OutlookProvider {
    http: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiterRegistry>,
}

#[derive(Debug, Deserialize)]
struct GraphList<T> {
    #[serde(default = "Vec::new")]
    value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: String,
    #[serde(default)]
    subject: Option<String>,
    sender: Option<GraphRecipient>,
    #[serde(rename = "toRecipients", default)]
    to_recipients: Vec<GraphRecipient>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
    body: Option<GraphBody>,
}

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: GraphEmailAddress,
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType", default)]
    content_type: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct GraphAttachment {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "contentType", default)]
    content_type: Option<String>,
    #[serde(default)]
    size: Option<i64>,
    #[serde(rename = "contentBytes")]
    content_bytes: Option<String>,
}

impl OutlookProvider {
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
            .acquire(user_id, ProviderKind::Outlook, 1.0)
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

    fn message_meta(message: &GraphMessage) -> Result<MessageMeta, MailgraphError> {
        let received_at = message
            .received_date_time
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!(
                    "message {} has no receivedDateTime",
                    message.id
                ))
            })?;

        Ok(MessageMeta {
            provider_message_id: message.id.clone(),
            provider_thread_id: message.conversation_id.clone(),
            received_at,
            subject: message.subject.clone().unwrap_or_default(),
            sender: message
                .sender
                .as_ref()
                .map(|r| r.email_address.address.clone())
                .unwrap_or_default(),
        })
    }
}

#[async_trait]
impl MailProvider for OutlookProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    async fn list_messages(
        &self,
        user_id: &str,
        token: &str,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
        max: u32,
    ) -> Result<MessagePage, MailgraphError> {
        // The nextLink from the prior page is a complete URL
        let url = match page_cursor {
            Some(link) => link.to_string(),
            None => format!(
                "{}/me/messages?$filter=receivedDateTime ge {}&$orderby=receivedDateTime desc\
                 &$top={}&$select=id,subject,sender,receivedDateTime,conversationId",
                self.base_url,
                since.format("%Y-%m-%dT%H:%M:%SZ"),
                max
            ),
        };

        let list: GraphList<GraphMessage> =
            self.get_json(user_id, token, &url, "graph list").await?;

        let messages = list
            .value
            .iter()
            .map(Self::message_meta)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(MessagePage {
            messages,
            next_cursor: list.next_link,
        })
    }

    async fn fetch_message(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, MailgraphError> {
        let url = format!(
            "{}/me/messages/{}?$select=id,subject,sender,toRecipients,receivedDateTime,conversationId,body",
            self.base_url, message_id
        );
        let message: GraphMessage = self.get_json(user_id, token, &url, "graph fetch").await?;
        let meta = Self::message_meta(&message)?;

        let (body_text, body_html) = match &message.body {
            Some(body) if body.content_type.eq_ignore_ascii_case("html") => {
                (None, Some(body.content.clone()))
            }
            Some(body) => (Some(body.content.clone()), None),
            None => (None, None),
        };

        let url = format!(
            "{}/me/messages/{}/attachments?$select=id,name,contentType,size",
            self.base_url, message_id
        );
        let attachments: GraphList<GraphAttachment> = self
            .get_json(user_id, token, &url, "graph attachments")
            .await?;

        Ok(FetchedMessage {
            meta,
            recipient: message
                .to_recipients
                .first()
                .map(|r| r.email_address.address.clone())
                .unwrap_or_default(),
            body_text,
            body_html,
            attachments: attachments
                .value
                .into_iter()
                .map(|a| FetchedAttachmentMeta {
                    provider_attachment_id: a.id,
                    filename: a.name,
                    mime_type: a.content_type.unwrap_or_default(),
                    size: a.size,
                })
                .collect(),
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
            "{}/me/messages/{}/attachments/{}",
            self.base_url, message_id, attachment_id
        );
        let attachment: GraphAttachment = self
            .get_json(user_id, token, &url, "graph attachment")
            .await?;

        let encoded = attachment.content_bytes.ok_or_else(|| {
            MailgraphError::ProviderPermanent(format!(
                "attachment {} is not a file attachment",
                attachment_id
            ))
        })?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .map_err(|e| MailgraphError::ProviderPermanent(format!("contentBytes: {}", e)))?;

        let size = bytes.len();
        Ok(AttachmentContent {
            bytes,
            mime_type: attachment.content_type.unwrap_or_default(),
            size,
        })
    }
}
