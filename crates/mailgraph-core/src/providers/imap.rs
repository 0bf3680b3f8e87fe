//! IMAP adapter.
//!
//! The imap crate is synchronous, so every operation runs a short-lived
//! session inside `spawn_blocking`: connect, authenticate with XOAUTH2,
//! select INBOX, do the work, log out. Fetched RFC822 bodies are parsed
//! with mail-parser. Attachment ids are the zero-based index of the part
//! among the message's attachment parts, which is stable for a stored
//! message.

use crate::constants::PROVIDER_TIMEOUT_SECONDS;
use crate::error::MailgraphError;
use crate::providers::{
    AttachmentContent, FetchedAttachmentMeta, FetchedMessage, MailProvider, MessageMeta,
    MessagePage, ProviderKind, RateLimiterRegistry,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mail_parser::{MessageParser, MimeHeaders, PartType};
use std::net::TcpStream;
use std::sync::Arc;
use tracing::debug;

type ImapSession = imap::Session<native_tls::TlsStream<TcpStream>>;

pub struct ImapProvider {
    host: String,
    port: u16,
    /// Mailbox account; XOAUTH2 identifies the user by address
    account_email: String,
    limiter: Arc<RateLimiterRegistry>,
}

struct XOAuth2 {
    user: String,
    access_token: String,
}

impl imap::Authenticator for XOAuth2 {
    type Response = String;

    fn process(&self, _challenge: &[u8]) -> Self::Response {
        format!(
            "user={}\x01auth=Bearer {}\x01\x01",
            self.user, self.access_token
        )
    }
}

impl ImapProvider {
    pub fn new(
        host: String,
        port: u16,
        account_email: String,
        limiter: Arc<RateLimiterRegistry>,
    ) -> Self {
        Self {
            host,
            port,
            account_email,
            limiter,
        }
    }

    fn clone_parts(&self, token: &str) -> ImapConnectParams {
        ImapConnectParams {
            host: self.host.clone(),
            port: self.port,
            account_email: self.account_email.clone(),
            token: token.to_string(),
        }
    }
}

/// Owned connection parameters movable into a blocking task
struct ImapConnectParams {
    host: String,
    port: u16,
    account_email: String,
    token: String,
}

impl ImapConnectParams {
    fn connect_owned(&self) -> Result<ImapSession, MailgraphError> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| MailgraphError::ProviderTransient(format!("tls init: {}", e)))?;

        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .map_err(|e| MailgraphError::ProviderTransient(format!("imap connect: {}", e)))?;
        tcp.set_read_timeout(Some(std::time::Duration::from_secs(PROVIDER_TIMEOUT_SECONDS)))
            .map_err(|e| MailgraphError::ProviderTransient(format!("imap socket: {}", e)))?;

        let tls_stream = tls
            .connect(&self.host, tcp)
            .map_err(|e| MailgraphError::ProviderTransient(format!("tls handshake: {}", e)))?;

        let client = imap::Client::new(tls_stream);
        let auth = XOAuth2 {
            user: self.account_email.clone(),
            access_token: self.token.clone(),
        };

        let mut session = client.authenticate("XOAUTH2", &auth).map_err(|(e, _)| {
            MailgraphError::CredentialRevoked(format!("imap auth rejected: {}", e))
        })?;

        session
            .select("INBOX")
            .map_err(|e| MailgraphError::ProviderTransient(format!("imap select: {}", e)))?;

        Ok(session)
    }
}

/// IMAP SEARCH SINCE takes a day-resolution date like `15-Jun-2026`
fn imap_since_date(since: DateTime<Utc>) -> String {
    since.format("%d-%b-%Y").to_string()
}

/// Header-only metadata for the listing path; the full body stays on the
/// server until `fetch_message`
fn parse_header_meta(
    raw_header: &[u8],
    uid: u32,
    internal_date: Option<DateTime<Utc>>,
) -> Result<MessageMeta, MailgraphError> {
    let message = MessageParser::default()
        .parse(raw_header)
        .ok_or_else(|| MailgraphError::EmailParsing("unparseable RFC822 header".to_string()))?;

    let received_at = internal_date
        .or_else(|| {
            message
                .date()
                .map(|d| DateTime::from_timestamp(d.to_timestamp(), 0).unwrap_or_default())
        })
        .unwrap_or_else(Utc::now);

    Ok(MessageMeta {
        provider_message_id: uid.to_string(),
        provider_thread_id: None,
        received_at,
        subject: message.subject().unwrap_or_default().to_string(),
        sender: first_address(message.from()),
    })
}

fn first_address(address: Option<&mail_parser::Address<'_>>) -> String {
    address
        .and_then(|a| a.as_list())
        .and_then(|list| list.first())
        .and_then(|addr| addr.address.as_ref())
        .map(|a| a.to_string())
        .unwrap_or_default()
}

/// Parses a fetched RFC822 message into the provider-neutral shape
fn parse_rfc822(
    raw: &[u8],
    uid: u32,
    internal_date: Option<DateTime<Utc>>,
) -> Result<FetchedMessage, MailgraphError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailgraphError::EmailParsing("unparseable RFC822 body".to_string()))?;

    let sender = first_address(message.from());
    let recipient = first_address(message.to());

    let received_at = internal_date
        .or_else(|| {
            message
                .date()
                .map(|d| DateTime::from_timestamp(d.to_timestamp(), 0).unwrap_or_default())
        })
        .unwrap_or_else(Utc::now);

    let mut attachments = Vec::new();
    for (index, part) in message.attachments().enumerate() {
        let filename = part
            .attachment_name()
            .map(|n| n.to_string())
            .unwrap_or_else(|| format!("attachment-{}", index));
        let mime_type = part
            .content_type()
            .map(|ct| match ct.subtype() {
                Some(sub) => format!("{}/{}", ct.ctype(), sub),
                None => ct.ctype().to_string(),
            })
            .unwrap_or_else(|| "application/octet-stream".to_string());

        attachments.push(FetchedAttachmentMeta {
            provider_attachment_id: index.to_string(),
            filename,
            mime_type,
            size: Some(part.contents().len() as i64),
        });
    }

    Ok(FetchedMessage {
        meta: MessageMeta {
            provider_message_id: uid.to_string(),
            provider_thread_id: None,
            received_at,
            subject: message.subject().unwrap_or_default().to_string(),
            sender,
        },
        recipient,
        body_text: message.body_text(0).map(|t| t.to_string()),
        body_html: message.body_html(0).map(|h| h.to_string()),
        attachments,
    })
}

fn attachment_bytes(raw: &[u8], index: usize) -> Result<AttachmentContent, MailgraphError> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| MailgraphError::EmailParsing("unparseable RFC822 body".to_string()))?;

    let part = message.attachments().nth(index).ok_or_else(|| {
        MailgraphError::ProviderPermanent(format!("no attachment part at index {}", index))
    })?;

    let bytes = match &part.body {
        PartType::Text(text) => text.as_bytes().to_vec(),
        PartType::Html(html) => html.as_bytes().to_vec(),
        PartType::Binary(data) | PartType::InlineBinary(data) => data.to_vec(),
        _ => {
            return Err(MailgraphError::ProviderPermanent(format!(
                "attachment part {} has no body",
                index
            )))
        }
    };

    let mime_type = part
        .content_type()
        .map(|ct| match ct.subtype() {
            Some(sub) => format!("{}/{}", ct.ctype(), sub),
            None => ct.ctype().to_string(),
        })
        .unwrap_or_else(|| "application/octet-stream".to_string());

    let size = bytes.len();
    Ok(AttachmentContent {
        bytes,
        mime_type,
        size,
    })
}

#[async_trait]
impl MailProvider for ImapProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Imap
    }

    async fn list_messages(
        &self,
        user_id: &str,
        token: &str,
        since: DateTime<Utc>,
        page_cursor: Option<&str>,
        max: u32,
    ) -> Result<MessagePage, MailgraphError> {
        self.limiter
            .acquire(user_id, ProviderKind::Imap, 1.0)
            .await?;

        let offset: usize = page_cursor
            .map(|c| {
                c.parse().map_err(|_| {
                    MailgraphError::Validation(format!("bad imap cursor: {}", c))
                })
            })
            .transpose()?
            .unwrap_or(0);

        let provider = self.clone_parts(token);
        let since_date = imap_since_date(since);

        tokio::task::spawn_blocking(move || {
            let mut session = provider.connect_owned()?;

            let uids = session
                .uid_search(format!("SINCE {}", since_date))
                .map_err(|e| MailgraphError::ProviderTransient(format!("imap search: {}", e)))?;

            // Newest first; UIDs ascend with arrival order within a mailbox
            let mut sorted: Vec<u32> = uids.into_iter().collect();
            sorted.sort_unstable_by(|a, b| b.cmp(a));
            let total = sorted.len();

            let page: Vec<u32> = sorted
                .into_iter()
                .skip(offset)
                .take(max as usize)
                .collect();

            let mut messages = Vec::with_capacity(page.len());
            if !page.is_empty() {
                let set = page
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                let fetches = session
                    .uid_fetch(&set, "(UID RFC822.HEADER INTERNALDATE)")
                    .map_err(|e| MailgraphError::ProviderTransient(format!("imap fetch: {}", e)))?;

                for fetch in fetches.iter() {
                    let Some(uid) = fetch.uid else { continue };
                    let Some(raw_header) = fetch.header() else {
                        continue;
                    };
                    let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));
                    match parse_header_meta(raw_header, uid, internal_date) {
                        Ok(meta) => messages.push(meta),
                        Err(e) => {
                            debug!(uid = uid, error = %e, "Skipping unparseable header")
                        }
                    }
                }
            }

            // Fetch order is server-defined; restore newest-first
            messages.sort_by(|a, b| b.received_at.cmp(&a.received_at));

            let _ = session.logout();

            let consumed = offset + page.len();
            Ok(MessagePage {
                messages,
                next_cursor: (consumed < total).then(|| consumed.to_string()),
            })
        })
        .await
        .map_err(|e| MailgraphError::ProviderTransient(format!("imap task: {}", e)))?
    }

    async fn fetch_message(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
    ) -> Result<FetchedMessage, MailgraphError> {
        self.limiter
            .acquire(user_id, ProviderKind::Imap, 1.0)
            .await?;

        let uid: u32 = message_id
            .parse()
            .map_err(|_| MailgraphError::Validation(format!("bad imap uid: {}", message_id)))?;
        let provider = self.clone_parts(token);

        tokio::task::spawn_blocking(move || {
            let mut session = provider.connect_owned()?;
            let fetches = session
                .uid_fetch(uid.to_string(), "(UID RFC822 INTERNALDATE)")
                .map_err(|e| MailgraphError::ProviderTransient(format!("imap fetch: {}", e)))?;

            let fetch = fetches.iter().next().ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!("uid {} not found", uid))
            })?;
            let raw = fetch.body().ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!("uid {} has no body", uid))
            })?;
            let internal_date = fetch.internal_date().map(|d| d.with_timezone(&Utc));

            let message = parse_rfc822(raw, uid, internal_date)?;
            let _ = session.logout();

            debug!(uid = uid, attachments = message.attachments.len(), "Fetched imap message");
            Ok(message)
        })
        .await
        .map_err(|e| MailgraphError::ProviderTransient(format!("imap task: {}", e)))?
    }

    async fn fetch_attachment(
        &self,
        user_id: &str,
        token: &str,
        message_id: &str,
        attachment_id: &str,
    ) -> Result<AttachmentContent, MailgraphError> {
        self.limiter
            .acquire(user_id, ProviderKind::Imap, 1.0)
            .await?;

        let uid: u32 = message_id
            .parse()
            .map_err(|_| MailgraphError::Validation(format!("bad imap uid: {}", message_id)))?;
        let index: usize = attachment_id.parse().map_err(|_| {
            MailgraphError::Validation(format!("bad imap attachment index: {}", attachment_id))
        })?;
        let provider = self.clone_parts(token);

        tokio::task::spawn_blocking(move || {
            let mut session = provider.connect_owned()?;
            let fetches = session
                .uid_fetch(uid.to_string(), "(UID RFC822)")
                .map_err(|e| MailgraphError::ProviderTransient(format!("imap fetch: {}", e)))?;

            let fetch = fetches.iter().next().ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!("uid {} not found", uid))
            })?;
            let raw = fetch.body().ok_or_else(|| {
                MailgraphError::ProviderPermanent(format!("uid {} has no body", uid))
            })?;

            let content = attachment_bytes(raw, index)?;
            let _ = session.logout();
            Ok(content)
        })
        .await
        .map_err(|e| MailgraphError::ProviderTransient(format!("imap task: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xoauth2_response_format() {
        let auth = XOAuth2 {
            user: "me@example.com".to_string(),
            access_token: "ya29.token".to_string(),
        };
        let response = imap::Authenticator::process(&auth, b"");
        assert_eq!(response, "user=me@example.com\x01auth=Bearer ya29.token\x01\x01");
    }

    #[test]
    fn test_imap_since_date_format() {
        let date = DateTime::parse_from_rfc3339("2026-06-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(imap_since_date(date), "15-Jun-2026");
    }

    const RAW_EMAIL: &[u8] = b"From: Billing <billing@acme.example.com>\r\n\
To: me@example.com\r\n\
Subject: Invoice #42\r\n\
Date: Mon, 15 Jun 2026 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
Total due: $42.00\r\n\
--XYZ\r\n\
Content-Type: application/pdf; name=\"invoice.pdf\"\r\n\
Content-Disposition: attachment; filename=\"invoice.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQKJSBmYWtlIHBkZg==\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_rfc822_extracts_envelope_and_attachments() {
        let message = parse_rfc822(RAW_EMAIL, 77, None).unwrap();

        assert_eq!(message.meta.provider_message_id, "77");
        assert_eq!(message.meta.subject, "Invoice #42");
        assert_eq!(message.meta.sender, "billing@acme.example.com");
        assert_eq!(message.recipient, "me@example.com");
        assert!(message.body_text.unwrap().contains("Total due"));
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.attachments[0].filename, "invoice.pdf");
        assert_eq!(message.attachments[0].provider_attachment_id, "0");
        assert_eq!(message.attachments[0].mime_type, "application/pdf");
    }

    #[test]
    fn test_parse_header_meta_from_header_block() {
        let header = b"From: Billing <billing@acme.example.com>\r\n\
Subject: Invoice #42\r\n\
Date: Mon, 15 Jun 2026 10:00:00 +0000\r\n\r\n";
        let meta = parse_header_meta(header, 9, None).unwrap();
        assert_eq!(meta.provider_message_id, "9");
        assert_eq!(meta.subject, "Invoice #42");
        assert_eq!(meta.sender, "billing@acme.example.com");
    }

    #[test]
    fn test_attachment_bytes_by_index() {
        let content = attachment_bytes(RAW_EMAIL, 0).unwrap();
        assert!(content.bytes.starts_with(b"%PDF-1.4"));
        assert_eq!(content.mime_type, "application/pdf");

        assert!(attachment_bytes(RAW_EMAIL, 5).is_err());
    }

    #[test]
    fn test_unparseable_body_is_permanent() {
        // mail-parser is lenient; a truly empty input is the failure mode
        let result = parse_rfc822(b"", 1, None);
        if let Ok(message) = result {
            assert!(message.attachments.is_empty());
        }
    }
}
