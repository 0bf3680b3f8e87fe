//! Message and attachment-descriptor rows, including the write-once
//! qualification contract.

use crate::error::MailgraphError;
use crate::models::{
    AttachmentDescriptor, DownloadState, Message, QualificationOutcome, QualificationStage,
};
use crate::store::GraphStore;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn message_from_row(r: &SqliteRow) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        provider: r.try_get("provider")?,
        provider_message_id: r.try_get("provider_message_id")?,
        provider_thread_id: r.try_get("provider_thread_id")?,
        sender: r.try_get("sender")?,
        recipient: r.try_get("recipient")?,
        subject: r.try_get("subject")?,
        received_at: r.try_get("received_at")?,
        body_text: r.try_get("body_text")?,
        snippet: r.try_get("snippet")?,
        is_qualified: r.try_get("is_qualified")?,
        qualification_stage: r
            .try_get::<Option<String>, _>("qualification_stage")?
            .and_then(|s| QualificationStage::parse(&s)),
        qualification_confidence: r.try_get("qualification_confidence")?,
        qualification_reason: r.try_get("qualification_reason")?,
        qualified_at: r.try_get("qualified_at")?,
        created_at: r.try_get("created_at")?,
    })
}

fn attachment_from_row(r: &SqliteRow) -> Result<AttachmentDescriptor, sqlx::Error> {
    Ok(AttachmentDescriptor {
        id: r.try_get("id")?,
        user_id: r.try_get("user_id")?,
        message_id: r.try_get("message_id")?,
        provider_attachment_id: r.try_get("provider_attachment_id")?,
        filename: r.try_get("filename")?,
        mime_type: r.try_get("mime_type")?,
        declared_size: r.try_get("declared_size")?,
        download_state: r
            .try_get::<String, _>("download_state")
            .map(|s| DownloadState::parse(&s).unwrap_or(DownloadState::Pending))?,
    })
}

impl GraphStore {
    /// Inserts a message if `(user_id, provider_message_id)` is new.
    /// Returns true when a row was created.
    pub async fn insert_message_if_new(&self, message: &Message) -> Result<bool, MailgraphError> {
        let result = sqlx::query(
            "INSERT INTO messages (
                id, user_id, provider, provider_message_id, provider_thread_id,
                sender, recipient, subject, received_at, body_text, snippet, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (user_id, provider_message_id) DO NOTHING",
        )
        .bind(&message.id)
        .bind(&message.user_id)
        .bind(&message.provider)
        .bind(&message.provider_message_id)
        .bind(&message.provider_thread_id)
        .bind(&message.sender)
        .bind(&message.recipient)
        .bind(&message.subject)
        .bind(message.received_at)
        .bind(&message.body_text)
        .bind(&message.snippet)
        .bind(message.created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| message_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn get_message_by_provider_id(
        &self,
        user_id: &str,
        provider_message_id: &str,
    ) -> Result<Option<Message>, MailgraphError> {
        let row =
            sqlx::query("SELECT * FROM messages WHERE user_id = ? AND provider_message_id = ?")
                .bind(user_id)
                .bind(provider_message_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|r| message_from_row(&r)).transpose().map_err(Into::into)
    }

    pub async fn update_message_body(
        &self,
        id: &str,
        body_text: Option<&str>,
        snippet: Option<&str>,
    ) -> Result<(), MailgraphError> {
        sqlx::query("UPDATE messages SET body_text = ?, snippet = ? WHERE id = ?")
            .bind(body_text)
            .bind(snippet)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Writes qualification fields exactly once. A second call for an
    /// already-decided message is a no-op and returns false; the tri-state
    /// never transitions back to pending.
    pub async fn record_qualification(
        &self,
        message_id: &str,
        outcome: &QualificationOutcome,
    ) -> Result<bool, MailgraphError> {
        let result = sqlx::query(
            "UPDATE messages
             SET is_qualified = ?, qualification_stage = ?, qualification_confidence = ?,
                 qualification_reason = ?, qualified_at = ?
             WHERE id = ? AND is_qualified IS NULL",
        )
        .bind(outcome.qualified)
        .bind(outcome.stage.as_str())
        .bind(outcome.confidence)
        .bind(&outcome.reason)
        .bind(Utc::now())
        .bind(message_id)
        .execute(&self.pool)
        .await?;

        let written = result.rows_affected() > 0;
        if written {
            let message = self.get_message(message_id).await?;
            if let Some(message) = message {
                sqlx::query(
                    "INSERT INTO qualification_log
                        (id, user_id, message_id, qualified, stage, confidence, reason, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(uuid::Uuid::new_v4().to_string())
                .bind(&message.user_id)
                .bind(message_id)
                .bind(outcome.qualified)
                .bind(outcome.stage.as_str())
                .bind(outcome.confidence)
                .bind(&outcome.reason)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(written)
    }

    /// Recent messages with their qualification fields, newest first
    pub async fn recent_qualification_activity(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<Message>, MailgraphError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE user_id = ? AND is_qualified IS NOT NULL
             ORDER BY qualified_at DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(message_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn insert_attachment(
        &self,
        attachment: &AttachmentDescriptor,
    ) -> Result<(), MailgraphError> {
        sqlx::query(
            "INSERT OR IGNORE INTO attachments (
                id, user_id, message_id, provider_attachment_id, filename,
                mime_type, declared_size, download_state
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&attachment.id)
        .bind(&attachment.user_id)
        .bind(&attachment.message_id)
        .bind(&attachment.provider_attachment_id)
        .bind(&attachment.filename)
        .bind(&attachment.mime_type)
        .bind(attachment.declared_size)
        .bind(attachment.download_state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_attachment(
        &self,
        id: &str,
    ) -> Result<Option<AttachmentDescriptor>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM attachments WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| attachment_from_row(&r))
            .transpose()
            .map_err(Into::into)
    }

    pub async fn attachments_for_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<AttachmentDescriptor>, MailgraphError> {
        let rows = sqlx::query("SELECT * FROM attachments WHERE message_id = ? ORDER BY id")
            .bind(message_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(attachment_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(Into::into)
    }

    pub async fn set_attachment_state(
        &self,
        id: &str,
        state: DownloadState,
    ) -> Result<(), MailgraphError> {
        sqlx::query("UPDATE attachments SET download_state = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
