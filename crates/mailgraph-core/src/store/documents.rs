//! Document rows, the per-document lease, and fenced state writes.

use crate::error::{ErrorRecord, MailgraphError};
use crate::models::{Document, DocumentType, ExtractedFields, ExtractionMethod, PipelineState};
use crate::store::GraphStore;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn document_from_row(r: &SqliteRow) -> Result<Document, MailgraphError> {
    let extracted_fields: Option<ExtractedFields> = r
        .try_get::<Option<String>, _>("extracted_fields")
        .map_err(MailgraphError::from)?
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    let last_error: Option<ErrorRecord> = r
        .try_get::<Option<String>, _>("last_error")
        .map_err(MailgraphError::from)?
        .map(|json| serde_json::from_str(&json))
        .transpose()?;

    Ok(Document {
        id: r.try_get("id").map_err(MailgraphError::from)?,
        user_id: r.try_get("user_id").map_err(MailgraphError::from)?,
        source_attachment_id: r
            .try_get("source_attachment_id")
            .map_err(MailgraphError::from)?,
        storage_key: r.try_get("storage_key").map_err(MailgraphError::from)?,
        content_hash: r.try_get("content_hash").map_err(MailgraphError::from)?,
        filename: r.try_get("filename").map_err(MailgraphError::from)?,
        mime_type: r.try_get("mime_type").map_err(MailgraphError::from)?,
        state: r
            .try_get::<String, _>("state")
            .map_err(MailgraphError::from)
            .map(|s| PipelineState::parse(&s).unwrap_or(PipelineState::Queued))?,
        document_type: r
            .try_get::<Option<String>, _>("document_type")
            .map_err(MailgraphError::from)?
            .and_then(|s| DocumentType::parse(&s)),
        extraction_method: r
            .try_get::<Option<String>, _>("extraction_method")
            .map_err(MailgraphError::from)?
            .and_then(|s| ExtractionMethod::parse(&s)),
        confidence: r.try_get("confidence").map_err(MailgraphError::from)?,
        page_count: r.try_get("page_count").map_err(MailgraphError::from)?,
        character_count: r
            .try_get("character_count")
            .map_err(MailgraphError::from)?,
        extracted_text: r.try_get("extracted_text").map_err(MailgraphError::from)?,
        extracted_fields,
        skipped_reason: r.try_get("skipped_reason").map_err(MailgraphError::from)?,
        last_error,
        attempt_count: r.try_get("attempt_count").map_err(MailgraphError::from)?,
        lease_epoch: r.try_get("lease_epoch").map_err(MailgraphError::from)?,
        lease_expires_at: r
            .try_get("lease_expires_at")
            .map_err(MailgraphError::from)?,
        created_at: r.try_get("created_at").map_err(MailgraphError::from)?,
        updated_at: r.try_get("updated_at").map_err(MailgraphError::from)?,
    })
}

impl GraphStore {
    pub async fn insert_document(&self, document: &Document) -> Result<(), MailgraphError> {
        sqlx::query(
            "INSERT INTO documents (
                id, user_id, source_attachment_id, storage_key, content_hash,
                filename, mime_type, state, attempt_count, lease_epoch,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&document.id)
        .bind(&document.user_id)
        .bind(&document.source_attachment_id)
        .bind(&document.storage_key)
        .bind(&document.content_hash)
        .bind(&document.filename)
        .bind(&document.mime_type)
        .bind(document.state.as_str())
        .bind(document.attempt_count)
        .bind(document.lease_epoch)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Content-addressed lookup within a user
    pub async fn find_document_by_hash(
        &self,
        user_id: &str,
        content_hash: &str,
    ) -> Result<Option<Document>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM documents WHERE user_id = ? AND content_hash = ?")
            .bind(user_id)
            .bind(content_hash)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| document_from_row(&r)).transpose()
    }

    /// Acquires the per-document lease. Returns the fenced epoch on success,
    /// None when another worker holds an unexpired lease.
    pub async fn claim_document_lease(
        &self,
        id: &str,
        lease: Duration,
    ) -> Result<Option<i64>, MailgraphError> {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE documents
             SET lease_epoch = lease_epoch + 1, lease_expires_at = ?, updated_at = ?
             WHERE id = ? AND (lease_expires_at IS NULL OR lease_expires_at < ?)",
        )
        .bind(now + lease)
        .bind(now)
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }

        let row = sqlx::query("SELECT lease_epoch FROM documents WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(row.try_get("lease_epoch")?))
    }

    /// Extends the lease while work is active; fails when the epoch is stale
    pub async fn renew_document_lease(
        &self,
        id: &str,
        epoch: i64,
        until: DateTime<Utc>,
    ) -> Result<(), MailgraphError> {
        let result =
            sqlx::query("UPDATE documents SET lease_expires_at = ? WHERE id = ? AND lease_epoch = ?")
                .bind(until)
                .bind(id)
                .bind(epoch)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} lease epoch {} is stale",
                id, epoch
            )));
        }
        Ok(())
    }

    pub async fn release_document_lease(&self, id: &str, epoch: i64) -> Result<(), MailgraphError> {
        sqlx::query(
            "UPDATE documents SET lease_expires_at = NULL WHERE id = ? AND lease_epoch = ?",
        )
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fenced state transition; a stale epoch surfaces `LeaseLost`
    pub async fn set_document_state(
        &self,
        id: &str,
        epoch: i64,
        state: PipelineState,
    ) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE documents SET state = ?, updated_at = ? WHERE id = ? AND lease_epoch = ?",
        )
        .bind(state.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} state write fenced out",
                id
            )));
        }
        Ok(())
    }

    /// Records the text-extraction result while moving to `classifying`
    #[allow(clippy::too_many_arguments)]
    pub async fn set_document_extraction(
        &self,
        id: &str,
        epoch: i64,
        method: ExtractionMethod,
        confidence: f64,
        text: &str,
        page_count: i64,
        character_count: i64,
    ) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE documents
             SET state = ?, extraction_method = ?, confidence = ?, extracted_text = ?,
                 page_count = ?, character_count = ?, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Classifying.as_str())
        .bind(method.as_str())
        .bind(confidence)
        .bind(text)
        .bind(page_count)
        .bind(character_count)
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} extraction write fenced out",
                id
            )));
        }
        Ok(())
    }

    pub async fn set_document_type(
        &self,
        id: &str,
        epoch: i64,
        document_type: DocumentType,
    ) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE documents SET state = ?, document_type = ?, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Populating.as_str())
        .bind(document_type.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} classification write fenced out",
                id
            )));
        }
        Ok(())
    }

    /// Persists extracted fields. The extraction method is not touched; it
    /// records how the text layer was obtained, set during extraction.
    pub async fn set_document_fields(
        &self,
        id: &str,
        epoch: i64,
        fields: &ExtractedFields,
        confidence: f64,
    ) -> Result<(), MailgraphError> {
        let json = serde_json::to_string(fields)?;
        let result = sqlx::query(
            "UPDATE documents
             SET state = ?, extracted_fields = ?, confidence = ?, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Resolving.as_str())
        .bind(json)
        .bind(confidence)
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} field write fenced out",
                id
            )));
        }
        Ok(())
    }

    /// Terminal skip; releases the lease in the same write
    pub async fn mark_document_skipped(
        &self,
        id: &str,
        epoch: i64,
        reason: &str,
    ) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE documents
             SET state = ?, skipped_reason = ?, lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Skipped.as_str())
        .bind(reason)
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} skip write fenced out",
                id
            )));
        }
        Ok(())
    }

    /// Terminal failure with the structured error retained
    pub async fn mark_document_failed(
        &self,
        id: &str,
        epoch: i64,
        error: &ErrorRecord,
    ) -> Result<(), MailgraphError> {
        let json = serde_json::to_string(error)?;
        let result = sqlx::query(
            "UPDATE documents
             SET state = ?, last_error = ?, lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Failed.as_str())
        .bind(json)
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} failure write fenced out",
                id
            )));
        }
        Ok(())
    }

    pub async fn mark_document_completed(&self, id: &str, epoch: i64) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE documents
             SET state = ?, lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(PipelineState::Completed.as_str())
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "document {} completion write fenced out",
                id
            )));
        }
        Ok(())
    }

    /// Rewinds to the start of a failing transition and counts the attempt
    pub async fn rewind_document(
        &self,
        id: &str,
        epoch: i64,
        state: PipelineState,
        error: &ErrorRecord,
    ) -> Result<(), MailgraphError> {
        let json = serde_json::to_string(error)?;
        sqlx::query(
            "UPDATE documents
             SET state = ?, last_error = ?, attempt_count = attempt_count + 1,
                 lease_expires_at = NULL, updated_at = ?
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(state.as_str())
        .bind(json)
        .bind(Utc::now())
        .bind(id)
        .bind(epoch)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Refuses to delete a document that still owns transactions
    pub async fn delete_document(&self, id: &str) -> Result<(), MailgraphError> {
        let tx_count: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM transactions WHERE document_id = ?")
                .bind(id)
                .fetch_one(&self.pool)
                .await?
                .try_get("n")?;

        if tx_count > 0 {
            return Err(MailgraphError::Validation(format!(
                "document {} has {} transactions; remove them first",
                id, tx_count
            )));
        }

        sqlx::query("DELETE FROM message_documents WHERE document_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_document(id: &str, hash: &str) -> Document {
        let now = Utc::now();
        Document {
            id: id.to_string(),
            user_id: "user-1".to_string(),
            source_attachment_id: None,
            storage_key: hash.to_string(),
            content_hash: hash.to_string(),
            filename: "invoice.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
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
        }
    }

    #[tokio::test]
    async fn test_lease_excludes_second_worker() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.insert_document(&test_document("d1", "aa")).await.unwrap();

        let epoch = store
            .claim_document_lease("d1", Duration::minutes(10))
            .await
            .unwrap()
            .expect("first claim succeeds");

        // Second claim is refused while the lease is live
        assert!(store
            .claim_document_lease("d1", Duration::minutes(10))
            .await
            .unwrap()
            .is_none());

        store.release_document_lease("d1", epoch).await.unwrap();

        // After release a new claim succeeds with a fresh epoch
        let epoch2 = store
            .claim_document_lease("d1", Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        assert!(epoch2 > epoch);
    }

    #[tokio::test]
    async fn test_stale_epoch_writes_are_fenced() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.insert_document(&test_document("d1", "aa")).await.unwrap();

        let old_epoch = store
            .claim_document_lease("d1", Duration::minutes(-1))
            .await
            .unwrap()
            .unwrap();

        // Lease already expired; a second worker claims and bumps the epoch
        let _new_epoch = store
            .claim_document_lease("d1", Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();

        // The original worker's write bounces
        let result = store
            .set_document_state("d1", old_epoch, PipelineState::Fetching)
            .await;
        assert!(matches!(result, Err(MailgraphError::LeaseLost(_))));
    }

    #[tokio::test]
    async fn test_content_hash_unique_per_user() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.insert_document(&test_document("d1", "aa")).await.unwrap();
        assert!(store.insert_document(&test_document("d2", "aa")).await.is_err());

        let found = store
            .find_document_by_hash("user-1", "aa")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, "d1");
    }

    #[tokio::test]
    async fn test_extraction_status_mapping_on_read() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.insert_document(&test_document("d1", "aa")).await.unwrap();

        let epoch = store
            .claim_document_lease("d1", Duration::minutes(10))
            .await
            .unwrap()
            .unwrap();
        store
            .set_document_extraction("d1", epoch, ExtractionMethod::PdfText, 1.0, "text", 2, 400)
            .await
            .unwrap();

        let doc = store.get_document("d1").await.unwrap().unwrap();
        assert_eq!(doc.state, PipelineState::Classifying);
        assert_eq!(doc.extraction_method, Some(ExtractionMethod::PdfText));
        assert_eq!(doc.page_count, Some(2));
        assert_eq!(doc.character_count, Some(400));
    }
}
