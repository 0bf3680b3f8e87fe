//! Transaction rows and message-document links.

use crate::error::MailgraphError;
use crate::models::{LineItem, Transaction, TransactionKind};
use crate::store::GraphStore;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::collections::BTreeMap;
use std::str::FromStr;

fn transaction_from_row(r: &SqliteRow) -> Result<Transaction, MailgraphError> {
    let amount_text: String = r.try_get("amount").map_err(MailgraphError::from)?;
    let amount = Decimal::from_str(&amount_text)
        .map_err(|e| MailgraphError::Database(format!("bad amount {}: {}", amount_text, e)))?;

    let transaction_date = r
        .try_get::<Option<String>, _>("transaction_date")
        .map_err(MailgraphError::from)?
        .map(|s| {
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map_err(|e| MailgraphError::Database(format!("bad date {}: {}", s, e)))
        })
        .transpose()?;

    let line_items: Vec<LineItem> = serde_json::from_str(
        &r.try_get::<String, _>("line_items")
            .map_err(MailgraphError::from)?,
    )?;
    let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(
        &r.try_get::<String, _>("metadata")
            .map_err(MailgraphError::from)?,
    )?;

    Ok(Transaction {
        id: r.try_get("id").map_err(MailgraphError::from)?,
        user_id: r.try_get("user_id").map_err(MailgraphError::from)?,
        document_id: r.try_get("document_id").map_err(MailgraphError::from)?,
        party_id: r.try_get("party_id").map_err(MailgraphError::from)?,
        row_index: r.try_get("row_index").map_err(MailgraphError::from)?,
        amount,
        currency: r.try_get("currency").map_err(MailgraphError::from)?,
        transaction_date,
        kind: r
            .try_get::<String, _>("kind")
            .map_err(MailgraphError::from)
            .map(|s| TransactionKind::parse(&s).unwrap_or(TransactionKind::Other))?,
        line_items,
        metadata,
        created_at: r.try_get("created_at").map_err(MailgraphError::from)?,
    })
}

impl GraphStore {
    /// Atomically replaces every transaction owned by a document.
    /// Re-extraction is idempotent: same inputs produce the same rows.
    pub async fn replace_document_transactions(
        &self,
        document_id: &str,
        transactions: &[Transaction],
    ) -> Result<(), MailgraphError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM transactions WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for t in transactions {
            sqlx::query(
                "INSERT INTO transactions (
                    id, user_id, document_id, party_id, row_index, amount, currency,
                    transaction_date, kind, line_items, metadata, created_at
                 ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&t.id)
            .bind(&t.user_id)
            .bind(document_id)
            .bind(&t.party_id)
            .bind(t.row_index)
            .bind(t.amount.to_string())
            .bind(&t.currency)
            .bind(t.transaction_date.map(|d| d.format("%Y-%m-%d").to_string()))
            .bind(t.kind.as_str())
            .bind(serde_json::to_string(&t.line_items)?)
            .bind(serde_json::to_string(&t.metadata)?)
            .bind(t.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn transactions_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<Transaction>, MailgraphError> {
        let rows =
            sqlx::query("SELECT * FROM transactions WHERE document_id = ? ORDER BY row_index")
                .bind(document_id)
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(transaction_from_row).collect()
    }

    /// Links a message to a document; forwarded duplicates add a link, never
    /// a second document
    pub async fn link_message_document(
        &self,
        message_id: &str,
        document_id: &str,
    ) -> Result<(), MailgraphError> {
        sqlx::query(
            "INSERT OR IGNORE INTO message_documents (message_id, document_id, created_at)
             VALUES (?, ?, ?)",
        )
        .bind(message_id)
        .bind(document_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn message_ids_for_document(
        &self,
        document_id: &str,
    ) -> Result<Vec<String>, MailgraphError> {
        let rows = sqlx::query(
            "SELECT message_id FROM message_documents WHERE document_id = ? ORDER BY created_at",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get("message_id").map_err(Into::into))
            .collect()
    }
}
