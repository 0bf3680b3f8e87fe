//! Processing metrics and the fixed graph queries.

use crate::error::MailgraphError;
use crate::store::GraphStore;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Row;
use std::collections::HashMap;
use std::str::FromStr;

/// Aggregate counters exposed to collaborators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetrics {
    pub total_emails: i64,
    pub emails_with_documents: i64,
    pub total_documents: i64,
    pub total_pages_processed: i64,
    pub total_characters_processed: i64,
    pub avg_pages_per_document: f64,
    pub avg_characters_per_document: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VendorSpend {
    pub party_id: String,
    pub display_name: String,
    pub total: Decimal,
    pub transaction_count: i64,
}

impl GraphStore {
    pub async fn processing_metrics(
        &self,
        user_id: &str,
    ) -> Result<ProcessingMetrics, MailgraphError> {
        let total_emails: i64 = sqlx::query("SELECT COUNT(*) AS n FROM messages WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        let emails_with_documents: i64 = sqlx::query(
            "SELECT COUNT(DISTINCT m.id) AS n
             FROM messages m JOIN message_documents md ON md.message_id = m.id
             WHERE m.user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?
        .try_get("n")?;

        let row = sqlx::query(
            "SELECT COUNT(*) AS docs,
                    COALESCE(SUM(page_count), 0) AS pages,
                    COALESCE(SUM(character_count), 0) AS chars
             FROM documents WHERE user_id = ? AND state = 'completed'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let total_documents: i64 = row.try_get("docs")?;
        let total_pages_processed: i64 = row.try_get("pages")?;
        let total_characters_processed: i64 = row.try_get("chars")?;

        let (avg_pages, avg_chars) = if total_documents > 0 {
            (
                total_pages_processed as f64 / total_documents as f64,
                total_characters_processed as f64 / total_documents as f64,
            )
        } else {
            (0.0, 0.0)
        };

        Ok(ProcessingMetrics {
            total_emails,
            emails_with_documents,
            total_documents,
            total_pages_processed,
            total_characters_processed,
            avg_pages_per_document: avg_pages,
            avg_characters_per_document: avg_chars,
        })
    }

    /// Total spend over the trailing N months, summed as decimals so scale
    /// is never lost to float coercion
    pub async fn total_spend_trailing_months(
        &self,
        user_id: &str,
        months: u32,
    ) -> Result<Decimal, MailgraphError> {
        let cutoff = (Utc::now() - Duration::days(months as i64 * 30)).date_naive();
        let rows = sqlx::query(
            "SELECT amount FROM transactions
             WHERE user_id = ? AND transaction_date IS NOT NULL AND transaction_date >= ?",
        )
        .bind(user_id)
        .bind(cutoff.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for row in &rows {
            let text: String = row.try_get("amount")?;
            total += Decimal::from_str(&text)
                .map_err(|e| MailgraphError::Database(format!("bad amount {}: {}", text, e)))?;
        }
        Ok(total)
    }

    /// Top vendors by summed transaction amount over the trailing N months
    pub async fn top_vendors(
        &self,
        user_id: &str,
        months: u32,
        limit: usize,
    ) -> Result<Vec<VendorSpend>, MailgraphError> {
        let cutoff = (Utc::now() - Duration::days(months as i64 * 30)).date_naive();
        let rows = sqlx::query(
            "SELECT t.amount, t.party_id, p.display_name
             FROM transactions t JOIN parties p ON p.id = t.party_id
             WHERE t.user_id = ? AND t.transaction_date IS NOT NULL AND t.transaction_date >= ?",
        )
        .bind(user_id)
        .bind(cutoff.format("%Y-%m-%d").to_string())
        .fetch_all(&self.pool)
        .await?;

        let mut by_party: HashMap<String, VendorSpend> = HashMap::new();
        for row in &rows {
            let party_id: String = row.try_get("party_id")?;
            let display_name: String = row.try_get("display_name")?;
            let text: String = row.try_get("amount")?;
            let amount = Decimal::from_str(&text)
                .map_err(|e| MailgraphError::Database(format!("bad amount {}: {}", text, e)))?;

            let entry = by_party.entry(party_id.clone()).or_insert(VendorSpend {
                party_id,
                display_name,
                total: Decimal::ZERO,
                transaction_count: 0,
            });
            entry.total += amount;
            entry.transaction_count += 1;
        }

        let mut vendors: Vec<VendorSpend> = by_party.into_values().collect();
        vendors.sort_by(|a, b| b.total.cmp(&a.total));
        vendors.truncate(limit);
        Ok(vendors)
    }

    /// Transactions at or above a threshold amount, newest first
    pub async fn transactions_above(
        &self,
        user_id: &str,
        threshold: Decimal,
    ) -> Result<Vec<crate::models::Transaction>, MailgraphError> {
        let rows = sqlx::query(
            "SELECT document_id FROM transactions WHERE user_id = ? GROUP BY document_id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let mut matching = Vec::new();
        for row in &rows {
            let document_id: String = row.try_get("document_id")?;
            for tx in self.transactions_for_document(&document_id).await? {
                if tx.amount >= threshold {
                    matching.push(tx);
                }
            }
        }

        matching.sort_by(|a, b| b.transaction_date.cmp(&a.transaction_date));
        Ok(matching)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartyType, Transaction, TransactionKind};
    use std::collections::BTreeMap;

    async fn seed(store: &GraphStore, doc_id: &str, amounts: &[&str], party_id: Option<String>) {
        let now = Utc::now();
        store
            .insert_document(&crate::models::Document {
                id: doc_id.to_string(),
                user_id: "user-1".to_string(),
                source_attachment_id: None,
                storage_key: format!("hash-{}", doc_id),
                content_hash: format!("hash-{}", doc_id),
                filename: "invoice.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                state: crate::models::PipelineState::Completed,
                document_type: None,
                extraction_method: None,
                confidence: None,
                page_count: Some(2),
                character_count: Some(500),
                extracted_text: None,
                extracted_fields: None,
                skipped_reason: None,
                last_error: None,
                attempt_count: 0,
                lease_epoch: 0,
                lease_expires_at: None,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let txs: Vec<Transaction> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| Transaction {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: "user-1".to_string(),
                document_id: doc_id.to_string(),
                party_id: party_id.clone(),
                row_index: i as i64,
                amount: Decimal::from_str(amount).unwrap(),
                currency: "USD".to_string(),
                transaction_date: Some(Utc::now().date_naive()),
                kind: TransactionKind::Invoice,
                line_items: vec![],
                metadata: BTreeMap::new(),
                created_at: now,
            })
            .collect();
        store
            .replace_document_transactions(doc_id, &txs)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_total_spend_sums_decimals() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        seed(&store, "d1", &["100.10", "0.90"], None).await;
        seed(&store, "d2", &["24.00"], None).await;

        let total = store
            .total_spend_trailing_months("user-1", 3)
            .await
            .unwrap();
        assert_eq!(total, Decimal::from_str("125.00").unwrap());
    }

    #[tokio::test]
    async fn test_top_vendors_ordering() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let acme = store
            .upsert_party("user-1", "Acme", PartyType::Vendor)
            .await
            .unwrap();
        let globex = store
            .upsert_party("user-1", "Globex", PartyType::Vendor)
            .await
            .unwrap();

        seed(&store, "d1", &["10.00"], Some(acme.id.clone())).await;
        seed(&store, "d2", &["99.00"], Some(globex.id.clone())).await;

        let vendors = store.top_vendors("user-1", 3, 10).await.unwrap();
        assert_eq!(vendors.len(), 2);
        assert_eq!(vendors[0].display_name, "Globex");
    }

    #[tokio::test]
    async fn test_transactions_above_threshold() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        seed(&store, "d1", &["10.00", "500.00"], None).await;

        let big = store
            .transactions_above("user-1", Decimal::from_str("100.00").unwrap())
            .await
            .unwrap();
        assert_eq!(big.len(), 1);
        assert_eq!(big[0].amount, Decimal::from_str("500.00").unwrap());
    }

    #[tokio::test]
    async fn test_processing_metrics_empty() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let metrics = store.processing_metrics("user-1").await.unwrap();
        assert_eq!(metrics.total_documents, 0);
        assert_eq!(metrics.avg_pages_per_document, 0.0);
    }

    #[tokio::test]
    async fn test_processing_metrics_counts() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        seed(&store, "d1", &["10.00"], None).await;
        seed(&store, "d2", &["20.00"], None).await;

        let metrics = store.processing_metrics("user-1").await.unwrap();
        assert_eq!(metrics.total_documents, 2);
        assert_eq!(metrics.total_pages_processed, 4);
        assert_eq!(metrics.avg_characters_per_document, 500.0);
    }
}
