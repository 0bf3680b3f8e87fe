//! Database schema creation for all Mailgraph tables.
//!
//! All CREATE TABLE statements live here - single source of truth.

use crate::error::MailgraphError;
use crate::store::GraphStore;
use tracing::info;

impl GraphStore {
    /// Ensure all tables exist.
    pub(crate) async fn ensure_schema(&self) -> Result<(), MailgraphError> {
        self.create_identity_tables().await?;
        self.create_mail_tables().await?;
        self.create_graph_tables().await?;
        self.create_infra_tables().await?;

        info!("Database schema verified");
        Ok(())
    }

    async fn create_identity_tables(&self) -> Result<(), MailgraphError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                window_months INTEGER,
                max_emails_per_sync INTEGER,
                last_sync_at TEXT,
                sync_cursor TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // OAuth material, AES-256-GCM encrypted; one row per (user, provider)
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS credentials (
                user_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                refresh_token_enc BLOB NOT NULL,
                refresh_nonce BLOB NOT NULL,
                access_token_enc BLOB,
                access_nonce BLOB,
                access_expires_at TEXT,
                revoked INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, provider)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_mail_tables(&self) -> Result<(), MailgraphError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                provider TEXT NOT NULL,
                provider_message_id TEXT NOT NULL,
                provider_thread_id TEXT,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                subject TEXT NOT NULL,
                received_at TEXT NOT NULL,
                body_text TEXT,
                snippet TEXT,
                is_qualified INTEGER,
                qualification_stage TEXT,
                qualification_confidence REAL,
                qualification_reason TEXT,
                qualified_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, provider_message_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_user_received
             ON messages(user_id, received_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS attachments (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL REFERENCES messages(id),
                provider_attachment_id TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                declared_size INTEGER,
                download_state TEXT NOT NULL DEFAULT 'pending'
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // Append-only audit of qualification decisions
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS qualification_log (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                message_id TEXT NOT NULL,
                qualified INTEGER NOT NULL,
                stage TEXT NOT NULL,
                confidence REAL NOT NULL,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_graph_tables(&self) -> Result<(), MailgraphError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                source_attachment_id TEXT,
                storage_key TEXT NOT NULL,
                content_hash TEXT NOT NULL,
                filename TEXT NOT NULL,
                mime_type TEXT NOT NULL,
                state TEXT NOT NULL DEFAULT 'queued',
                document_type TEXT,
                extraction_method TEXT,
                confidence REAL,
                page_count INTEGER,
                character_count INTEGER,
                extracted_text TEXT,
                extracted_fields TEXT,
                skipped_reason TEXT,
                last_error TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                lease_epoch INTEGER NOT NULL DEFAULT 0,
                lease_expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (user_id, content_hash)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS parties (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                normalized_name TEXT NOT NULL,
                display_name TEXT NOT NULL,
                party_type TEXT NOT NULL,
                aliases TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                UNIQUE (user_id, normalized_name)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                document_id TEXT NOT NULL REFERENCES documents(id),
                party_id TEXT,
                row_index INTEGER NOT NULL,
                amount TEXT NOT NULL,
                currency TEXT NOT NULL,
                transaction_date TEXT,
                kind TEXT NOT NULL,
                line_items TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE (document_id, row_index)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user_date
             ON transactions(user_id, transaction_date)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS message_documents (
                message_id TEXT NOT NULL REFERENCES messages(id),
                document_id TEXT NOT NULL REFERENCES documents(id),
                created_at TEXT NOT NULL,
                PRIMARY KEY (message_id, document_id)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_infra_tables(&self) -> Result<(), MailgraphError> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                lane TEXT NOT NULL,
                user_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                priority INTEGER NOT NULL DEFAULT 0,
                not_before TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                lease_epoch INTEGER NOT NULL DEFAULT 0,
                lease_expires_at TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            )"#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_jobs_poll
             ON jobs(lane, status, not_before, priority)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS templates (
                user_id TEXT NOT NULL,
                sender_domain TEXT NOT NULL,
                document_type TEXT NOT NULL,
                layout_fingerprint TEXT NOT NULL,
                recipe TEXT NOT NULL,
                consecutive_failures INTEGER NOT NULL DEFAULT 0,
                last_used_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, sender_domain, document_type, layout_fingerprint)
            )"#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
