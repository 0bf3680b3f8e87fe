//! User rows and sync progress.

use crate::error::MailgraphError;
use crate::models::User;
use crate::store::GraphStore;
use chrono::{DateTime, Utc};
use sqlx::Row;

impl GraphStore {
    /// Creates the user row if it does not exist
    pub async fn ensure_user(&self, user_id: &str) -> Result<(), MailgraphError> {
        sqlx::query("INSERT OR IGNORE INTO users (id, created_at) VALUES (?, ?)")
            .bind(user_id)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_user(&self, user_id: &str) -> Result<Option<User>, MailgraphError> {
        let row = sqlx::query(
            "SELECT id, email, window_months, max_emails_per_sync, last_sync_at,
                    sync_cursor, created_at
             FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(User {
                id: r.try_get("id")?,
                email: r.try_get("email")?,
                window_months: r
                    .try_get::<Option<i64>, _>("window_months")?
                    .map(|v| v as u32),
                max_emails_per_sync: r
                    .try_get::<Option<i64>, _>("max_emails_per_sync")?
                    .map(|v| v as u32),
                last_sync_at: r.try_get("last_sync_at")?,
                sync_cursor: r.try_get("sync_cursor")?,
                created_at: r.try_get("created_at")?,
            })
        })
        .transpose()
        .map_err(|e: sqlx::Error| e.into())
    }

    /// Records sync completion (cursor cleared) or partial progress
    /// (cursor retained for resumption)
    pub async fn set_sync_progress(
        &self,
        user_id: &str,
        last_sync_at: Option<DateTime<Utc>>,
        sync_cursor: Option<&str>,
    ) -> Result<(), MailgraphError> {
        sqlx::query(
            "UPDATE users SET last_sync_at = COALESCE(?, last_sync_at), sync_cursor = ?
             WHERE id = ?",
        )
        .bind(last_sync_at)
        .bind(sync_cursor)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_sync_preferences(
        &self,
        user_id: &str,
        window_months: Option<u32>,
        max_emails_per_sync: Option<u32>,
    ) -> Result<(), MailgraphError> {
        sqlx::query("UPDATE users SET window_months = ?, max_emails_per_sync = ? WHERE id = ?")
            .bind(window_months.map(|v| v as i64))
            .bind(max_emails_per_sync.map(|v| v as i64))
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::store::GraphStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_ensure_user_idempotent() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.ensure_user("user-1").await.unwrap();
        store.ensure_user("user-1").await.unwrap();

        let user = store.get_user("user-1").await.unwrap().unwrap();
        assert_eq!(user.id, "user-1");
        assert!(user.last_sync_at.is_none());
    }

    #[tokio::test]
    async fn test_sync_progress_round_trip() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        store.ensure_user("user-1").await.unwrap();

        let now = Utc::now();
        store
            .set_sync_progress("user-1", Some(now), Some("cursor-abc"))
            .await
            .unwrap();

        let user = store.get_user("user-1").await.unwrap().unwrap();
        assert_eq!(user.sync_cursor.as_deref(), Some("cursor-abc"));
        assert!(user.last_sync_at.is_some());

        // Partial update keeps the previous completion time
        store.set_sync_progress("user-1", None, None).await.unwrap();
        let user = store.get_user("user-1").await.unwrap().unwrap();
        assert!(user.last_sync_at.is_some());
        assert!(user.sync_cursor.is_none());
    }
}
