//! Party rows with insert-or-select upsert semantics.

use crate::error::MailgraphError;
use crate::models::{Party, PartyType};
use crate::store::GraphStore;
use crate::utils::normalize::normalize_party_name;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

fn party_from_row(r: &SqliteRow) -> Result<Party, MailgraphError> {
    let aliases: Vec<String> = serde_json::from_str(
        &r.try_get::<String, _>("aliases")
            .map_err(MailgraphError::from)?,
    )?;
    Ok(Party {
        id: r.try_get("id").map_err(MailgraphError::from)?,
        user_id: r.try_get("user_id").map_err(MailgraphError::from)?,
        normalized_name: r
            .try_get("normalized_name")
            .map_err(MailgraphError::from)?,
        display_name: r.try_get("display_name").map_err(MailgraphError::from)?,
        party_type: r
            .try_get::<String, _>("party_type")
            .map_err(MailgraphError::from)
            .map(|s| PartyType::parse(&s).unwrap_or(PartyType::Other))?,
        aliases,
        created_at: r.try_get("created_at").map_err(MailgraphError::from)?,
    })
}

impl GraphStore {
    /// Insert-or-select on `(user_id, normalized_name)`. Concurrent inserts
    /// are tolerated: the unique constraint rejects the loser, which then
    /// reads the winner's row.
    pub async fn upsert_party(
        &self,
        user_id: &str,
        display_name: &str,
        party_type: PartyType,
    ) -> Result<Party, MailgraphError> {
        let normalized = normalize_party_name(display_name);
        if normalized.is_empty() {
            return Err(MailgraphError::Validation(
                "party name normalizes to empty".to_string(),
            ));
        }

        if let Some(existing) = self.get_party_by_name(user_id, &normalized).await? {
            return Ok(existing);
        }

        let insert = sqlx::query(
            "INSERT INTO parties (id, user_id, normalized_name, display_name, party_type,
                                  aliases, created_at)
             VALUES (?, ?, ?, ?, ?, '[]', ?)
             ON CONFLICT (user_id, normalized_name) DO NOTHING",
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(user_id)
        .bind(&normalized)
        .bind(display_name)
        .bind(party_type.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if insert.rows_affected() == 0 {
            tracing::debug!(
                user_id = %user_id,
                normalized = %normalized,
                "Concurrent party insert, reading winner"
            );
        }

        self.get_party_by_name(user_id, &normalized)
            .await?
            .ok_or_else(|| MailgraphError::Database("party upsert lost its row".to_string()))
    }

    pub async fn get_party(&self, id: &str) -> Result<Option<Party>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM parties WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| party_from_row(&r)).transpose()
    }

    pub async fn get_party_by_name(
        &self,
        user_id: &str,
        normalized_name: &str,
    ) -> Result<Option<Party>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM parties WHERE user_id = ? AND normalized_name = ?")
            .bind(user_id)
            .bind(normalized_name)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| party_from_row(&r)).transpose()
    }

    /// Adds an alias, deduplicated, for later user-driven merges
    pub async fn add_party_alias(&self, id: &str, alias: &str) -> Result<(), MailgraphError> {
        let party = self
            .get_party(id)
            .await?
            .ok_or_else(|| MailgraphError::Validation(format!("no party {}", id)))?;

        let mut aliases = party.aliases;
        if !aliases.iter().any(|a| a == alias) {
            aliases.push(alias.to_string());
        }

        sqlx::query("UPDATE parties SET aliases = ? WHERE id = ?")
            .bind(serde_json::to_string(&aliases)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
