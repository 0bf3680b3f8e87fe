/// Entity & graph store backed by SQLite
///
/// One pool serves the entity tables, the job queue, the template cache,
/// and the credential store. The store owns every uniqueness constraint and
/// the dedup/replacement operations the pipeline relies on.
mod documents;
mod messages;
mod metrics;
mod parties;
mod schema;
mod transactions;
mod users;

pub use metrics::{ProcessingMetrics, VendorSpend};

use crate::error::MailgraphError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::str::FromStr;

#[derive(Clone)]
pub struct GraphStore {
    pool: SqlitePool,
}

impl GraphStore {
    /// Opens (or creates) the database and ensures the schema exists
    pub async fn connect(database_url: &str) -> Result<Self, MailgraphError> {
        // Pragmas are per-connection, so they belong on the options every
        // pooled connection is built from
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| MailgraphError::Config(format!("Bad database URL: {}", e)))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        // An in-memory database exists per connection; cap the pool at one
        // so every caller sees the same tables
        let max_connections = if database_url.contains(":memory:") {
            1
        } else {
            10
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// The shared pool; the queue, template cache, and credential store
    /// run against the same database
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
