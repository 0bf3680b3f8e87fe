/// User model - tenant root for all downstream data
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    /// Per-user override of the rolling window; None uses the system default
    pub window_months: Option<u32>,
    /// Per-user sync cap; None uses the system default, 0 = unlimited
    pub max_emails_per_sync: Option<u32>,
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Provider page cursor persisted on partial failure so the next sync
    /// resumes where this one stopped
    pub sync_cursor: Option<String>,
    pub created_at: DateTime<Utc>,
}
