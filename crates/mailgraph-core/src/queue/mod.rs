/// Durable job queue over SQLite with priority lanes
///
/// Lanes are polled in priority order (`attachments` > `documents` >
/// `default`). Workers claim jobs under a visibility lease; a crashed
/// worker's lease expires and the job is redelivered with a bumped epoch,
/// fencing out any writes the dead worker still attempts.
use crate::constants::{
    JOB_BACKOFF_BASE_SECONDS, JOB_BACKOFF_CAP_SECONDS, JOB_BACKOFF_JITTER_FACTOR,
    JOB_MAX_ATTEMPTS, LANE_ATTACHMENTS, LANE_DEFAULT, LANE_DOCUMENTS,
};
use crate::error::MailgraphError;
use crate::models::{Job, JobKind, JobStatus};
use crate::store::GraphStore;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::time::Duration as StdDuration;
use tracing::{debug, info, warn};

/// Lanes in descending polling priority
pub const LANES: &[&str] = &[LANE_ATTACHMENTS, LANE_DOCUMENTS, LANE_DEFAULT];

/// What became of a failed job
#[derive(Debug, Clone, PartialEq)]
pub enum FailureDisposition {
    /// Transient; job will be redelivered after the given delay
    Rescheduled(StdDuration),
    /// Permanent or out of attempts; job is terminal
    Failed,
}

fn job_from_row(r: &SqliteRow) -> Result<Job, MailgraphError> {
    let payload: serde_json::Value = serde_json::from_str(
        &r.try_get::<String, _>("payload")
            .map_err(MailgraphError::from)?,
    )?;

    Ok(Job {
        id: r.try_get("id").map_err(MailgraphError::from)?,
        kind: r
            .try_get::<String, _>("kind")
            .map_err(MailgraphError::from)
            .map(|s| JobKind::parse(&s))?
            .ok_or_else(|| MailgraphError::Queue("unknown job kind".to_string()))?,
        lane: r.try_get("lane").map_err(MailgraphError::from)?,
        user_id: r.try_get("user_id").map_err(MailgraphError::from)?,
        payload,
        attempt: r
            .try_get::<i64, _>("attempt")
            .map_err(MailgraphError::from)? as u32,
        priority: r.try_get("priority").map_err(MailgraphError::from)?,
        not_before: r.try_get("not_before").map_err(MailgraphError::from)?,
        status: r
            .try_get::<String, _>("status")
            .map_err(MailgraphError::from)
            .map(|s| JobStatus::parse(&s).unwrap_or(JobStatus::Pending))?,
        lease_epoch: r.try_get("lease_epoch").map_err(MailgraphError::from)?,
        lease_expires_at: r
            .try_get("lease_expires_at")
            .map_err(MailgraphError::from)?,
        last_error: r.try_get("last_error").map_err(MailgraphError::from)?,
        created_at: r.try_get("created_at").map_err(MailgraphError::from)?,
    })
}

#[derive(Clone)]
pub struct JobQueue {
    store: GraphStore,
    /// Optional running-job cap per lane; absent lanes are uncapped
    lane_caps: std::collections::HashMap<String, u64>,
}

impl JobQueue {
    pub fn new(store: GraphStore) -> Self {
        Self {
            store,
            lane_caps: std::collections::HashMap::new(),
        }
    }

    pub fn with_lane_cap(mut self, lane: &str, cap: u64) -> Self {
        self.lane_caps.insert(lane.to_string(), cap);
        self
    }

    pub async fn enqueue(
        &self,
        kind: JobKind,
        lane: &str,
        user_id: &str,
        payload: &serde_json::Value,
        priority: i64,
    ) -> Result<String, MailgraphError> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO jobs (id, kind, lane, user_id, payload, attempt, priority,
                               not_before, status, lease_epoch, created_at)
             VALUES (?, ?, ?, ?, ?, 0, ?, ?, 'pending', 0, ?)",
        )
        .bind(&id)
        .bind(kind.as_str())
        .bind(lane)
        .bind(user_id)
        .bind(serde_json::to_string(payload)?)
        .bind(priority)
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(self.store.pool())
        .await?;

        debug!(job_id = %id, kind = kind.as_str(), lane = lane, "Enqueued job");
        Ok(id)
    }

    /// Claims the next eligible job, scanning lanes in priority order.
    /// Within a lane: priority score descending, then enqueue time.
    pub async fn claim_next(&self, lease: Duration) -> Result<Option<Job>, MailgraphError> {
        let now = Utc::now();

        for lane in LANES.iter().copied() {
            if let Some(cap) = self.lane_caps.get(lane) {
                let running: i64 = sqlx::query(
                    "SELECT COUNT(*) AS n FROM jobs
                     WHERE lane = ? AND status = 'running' AND lease_expires_at >= ?",
                )
                .bind(lane)
                .bind(now)
                .fetch_one(self.store.pool())
                .await?
                .try_get("n")?;
                if running as u64 >= *cap {
                    continue;
                }
            }

            // A raced claim invalidates the optimistic epoch; retry the lane
            for _ in 0..3 {
                let row = sqlx::query(
                    "SELECT * FROM jobs WHERE lane = ? AND (
                        (status = 'pending' AND not_before <= ?)
                        OR (status = 'running' AND lease_expires_at < ?)
                     )
                     ORDER BY priority DESC, created_at ASC LIMIT 1",
                )
                .bind(lane)
                .bind(now)
                .bind(now)
                .fetch_optional(self.store.pool())
                .await?;

                let Some(row) = row else {
                    break;
                };
                let job = job_from_row(&row)?;

                let claimed = sqlx::query(
                    "UPDATE jobs SET status = 'running', lease_epoch = lease_epoch + 1,
                            lease_expires_at = ?
                     WHERE id = ? AND lease_epoch = ?",
                )
                .bind(now + lease)
                .bind(&job.id)
                .bind(job.lease_epoch)
                .execute(self.store.pool())
                .await?;

                if claimed.rows_affected() == 1 {
                    let mut claimed_job = job;
                    claimed_job.status = JobStatus::Running;
                    claimed_job.lease_epoch += 1;
                    claimed_job.lease_expires_at = Some(now + lease);
                    debug!(job_id = %claimed_job.id, lane = lane, attempt = claimed_job.attempt, "Claimed job");
                    return Ok(Some(claimed_job));
                }
            }
        }

        Ok(None)
    }

    /// Extends the lease while the worker is still active
    pub async fn renew_lease(
        &self,
        job_id: &str,
        epoch: i64,
        until: DateTime<Utc>,
    ) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE jobs SET lease_expires_at = ?
             WHERE id = ? AND lease_epoch = ? AND status = 'running'",
        )
        .bind(until)
        .bind(job_id)
        .bind(epoch)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "job {} lease epoch {} is stale",
                job_id, epoch
            )));
        }
        Ok(())
    }

    pub async fn complete(&self, job_id: &str, epoch: i64) -> Result<(), MailgraphError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'completed', lease_expires_at = NULL
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(job_id)
        .bind(epoch)
        .execute(self.store.pool())
        .await?;

        if result.rows_affected() == 0 {
            return Err(MailgraphError::LeaseLost(format!(
                "job {} completion fenced out",
                job_id
            )));
        }
        Ok(())
    }

    /// Applies the retry policy after a failure. Transient errors reschedule
    /// with `min(cap, base · 2^attempt) + jitter` (or the provider-advised
    /// retry-after); permanent errors and exhausted attempts go terminal.
    pub async fn handle_failure(
        &self,
        job: &Job,
        error: &MailgraphError,
    ) -> Result<FailureDisposition, MailgraphError> {
        let next_attempt = job.attempt + 1;
        let out_of_attempts = next_attempt >= JOB_MAX_ATTEMPTS;

        if !error.is_retriable() || out_of_attempts {
            warn!(
                job_id = %job.id,
                attempt = job.attempt,
                error = %error,
                out_of_attempts = out_of_attempts,
                "Job failed terminally"
            );
            sqlx::query(
                "UPDATE jobs SET status = 'failed', attempt = ?, last_error = ?,
                        lease_expires_at = NULL
                 WHERE id = ? AND lease_epoch = ?",
            )
            .bind(next_attempt)
            .bind(error.to_string())
            .bind(&job.id)
            .bind(job.lease_epoch)
            .execute(self.store.pool())
            .await?;
            return Ok(FailureDisposition::Failed);
        }

        let delay = match error {
            MailgraphError::RateLimited {
                retry_after: Some(advised),
                ..
            } => *advised,
            _ => backoff_delay(job.attempt),
        };

        info!(
            job_id = %job.id,
            attempt = next_attempt,
            delay_s = delay.as_secs(),
            error = %error,
            "Rescheduling job with backoff"
        );
        sqlx::query(
            "UPDATE jobs SET status = 'pending', attempt = ?, not_before = ?,
                    last_error = ?, lease_expires_at = NULL
             WHERE id = ? AND lease_epoch = ?",
        )
        .bind(next_attempt)
        .bind(Utc::now() + Duration::from_std(delay).unwrap_or(Duration::seconds(60)))
        .bind(error.to_string())
        .bind(&job.id)
        .bind(job.lease_epoch)
        .execute(self.store.pool())
        .await?;

        Ok(FailureDisposition::Rescheduled(delay))
    }

    /// Pending plus running depth, used for backpressure watermarks
    pub async fn lane_depth(&self, lane: &str) -> Result<u64, MailgraphError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs
             WHERE lane = ? AND status IN ('pending', 'running')",
        )
        .bind(lane)
        .fetch_one(self.store.pool())
        .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Option<Job>, MailgraphError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(job_id)
            .fetch_optional(self.store.pool())
            .await?;
        row.map(|r| job_from_row(&r)).transpose()
    }
}

/// `min(cap, base · 2^attempt)` seconds, with ±10% jitter
fn backoff_delay(attempt: u32) -> StdDuration {
    let exponential = JOB_BACKOFF_BASE_SECONDS.saturating_mul(2u64.saturating_pow(attempt));
    let capped = exponential.min(JOB_BACKOFF_CAP_SECONDS);
    let jitter = (rand::random::<f64>() - 0.5) * 2.0 * JOB_BACKOFF_JITTER_FACTOR;
    StdDuration::from_secs_f64((capped as f64 * (1.0 + jitter)).max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::LANE_ATTACHMENTS;

    async fn queue() -> JobQueue {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        JobQueue::new(store)
    }

    fn payload() -> serde_json::Value {
        serde_json::json!({"message_id": "m1", "attachment_id": "a1"})
    }

    #[tokio::test]
    async fn test_lanes_polled_in_priority_order() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::TemplateSweep, LANE_DEFAULT, "user-1", &payload(), 0)
            .await
            .unwrap();
        queue
            .enqueue(
                JobKind::ProcessAttachment,
                LANE_ATTACHMENTS,
                "user-1",
                &payload(),
                0,
            )
            .await
            .unwrap();

        let first = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert_eq!(first.lane, LANE_ATTACHMENTS);

        let second = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert_eq!(second.lane, LANE_DEFAULT);
    }

    #[tokio::test]
    async fn test_priority_then_fifo_within_lane() {
        let queue = queue().await;
        let low = queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 100)
            .await
            .unwrap();
        let high = queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 200)
            .await
            .unwrap();

        let first = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert_eq!(first.id, high);
        let second = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert_eq!(second.id, low);
    }

    #[tokio::test]
    async fn test_claimed_job_is_invisible_until_lease_expires() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();

        let job = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert!(queue.claim_next(Duration::minutes(10)).await.unwrap().is_none());

        // Simulate crash: expire the lease by renewing into the past
        queue
            .renew_lease(&job.id, job.lease_epoch, Utc::now() - Duration::seconds(1))
            .await
            .unwrap();

        let redelivered = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        assert_eq!(redelivered.id, job.id);
        assert!(redelivered.lease_epoch > job.lease_epoch);

        // The dead worker's writes are fenced
        assert!(queue.complete(&job.id, job.lease_epoch).await.is_err());
    }

    #[tokio::test]
    async fn test_transient_failure_reschedules_with_backoff() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();
        let job = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();

        let disposition = queue
            .handle_failure(&job, &MailgraphError::ProviderTransient("flaky".to_string()))
            .await
            .unwrap();

        match disposition {
            FailureDisposition::Rescheduled(delay) => {
                // attempt 0: ~60s ± 10%
                assert!(delay.as_secs() >= 50 && delay.as_secs() <= 70);
            }
            other => panic!("expected reschedule, got {:?}", other),
        }

        // Not yet visible; not_before is in the future
        assert!(queue.claim_next(Duration::minutes(10)).await.unwrap().is_none());
        let stored = queue.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Pending);
        assert_eq!(stored.attempt, 1);
    }

    #[tokio::test]
    async fn test_advised_retry_after_wins_over_backoff() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();
        let job = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();

        let disposition = queue
            .handle_failure(
                &job,
                &MailgraphError::rate_limited("throttled", Some(StdDuration::from_secs(7))),
            )
            .await
            .unwrap();
        assert_eq!(
            disposition,
            FailureDisposition::Rescheduled(StdDuration::from_secs(7))
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_terminal() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();
        let job = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();

        let disposition = queue
            .handle_failure(&job, &MailgraphError::EncryptedPdf("locked".to_string()))
            .await
            .unwrap();
        assert_eq!(disposition, FailureDisposition::Failed);

        let stored = queue.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert!(stored.last_error.unwrap().contains("locked"));
    }

    #[tokio::test]
    async fn test_attempts_exhaust_to_failed() {
        let queue = queue().await;
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();

        let mut disposition = FailureDisposition::Failed;
        for _ in 0..JOB_MAX_ATTEMPTS {
            let Some(job) = queue.claim_next(Duration::minutes(10)).await.unwrap() else {
                break;
            };

            disposition = queue
                .handle_failure(&job, &MailgraphError::ProviderTransient("down".to_string()))
                .await
                .unwrap();

            // Clear the backoff so the next claim sees it
            sqlx::query("UPDATE jobs SET not_before = ? WHERE id = ?")
                .bind(Utc::now() - Duration::seconds(1))
                .bind(&job.id)
                .execute(queue.store.pool())
                .await
                .unwrap();
        }

        assert_eq!(disposition, FailureDisposition::Failed);
    }

    #[tokio::test]
    async fn test_lane_cap_limits_concurrent_claims() {
        let store = GraphStore::connect("sqlite::memory:").await.unwrap();
        let queue = JobQueue::new(store).with_lane_cap(LANE_ATTACHMENTS, 1);

        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();
        queue
            .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
            .await
            .unwrap();

        let first = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        // Cap of one: the second job waits even though it is claimable
        assert!(queue.claim_next(Duration::minutes(10)).await.unwrap().is_none());

        queue.complete(&first.id, first.lease_epoch).await.unwrap();
        assert!(queue.claim_next(Duration::minutes(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_lane_depth() {
        let queue = queue().await;
        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 0);

        for _ in 0..3 {
            queue
                .enqueue(JobKind::ProcessAttachment, LANE_ATTACHMENTS, "u", &payload(), 0)
                .await
                .unwrap();
        }
        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 3);

        let job = queue.claim_next(Duration::minutes(10)).await.unwrap().unwrap();
        // Running still counts toward depth
        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 3);
        queue.complete(&job.id, job.lease_epoch).await.unwrap();
        assert_eq!(queue.lane_depth(LANE_ATTACHMENTS).await.unwrap(), 2);
    }
}
