use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle of a single ingestion task, carrying a `material_id` rather than a generic
/// payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IngestionTaskStatus {
    Pending,
    Processing,
    Completed,
    /// Terminal failure after exhausting retries; carries the last error message.
    DeadLetter(String),
}

stored_object!(IngestionTask, "job", {
    material_id: String,
    owner_id: String,
    status: IngestionTaskStatus,
    #[serde(default)]
    attempts: u32,
    worker_id: Option<String>,
    lease_expires_at: Option<DateTime<Utc>>,
    not_before: DateTime<Utc>,
    last_error: Option<String>
});

/// Retries a failing ingestion task at most this many times before dead-lettering it.
pub const MAX_ATTEMPTS: u32 = 5;
/// Default worker lease duration; also the ingestion-run timeout ceiling from the
/// concurrency model (10 minutes per Material).
pub const DEFAULT_LEASE_SECS: i64 = 600;
const RETRY_BASE_DELAY_SECS: i64 = 30;
const RETRY_MAX_DELAY_SECS: i64 = 900;

/// Exponential backoff for the `attempts`-th retry, capped at `RETRY_MAX_DELAY_SECS`.
fn retry_delay_secs(attempts: u32) -> i64 {
    let exponent = attempts.saturating_sub(1).min(5);
    let delay = RETRY_BASE_DELAY_SECS.saturating_mul(1_i64 << exponent);
    delay.min(RETRY_MAX_DELAY_SECS)
}

impl IngestionTask {
    pub fn new(material_id: String, owner_id: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            material_id,
            owner_id,
            status: IngestionTaskStatus::Pending,
            attempts: 0,
            worker_id: None,
            lease_expires_at: None,
            not_before: now,
            last_error: None,
        }
    }

    pub async fn enqueue(
        material_id: String,
        owner_id: String,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let task = Self::new(material_id, owner_id);
        db.store_item(task.clone()).await?;
        Ok(task)
    }

    /// Claims the oldest eligible task (pending, or processing with an expired lease) for
    /// `worker_id`. A select-then-conditional-update pair rather than one atomic query:
    /// SurrealQL cannot express an atomic "claim one of many matching rows" statement
    /// cleanly across the Pending/expired-lease union, so a losing race just finds no
    /// matching row on the second step and the caller polls again.
    pub async fn claim_next_ready(
        worker_id: &str,
        lease_secs: i64,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let now = Utc::now();

        let candidates: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE not_before <= $now \
                   AND (status = 'pending' OR (status = 'processing' AND lease_expires_at < $now)) \
                 ORDER BY created_at ASC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("now", now))
            .await?
            .take(0)?;

        let Some(candidate) = candidates.into_iter().next() else {
            return Ok(None);
        };

        let lease_expires_at = now + chrono::Duration::seconds(lease_secs);
        let claimed: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET \
                    status = 'processing', \
                    worker_id = $worker_id, \
                    lease_expires_at = $lease_expires_at, \
                    attempts += 1, \
                    updated_at = time::now() \
                 WHERE status = $prev_status AND (lease_expires_at = NONE OR lease_expires_at < $now) \
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", candidate.id.clone()))
            .bind(("worker_id", worker_id.to_string()))
            .bind(("lease_expires_at", lease_expires_at))
            .bind(("now", now))
            .bind(("prev_status", candidate.status.clone()))
            .await?
            .take(0)?;

        Ok(claimed)
    }

    pub async fn mark_completed(id: &str, db: &SurrealDbClient) -> Result<Self, AppError> {
        let updated: Option<Self> = db
            .client
            .query(
                "UPDATE type::thing($table, $id) SET \
                    status = 'completed', worker_id = NONE, lease_expires_at = NONE, \
                    last_error = NONE, updated_at = time::now() \
                 RETURN AFTER",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_string()))
            .await?
            .take(0)?;

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    /// Records a failed run. Retryable failures are rescheduled with exponential backoff;
    /// exhausted or non-retryable failures move the task to its dead-letter terminal state.
    pub async fn mark_failed(
        id: &str,
        message: &str,
        retryable: bool,
        db: &SurrealDbClient,
    ) -> Result<Self, AppError> {
        let task: Self = db
            .get_item(id)
            .await?
            .ok_or_else(|| AppError::NotFound(id.to_string()))?;

        let updated: Option<Self> = if retryable && task.attempts < MAX_ATTEMPTS {
            let not_before = Utc::now() + chrono::Duration::seconds(retry_delay_secs(task.attempts));
            db.client
                .query(
                    "UPDATE type::thing($table, $id) SET \
                        status = 'pending', worker_id = NONE, lease_expires_at = NONE, \
                        not_before = $not_before, last_error = $message, updated_at = time::now() \
                     RETURN AFTER",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", id.to_string()))
                .bind(("not_before", not_before))
                .bind(("message", message.to_string()))
                .await?
                .take(0)?
        } else {
            db.client
                .query(
                    "UPDATE type::thing($table, $id) SET \
                        status = $dead, worker_id = NONE, lease_expires_at = NONE, \
                        last_error = $message, updated_at = time::now() \
                     RETURN AFTER",
                )
                .bind(("table", Self::table_name()))
                .bind(("id", id.to_string()))
                .bind(("dead", IngestionTaskStatus::DeadLetter(message.to_string())))
                .bind(("message", message.to_string()))
                .await?
                .take(0)?
        };

        updated.ok_or_else(|| AppError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db")
    }

    #[test]
    fn retry_delay_grows_exponentially_and_caps() {
        assert_eq!(retry_delay_secs(1), 30);
        assert_eq!(retry_delay_secs(2), 60);
        assert_eq!(retry_delay_secs(3), 120);
        assert_eq!(retry_delay_secs(10), RETRY_MAX_DELAY_SECS);
    }

    #[tokio::test]
    async fn claim_next_ready_skips_tasks_not_yet_due() {
        let db = seeded_db().await;
        let mut task = IngestionTask::new("mat-1".to_string(), "owner-1".to_string());
        task.not_before = Utc::now() + chrono::Duration::minutes(5);
        db.store_item(task).await.expect("store");

        let claimed = IngestionTask::claim_next_ready("worker-1", 600, &db)
            .await
            .expect("claim");
        assert!(claimed.is_none());
    }

    #[tokio::test]
    async fn claim_next_ready_claims_pending_task() {
        let db = seeded_db().await;
        let task = IngestionTask::enqueue("mat-1".to_string(), "owner-1".to_string(), &db)
            .await
            .expect("enqueue");

        let claimed = IngestionTask::claim_next_ready("worker-1", 600, &db)
            .await
            .expect("claim")
            .expect("some task");
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, IngestionTaskStatus::Processing);
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-1"));
        assert_eq!(claimed.attempts, 1);

        let second_claim = IngestionTask::claim_next_ready("worker-2", 600, &db)
            .await
            .expect("claim");
        assert!(second_claim.is_none(), "lease not yet expired");
    }

    #[tokio::test]
    async fn claim_next_ready_reclaims_expired_lease() {
        let db = seeded_db().await;
        let mut task = IngestionTask::new("mat-1".to_string(), "owner-1".to_string());
        task.status = IngestionTaskStatus::Processing;
        task.worker_id = Some("worker-1".to_string());
        task.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(5));
        db.store_item(task.clone()).await.expect("store");

        let claimed = IngestionTask::claim_next_ready("worker-2", 600, &db)
            .await
            .expect("claim")
            .expect("reclaimed");
        assert_eq!(claimed.worker_id.as_deref(), Some("worker-2"));
    }

    #[tokio::test]
    async fn mark_completed_clears_lease() {
        let db = seeded_db().await;
        let task = IngestionTask::enqueue("mat-1".to_string(), "owner-1".to_string(), &db)
            .await
            .expect("enqueue");
        IngestionTask::claim_next_ready("worker-1", 600, &db)
            .await
            .expect("claim");

        let completed = IngestionTask::mark_completed(&task.id, &db).await.expect("complete");
        assert_eq!(completed.status, IngestionTaskStatus::Completed);
        assert!(completed.worker_id.is_none());
    }

    #[tokio::test]
    async fn mark_failed_reschedules_when_retryable() {
        let db = seeded_db().await;
        let task = IngestionTask::enqueue("mat-1".to_string(), "owner-1".to_string(), &db)
            .await
            .expect("enqueue");
        IngestionTask::claim_next_ready("worker-1", 600, &db)
            .await
            .expect("claim");

        let failed = IngestionTask::mark_failed(&task.id, "parser exploded", true, &db)
            .await
            .expect("mark failed");
        assert_eq!(failed.status, IngestionTaskStatus::Pending);
        assert_eq!(failed.last_error.as_deref(), Some("parser exploded"));
        assert!(failed.not_before > Utc::now());
    }

    #[tokio::test]
    async fn mark_failed_dead_letters_after_max_attempts() {
        let db = seeded_db().await;
        let mut task = IngestionTask::new("mat-1".to_string(), "owner-1".to_string());
        task.attempts = MAX_ATTEMPTS;
        db.store_item(task.clone()).await.expect("store");

        let failed = IngestionTask::mark_failed(&task.id, "still broken", true, &db)
            .await
            .expect("mark failed");
        assert!(matches!(failed.status, IngestionTaskStatus::DeadLetter(_)));
    }

    #[tokio::test]
    async fn mark_failed_dead_letters_immediately_when_not_retryable() {
        let db = seeded_db().await;
        let task = IngestionTask::enqueue("mat-1".to_string(), "owner-1".to_string(), &db)
            .await
            .expect("enqueue");

        let failed = IngestionTask::mark_failed(&task.id, "bad input", false, &db)
            .await
            .expect("mark failed");
        assert!(matches!(failed.status, IngestionTaskStatus::DeadLetter(_)));
    }
}
