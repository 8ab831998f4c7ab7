use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    New,
    Learning,
    Reviewing,
    Mastered,
}

/// SM-2 scheduling state carried on each Attempt, seeding the next review date for the
/// Question/owner pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Sm2State {
    pub interval_days: u32,
    pub easiness: f32,
    pub repetition: u32,
}

impl Sm2State {
    pub fn initial() -> Self {
        Self {
            interval_days: 1,
            easiness: 2.5,
            repetition: 0,
        }
    }
}

stored_object!(Attempt, "attempt", {
    owner_id: String,
    question_id: String,
    selected_index: u8,
    is_correct: bool,
    confidence: u8,
    time_taken_seconds: u32,
    #[serde(default)]
    xp_earned: i64,
    sm2: Sm2State,
    next_review_date: DateTime<Utc>,
    review_status: ReviewStatus,
    answered_at: DateTime<Utc>
});

impl Attempt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: String,
        question_id: String,
        selected_index: u8,
        is_correct: bool,
        confidence: u8,
        time_taken_seconds: u32,
        xp_earned: i64,
        sm2: Sm2State,
        next_review_date: DateTime<Utc>,
        review_status: ReviewStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            owner_id,
            question_id,
            selected_index,
            is_correct,
            confidence,
            time_taken_seconds,
            xp_earned,
            sm2,
            next_review_date,
            review_status,
            answered_at: now,
        }
    }

    pub async fn store(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.store_item(self.clone()).await?;
        Ok(())
    }

    /// Most recent Attempt for a (owner, question) pair, used as the SM-2 scheduling seed
    /// for the next answer.
    pub async fn latest_for_question(
        owner_id: &str,
        question_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let attempts: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE owner_id = $owner_id AND question_id = $question_id \
                 ORDER BY answered_at DESC LIMIT 1",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("question_id", question_id.to_string()))
            .await?
            .take(0)?;

        Ok(attempts.into_iter().next())
    }

    /// Attempts due for review at or before `as_of`, ordered oldest-due first.
    pub async fn due_for_review(
        owner_id: &str,
        as_of: DateTime<Utc>,
        db: &SurrealDbClient,
    ) -> Result<Vec<Self>, AppError> {
        let attempts: Vec<Self> = db
            .client
            .query(
                "SELECT * FROM type::table($table) \
                 WHERE owner_id = $owner_id AND next_review_date <= $as_of \
                 ORDER BY next_review_date ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("as_of", as_of))
            .await?
            .take(0)?;

        Ok(attempts)
    }
}
