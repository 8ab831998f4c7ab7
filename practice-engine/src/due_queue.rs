use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            attempt::{Attempt, ReviewStatus},
            StoredObject,
        },
    },
};

/// Questions due for review: each question's *latest* Attempt has `next_review_date <= as_of`
/// and `review_status != mastered`, ordered ascending by `next_review_date`, tie-broken by
/// `question_id`. `Attempt::due_for_review` alone is insufficient here since it does not
/// restrict to the latest attempt per question or exclude mastered cards.
pub async fn due_queue(
    owner_id: &str,
    as_of: DateTime<Utc>,
    db: &SurrealDbClient,
) -> Result<Vec<Attempt>, AppError> {
    let attempts: Vec<Attempt> = db
        .client
        .query(
            "SELECT * FROM type::table($table) \
             WHERE owner_id = $owner_id \
             ORDER BY question_id ASC, answered_at DESC",
        )
        .bind(("table", Attempt::table_name()))
        .bind(("owner_id", owner_id.to_string()))
        .await?
        .take(0)?;

    let mut latest_per_question: HashMap<String, Attempt> = HashMap::new();
    for attempt in attempts {
        latest_per_question
            .entry(attempt.question_id.clone())
            .or_insert(attempt);
    }

    let mut due: Vec<Attempt> = latest_per_question
        .into_values()
        .filter(|attempt| {
            attempt.next_review_date <= as_of && attempt.review_status != ReviewStatus::Mastered
        })
        .collect();

    due.sort_by(|a, b| {
        a.next_review_date
            .cmp(&b.next_review_date)
            .then_with(|| a.question_id.cmp(&b.question_id))
    });

    Ok(due)
}
