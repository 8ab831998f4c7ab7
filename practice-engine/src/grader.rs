use chrono::{Duration, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            attempt::{Attempt, ReviewStatus, Sm2State},
            question::Question,
            user::User,
            xp_ledger_entry::{XpLedgerEntry, XpSource},
        },
    },
};

use crate::{sm2, xp};

/// Minimum time between two submissions for the same question, guarding against accidental
/// or scripted double-submits racing the SM-2 scheduler.
const RESUBMIT_COOLDOWN_SECONDS: i64 = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct GradingResult {
    pub is_correct: bool,
    pub correct_index: u8,
    pub explanation: String,
    pub xp_earned: i64,
    pub next_review_date: chrono::DateTime<Utc>,
    pub review_status: ReviewStatus,
}

pub struct Grader;

impl Grader {
    /// Grades one answer and applies all four downstream writes (attempt, question counters,
    /// XP ledger entry, user total) as a single SurrealDB transaction so a crash or a failed
    /// write can never leave the ledger and the scheduler out of sync.
    pub async fn submit(
        owner_id: &str,
        question_id: &str,
        selected_index: u8,
        confidence: u8,
        time_taken_seconds: u32,
        db: &SurrealDbClient,
    ) -> Result<GradingResult, AppError> {
        if selected_index > 3 {
            return Err(AppError::Validation(format!(
                "selected_index {selected_index} is out of range [0,4)"
            )));
        }
        if !(1..=5).contains(&confidence) {
            return Err(AppError::Validation(format!(
                "confidence {confidence} is out of range [1,5]"
            )));
        }
        if !(1..=3600).contains(&time_taken_seconds) {
            return Err(AppError::Validation(format!(
                "time_taken_seconds {time_taken_seconds} is out of range [1,3600]"
            )));
        }

        let question = Question::get_for_owner(question_id, owner_id, db).await?;
        let previous = Attempt::latest_for_question(owner_id, question_id, db).await?;

        if let Some(prev) = &previous {
            let elapsed = Utc::now() - prev.answered_at;
            if elapsed < Duration::seconds(RESUBMIT_COOLDOWN_SECONDS) {
                return Err(AppError::Conflict(format!(
                    "question {question_id} was answered less than {RESUBMIT_COOLDOWN_SECONDS}s ago"
                )));
            }
        }

        let is_correct = selected_index == question.correct_index;
        let quality = sm2::derive_quality(is_correct, confidence, time_taken_seconds);
        let prev_state = previous.as_ref().map(|a| a.sm2).unwrap_or_else(Sm2State::initial);
        let has_prior_attempt = previous.is_some();
        let now = Utc::now();
        let transition = sm2::transition(prev_state, quality, has_prior_attempt, now);
        let xp_earned = xp::compute_xp(question.difficulty, is_correct, confidence);

        let attempt = Attempt::new(
            owner_id.to_string(),
            question_id.to_string(),
            selected_index,
            is_correct,
            confidence,
            time_taken_seconds,
            xp_earned,
            transition.state,
            transition.next_review_date,
            transition.review_status,
        );

        let ledger_entry = XpLedgerEntry::new(
            owner_id.to_string(),
            xp_earned,
            XpSource::QuestionAnswered,
            Some(serde_json::json!({
                "question_id": question_id,
                "attempt_id": attempt.id,
            })),
            attempt.id.clone(),
        );

        // get_or_create is idempotent and safe to run ahead of the transaction; the row it
        // ensures exists is what the UPDATE below mutates.
        User::get_or_create(owner_id, db).await?;

        let response = db
            .client
            .query(
                "BEGIN TRANSACTION;
                 CREATE type::thing('attempt', $attempt_id) CONTENT $attempt;
                 UPDATE type::thing('question', $question_id) SET \
                     times_answered += 1, times_correct += $correct_increment, updated_at = time::now();
                 CREATE type::thing('xp_ledger_entry', $ledger_id) CONTENT $ledger_entry;
                 UPDATE type::thing('user', $owner_id) SET total_xp += $xp_earned, updated_at = time::now();
                 COMMIT TRANSACTION;",
            )
            .bind(("attempt_id", attempt.id.clone()))
            .bind(("attempt", attempt.clone()))
            .bind(("question_id", question_id.to_string()))
            .bind(("correct_increment", i64::from(is_correct)))
            .bind(("ledger_id", ledger_entry.id.clone()))
            .bind(("ledger_entry", ledger_entry))
            .bind(("owner_id", owner_id.to_string()))
            .bind(("xp_earned", xp_earned))
            .await?;

        response.check()?;

        Ok(GradingResult {
            is_correct,
            correct_index: question.correct_index,
            explanation: question.explanation,
            xp_earned,
            next_review_date: transition.next_review_date,
            review_status: transition.review_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    async fn seeded_db() -> SurrealDbClient {
        SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
            .await
            .expect("in-memory db")
    }

    fn sample_question(owner_id: &str) -> Question {
        Question::new(
            owner_id.to_string(),
            None,
            "A 45-year-old man presents with chest pain.".to_string(),
            vec!["A".into(), "B".into(), "C".into(), "D".into()],
            1,
            "Because of X.".to_string(),
            "Cardiology".to_string(),
            None,
            3,
            None,
            "default".to_string(),
            serde_json::json!({}),
        )
    }

    #[tokio::test]
    async fn correct_answer_awards_xp_and_updates_counters() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 5, 40, &db)
            .await
            .expect("grade");

        assert!(result.is_correct);
        assert!(result.xp_earned > 0);
        assert_eq!(result.review_status, ReviewStatus::Learning);

        let updated = Question::get_for_owner(&question.id, "owner-1", &db)
            .await
            .expect("reload question");
        assert_eq!(updated.times_answered, 1);
        assert_eq!(updated.times_correct, 1);

        let user = User::get_or_create("owner-1", &db).await.expect("user");
        assert_eq!(user.total_xp, result.xp_earned);
    }

    #[tokio::test]
    async fn wrong_answer_does_not_increment_times_correct() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 0, 5, 40, &db)
            .await
            .expect("grade");

        assert!(!result.is_correct);
        assert_eq!(result.correct_index, 1);

        let updated = Question::get_for_owner(&question.id, "owner-1", &db)
            .await
            .expect("reload question");
        assert_eq!(updated.times_answered, 1);
        assert_eq!(updated.times_correct, 0);
    }

    #[tokio::test]
    async fn resubmitting_within_cooldown_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        Grader::submit("owner-1", &question.id, 1, 5, 40, &db)
            .await
            .expect("first submission");

        let second = Grader::submit("owner-1", &question.id, 1, 5, 40, &db).await;
        assert!(matches!(second, Err(AppError::Conflict(_))));
    }

    #[tokio::test]
    async fn answering_a_question_owned_by_another_user_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-2", &question.id, 1, 5, 40, &db).await;
        assert!(matches!(result, Err(AppError::Ownership(_))));
    }

    #[tokio::test]
    async fn confidence_zero_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 0, 40, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn confidence_six_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 6, 40, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn time_taken_zero_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 5, 0, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn time_taken_at_the_3600_second_boundary_is_accepted() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 5, 3600, &db).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn time_taken_past_the_3600_second_boundary_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 1, 5, 3601, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn selected_index_out_of_range_is_rejected() {
        let db = seeded_db().await;
        let question = sample_question("owner-1");
        db.store_item(question.clone()).await.expect("store question");

        let result = Grader::submit("owner-1", &question.id, 4, 5, 40, &db).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }
}
