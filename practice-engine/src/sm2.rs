use chrono::{DateTime, Duration, Utc};
use common::storage::types::attempt::{ReviewStatus, Sm2State};

/// Optimal answer time, in seconds, used to penalize slow-but-correct answers.
const OPTIMAL_TIME_SECONDS: u32 = 90;

/// Derives the 0-5 SM-2 quality score from the raw answer signal. Correctness dominates;
/// confidence and latency refine it within the correct/incorrect band.
pub fn derive_quality(is_correct: bool, confidence: u8, time_taken_seconds: u32) -> u8 {
    if !is_correct {
        return if confidence >= 4 {
            0
        } else if confidence == 3 {
            1
        } else {
            2
        };
    }

    let mut quality = if confidence <= 2 {
        3
    } else if confidence == 3 {
        4
    } else {
        5
    };

    let slow = f64::from(time_taken_seconds) > 1.5 * f64::from(OPTIMAL_TIME_SECONDS);
    if slow && quality > 3 {
        quality -= 1;
    }

    quality
}

/// Result of one SM-2 transition: the updated per-card state plus the derived review status
/// and next review timestamp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sm2Transition {
    pub state: Sm2State,
    pub next_review_date: DateTime<Utc>,
    pub review_status: ReviewStatus,
}

/// Pure value transition: `(prev_state, quality) -> next_state`. `has_prior_attempt`
/// distinguishes a first-ever miss (status `new`) from a repeated miss (status `learning`).
pub fn transition(
    prev: Sm2State,
    quality: u8,
    has_prior_attempt: bool,
    now: DateTime<Utc>,
) -> Sm2Transition {
    let q = f64::from(quality.min(5));
    let delta = 0.1 - (5.0 - q) * (0.08 + (5.0 - q) * 0.02);
    let easiness = (prev.easiness + delta as f32).clamp(1.3, 2.5);

    let (repetition, interval_days) = if quality >= 3 {
        let repetition = prev.repetition.saturating_add(1);
        let interval = match repetition {
            1 => 1,
            2 => 6,
            _ => {
                let computed = f64::from(prev.interval_days) * f64::from(easiness);
                computed.round().max(1.0) as u32
            }
        };
        (repetition, interval)
    } else {
        (0, 1)
    };

    let next_review_date = now + Duration::days(i64::from(interval_days));

    let review_status = if repetition == 0 && !has_prior_attempt {
        ReviewStatus::New
    } else if repetition < 3 {
        ReviewStatus::Learning
    } else if interval_days < 21 {
        ReviewStatus::Reviewing
    } else {
        ReviewStatus::Mastered
    };

    Sm2Transition {
        state: Sm2State {
            interval_days,
            easiness,
            repetition,
        },
        next_review_date,
        review_status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_is_zero_for_confident_wrong_answer() {
        assert_eq!(derive_quality(false, 5, 30), 0);
    }

    #[test]
    fn quality_is_two_for_unsure_wrong_answer() {
        assert_eq!(derive_quality(false, 1, 30), 2);
    }

    #[test]
    fn quality_penalizes_slow_correct_answers() {
        let fast = derive_quality(true, 5, 30);
        let slow = derive_quality(true, 5, 200);
        assert_eq!(fast, 5);
        assert_eq!(slow, 4);
    }

    #[test]
    fn quality_does_not_go_below_three_from_latency_penalty() {
        let slow_unsure = derive_quality(true, 1, 200);
        assert_eq!(slow_unsure, 3);
    }

    #[test]
    fn first_correct_attempt_sets_interval_to_one_day() {
        let now = Utc::now();
        let result = transition(Sm2State::initial(), 5, false, now);
        assert_eq!(result.state.repetition, 1);
        assert_eq!(result.state.interval_days, 1);
        assert_eq!(result.review_status, ReviewStatus::Learning);
    }

    #[test]
    fn second_consecutive_correct_attempt_sets_interval_to_six_days() {
        let now = Utc::now();
        let first = transition(Sm2State::initial(), 5, false, now);
        let second = transition(first.state, 5, true, now);
        assert_eq!(second.state.repetition, 2);
        assert_eq!(second.state.interval_days, 6);
        assert_eq!(second.review_status, ReviewStatus::Learning);
    }

    #[test]
    fn wrong_answer_resets_repetition_and_interval() {
        let now = Utc::now();
        let state = Sm2State {
            interval_days: 30,
            easiness: 2.3,
            repetition: 4,
        };
        let result = transition(state, 1, true, now);
        assert_eq!(result.state.repetition, 0);
        assert_eq!(result.state.interval_days, 1);
        assert_eq!(result.review_status, ReviewStatus::Learning);
    }

    #[test]
    fn mastered_once_interval_reaches_twenty_one_days() {
        let now = Utc::now();
        let state = Sm2State {
            interval_days: 15,
            easiness: 2.5,
            repetition: 3,
        };
        let result = transition(state, 5, true, now);
        assert!(result.state.interval_days >= 21);
        assert_eq!(result.review_status, ReviewStatus::Mastered);
    }

    #[test]
    fn easiness_never_drops_below_the_floor() {
        let now = Utc::now();
        let mut state = Sm2State {
            interval_days: 1,
            easiness: 1.3,
            repetition: 0,
        };
        for _ in 0..10 {
            let result = transition(state, 0, true, now);
            state = result.state;
        }
        assert!((state.easiness - 1.3).abs() < 0.001);
    }

    #[test]
    fn first_ever_wrong_attempt_is_new_not_learning() {
        let now = Utc::now();
        let result = transition(Sm2State::initial(), 1, false, now);
        assert_eq!(result.review_status, ReviewStatus::New);
    }
}
