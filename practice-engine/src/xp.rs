use common::storage::types::question::Difficulty;

/// Difficulty multiplier `M(difficulty)` applied to the base XP award.
fn difficulty_multiplier(difficulty: Difficulty) -> f64 {
    match difficulty {
        Difficulty::Easy => 1.0,
        Difficulty::Medium => 1.5,
        Difficulty::Hard => 2.0,
        Difficulty::Nbme => 2.5,
    }
}

/// XP earned for one answer. Base is `10 * M(difficulty)`, floored; +5 for a correct answer,
/// +3 more if correct and confident (confidence >= 4). Never negative.
pub fn compute_xp(difficulty: Difficulty, is_correct: bool, confidence: u8) -> i64 {
    let base = (10.0 * difficulty_multiplier(difficulty)).floor() as i64;
    let mut total = base;
    if is_correct {
        total += 5;
        if confidence >= 4 {
            total += 3;
        }
    }
    total
}

/// Cumulative XP required to reach `level`. Pure and derived; never reads Attempts.
pub fn xp_for_level(level: u32) -> i64 {
    (1000.0 * f64::from(level).powf(1.5)).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_xp_scales_with_difficulty() {
        assert_eq!(compute_xp(Difficulty::Easy, false, 1), 10);
        assert_eq!(compute_xp(Difficulty::Medium, false, 1), 15);
        assert_eq!(compute_xp(Difficulty::Hard, false, 1), 20);
        assert_eq!(compute_xp(Difficulty::Nbme, false, 1), 25);
    }

    #[test]
    fn correct_answer_adds_flat_bonus() {
        assert_eq!(compute_xp(Difficulty::Easy, true, 1), 15);
    }

    #[test]
    fn confident_correct_answer_adds_extra_bonus() {
        assert_eq!(compute_xp(Difficulty::Easy, true, 4), 18);
        assert_eq!(compute_xp(Difficulty::Easy, true, 5), 18);
    }

    #[test]
    fn wrong_answer_never_goes_negative() {
        assert!(compute_xp(Difficulty::Easy, false, 5) >= 0);
    }

    #[test]
    fn xp_for_level_matches_closed_form() {
        assert_eq!(xp_for_level(1), 1000);
        assert_eq!(xp_for_level(2), 2828);
    }
}
