//! Score calculator: issue density → bounded 0–100 score.
//!
//! issue_rate = total_issues / total_messages * 100
//! score      = max(0, round(100 - issue_rate * 5))
//!
//! 5% density costs 25 points, 20% density zeroes the score. Zero messages has
//! no score at all (`None`), which callers must not confuse with "no issues".

use crate::model::AggregateScore;

/// Points lost per percentage point of issue density.
pub const PENALTY_PER_PERCENT: f64 = 5.0;

pub fn issue_rate(total_issues: u64, total_messages: usize) -> Option<f64> {
    if total_messages == 0 {
        return None;
    }
    Some(total_issues as f64 / total_messages as f64 * 100.0)
}

pub fn score(total_issues: u64, total_messages: usize) -> Option<u8> {
    let rate = issue_rate(total_issues, total_messages)?;
    let raw = (100.0 - rate * PENALTY_PER_PERCENT).round();
    Some(raw.clamp(0.0, 100.0) as u8)
}

/// Grammar and guideline scores over their own denominators, plus the overall mean.
pub fn aggregate_score(
    grammar_issues: u64,
    grammar_messages: usize,
    guideline_issues: u64,
    guideline_messages: usize,
) -> AggregateScore {
    AggregateScore::new(
        score(grammar_issues, grammar_messages),
        score(guideline_issues, guideline_messages),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundaries() {
        assert_eq!(score(0, 100), Some(100));
        assert_eq!(score(20, 100), Some(0));
        assert_eq!(score(50, 100), Some(0));
        assert_eq!(score(0, 0), None);
        assert_eq!(score(5, 0), None);
    }

    #[test]
    fn known_points() {
        assert_eq!(score(5, 100), Some(75));
        assert_eq!(score(1, 100), Some(95));
        // 1/3 → 33.33% rate → way past the cutoff
        assert_eq!(score(1, 3), Some(0));
        // 1/150 → 0.667% → 96.67 → 97
        assert_eq!(score(1, 150), Some(97));
    }

    #[test]
    fn monotonic_in_issues() {
        for messages in [1usize, 7, 50, 333, 1000] {
            let mut prev = 100u8;
            for issues in 0..(messages as u64 + 5) {
                let s = score(issues, messages).unwrap();
                assert!(s <= prev, "score rose at {issues}/{messages}");
                prev = s;
            }
        }
    }

    #[test]
    fn aggregate_uses_separate_denominators() {
        let a = aggregate_score(2, 100, 0, 0);
        assert_eq!(a.grammar_score, Some(90));
        assert_eq!(a.guidelines_score, None);
        assert_eq!(a.overall_score, Some(90));
    }
}
