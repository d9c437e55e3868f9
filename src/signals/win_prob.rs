use crate::models::datafeed::{EventKind, LiveEvent};

/// Home-win probability shift applied when a red card is shown.
const RED_CARD_SHIFT: f64 = 0.12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBand {
    FirstHalf,
    SecondHalf,
}

impl TimeBand {
    pub fn from_minute(minute: i64) -> Self {
        if minute <= 45 {
            TimeBand::FirstHalf
        } else {
            TimeBand::SecondHalf
        }
    }
}

/// (home_win, draw, away_win) keyed by clipped goal difference and half.
/// Calibrated on historical in-play outcomes; goal diff is clipped to ±2.
pub fn win_probabilities(goal_diff: i64, band: TimeBand) -> (f64, f64, f64) {
    let diff = goal_diff.clamp(-2, 2);
    match (diff, band) {
        (-2, TimeBand::FirstHalf) => (0.08, 0.14, 0.78),
        (-2, TimeBand::SecondHalf) => (0.04, 0.08, 0.88),
        (-1, TimeBand::FirstHalf) => (0.20, 0.28, 0.52),
        (-1, TimeBand::SecondHalf) => (0.12, 0.20, 0.68),
        (0, TimeBand::FirstHalf) => (0.40, 0.30, 0.30),
        (0, TimeBand::SecondHalf) => (0.35, 0.38, 0.27),
        (1, TimeBand::FirstHalf) => (0.62, 0.24, 0.14),
        (1, TimeBand::SecondHalf) => (0.72, 0.20, 0.08),
        (2, TimeBand::FirstHalf) => (0.80, 0.12, 0.08),
        (2, TimeBand::SecondHalf) => (0.90, 0.06, 0.04),
        _ => unreachable!("goal diff clipped to [-2, 2]"),
    }
}

/// Fair home-win probability for a live event.
///
/// On a red card the table value shifts by 12 percentage points: down when
/// the home side is trailing or level (they likely received it), up
/// otherwise.
pub fn fair_home_win(event: &LiveEvent) -> f64 {
    let band = TimeBand::from_minute(event.minute);
    let (mut home_win, _draw, _away_win) =
        win_probabilities(event.home_score - event.away_score, band);

    if event.kind == EventKind::RedCard {
        if event.home_score <= event.away_score {
            home_win = (home_win - RED_CARD_SHIFT).max(0.01);
        } else {
            home_win = (home_win + RED_CARD_SHIFT).min(0.99);
        }
    }

    home_win
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::now_ts;
    use crate::models::datafeed::FeedSource;
    use serde_json::Value;

    fn event(home: i64, away: i64, minute: i64, kind: EventKind) -> LiveEvent {
        LiveEvent {
            fixture_id: 1,
            home_team: "Home".into(),
            away_team: "Away".into(),
            home_score: home,
            away_score: away,
            minute,
            kind,
            detected_at: now_ts(),
            source: FeedSource::ApiFootball,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_table_lookup() {
        assert_eq!(
            win_probabilities(1, TimeBand::SecondHalf),
            (0.72, 0.20, 0.08)
        );
        assert_eq!(win_probabilities(0, TimeBand::FirstHalf), (0.40, 0.30, 0.30));
    }

    #[test]
    fn test_goal_diff_clipped() {
        assert_eq!(
            win_probabilities(5, TimeBand::SecondHalf),
            win_probabilities(2, TimeBand::SecondHalf)
        );
        assert_eq!(
            win_probabilities(-4, TimeBand::FirstHalf),
            win_probabilities(-2, TimeBand::FirstHalf)
        );
    }

    #[test]
    fn test_band_boundary() {
        assert_eq!(TimeBand::from_minute(45), TimeBand::FirstHalf);
        assert_eq!(TimeBand::from_minute(46), TimeBand::SecondHalf);
    }

    #[test]
    fn test_goal_event_uses_table() {
        let fair = fair_home_win(&event(2, 0, 60, EventKind::Goal));
        assert!((fair - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_red_card_penalizes_trailing_home() {
        // Level score: home likely received it, probability drops.
        let base = fair_home_win(&event(0, 0, 30, EventKind::Goal));
        let carded = fair_home_win(&event(0, 0, 30, EventKind::RedCard));
        assert!((base - carded - RED_CARD_SHIFT).abs() < 1e-9);
    }

    #[test]
    fn test_red_card_boosts_leading_home() {
        let base = fair_home_win(&event(1, 0, 30, EventKind::Goal));
        let carded = fair_home_win(&event(1, 0, 30, EventKind::RedCard));
        assert!((carded - base - RED_CARD_SHIFT).abs() < 1e-9);
    }

    #[test]
    fn test_red_card_clamped() {
        // Deep trailing late: 0.04 - 0.12 clamps to 0.01.
        let fair = fair_home_win(&event(0, 2, 80, EventKind::RedCard));
        assert!((fair - 0.01).abs() < 1e-9);
    }
}
