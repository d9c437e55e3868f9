use statrs::distribution::{DiscreteCDF, Poisson};

/// League-average scoring rate: 2.6 goals per 90 minutes.
pub const GOALS_PER_MIN: f64 = 2.6 / 90.0;

/// Probability that total goals end above `line` given `current_goals`
/// scored and `minutes_remaining` to play.
///
/// "Over 2.5" settles true at 3+ total goals, "over 3.0" at 4+, so the
/// minimum winning total is `⌊line⌋ + 1`. Remaining goals are modeled as
/// Poisson with λ = GOALS_PER_MIN × minutes_remaining.
pub fn p_over(line: f64, current_goals: i64, minutes_remaining: f64) -> f64 {
    let needed = line.floor() as i64 + 1 - current_goals;
    if needed <= 0 {
        return 1.0;
    }
    if minutes_remaining <= 0.0 {
        return 0.0;
    }

    let lambda = GOALS_PER_MIN * minutes_remaining;
    let dist = match Poisson::new(lambda) {
        Ok(d) => d,
        Err(_) => return 0.0,
    };

    // P(total over) = 1 - P(fewer than `needed` more goals).
    (1.0 - dist.cdf(needed as u64 - 1)).clamp(0.0, 1.0)
}
