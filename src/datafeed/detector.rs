use crate::models::datafeed::{DetectedOpportunity, LiveEvent, MarketKind, MatchedMarket};
use crate::models::market::Side;
use crate::signals::poisson::p_over;
use crate::signals::win_prob::fair_home_win;

/// Maps a live event plus a matched market to an opportunity when the
/// model's fair value diverges from the market price by at least the edge
/// threshold. Only goal and red-card events within the entry window are
/// considered.
pub struct OpportunityDetector {
    min_edge: f64,
    entry_window_s: f64,
}

impl OpportunityDetector {
    pub fn new(min_edge_pct: f64, entry_window_s: f64) -> Self {
        Self {
            min_edge: min_edge_pct / 100.0,
            entry_window_s,
        }
    }

    pub fn evaluate(
        &self,
        event: &LiveEvent,
        market: &MatchedMarket,
    ) -> Option<DetectedOpportunity> {
        if !event.kind.is_actionable() {
            return None;
        }
        // Detection freshness: stale events are not actionable edges.
        if event.age_s() > self.entry_window_s {
            return None;
        }

        let fair = match market.kind {
            MarketKind::GameWinner => fair_home_win(event),
            MarketKind::OverUnder => {
                let line = market.ou_line?;
                let current_goals = event.home_score + event.away_score;
                let minutes_remaining = (90 - event.minute).max(0) as f64;
                p_over(line, current_goals, minutes_remaining)
            }
            // Matched but unmodeled.
            MarketKind::BothTeamsScore => return None,
        };

        let market_price = market.current_price;
        let edge = fair - market_price;
        if edge.abs() < self.min_edge {
            return None;
        }

        let outcome = if edge > 0.0 { Side::Yes } else { Side::No };
        let effective_fair = match outcome {
            Side::Yes => fair,
            Side::No => 1.0 - fair,
        };

        Some(DetectedOpportunity {
            fixture_id: event.fixture_id,
            market_id: market.market_id.clone(),
            market_question: market.question.clone(),
            token_id: market.token_id.clone(),
            outcome,
            fair_value: effective_fair,
            market_price,
            edge_pct: edge.abs() * 100.0,
            source_event: event.describe(),
            detected_at: event.detected_at,
            market_kind: market.kind,
            ou_line: market.ou_line,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::now_ts;
    use crate::models::datafeed::{EventKind, FeedSource};
    use serde_json::Value;

    fn event(home: i64, away: i64, minute: i64, kind: EventKind) -> LiveEvent {
        LiveEvent {
            fixture_id: 9,
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

    fn market(kind: MarketKind, price: f64, ou_line: Option<f64>) -> MatchedMarket {
        MatchedMarket {
            market_id: "m1".into(),
            question: "Test market".into(),
            kind,
            token_id: "tok".into(),
            token_id_no: "tok-no".into(),
            current_price: price,
            ou_line,
        }
    }

    #[test]
    fn test_winner_positive_edge_buys_yes() {
        let d = OpportunityDetector::new(3.0, 45.0);
        // 1-0 second half → fair 0.72; market at 0.60 → edge +0.12.
        let opp = d
            .evaluate(
                &event(1, 0, 60, EventKind::Goal),
                &market(MarketKind::GameWinner, 0.60, None),
            )
            .expect("edge should trigger");
        assert_eq!(opp.outcome, Side::Yes);
        assert!((opp.fair_value - 0.72).abs() < 1e-9);
        assert!((opp.edge_pct - 12.0).abs() < 1e-6);
    }

    #[test]
    fn test_winner_negative_edge_buys_no() {
        let d = OpportunityDetector::new(3.0, 45.0);
        // Fair 0.72, market overpriced at 0.85 → edge -0.13 → No side.
        let opp = d
            .evaluate(
                &event(1, 0, 60, EventKind::Goal),
                &market(MarketKind::GameWinner, 0.85, None),
            )
            .expect("negative edge should trigger");
        assert_eq!(opp.outcome, Side::No);
        // Effective fair value for No is 1 - fair.
        assert!((opp.fair_value - 0.28).abs() < 1e-9);
    }

    #[test]
    fn test_edge_below_threshold_rejected() {
        let d = OpportunityDetector::new(3.0, 45.0);
        assert!(d
            .evaluate(
                &event(1, 0, 60, EventKind::Goal),
                &market(MarketKind::GameWinner, 0.71, None),
            )
            .is_none());
    }

    #[test]
    fn test_stale_event_rejected() {
        let d = OpportunityDetector::new(3.0, 45.0);
        let mut e = event(1, 0, 60, EventKind::Goal);
        e.detected_at = now_ts() - 120.0;
        assert!(d
            .evaluate(&e, &market(MarketKind::GameWinner, 0.50, None))
            .is_none());
    }

    #[test]
    fn test_non_actionable_event_rejected() {
        let d = OpportunityDetector::new(3.0, 45.0);
        assert!(d
            .evaluate(
                &event(0, 0, 1, EventKind::MatchStart),
                &market(MarketKind::GameWinner, 0.20, None),
            )
            .is_none());
    }

    #[test]
    fn test_over_under_uses_poisson() {
        let d = OpportunityDetector::new(3.0, 45.0);
        // 1 goal at minute 45, line 2.5 → p_over ≈ 0.3733.
        // Market at 0.20 → edge ≈ +0.17 → Yes.
        let opp = d
            .evaluate(
                &event(1, 0, 45, EventKind::Goal),
                &market(MarketKind::OverUnder, 0.20, Some(2.5)),
            )
            .expect("O/U edge should trigger");
        assert_eq!(opp.outcome, Side::Yes);
        assert!((opp.fair_value - 0.3733).abs() < 0.001);
        assert_eq!(opp.ou_line, Some(2.5));
    }

    #[test]
    fn test_over_under_without_line_rejected() {
        let d = OpportunityDetector::new(3.0, 45.0);
        assert!(d
            .evaluate(
                &event(1, 0, 45, EventKind::Goal),
                &market(MarketKind::OverUnder, 0.20, None),
            )
            .is_none());
    }

    #[test]
    fn test_btts_unmodeled() {
        let d = OpportunityDetector::new(3.0, 45.0);
        assert!(d
            .evaluate(
                &event(1, 1, 30, EventKind::Goal),
                &market(MarketKind::BothTeamsScore, 0.10, None),
            )
            .is_none());
    }
}
