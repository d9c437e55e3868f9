use serde_json::{json, Value};

use crate::events::now_ts;
use crate::models::market::Side;
use crate::models::mirror::{round2, round4, TradeResultKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MatchStart,
    Goal,
    RedCard,
    MatchEnd,
    GameStart,
    GameEnd,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::MatchStart => "match_start",
            EventKind::Goal => "goal",
            EventKind::RedCard => "red_card",
            EventKind::MatchEnd => "match_end",
            EventKind::GameStart => "game_start",
            EventKind::GameEnd => "game_end",
        }
    }

    /// Only scoring and red-card events feed opportunity detection.
    pub fn is_actionable(&self) -> bool {
        matches!(self, EventKind::Goal | EventKind::RedCard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedSource {
    ApiFootball,
    Sportradar,
}

impl FeedSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedSource::ApiFootball => "api_football",
            FeedSource::Sportradar => "sportradar",
        }
    }
}

/// A change observed in a live sports feed.
#[derive(Debug, Clone)]
pub struct LiveEvent {
    pub fixture_id: i64,
    pub home_team: String,
    pub away_team: String,
    pub home_score: i64,
    pub away_score: i64,
    pub minute: i64,
    pub kind: EventKind,
    pub detected_at: f64,
    pub source: FeedSource,
    pub raw: Value,
}

impl LiveEvent {
    /// Key used for cross-feed deduplication.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.home_team.to_lowercase(),
            self.away_team.to_lowercase(),
            self.kind.as_str(),
            self.minute
        )
    }

    pub fn age_s(&self) -> f64 {
        now_ts() - self.detected_at
    }

    pub fn describe(&self) -> String {
        match self.kind {
            EventKind::Goal => format!(
                "goal {}-{} min {}",
                self.home_score, self.away_score, self.minute
            ),
            EventKind::RedCard => format!(
                "red card min {} ({}-{})",
                self.minute, self.home_score, self.away_score
            ),
            other => format!("{} min {}", other.as_str(), self.minute),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "fixture_id": self.fixture_id,
            "home_team": self.home_team,
            "away_team": self.away_team,
            "home_score": self.home_score,
            "away_score": self.away_score,
            "minute": self.minute,
            "event_type": self.kind.as_str(),
            "detected_at": self.detected_at,
            "source": self.source.as_str(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarketKind {
    GameWinner,
    OverUnder,
    BothTeamsScore,
}

impl MarketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketKind::GameWinner => "game_winner",
            MarketKind::OverUnder => "over_under",
            MarketKind::BothTeamsScore => "both_teams_score",
        }
    }
}

/// A Polymarket market matched to a live fixture.
#[derive(Debug, Clone)]
pub struct MatchedMarket {
    pub market_id: String,
    pub question: String,
    pub kind: MarketKind,
    pub token_id: String,
    pub token_id_no: String,
    pub current_price: f64,
    /// Goal line, only for over/under markets.
    pub ou_line: Option<f64>,
}

/// Fair-value vs market-price divergence worth acting on.
#[derive(Debug, Clone)]
pub struct DetectedOpportunity {
    pub fixture_id: i64,
    pub market_id: String,
    pub market_question: String,
    pub token_id: String,
    pub outcome: Side,
    pub fair_value: f64,
    pub market_price: f64,
    pub edge_pct: f64,
    pub source_event: String,
    pub detected_at: f64,
    pub market_kind: MarketKind,
    pub ou_line: Option<f64>,
}

impl DetectedOpportunity {
    pub fn to_json(&self) -> Value {
        json!({
            "fixture_id": self.fixture_id,
            "market_id": self.market_id,
            "market_question": self.market_question,
            "token_id": self.token_id,
            "outcome": self.outcome.as_str(),
            "fair_value": round4(self.fair_value),
            "market_price": round4(self.market_price),
            "edge_pct": round2(self.edge_pct),
            "source_event": self.source_event,
            "detected_at": self.detected_at,
            "market_type": self.market_kind.as_str(),
            "ou_line": self.ou_line,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DataFeedPosition {
    pub id: String,
    pub market_question: String,
    pub token_id: String,
    pub outcome: Side,
    pub entry_price: f64,
    pub current_price: f64,
    pub shares: f64,
    pub usdc_deployed: f64,
    pub opened_at: f64,
    pub source_event: String,
    pub fixture_id: i64,
}

impl DataFeedPosition {
    pub fn unrealized_pnl(&self) -> f64 {
        (self.current_price - self.entry_price) * self.shares
    }

    pub fn unrealized_pnl_pct(&self) -> f64 {
        if self.entry_price == 0.0 {
            return 0.0;
        }
        (self.current_price - self.entry_price) / self.entry_price * 100.0
    }

    pub fn age_s(&self) -> f64 {
        now_ts() - self.opened_at
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "market_question": self.market_question,
            "token_id": self.token_id,
            "outcome": self.outcome.as_str(),
            "entry_price": round4(self.entry_price),
            "current_price": round4(self.current_price),
            "shares": round4(self.shares),
            "usdc_deployed": round2(self.usdc_deployed),
            "unrealized_pnl": round4(self.unrealized_pnl()),
            "unrealized_pnl_pct": round2(self.unrealized_pnl_pct()),
            "opened_at": self.opened_at,
            "age_s": self.age_s().round(),
            "source_event": self.source_event,
            "fixture_id": self.fixture_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedDataFeedTrade {
    pub market_question: String,
    pub outcome: Side,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub usdc_deployed: f64,
    pub pnl_usdc: f64,
    pub duration_s: f64,
    pub source_event: String,
    pub resolved_at: f64,
    pub result: TradeResultKind,
}

impl ResolvedDataFeedTrade {
    pub fn to_json(&self) -> Value {
        json!({
            "market_question": self.market_question,
            "outcome": self.outcome.as_str(),
            "entry_price": round4(self.entry_price),
            "exit_price": round4(self.exit_price),
            "shares": round4(self.shares),
            "usdc_deployed": round2(self.usdc_deployed),
            "pnl_usdc": round4(self.pnl_usdc),
            "duration_s": self.duration_s.round(),
            "source_event": self.source_event,
            "resolved_at": self.resolved_at,
            "result": self.result.as_str(),
        })
    }
}

/// An opportunity whose market reaction time is being measured.
#[derive(Debug, Clone)]
pub struct PendingEdge {
    pub event_id: String,
    pub event_type: String,
    pub event_ts: f64,
    pub token_id: String,
    pub price_at_detection: f64,
    pub expected_direction: Side,
    pub fixture_id: i64,
    pub feed_source: FeedSource,
}

#[derive(Debug, Clone)]
pub struct EdgeMeasurement {
    pub event_id: String,
    pub event_type: String,
    pub latency_s: f64,
    pub price_at_detection: f64,
    pub price_after_move: f64,
    pub price_delta: f64,
    pub detected_at: f64,
    pub price_moved_at: f64,
    pub feed_source: FeedSource,
}

impl EdgeMeasurement {
    pub fn to_json(&self) -> Value {
        json!({
            "event_id": self.event_id,
            "event_type": self.event_type,
            "latency_s": round2(self.latency_s),
            "price_at_detection": round4(self.price_at_detection),
            "price_after_move": round4(self.price_after_move),
            "price_delta": round4(self.price_delta),
            "detected_at": self.detected_at,
            "price_moved_at": self.price_moved_at,
            "feed_source": self.feed_source.as_str(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> LiveEvent {
        LiveEvent {
            fixture_id: 77,
            home_team: "Arsenal".into(),
            away_team: "Chelsea".into(),
            home_score: 1,
            away_score: 0,
            minute: 23,
            kind,
            detected_at: now_ts(),
            source: FeedSource::ApiFootball,
            raw: Value::Null,
        }
    }

    #[test]
    fn test_dedup_key_lowercases() {
        let e = event(EventKind::Goal);
        assert_eq!(e.dedup_key(), "arsenal_chelsea_goal_23");
    }

    #[test]
    fn test_actionable_kinds() {
        assert!(EventKind::Goal.is_actionable());
        assert!(EventKind::RedCard.is_actionable());
        assert!(!EventKind::MatchStart.is_actionable());
        assert!(!EventKind::MatchEnd.is_actionable());
        assert!(!EventKind::GameStart.is_actionable());
    }

    #[test]
    fn test_describe_goal() {
        let e = event(EventKind::Goal);
        assert_eq!(e.describe(), "goal 1-0 min 23");
    }
}
