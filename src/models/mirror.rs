use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::events::now_ts;

/// Consecutive non-429 failures before an address is flagged stale.
pub const MAX_FAILURES_STALE: u32 = 5;

/// WIN/LOSS band: anything within ±ε USDC of zero is a PUSH.
pub const RESULT_EPS_USDC: f64 = 0.01;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AddressStats {
    pub trades_mirrored: u64,
    pub wins: u64,
    pub losses: u64,
    pub total_pnl_usdc: f64,
}

impl AddressStats {
    pub fn win_rate(&self) -> f64 {
        let total = self.wins + self.losses;
        if total == 0 {
            return 0.0;
        }
        self.wins as f64 / total as f64 * 100.0
    }
}

/// Active-position record from the data API. Only the fields the engine
/// consumes are modeled; the wire payload carries many more.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionData {
    pub asset: String,
    #[serde(rename = "conditionId")]
    pub condition_id: String,
    pub title: String,
    pub outcome: String,
    #[serde(rename = "curPrice")]
    pub cur_price: Option<f64>,
    pub price: Option<f64>,
    pub size: Option<f64>,
}

impl PositionData {
    pub fn token_id(&self) -> &str {
        &self.asset
    }

    pub fn entry_price(&self) -> f64 {
        self.cur_price.or(self.price).unwrap_or(0.5)
    }

    pub fn title_or_unknown(&self) -> &str {
        if self.title.is_empty() {
            "Unknown market"
        } else {
            &self.title
        }
    }
}

/// One wallet under observation, with its polling state machine:
/// `new → initializing → healthy ⇄ rate_limited`, stale after five
/// consecutive failures, cleared by the next successful poll.
#[derive(Debug, Clone)]
pub struct WatchedAddress {
    pub address: String,
    pub nickname: String,
    pub enabled: bool,
    pub poll_interval_s: f64,
    pub last_poll_ts: f64,
    pub last_successful_poll_ts: f64,
    pub consecutive_failures: u32,
    pub rate_limited_until: Option<f64>,
    /// token_id → raw position record from the last successful poll.
    pub last_positions: HashMap<String, PositionData>,
    /// True once the first baseline snapshot has been taken.
    pub is_initialized: bool,
    pub stats: AddressStats,
    pub last_poll_count: usize,
    pub last_poll_new: usize,
    pub last_poll_closed: usize,
}

impl WatchedAddress {
    pub fn new(address: String, nickname: String, poll_interval_s: f64) -> Self {
        Self {
            address,
            nickname,
            enabled: true,
            poll_interval_s,
            last_poll_ts: 0.0,
            last_successful_poll_ts: 0.0,
            consecutive_failures: 0,
            rate_limited_until: None,
            last_positions: HashMap::new(),
            is_initialized: false,
            stats: AddressStats::default(),
            last_poll_count: 0,
            last_poll_new: 0,
            last_poll_closed: 0,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.consecutive_failures >= MAX_FAILURES_STALE
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limited_until.is_some_and(|until| now_ts() < until)
    }

    pub fn health(&self) -> &'static str {
        if self.is_stale() {
            "stale"
        } else if self.is_rate_limited() {
            "rate_limited"
        } else {
            "ok"
        }
    }

    pub fn status_json(&self) -> Value {
        json!({
            "address": self.address,
            "nickname": self.nickname,
            "enabled": self.enabled,
            "health": self.health(),
            "consecutive_failures": self.consecutive_failures,
            "is_stale": self.is_stale(),
            "is_rate_limited": self.is_rate_limited(),
            "rate_limited_until": self.rate_limited_until,
            "last_poll_ts": self.last_poll_ts,
            "last_successful_poll_ts": self.last_successful_poll_ts,
            "last_poll_count": self.last_poll_count,
            "last_poll_new": self.last_poll_new,
            "last_poll_closed": self.last_poll_closed,
            "stats": {
                "trades_mirrored": self.stats.trades_mirrored,
                "wins": self.stats.wins,
                "losses": self.stats.losses,
                "total_pnl_usdc": round4(self.stats.total_pnl_usdc),
                "win_rate": (self.stats.win_rate() * 10.0).round() / 10.0,
            },
        })
    }
}

/// Lightweight reference to the address that triggered a trade, passed
/// through callbacks so the portfolio never reaches back into the roster.
#[derive(Debug, Clone)]
pub struct AddressRef {
    pub address: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeResultKind {
    Win,
    Loss,
    Push,
}

impl TradeResultKind {
    pub fn classify(pnl: f64) -> Self {
        if pnl > RESULT_EPS_USDC {
            TradeResultKind::Win
        } else if pnl < -RESULT_EPS_USDC {
            TradeResultKind::Loss
        } else {
            TradeResultKind::Push
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeResultKind::Win => "WIN",
            TradeResultKind::Loss => "LOSS",
            TradeResultKind::Push => "PUSH",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MirrorPosition {
    pub id: String,
    pub market_id: String,
    pub market_question: String,
    pub token_id: String,
    pub outcome: String,
    pub entry_price: f64,
    pub current_price: f64,
    pub shares: f64,
    pub usdc_deployed: f64,
    pub opened_at: f64,
    pub triggered_by: String,
    pub triggered_by_address: String,
}

impl MirrorPosition {
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
            "outcome": self.outcome,
            "entry_price": round4(self.entry_price),
            "current_price": round4(self.current_price),
            "shares": round4(self.shares),
            "usdc_deployed": round2(self.usdc_deployed),
            "unrealized_pnl": round4(self.unrealized_pnl()),
            "unrealized_pnl_pct": round2(self.unrealized_pnl_pct()),
            "opened_at": self.opened_at,
            "age_s": self.age_s().round(),
            "triggered_by": self.triggered_by,
            "triggered_by_address": self.triggered_by_address,
        })
    }
}

/// A trade buffered because all slots were occupied (or balance ran dry).
#[derive(Debug, Clone)]
pub struct QueuedTrade {
    pub id: String,
    pub market_id: String,
    pub market_question: String,
    pub token_id: String,
    pub outcome: String,
    pub entry_price: f64,
    pub triggered_by: String,
    pub triggered_by_address: String,
    pub queued_at: f64,
}

impl QueuedTrade {
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "market_question": self.market_question,
            "token_id": self.token_id,
            "outcome": self.outcome,
            "entry_price": round4(self.entry_price),
            "triggered_by": self.triggered_by,
            "queued_at": self.queued_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedTrade {
    pub market_question: String,
    pub outcome: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub shares: f64,
    pub usdc_deployed: f64,
    pub pnl_usdc: f64,
    pub duration_s: f64,
    pub triggered_by: String,
    pub resolved_at: f64,
    pub result: TradeResultKind,
}

impl ResolvedTrade {
    pub fn to_json(&self) -> Value {
        json!({
            "market_question": self.market_question,
            "outcome": self.outcome,
            "entry_price": round4(self.entry_price),
            "exit_price": round4(self.exit_price),
            "shares": round4(self.shares),
            "usdc_deployed": round2(self.usdc_deployed),
            "pnl_usdc": round4(self.pnl_usdc),
            "duration_s": self.duration_s.round(),
            "triggered_by": self.triggered_by,
            "resolved_at": self.resolved_at,
            "result": self.result.as_str(),
        })
    }
}

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_classification() {
        assert_eq!(TradeResultKind::classify(5.0), TradeResultKind::Win);
        assert_eq!(TradeResultKind::classify(-5.0), TradeResultKind::Loss);
        assert_eq!(TradeResultKind::classify(0.005), TradeResultKind::Push);
        assert_eq!(TradeResultKind::classify(-0.005), TradeResultKind::Push);
        assert_eq!(TradeResultKind::classify(0.011), TradeResultKind::Win);
    }

    #[test]
    fn test_stale_after_five_failures() {
        let mut addr = WatchedAddress::new("0xabc".into(), "whale".into(), 30.0);
        assert_eq!(addr.health(), "ok");
        addr.consecutive_failures = 4;
        assert!(!addr.is_stale());
        addr.consecutive_failures = 5;
        assert!(addr.is_stale());
        assert_eq!(addr.health(), "stale");
    }

    #[test]
    fn test_rate_limited_health() {
        let mut addr = WatchedAddress::new("0xabc".into(), "whale".into(), 30.0);
        addr.rate_limited_until = Some(now_ts() + 60.0);
        assert_eq!(addr.health(), "rate_limited");
        addr.rate_limited_until = Some(now_ts() - 1.0);
        assert_eq!(addr.health(), "ok");
    }

    #[test]
    fn test_win_rate() {
        let stats = AddressStats {
            trades_mirrored: 10,
            wins: 3,
            losses: 1,
            total_pnl_usdc: 12.0,
        };
        assert!((stats.win_rate() - 75.0).abs() < 1e-9);
        assert_eq!(AddressStats::default().win_rate(), 0.0);
    }

    #[test]
    fn test_position_entry_price_fallbacks() {
        let pos: PositionData = serde_json::from_value(serde_json::json!({
            "asset": "tok", "curPrice": 0.42,
        }))
        .unwrap();
        assert_eq!(pos.entry_price(), 0.42);

        let pos: PositionData = serde_json::from_value(serde_json::json!({
            "asset": "tok", "price": 0.33,
        }))
        .unwrap();
        assert_eq!(pos.entry_price(), 0.33);

        let pos = PositionData::default();
        assert_eq!(pos.entry_price(), 0.5);
    }
}
