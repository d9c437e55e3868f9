use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::events::{now_ts, EventBus};
use crate::feeds::gamma::GammaClient;
use crate::models::datafeed::{DataFeedPosition, DetectedOpportunity, ResolvedDataFeedTrade};
use crate::models::mirror::{round2, round4, TradeResultKind};
use crate::monitor::truncate;

pub const SLOTS: usize = 40;
pub const SLOT_SIZE_USDC: f64 = 500.0;
pub const RESOLVED_CAP: usize = 50;

const PRICE_BATCH: usize = 20;

struct PortfolioState {
    balance: f64,
    realized_pnl: f64,
    positions: HashMap<String, DataFeedPosition>,
    resolved: VecDeque<ResolvedDataFeedTrade>,
}

/// Forty-slot paper portfolio for datafeed opportunities. Unlike the
/// mirror portfolio there is no overflow queue: an opportunity arriving
/// with all slots taken is simply skipped (the edge is gone long before a
/// slot frees up).
pub struct DataFeedPortfolio {
    bus: Arc<EventBus>,
    starting_balance: f64,
    state: Mutex<PortfolioState>,
}

impl DataFeedPortfolio {
    pub fn new(bus: Arc<EventBus>, starting_balance: f64) -> Self {
        Self {
            bus,
            starting_balance,
            state: Mutex::new(PortfolioState {
                balance: starting_balance,
                realized_pnl: 0.0,
                positions: HashMap::new(),
                resolved: VecDeque::new(),
            }),
        }
    }

    pub async fn reset(&self) {
        {
            let mut s = self.state.lock().await;
            s.balance = self.starting_balance;
            s.realized_pnl = 0.0;
            s.positions.clear();
            s.resolved.clear();
        }
        self.emit_overview().await;
        self.emit_positions().await;
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Open a paper position for this opportunity, unless its token is
    /// already held or no slot/cash is free.
    pub async fn open_position(&self, opp: &DetectedOpportunity) -> Option<DataFeedPosition> {
        if opp.token_id.is_empty() {
            return None;
        }

        let position = {
            let mut s = self.state.lock().await;
            if s.positions.contains_key(&opp.token_id) {
                return None;
            }
            if s.positions.len() >= SLOTS || s.balance < SLOT_SIZE_USDC {
                info!(
                    "DataFeedPortfolio: slot/balance limit — skipping opportunity {}",
                    truncate(&opp.market_question, 50)
                );
                return None;
            }

            let entry_price = opp.market_price;
            let shares = if entry_price > 0.0 {
                SLOT_SIZE_USDC / entry_price
            } else {
                0.0
            };
            let position = DataFeedPosition {
                id: Uuid::new_v4().to_string()[..8].to_string(),
                market_question: opp.market_question.clone(),
                token_id: opp.token_id.clone(),
                outcome: opp.outcome,
                entry_price,
                current_price: entry_price,
                shares: round4(shares),
                usdc_deployed: SLOT_SIZE_USDC,
                opened_at: now_ts(),
                source_event: opp.source_event.clone(),
                fixture_id: opp.fixture_id,
            };
            s.positions.insert(opp.token_id.clone(), position.clone());
            s.balance -= SLOT_SIZE_USDC;

            info!(
                "DataFeedPortfolio: opened {} {} @ {:.3}  edge={:.1}%  (slots: {}/{SLOTS})",
                position.outcome.as_str(),
                truncate(&position.market_question, 50),
                entry_price,
                opp.edge_pct,
                s.positions.len()
            );
            position
        };

        self.bus
            .publish("datafeed_position_opened", position.to_json());
        self.emit_positions().await;
        self.emit_overview().await;
        Some(position)
    }

    pub async fn close_position_by_token(
        &self,
        token_id: &str,
        exit_price: f64,
    ) -> Option<ResolvedDataFeedTrade> {
        let resolved = {
            let mut s = self.state.lock().await;
            let position = s.positions.remove(token_id)?;

            let pnl = (exit_price - position.entry_price) * position.shares;
            let result = TradeResultKind::classify(pnl);
            let resolved = ResolvedDataFeedTrade {
                market_question: position.market_question.clone(),
                outcome: position.outcome,
                entry_price: position.entry_price,
                exit_price,
                shares: position.shares,
                usdc_deployed: position.usdc_deployed,
                pnl_usdc: round4(pnl),
                duration_s: now_ts() - position.opened_at,
                source_event: position.source_event.clone(),
                resolved_at: now_ts(),
                result,
            };

            s.balance += SLOT_SIZE_USDC + pnl;
            s.realized_pnl += pnl;
            s.resolved.push_front(resolved.clone());
            s.resolved.truncate(RESOLVED_CAP);
            resolved
        };

        info!(
            "DataFeedPortfolio: closed {} — {}  pnl: {:+.2} USDC",
            truncate(&resolved.market_question, 40),
            resolved.result.as_str(),
            resolved.pnl_usdc
        );

        self.bus
            .publish("datafeed_position_closed", resolved.to_json());
        self.emit_positions().await;
        self.emit_overview().await;
        Some(resolved)
    }

    /// Close any open position whose market has gone inactive, at the
    /// published outcome price.
    pub async fn close_resolved_markets(&self, client: &GammaClient) {
        let token_ids: Vec<String> = {
            let s = self.state.lock().await;
            s.positions.keys().cloned().collect()
        };
        if token_ids.is_empty() {
            return;
        }

        let mut to_close: Vec<(String, f64)> = Vec::new();
        for token_id in token_ids {
            let markets = client.markets_by_token_ids(&[token_id.clone()]).await;
            let Some(market) = markets.first() else {
                continue;
            };
            if !market.is_active() {
                let exit_price = market.outcome_price(0).unwrap_or(0.5);
                to_close.push((token_id, exit_price));
            }
        }

        for (token_id, exit_price) in to_close {
            self.close_position_by_token(&token_id, exit_price).await;
        }
    }

    /// Refresh `current_price` on open positions, batched by 20 token ids.
    pub async fn update_prices(&self, client: &GammaClient) {
        let token_ids: Vec<String> = {
            let s = self.state.lock().await;
            s.positions.keys().cloned().collect()
        };
        if token_ids.is_empty() {
            return;
        }

        for batch in token_ids.chunks(PRICE_BATCH) {
            let markets = client.markets_by_token_ids(batch).await;
            if markets.is_empty() {
                continue;
            }
            let mut s = self.state.lock().await;
            for market in &markets {
                let price = match market.best_ask.or(market.best_bid) {
                    Some(p) => p,
                    None => continue,
                };
                for tid in market.token_id_list() {
                    if let Some(pos) = s.positions.get_mut(&tid) {
                        pos.current_price = price;
                    }
                }
            }
        }

        self.emit_positions().await;
        self.emit_overview().await;
    }

    // ── Getters ───────────────────────────────────────────────────────────

    pub async fn overview(&self) -> Value {
        let s = self.state.lock().await;
        let total_deployed = s.positions.len() as f64 * SLOT_SIZE_USDC;
        let unrealized: f64 = s.positions.values().map(|p| p.unrealized_pnl()).sum();
        json!({
            "balance_usdc": round2(s.balance),
            "realized_pnl": round4(s.realized_pnl),
            "unrealized_pnl": round4(unrealized),
            "total_pnl": round4(s.realized_pnl + unrealized),
            "slots_used": s.positions.len(),
            "slots_total": SLOTS,
            "total_deployed": round2(total_deployed),
        })
    }

    pub async fn positions(&self) -> Vec<Value> {
        let s = self.state.lock().await;
        s.positions.values().map(|p| p.to_json()).collect()
    }

    pub async fn resolved(&self, limit: usize) -> Vec<Value> {
        let s = self.state.lock().await;
        s.resolved.iter().take(limit).map(|r| r.to_json()).collect()
    }

    pub async fn open_count(&self) -> usize {
        self.state.lock().await.positions.len()
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    pub async fn realized_pnl(&self) -> f64 {
        self.state.lock().await.realized_pnl
    }

    pub async fn holds_token(&self, token_id: &str) -> bool {
        self.state.lock().await.positions.contains_key(token_id)
    }

    // ── Emitters ──────────────────────────────────────────────────────────

    async fn emit_overview(&self) {
        let overview = self.overview().await;
        self.bus.publish("datafeed_overview", overview);
    }

    async fn emit_positions(&self) {
        let positions = self.positions().await;
        self.bus
            .publish("datafeed_positions", json!({ "positions": positions }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::datafeed::MarketKind;
    use crate::models::market::Side;

    fn portfolio() -> DataFeedPortfolio {
        DataFeedPortfolio::new(Arc::new(EventBus::new()), 20_000.0)
    }

    fn opp(token: &str, price: f64) -> DetectedOpportunity {
        DetectedOpportunity {
            fixture_id: 1,
            market_id: "m".into(),
            market_question: format!("Market {token}"),
            token_id: token.into(),
            outcome: Side::Yes,
            fair_value: 0.7,
            market_price: price,
            edge_pct: 10.0,
            source_event: "goal 1-0 min 20".into(),
            detected_at: now_ts(),
            market_kind: MarketKind::GameWinner,
            ou_line: None,
        }
    }

    #[tokio::test]
    async fn test_open_dedup_and_slot_limit() {
        let p = portfolio();
        assert!(p.open_position(&opp("tok1", 0.5)).await.is_some());
        assert!(p.open_position(&opp("tok1", 0.5)).await.is_none());

        for i in 2..=SLOTS {
            assert!(p.open_position(&opp(&format!("tok{i}"), 0.5)).await.is_some());
        }
        // Slots exhausted: skipped, not queued.
        assert!(p.open_position(&opp("tok-over", 0.5)).await.is_none());
        assert_eq!(p.open_count().await, SLOTS);
    }

    #[tokio::test]
    async fn test_close_round_trip_neutral() {
        let p = portfolio();
        p.open_position(&opp("tok1", 0.40)).await.unwrap();
        let resolved = p.close_position_by_token("tok1", 0.40).await.unwrap();
        assert_eq!(resolved.result, TradeResultKind::Push);
        assert!((p.balance().await - 20_000.0).abs() < 1e-9);
        assert_eq!(p.realized_pnl().await, 0.0);
    }

    #[tokio::test]
    async fn test_close_with_profit() {
        let p = portfolio();
        p.open_position(&opp("tok1", 0.25)).await.unwrap();
        // 2000 shares; exit at 1.0 (market resolved Yes) → +1500.
        let resolved = p.close_position_by_token("tok1", 1.0).await.unwrap();
        assert_eq!(resolved.result, TradeResultKind::Win);
        assert!((resolved.pnl_usdc - 1500.0).abs() < 1e-6);
        assert!((p.balance().await - 21_500.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_close_unknown_is_noop() {
        let p = portfolio();
        assert!(p.close_position_by_token("ghost", 0.5).await.is_none());
    }
}
