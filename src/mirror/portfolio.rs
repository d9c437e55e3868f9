use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::{now_ts, EventBus};
use crate::feeds::gamma::GammaClient;
use crate::models::market::GammaMarket;
use crate::models::mirror::{
    round2, round4, AddressRef, MirrorPosition, PositionData, QueuedTrade, ResolvedTrade,
    TradeResultKind,
};
use crate::monitor::truncate;

pub const SLOTS: usize = 40;
pub const SLOT_SIZE_USDC: f64 = 500.0;
pub const RESOLVED_CAP: usize = 50;

/// Token-id batch size for bulk price refreshes (URL length bound).
const PRICE_BATCH: usize = 20;

struct PortfolioState {
    balance: f64,
    realized_pnl: f64,
    positions: HashMap<String, MirrorPosition>,
    queue: VecDeque<QueuedTrade>,
    resolved: VecDeque<ResolvedTrade>,
}

/// Forty-slot virtual portfolio mirroring watched wallets. Every slot is a
/// fixed USDC allocation; trades arriving with all slots occupied wait in a
/// FIFO queue drained as slots free up. All mutation is serialized behind
/// one mutex; price refresh I/O happens outside it.
pub struct MirrorPortfolio {
    bus: Arc<EventBus>,
    starting_balance: f64,
    state: Mutex<PortfolioState>,
}

impl MirrorPortfolio {
    pub fn new(bus: Arc<EventBus>, starting_balance: f64) -> Self {
        Self {
            bus,
            starting_balance,
            state: Mutex::new(PortfolioState {
                balance: starting_balance,
                realized_pnl: 0.0,
                positions: HashMap::new(),
                queue: VecDeque::new(),
                resolved: VecDeque::new(),
            }),
        }
    }

    /// Clear all portfolio state back to the starting balance.
    pub async fn reset(&self) {
        {
            let mut s = self.state.lock().await;
            s.balance = self.starting_balance;
            s.realized_pnl = 0.0;
            s.positions.clear();
            s.queue.clear();
            s.resolved.clear();
        }
        self.emit_overview().await;
        self.emit_positions().await;
        self.emit_queue().await;
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Open a mirrored position, or queue the trade when no slot (or cash)
    /// is free. Duplicate token ids — open or queued — are dropped.
    pub async fn open_position(
        &self,
        source: &AddressRef,
        pos_data: &PositionData,
    ) -> Option<MirrorPosition> {
        let token_id = pos_data.token_id();
        if token_id.is_empty() {
            warn!("open_position called with no token_id in position data");
            return None;
        }
        let entry_price = pos_data.entry_price();

        let (opened, queued_len) = {
            let mut s = self.state.lock().await;
            if s.positions.contains_key(token_id)
                || s.queue.iter().any(|q| q.token_id == token_id)
            {
                return None;
            }

            if s.positions.len() >= SLOTS || s.balance < SLOT_SIZE_USDC {
                s.queue.push_back(QueuedTrade {
                    id: short_id(),
                    market_id: pos_data.condition_id.clone(),
                    market_question: truncate(pos_data.title_or_unknown(), 100).to_string(),
                    token_id: token_id.to_string(),
                    outcome: default_outcome(&pos_data.outcome),
                    entry_price,
                    triggered_by: source.nickname.clone(),
                    triggered_by_address: source.address.clone(),
                    queued_at: now_ts(),
                });
                (None, Some(s.queue.len()))
            } else {
                let position = build_position(source, pos_data, token_id, entry_price);
                s.positions.insert(token_id.to_string(), position.clone());
                s.balance -= SLOT_SIZE_USDC;
                (Some(position), None)
            }
        };

        if let Some(len) = queued_len {
            info!(
                "[{}] Queued trade — {} (queue size: {len})",
                source.nickname,
                truncate(pos_data.title_or_unknown(), 50)
            );
            self.emit_queue().await;
            return None;
        }

        let position = opened?;
        let slots_used = self.state.lock().await.positions.len();
        info!(
            "[{}] Opened position — {} @ {:.3}  (slots: {slots_used}/{SLOTS})",
            source.nickname,
            truncate(&position.market_question, 50),
            entry_price
        );
        self.bus
            .publish("mirror_position_opened", position.to_json());
        self.emit_positions().await;
        self.emit_overview().await;
        Some(position)
    }

    /// Close the open position matching this token id, credit the slot plus
    /// P&L back to the balance, then drain the queue into freed slots.
    /// No-op when the token is not held.
    pub async fn close_position_by_token(
        &self,
        source: &AddressRef,
        pos_data: &PositionData,
    ) -> Option<ResolvedTrade> {
        let token_id = pos_data.token_id();

        let resolved = {
            let mut s = self.state.lock().await;
            let position = s.positions.remove(token_id)?;

            let exit_price = pos_data
                .cur_price
                .or(pos_data.price)
                .unwrap_or(position.entry_price);
            let pnl = (exit_price - position.entry_price) * position.shares;
            let result = TradeResultKind::classify(pnl);

            let resolved = ResolvedTrade {
                market_question: position.market_question.clone(),
                outcome: position.outcome.clone(),
                entry_price: position.entry_price,
                exit_price,
                shares: position.shares,
                usdc_deployed: position.usdc_deployed,
                pnl_usdc: round4(pnl),
                duration_s: now_ts() - position.opened_at,
                triggered_by: position.triggered_by.clone(),
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
            "[{}] Closed {} — {}  pnl: {:+.2} USDC",
            source.nickname,
            truncate(&resolved.market_question, 40),
            resolved.result.as_str(),
            resolved.pnl_usdc
        );

        self.bus
            .publish("mirror_position_closed", resolved.to_json());
        self.emit_positions().await;
        self.emit_overview().await;
        self.drain_queue().await;
        Some(resolved)
    }

    /// Promote queued trades into freed slots while slots and balance allow.
    async fn drain_queue(&self) {
        let mut promoted: Vec<MirrorPosition> = Vec::new();
        {
            let mut s = self.state.lock().await;
            while !s.queue.is_empty()
                && s.positions.len() < SLOTS
                && s.balance >= SLOT_SIZE_USDC
            {
                let qt = match s.queue.pop_front() {
                    Some(qt) => qt,
                    None => break,
                };
                let source = AddressRef {
                    address: qt.triggered_by_address.clone(),
                    nickname: qt.triggered_by.clone(),
                };
                let pos_data = PositionData {
                    asset: qt.token_id.clone(),
                    condition_id: qt.market_id.clone(),
                    title: qt.market_question.clone(),
                    outcome: qt.outcome.clone(),
                    cur_price: Some(qt.entry_price),
                    price: None,
                    size: None,
                };
                let position = build_position(&source, &pos_data, &qt.token_id, qt.entry_price);
                s.positions.insert(qt.token_id.clone(), position.clone());
                s.balance -= SLOT_SIZE_USDC;
                info!(
                    "Dequeued → opened {} @ {:.3}  (queue remaining: {})",
                    truncate(&position.market_question, 50),
                    qt.entry_price,
                    s.queue.len()
                );
                promoted.push(position);
            }
        }

        for position in &promoted {
            self.bus
                .publish("mirror_position_opened", position.to_json());
        }
        self.emit_queue().await;
        self.emit_positions().await;
        self.emit_overview().await;
    }

    /// Refresh `current_price` on all open positions in batches of 20 token
    /// ids per Gamma call. No-op when nothing is open.
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
                apply_market_prices(&mut s.positions, market);
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
            "queue_size": s.queue.len(),
            "total_deployed": round2(total_deployed),
        })
    }

    pub async fn positions(&self) -> Vec<Value> {
        let s = self.state.lock().await;
        s.positions.values().map(|p| p.to_json()).collect()
    }

    /// Open-position titles with token ids and prices, for the datafeed
    /// matcher's reference set.
    pub async fn position_titles(&self) -> Vec<(String, String, f64)> {
        let s = self.state.lock().await;
        s.positions
            .values()
            .map(|p| (p.market_question.clone(), p.token_id.clone(), p.current_price))
            .collect()
    }

    pub async fn queue(&self) -> Vec<Value> {
        let s = self.state.lock().await;
        s.queue.iter().map(|q| q.to_json()).collect()
    }

    pub async fn resolved(&self, limit: usize) -> Vec<Value> {
        let s = self.state.lock().await;
        s.resolved.iter().take(limit).map(|r| r.to_json()).collect()
    }

    pub async fn open_count(&self) -> usize {
        self.state.lock().await.positions.len()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn balance(&self) -> f64 {
        self.state.lock().await.balance
    }

    pub async fn realized_pnl(&self) -> f64 {
        self.state.lock().await.realized_pnl
    }

    // ── Emitters ──────────────────────────────────────────────────────────

    async fn emit_overview(&self) {
        let overview = self.overview().await;
        self.bus.publish("mirror_overview", overview);
    }

    async fn emit_positions(&self) {
        let positions = self.positions().await;
        self.bus
            .publish("mirror_positions", json!({ "positions": positions }));
    }

    async fn emit_queue(&self) {
        let queue = self.queue().await;
        self.bus.publish("mirror_queue", json!({ "queue": queue }));
    }
}

fn build_position(
    source: &AddressRef,
    pos_data: &PositionData,
    token_id: &str,
    entry_price: f64,
) -> MirrorPosition {
    let shares = if entry_price > 0.0 {
        SLOT_SIZE_USDC / entry_price
    } else {
        0.0
    };
    MirrorPosition {
        id: short_id(),
        market_id: pos_data.condition_id.clone(),
        market_question: truncate(pos_data.title_or_unknown(), 100).to_string(),
        token_id: token_id.to_string(),
        outcome: default_outcome(&pos_data.outcome),
        entry_price,
        current_price: entry_price,
        shares: round4(shares),
        usdc_deployed: SLOT_SIZE_USDC,
        opened_at: now_ts(),
        triggered_by: source.nickname.clone(),
        triggered_by_address: source.address.clone(),
    }
}

/// Update any held positions matching this market's token ids with its
/// best ask (falling back to best bid).
fn apply_market_prices(positions: &mut HashMap<String, MirrorPosition>, market: &GammaMarket) {
    let price = match market.best_ask.or(market.best_bid) {
        Some(p) => p,
        None => return,
    };
    for tid in market.token_id_list() {
        if let Some(pos) = positions.get_mut(&tid) {
            pos.current_price = price;
        }
    }
}

fn default_outcome(outcome: &str) -> String {
    if outcome.is_empty() {
        "Yes".to_string()
    } else {
        outcome.to_string()
    }
}

fn short_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portfolio() -> MirrorPortfolio {
        MirrorPortfolio::new(Arc::new(EventBus::new()), 20_000.0)
    }

    fn source() -> AddressRef {
        AddressRef {
            address: "0xwhale".into(),
            nickname: "whale".into(),
        }
    }

    fn pos(token: &str, price: f64) -> PositionData {
        PositionData {
            asset: token.into(),
            condition_id: format!("cond-{token}"),
            title: format!("Market {token}"),
            outcome: "Yes".into(),
            cur_price: Some(price),
            price: None,
            size: None,
        }
    }

    #[tokio::test]
    async fn test_open_and_close_at_entry_is_neutral() {
        let p = portfolio();
        p.open_position(&source(), &pos("tok1", 0.50)).await.unwrap();
        assert_eq!(p.balance().await, 20_000.0 - SLOT_SIZE_USDC);

        let resolved = p
            .close_position_by_token(&source(), &pos("tok1", 0.50))
            .await
            .unwrap();
        assert_eq!(resolved.result, TradeResultKind::Push);
        assert_eq!(p.balance().await, 20_000.0);
        assert_eq!(p.realized_pnl().await, 0.0);
    }

    #[tokio::test]
    async fn test_duplicate_token_dropped() {
        let p = portfolio();
        assert!(p.open_position(&source(), &pos("tok1", 0.50)).await.is_some());
        assert!(p.open_position(&source(), &pos("tok1", 0.55)).await.is_none());
        assert_eq!(p.open_count().await, 1);
    }

    #[tokio::test]
    async fn test_overflow_queues_then_drains() {
        let p = portfolio();
        // Fill all 40 slots: exactly consumes the 20,000 balance.
        for i in 0..SLOTS {
            assert!(
                p.open_position(&source(), &pos(&format!("tok{i}"), 0.50))
                    .await
                    .is_some(),
                "slot {i} should open"
            );
        }
        assert_eq!(p.open_count().await, SLOTS);
        assert_eq!(p.balance().await, 0.0);

        // 41st goes to the queue.
        assert!(p.open_position(&source(), &pos("tok-extra", 0.40)).await.is_none());
        assert_eq!(p.queue_len().await, 1);

        // Closing any position at entry price frees a slot; the queued
        // trade fills it and the queue empties, slots stay full.
        p.close_position_by_token(&source(), &pos("tok7", 0.50))
            .await
            .unwrap();
        assert_eq!(p.queue_len().await, 0);
        assert_eq!(p.open_count().await, SLOTS);
        assert_eq!(p.balance().await, 0.0);
    }

    #[tokio::test]
    async fn test_close_unknown_token_is_noop() {
        let p = portfolio();
        assert!(p
            .close_position_by_token(&source(), &pos("ghost", 0.5))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_pnl_accounting() {
        let p = portfolio();
        p.open_position(&source(), &pos("tok1", 0.50)).await.unwrap();
        // 1000 shares at 0.50; exit at 0.60 → +100 USDC.
        let resolved = p
            .close_position_by_token(&source(), &pos("tok1", 0.60))
            .await
            .unwrap();
        assert_eq!(resolved.result, TradeResultKind::Win);
        assert!((resolved.pnl_usdc - 100.0).abs() < 1e-6);
        assert!((p.balance().await - 20_100.0).abs() < 1e-6);
        assert!((p.realized_pnl().await - 100.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_balance_invariant_holds() {
        let p = portfolio();
        for i in 0..10 {
            p.open_position(&source(), &pos(&format!("tok{i}"), 0.25 + i as f64 * 0.05))
                .await;
        }
        p.close_position_by_token(&source(), &pos("tok3", 0.90)).await;
        p.close_position_by_token(&source(), &pos("tok4", 0.10)).await;

        let balance = p.balance().await;
        let deployed = p.open_count().await as f64 * SLOT_SIZE_USDC;
        let realized = p.realized_pnl().await;
        assert!(balance >= 0.0);
        assert!(balance + deployed <= 20_000.0 + realized + 1e-6);
    }

    #[tokio::test]
    async fn test_resolved_history_capped() {
        let p = portfolio();
        for i in 0..(RESOLVED_CAP + 10) {
            let tok = format!("tok{i}");
            p.open_position(&source(), &pos(&tok, 0.50)).await;
            p.close_position_by_token(&source(), &pos(&tok, 0.50)).await;
        }
        assert_eq!(p.resolved(100).await.len(), RESOLVED_CAP);
    }
}
