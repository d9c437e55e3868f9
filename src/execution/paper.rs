use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::config::{PaperModeConfig, StrategyConfig};
use crate::events::EventBus;
use crate::execution::{TradeEngine, TradeOutcome, TradeResult};
use crate::feeds::gamma::GammaClient;
use crate::models::market::ArbOpportunity;
use crate::monitor::truncate;

pub const STATE_FILE: &str = "paper_state.json";

/// Virtual account state, persisted after every executed or aborted trade
/// so a restart resumes where the last run left off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperState {
    pub balance_usdc: f64,
    pub total_profit_usdc: f64,
    pub trades_executed: u64,
    pub trades_aborted: u64,
    pub opportunities_seen: u64,
}

impl PaperState {
    fn fresh(starting_balance: f64) -> Self {
        Self {
            balance_usdc: starting_balance,
            total_profit_usdc: 0.0,
            trades_executed: 0,
            trades_aborted: 0,
            opportunities_seen: 0,
        }
    }
}

/// Paper trading engine. Runs the same pre-trade gates as a live executor
/// (risk cap, balance, liquidity, slippage, arb-evaporated) against live
/// Polymarket prices, then simulates the fill instead of placing orders.
pub struct PaperTrader {
    client: Arc<GammaClient>,
    bus: Arc<EventBus>,
    max_trade: f64,
    max_risk: f64,
    slippage_pct: f64,
    min_liquidity: f64,
    state_path: PathBuf,
    state: Mutex<PaperState>,
}

impl PaperTrader {
    pub fn new(
        client: Arc<GammaClient>,
        bus: Arc<EventBus>,
        strategy: &StrategyConfig,
        paper: &PaperModeConfig,
        log_dir: &Path,
    ) -> Self {
        let state_path = log_dir.join(STATE_FILE);
        let state = Self::load_state(&state_path, paper.starting_balance_usdc);
        Self {
            client,
            bus,
            max_trade: strategy.max_trade_size_usdc,
            max_risk: strategy.max_risk_per_trade_usdc,
            slippage_pct: strategy.slippage_tolerance_pct,
            min_liquidity: strategy.min_liquidity_usdc,
            state_path,
            state: Mutex::new(state),
        }
    }

    fn load_state(path: &Path, starting_balance: f64) -> PaperState {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<PaperState>(&raw) {
                Ok(state) => {
                    info!(
                        "[PAPER] Resuming — balance={:.2} USDC | total_profit={:.4} USDC | trades={} | opportunities_seen={}",
                        state.balance_usdc,
                        state.total_profit_usdc,
                        state.trades_executed,
                        state.opportunities_seen
                    );
                    state
                }
                Err(e) => {
                    error!("[PAPER] State file unreadable ({e}) — starting fresh");
                    PaperState::fresh(starting_balance)
                }
            },
            Err(_) => {
                info!("[PAPER] Starting fresh — virtual balance={starting_balance:.2} USDC");
                PaperState::fresh(starting_balance)
            }
        }
    }

    /// Full rewrite of the state file. A failed write logs and keeps the
    /// in-memory state authoritative (at-least-once update semantics).
    fn save_state(&self, state: &PaperState) {
        if let Some(dir) = self.state_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(state) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.state_path, raw) {
                    error!("[PAPER] State write failed: {e}");
                }
            }
            Err(e) => error!("[PAPER] State serialization failed: {e}"),
        }
    }

    pub async fn snapshot(&self) -> PaperState {
        self.state.lock().await.clone()
    }

    pub async fn log_summary(&self) {
        let s = self.state.lock().await;
        info!(
            "[PAPER] Summary — balance={:.2} USDC | profit={:.4} USDC | trades={} | aborted={} | opps_seen={}",
            s.balance_usdc, s.total_profit_usdc, s.trades_executed, s.trades_aborted, s.opportunities_seen
        );
    }

    async fn abort(
        &self,
        outcome: TradeOutcome,
        reason: String,
        opp: &ArbOpportunity,
    ) -> TradeResult {
        let state = {
            let mut state = self.state.lock().await;
            state.trades_aborted += 1;
            self.save_state(&state);
            state.clone()
        };

        info!(
            "[PAPER] ABORTED [{}] | {} | {}",
            outcome.as_str(),
            truncate(&opp.market_question, 60),
            reason
        );
        self.publish_trade(&state, outcome, opp, None, None, None, Some(&reason));
        TradeResult::aborted(outcome, reason)
    }

    #[allow(clippy::too_many_arguments)]
    fn publish_trade(
        &self,
        state: &PaperState,
        outcome: TradeOutcome,
        opp: &ArbOpportunity,
        yes_fill: Option<f64>,
        no_fill: Option<f64>,
        profit: Option<f64>,
        reason: Option<&str>,
    ) {
        self.bus.publish(
            "trade",
            json!({
                "outcome": outcome.as_str(),
                "question": truncate(&opp.market_question, 80),
                "yes_fill": yes_fill.map(|v| (v * 10_000.0).round() / 10_000.0),
                "no_fill": no_fill.map(|v| (v * 10_000.0).round() / 10_000.0),
                "profit_usdc": profit.map(|v| (v * 10_000.0).round() / 10_000.0),
                "cumulative_profit": (state.total_profit_usdc * 10_000.0).round() / 10_000.0,
                "balance": (state.balance_usdc * 100.0).round() / 100.0,
                "reason": reason,
            }),
        );
        self.bus.publish("stats", serde_json::to_value(state).unwrap_or_default());
    }
}

impl TradeEngine for PaperTrader {
    async fn execute(&self, opp: &ArbOpportunity) -> TradeResult {
        {
            let mut state = self.state.lock().await;
            state.opportunities_seen += 1;
        }

        // 1. Risk cap.
        let total_cost = opp.yes_cost_usdc + opp.no_cost_usdc;
        if total_cost > self.max_risk {
            return self
                .abort(
                    TradeOutcome::AbortedRisk,
                    format!("Cost {total_cost:.2} USDC > max risk {:.2} USDC", self.max_risk),
                    opp,
                )
                .await;
        }

        // 2. Virtual balance.
        let balance = self.state.lock().await.balance_usdc;
        if balance < total_cost {
            return self
                .abort(
                    TradeOutcome::AbortedBalance,
                    format!("Paper balance {balance:.2} < cost {total_cost:.2} USDC"),
                    opp,
                )
                .await;
        }

        // 3. Per-side liquidity against the real order book.
        let yes_liq = self
            .client
            .fillable_liquidity(&opp.yes_token_id, opp.yes_ask, opp.yes_cost_usdc)
            .await;
        if yes_liq < self.min_liquidity {
            return self
                .abort(
                    TradeOutcome::AbortedLiquidity,
                    format!("YES liquidity {yes_liq:.2} < min {:.2} USDC", self.min_liquidity),
                    opp,
                )
                .await;
        }
        let no_liq = self
            .client
            .fillable_liquidity(&opp.no_token_id, opp.no_ask, opp.no_cost_usdc)
            .await;
        if no_liq < self.min_liquidity {
            return self
                .abort(
                    TradeOutcome::AbortedLiquidity,
                    format!("NO liquidity {no_liq:.2} < min {:.2} USDC", self.min_liquidity),
                    opp,
                )
                .await;
        }

        // 4. Slippage: re-fetch live prices and compare with what was seen.
        let live_yes = self.client.best_ask(&opp.yes_token_id).await;
        let live_no = self.client.best_ask(&opp.no_token_id).await;
        let (live_yes, live_no) = match (live_yes, live_no) {
            (Some(y), Some(n)) => (y, n),
            _ => {
                return self
                    .abort(
                        TradeOutcome::Error,
                        "Could not re-fetch live prices".to_string(),
                        opp,
                    )
                    .await;
            }
        };

        let yes_slip = (live_yes - opp.yes_ask).abs() / opp.yes_ask * 100.0;
        let no_slip = (live_no - opp.no_ask).abs() / opp.no_ask * 100.0;
        if yes_slip > self.slippage_pct {
            return self
                .abort(
                    TradeOutcome::AbortedSlippage,
                    format!("YES moved {yes_slip:.2}% (tolerance {}%)", self.slippage_pct),
                    opp,
                )
                .await;
        }
        if no_slip > self.slippage_pct {
            return self
                .abort(
                    TradeOutcome::AbortedSlippage,
                    format!("NO moved {no_slip:.2}% (tolerance {}%)", self.slippage_pct),
                    opp,
                )
                .await;
        }

        // 5. The arb must still exist at live prices.
        if live_yes + live_no >= 1.0 {
            return self
                .abort(
                    TradeOutcome::AbortedArbEvaporated,
                    format!("Arb gone: live combined = {:.2}%", (live_yes + live_no) * 100.0),
                    opp,
                )
                .await;
        }

        // 6. Simulate the fill at live prices.
        let shares = (self.max_trade / live_yes)
            .min(self.max_trade / live_no)
            .min(self.max_risk / (live_yes + live_no));
        let cost = shares * (live_yes + live_no);
        // One side always pays out 1 USDC/share at settlement.
        let profit = shares * (1.0 - live_yes - live_no);

        let state = {
            let mut state = self.state.lock().await;
            state.balance_usdc -= cost;
            state.balance_usdc += shares;
            state.total_profit_usdc += profit;
            state.trades_executed += 1;
            self.save_state(&state);
            state.clone()
        };

        info!(
            "[PAPER] SUCCESS | {} | YES@{live_yes:.4} NO@{live_no:.4} | shares={shares:.4} | cost={cost:.2} | profit={profit:.4} USDC | balance={:.2} | cumulative_profit={:.4}",
            truncate(&opp.market_question, 60),
            state.balance_usdc,
            state.total_profit_usdc
        );
        self.publish_trade(
            &state,
            TradeOutcome::Success,
            opp,
            Some(live_yes),
            Some(live_no),
            Some(profit),
            None,
        );

        TradeResult {
            outcome: TradeOutcome::Success,
            reason: "Simulated fill at live prices".to_string(),
            yes_fill_price: Some(live_yes),
            no_fill_price: Some(live_no),
            profit_usdc: Some(profit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PaperModeConfig, StrategyConfig};

    fn trader(dir: &Path) -> PaperTrader {
        let http = Arc::new(crate::feeds::http::HttpFetcher::new());
        PaperTrader::new(
            Arc::new(GammaClient::new(http)),
            Arc::new(EventBus::new()),
            &StrategyConfig::default(),
            &PaperModeConfig {
                enabled: true,
                starting_balance_usdc: 10_000.0,
            },
            dir,
        )
    }

    fn opportunity(yes_cost: f64, no_cost: f64) -> ArbOpportunity {
        ArbOpportunity {
            market_id: "c".into(),
            market_question: "test market".into(),
            yes_token_id: "y".into(),
            no_token_id: "n".into(),
            yes_ask: 0.48,
            no_ask: 0.49,
            combined_pct: 97.0,
            expected_profit_pct: 3.09,
            shares: 100.0,
            yes_cost_usdc: yes_cost,
            no_cost_usdc: no_cost,
            estimated_profit_usdc: 3.0,
        }
    }

    #[tokio::test]
    async fn test_risk_gate_aborts_first() {
        let dir = tempfile::tempdir().unwrap();
        let t = trader(dir.path());
        // Cost far beyond the default risk cap: no HTTP ever happens.
        let result = t.execute(&opportunity(10_000.0, 10_000.0)).await;
        assert_eq!(result.outcome, TradeOutcome::AbortedRisk);

        let state = t.snapshot().await;
        assert_eq!(state.trades_aborted, 1);
        assert_eq!(state.opportunities_seen, 1);
        assert_eq!(state.trades_executed, 0);
        assert_eq!(state.balance_usdc, 10_000.0);
    }

    #[tokio::test]
    async fn test_abort_persists_counters_only() {
        let dir = tempfile::tempdir().unwrap();
        let t = trader(dir.path());
        for _ in 0..3 {
            t.execute(&opportunity(10_000.0, 10_000.0)).await;
        }

        let raw = std::fs::read_to_string(dir.path().join(STATE_FILE)).unwrap();
        let on_disk: PaperState = serde_json::from_str(&raw).unwrap();
        assert_eq!(on_disk.trades_aborted, 3);
        assert_eq!(on_disk.opportunities_seen, 3);
        assert_eq!(on_disk.balance_usdc, 10_000.0);
        assert_eq!(on_disk.total_profit_usdc, 0.0);
    }

    #[tokio::test]
    async fn test_resume_from_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let saved = PaperState {
            balance_usdc: 12_345.0,
            total_profit_usdc: 42.0,
            trades_executed: 7,
            trades_aborted: 2,
            opportunities_seen: 30,
        };
        std::fs::write(
            dir.path().join(STATE_FILE),
            serde_json::to_string(&saved).unwrap(),
        )
        .unwrap();

        let t = trader(dir.path());
        let state = t.snapshot().await;
        assert_eq!(state.balance_usdc, 12_345.0);
        assert_eq!(state.trades_executed, 7);
    }

    #[tokio::test]
    async fn test_corrupt_state_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(STATE_FILE), "{not json").unwrap();
        let t = trader(dir.path());
        assert_eq!(t.snapshot().await.balance_usdc, 10_000.0);
    }
}
