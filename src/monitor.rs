use futures_util::{stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info};

use crate::config::StrategyConfig;
use crate::events::EventBus;
use crate::feeds::gamma::GammaClient;
use crate::models::market::{ArbOpportunity, GammaMarket};
use crate::signals::arbitrage::find_arb_opportunity;

/// Candidates pass the Gamma pre-screen if their estimated combined ask is
/// below threshold + this buffer (the implied NO ask is only an estimate).
const PRESCREEN_BUFFER: f64 = 0.02;

/// Bound on concurrent order-book confirmations per scan.
const CONFIRM_CONCURRENCY: usize = 10;

/// Two-stage arbitrage scan over the sports-market universe.
///
/// Stage 1 pre-screens every market using prices already present in the
/// Gamma response (zero extra HTTP calls); stage 2 fetches real order books
/// for survivors concurrently and re-runs the kernel before anything is
/// forwarded to the trade engine.
pub struct MarketMonitor {
    client: Arc<GammaClient>,
    bus: Arc<EventBus>,
    strategy: StrategyConfig,
    tags: Vec<String>,
    opportunity_tx: mpsc::UnboundedSender<ArbOpportunity>,
    prescreen_threshold: f64,
}

impl MarketMonitor {
    pub fn new(
        client: Arc<GammaClient>,
        bus: Arc<EventBus>,
        strategy: StrategyConfig,
        tags: Vec<String>,
        opportunity_tx: mpsc::UnboundedSender<ArbOpportunity>,
    ) -> Self {
        let min_profit = strategy.min_profit_threshold_pct / 100.0;
        Self {
            client,
            bus,
            strategy,
            tags,
            opportunity_tx,
            prescreen_threshold: 1.0 - min_profit + PRESCREEN_BUFFER,
        }
    }

    /// Spawn the scan loop. Each scan is one-shot; the next waits the
    /// configured period after the previous completes, so overruns are
    /// tolerated rather than stacked.
    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        let interval = self.strategy.polling_interval_seconds;
        info!("Monitor started — polling every {interval}s");

        tokio::spawn(async move {
            loop {
                self.scan().await;
                tokio::select! {
                    _ = tokio::time::sleep(std::time::Duration::from_secs(interval)) => {}
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn scan(&self) {
        let t0 = Instant::now();
        let markets = self.client.sports_markets(&self.tags).await;
        info!("Fetched {} unique sports markets", markets.len());

        // Stage 1: pre-screen on prices already in hand.
        let candidates: Vec<GammaMarket> = markets
            .iter()
            .filter(|m| self.prescreen(m))
            .cloned()
            .collect();
        let scan_ms = t0.elapsed().as_millis() as u64;
        info!(
            "Pre-screen: {}/{} markets pass initial price estimate",
            candidates.len(),
            markets.len()
        );

        self.bus.publish(
            "scan",
            json!({
                "markets_total": markets.len(),
                "candidates": candidates.len(),
                "scan_ms": scan_ms,
            }),
        );
        if !candidates.is_empty() {
            self.bus.publish(
                "candidates",
                json!({
                    "markets": candidates.iter().map(|m| json!({
                        "question": truncate(m.question(), 80),
                        "combined_est": combined_estimate(m),
                    })).collect::<Vec<_>>(),
                }),
            );
        }

        // Stage 2: confirm with real order books, bounded concurrency.
        stream::iter(candidates)
            .map(|market| async move { self.check_market(market).await })
            .buffer_unordered(CONFIRM_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
    }

    /// Fast filter using the YES best ask plus the NO ask implied by the
    /// YES best bid (buying NO instead costs at most 1 - bestBid). Markets
    /// lacking price data pass by default and let the order book decide.
    fn prescreen(&self, market: &GammaMarket) -> bool {
        let (yes_ask, best_bid) = match (market.best_ask, market.best_bid) {
            (Some(a), Some(b)) => (a, b),
            _ => return true,
        };
        let implied_no_ask = 1.0 - best_bid;

        if !(0.0 < yes_ask && yes_ask < 1.0) || !(0.0 < implied_no_ask && implied_no_ask < 1.0) {
            return false;
        }

        let combined_est = yes_ask + implied_no_ask;
        debug!(
            "  [pre] {} | YES_ask={yes_ask:.4} impl_NO={implied_no_ask:.4} combined_est={combined_est:.4}",
            truncate(market.question(), 50)
        );
        combined_est < self.prescreen_threshold
    }

    /// Fetch real order books for one candidate and forward a confirmed
    /// opportunity. A failed fetch fails only this market for this cycle.
    async fn check_market(&self, market: GammaMarket) {
        let (yes_id, no_id) = market.extract_token_ids();
        if yes_id.is_empty() || no_id.is_empty() {
            return;
        }

        let yes_ask = self.client.best_ask(&yes_id).await;
        let no_ask = self.client.best_ask(&no_id).await;
        let (yes_ask, no_ask) = match (yes_ask, no_ask) {
            (Some(y), Some(n)) => (y, n),
            _ => return,
        };
        if !(0.0 < yes_ask && yes_ask < 1.0) || !(0.0 < no_ask && no_ask < 1.0) {
            return;
        }

        debug!(
            "  [book] {} | YES={yes_ask:.4} NO={no_ask:.4} combined={:.2}%",
            truncate(market.question(), 55),
            (yes_ask + no_ask) * 100.0
        );

        let opp = find_arb_opportunity(
            &market,
            yes_ask,
            no_ask,
            self.strategy.max_trade_size_usdc,
            self.strategy.max_risk_per_trade_usdc,
            self.strategy.min_profit_threshold_pct,
        );

        if let Some(opp) = opp {
            info!(
                "FOUND | combined={:.2}% | profit={:.2}% | est_profit={:.4} USDC | {}",
                opp.combined_pct,
                opp.expected_profit_pct,
                opp.estimated_profit_usdc,
                truncate(&opp.market_question, 70)
            );
            self.bus.publish(
                "opportunity",
                json!({
                    "question": truncate(&opp.market_question, 80),
                    "yes_ask": opp.yes_ask,
                    "no_ask": opp.no_ask,
                    "combined_pct": (opp.combined_pct * 1000.0).round() / 1000.0,
                    "profit_pct": (opp.expected_profit_pct * 1000.0).round() / 1000.0,
                    "est_profit_usdc": (opp.estimated_profit_usdc * 10_000.0).round() / 10_000.0,
                }),
            );
            if self.opportunity_tx.send(opp).is_err() {
                error!("Opportunity channel closed — trade engine gone");
            }
        }
    }
}

fn combined_estimate(market: &GammaMarket) -> f64 {
    let yes = market.best_ask.unwrap_or(0.0);
    let implied_no = 1.0 - market.best_bid.unwrap_or(1.0);
    ((yes + implied_no) * 10_000.0).round() / 10_000.0
}

pub fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StrategyConfig;
    use serde_json::json;

    fn monitor_with_threshold(min_profit_pct: f64) -> MarketMonitor {
        let (tx, _rx) = mpsc::unbounded_channel();
        let http = Arc::new(crate::feeds::http::HttpFetcher::new());
        MarketMonitor::new(
            Arc::new(GammaClient::new(http)),
            Arc::new(EventBus::new()),
            StrategyConfig {
                min_profit_threshold_pct: min_profit_pct,
                ..StrategyConfig::default()
            },
            vec!["Sports".to_string()],
            tx,
        )
    }

    fn market(best_ask: Option<f64>, best_bid: Option<f64>) -> GammaMarket {
        let mut v = json!({"conditionId": "c"});
        if let Some(a) = best_ask {
            v["bestAsk"] = json!(a);
        }
        if let Some(b) = best_bid {
            v["bestBid"] = json!(b);
        }
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_prescreen_passes_cheap_combined() {
        let m = monitor_with_threshold(1.0);
        // YES 0.45, implied NO = 1 - 0.52 = 0.48 → combined 0.93 < 1.01
        assert!(m.prescreen(&market(Some(0.45), Some(0.52))));
    }

    #[test]
    fn test_prescreen_rejects_fair_market() {
        let m = monitor_with_threshold(1.0);
        // YES 0.60, implied NO = 1 - 0.55 = 0.45 → combined 1.05
        assert!(!m.prescreen(&market(Some(0.60), Some(0.55))));
    }

    #[test]
    fn test_prescreen_passes_missing_prices() {
        let m = monitor_with_threshold(1.0);
        assert!(m.prescreen(&market(None, None)));
        assert!(m.prescreen(&market(Some(0.5), None)));
    }

    #[test]
    fn test_prescreen_rejects_degenerate_prices() {
        let m = monitor_with_threshold(1.0);
        assert!(!m.prescreen(&market(Some(0.0), Some(0.5))));
        assert!(!m.prescreen(&market(Some(0.5), Some(0.0))));
    }

    #[test]
    fn test_prescreen_buffer_applied() {
        // threshold = 1 - 0.01 + 0.02 = 1.01: combined_est 1.005 still passes.
        let m = monitor_with_threshold(1.0);
        assert!(m.prescreen(&market(Some(0.55), Some(0.545))));
    }

    #[test]
    fn test_truncate_char_boundary() {
        assert_eq!(truncate("hello world", 5), "hello");
        assert_eq!(truncate("short", 50), "short");
    }
}
