use crate::models::market::{ArbOpportunity, GammaMarket};

/// Detects within-market YES/NO arbitrage: when the best asks on both sides
/// sum below 1.0, buying equal shares of each guarantees a 1 USDC payout on
/// one side at settlement.
///
/// Pure computation — no I/O, deterministic for fixed inputs.
pub fn find_arb_opportunity(
    market: &GammaMarket,
    yes_ask: f64,
    no_ask: f64,
    max_trade_size_usdc: f64,
    max_risk_per_trade_usdc: f64,
    min_profit_pct: f64,
) -> Option<ArbOpportunity> {
    let combined = yes_ask + no_ask;

    // Fairly priced or overpriced.
    if combined >= 1.0 {
        return None;
    }

    // Profit per pair of shares = 1 - combined; as % of capital deployed:
    let profit_pct = (1.0 - combined) / combined * 100.0;
    if profit_pct < min_profit_pct {
        return None;
    }

    // Equal shares on both sides, capped per side and by total risk.
    let max_by_yes = max_trade_size_usdc / yes_ask;
    let max_by_no = max_trade_size_usdc / no_ask;
    let max_by_risk = max_risk_per_trade_usdc / combined;
    let shares = max_by_yes.min(max_by_no).min(max_by_risk);

    let yes_cost = shares * yes_ask;
    let no_cost = shares * no_ask;
    let profit = shares * (1.0 - combined);

    let (yes_id, no_id) = market.extract_token_ids();

    Some(ArbOpportunity {
        market_id: market.condition_id().to_string(),
        market_question: market.question().to_string(),
        yes_token_id: yes_id,
        no_token_id: no_id,
        yes_ask,
        no_ask,
        combined_pct: combined * 100.0,
        expected_profit_pct: profit_pct,
        shares,
        yes_cost_usdc: yes_cost,
        no_cost_usdc: no_cost,
        estimated_profit_usdc: profit,
    })
}
