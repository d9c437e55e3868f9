pub mod paper;

use crate::models::market::ArbOpportunity;

/// Outcome of a trade attempt. The aborted variants map one-to-one onto the
/// pre-trade gates; the failed variants only arise on the live path where a
/// FOK order can miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeOutcome {
    Success,
    AbortedRisk,
    AbortedBalance,
    AbortedLiquidity,
    AbortedSlippage,
    AbortedArbEvaporated,
    FailedYesNotFilled,
    FailedNoNotFilled,
    Error,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Success => "SUCCESS",
            TradeOutcome::AbortedRisk => "ABORTED_RISK",
            TradeOutcome::AbortedBalance => "ABORTED_BALANCE",
            TradeOutcome::AbortedLiquidity => "ABORTED_LIQUIDITY",
            TradeOutcome::AbortedSlippage => "ABORTED_SLIPPAGE",
            TradeOutcome::AbortedArbEvaporated => "ABORTED_ARB_EVAPORATED",
            TradeOutcome::FailedYesNotFilled => "FAILED_YES_NOT_FILLED",
            TradeOutcome::FailedNoNotFilled => "FAILED_NO_NOT_FILLED",
            TradeOutcome::Error => "ERROR",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TradeOutcome::Success)
    }
}

#[derive(Debug, Clone)]
pub struct TradeResult {
    pub outcome: TradeOutcome,
    pub reason: String,
    pub yes_fill_price: Option<f64>,
    pub no_fill_price: Option<f64>,
    pub profit_usdc: Option<f64>,
}

impl TradeResult {
    pub fn aborted(outcome: TradeOutcome, reason: String) -> Self {
        Self {
            outcome,
            reason,
            yes_fill_price: None,
            no_fill_price: None,
            profit_usdc: None,
        }
    }
}

/// The seam between opportunity detection and order placement. The paper
/// engine is the only implementation here; a live executor would run the
/// same pre-trade gates before submitting real FOK orders.
pub trait TradeEngine {
    fn execute(
        &self,
        opp: &ArbOpportunity,
    ) -> impl std::future::Future<Output = TradeResult> + Send;
}
