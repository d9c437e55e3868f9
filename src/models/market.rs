use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Yes => Side::No,
            Side::No => Side::Yes,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "Yes",
            Side::No => "No",
        }
    }
}

/// Prediction-market record as returned by the Gamma API. Fields vary by
/// endpoint and market age, so everything is optional and `clobTokenIds` /
/// `outcomes` / `outcomePrices` may arrive either as native JSON arrays or
/// as JSON-encoded strings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GammaMarket {
    pub id: Option<String>,
    pub slug: Option<String>,
    pub question: Option<String>,
    pub title: Option<String>,
    #[serde(rename = "conditionId", alias = "condition_id")]
    pub condition_id: Option<String>,
    pub active: Option<bool>,
    pub closed: Option<bool>,
    #[serde(rename = "bestAsk")]
    pub best_ask: Option<f64>,
    #[serde(rename = "bestBid")]
    pub best_bid: Option<f64>,
    pub tokens: Option<Vec<TokenInfo>>,
    #[serde(rename = "clobTokenIds")]
    pub clob_token_ids: Option<Value>,
    pub outcomes: Option<Value>,
    #[serde(rename = "outcomePrices")]
    pub outcome_prices: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenInfo {
    #[serde(alias = "tokenId", alias = "id")]
    pub token_id: Option<String>,
    pub outcome: Option<String>,
}

impl GammaMarket {
    pub fn condition_id(&self) -> &str {
        self.condition_id.as_deref().unwrap_or("unknown")
    }

    pub fn question(&self) -> &str {
        self.question
            .as_deref()
            .or(self.title.as_deref())
            .unwrap_or("Unknown market")
    }

    pub fn is_active(&self) -> bool {
        self.active.unwrap_or(true)
    }

    /// All CLOB token ids, in outcome order.
    pub fn token_id_list(&self) -> Vec<String> {
        decode_string_list(self.clob_token_ids.as_ref())
    }

    /// Published outcome price at `idx` (used to settle resolved markets).
    pub fn outcome_price(&self, idx: usize) -> Option<f64> {
        decode_string_list(self.outcome_prices.as_ref())
            .get(idx)
            .and_then(|s| s.parse::<f64>().ok())
    }

    /// Extract `(yes_token_id, no_token_id)`.
    ///
    /// Shapes handled, in order of preference:
    ///   1. inline `tokens` list with `{outcome, token_id}` entries
    ///      (case-insensitive match of yes/1 and no/0);
    ///   2. parallel `clobTokenIds` + `outcomes` arrays, each either a JSON
    ///      string or a native list;
    ///   3. positional fallback: element 0 is YES, element 1 is NO.
    pub fn extract_token_ids(&self) -> (String, String) {
        if let Some(tokens) = &self.tokens {
            if !tokens.is_empty() {
                let mut yes_id = String::new();
                let mut no_id = String::new();
                for t in tokens {
                    let outcome = t.outcome.as_deref().unwrap_or("").trim().to_lowercase();
                    let tid = t.token_id.clone().unwrap_or_default();
                    match outcome.as_str() {
                        "yes" | "1" => yes_id = tid,
                        "no" | "0" => no_id = tid,
                        _ => {}
                    }
                }
                return (yes_id, no_id);
            }
        }

        let ids = self.token_id_list();
        if ids.len() < 2 {
            return (String::new(), String::new());
        }
        let outcomes = decode_string_list(self.outcomes.as_ref());

        let mut yes_id = String::new();
        let mut no_id = String::new();
        for (i, outcome) in outcomes.iter().enumerate() {
            if i >= ids.len() {
                break;
            }
            match outcome.trim().to_lowercase().as_str() {
                "yes" | "1" => yes_id = ids[i].clone(),
                "no" | "0" => no_id = ids[i].clone(),
                _ => {}
            }
        }

        if yes_id.is_empty() {
            yes_id = ids[0].clone();
        }
        if no_id.is_empty() {
            no_id = ids[1].clone();
        }
        (yes_id, no_id)
    }
}

/// Decode a field that is either a JSON-encoded string (`"[\"a\",\"b\"]"`)
/// or a native array. Anything else decodes to empty.
fn decode_string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => serde_json::from_str::<Vec<Value>>(s)
            .map(|items| items.iter().map(value_to_string).collect())
            .unwrap_or_default(),
        Some(Value::Array(items)) => items.iter().map(value_to_string).collect(),
        _ => Vec::new(),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Raw order-book level from the CLOB API (prices and sizes are strings).
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    pub price: String,
    pub size: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookResponse {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

/// Parsed order book: asks ascending, bids descending by price.
#[derive(Debug, Clone, Default)]
pub struct OrderBook {
    pub asks: Vec<(f64, f64)>,
    pub bids: Vec<(f64, f64)>,
}

impl OrderBook {
    pub fn from_response(resp: &BookResponse) -> Self {
        let parse = |levels: &[BookLevel]| -> Vec<(f64, f64)> {
            levels
                .iter()
                .filter_map(|l| {
                    let price = l.price.parse::<f64>().ok()?;
                    let size = l.size.parse::<f64>().ok()?;
                    (price > 0.0 && size > 0.0).then_some((price, size))
                })
                .collect()
        };

        let mut asks = parse(&resp.asks);
        let mut bids = parse(&resp.bids);
        asks.sort_by(|a, b| a.0.total_cmp(&b.0));
        bids.sort_by(|a, b| b.0.total_cmp(&a.0));
        Self { asks, bids }
    }

    pub fn best_ask(&self) -> Option<f64> {
        self.asks.first().map(|(p, _)| *p)
    }

    pub fn best_bid(&self) -> Option<f64> {
        self.bids.first().map(|(p, _)| *p)
    }

    /// USDC value of ask levels priced at most `max_price`, stopping early
    /// once the sum reaches `target_usdc`.
    pub fn fillable_usdc(&self, max_price: f64, target_usdc: f64) -> f64 {
        let mut total = 0.0;
        for &(price, size) in &self.asks {
            if price > max_price {
                break;
            }
            total += price * size;
            if total >= target_usdc {
                return total;
            }
        }
        total
    }
}

/// A confirmed within-market arbitrage: buying both sides costs less than
/// the guaranteed 1.0 payout of the winning side.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArbOpportunity {
    pub market_id: String,
    pub market_question: String,
    pub yes_token_id: String,
    pub no_token_id: String,
    pub yes_ask: f64,
    pub no_ask: f64,
    pub combined_pct: f64,
    pub expected_profit_pct: f64,
    pub shares: f64,
    pub yes_cost_usdc: f64,
    pub no_cost_usdc: f64,
    pub estimated_profit_usdc: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_inline_tokens_list() {
        let market: GammaMarket = serde_json::from_value(json!({
            "conditionId": "0xabc",
            "tokens": [
                {"outcome": "Yes", "token_id": "yes-id"},
                {"outcome": "No", "token_id": "no-id"},
            ],
        }))
        .unwrap();
        assert_eq!(
            market.extract_token_ids(),
            ("yes-id".to_string(), "no-id".to_string())
        );
    }

    #[test]
    fn test_extract_parallel_arrays_json_encoded() {
        let market: GammaMarket = serde_json::from_value(json!({
            "clobTokenIds": "[\"id-a\", \"id-b\"]",
            "outcomes": "[\"No\", \"Yes\"]",
        }))
        .unwrap();
        // Outcomes are swapped relative to id order.
        assert_eq!(
            market.extract_token_ids(),
            ("id-b".to_string(), "id-a".to_string())
        );
    }

    #[test]
    fn test_extract_parallel_arrays_native() {
        let market: GammaMarket = serde_json::from_value(json!({
            "clobTokenIds": ["id-a", "id-b"],
            "outcomes": ["Yes", "No"],
        }))
        .unwrap();
        assert_eq!(
            market.extract_token_ids(),
            ("id-a".to_string(), "id-b".to_string())
        );
    }

    #[test]
    fn test_extract_positional_fallback() {
        let market: GammaMarket = serde_json::from_value(json!({
            "clobTokenIds": "[\"first\", \"second\"]",
            "outcomes": "[\"Over\", \"Under\"]",
        }))
        .unwrap();
        assert_eq!(
            market.extract_token_ids(),
            ("first".to_string(), "second".to_string())
        );
    }

    #[test]
    fn test_extract_missing_ids() {
        let market = GammaMarket::default();
        assert_eq!(market.extract_token_ids(), (String::new(), String::new()));
    }

    #[test]
    fn test_book_ordering_and_best() {
        let resp: BookResponse = serde_json::from_value(json!({
            "asks": [
                {"price": "0.55", "size": "100"},
                {"price": "0.52", "size": "50"},
            ],
            "bids": [
                {"price": "0.48", "size": "40"},
                {"price": "0.50", "size": "30"},
            ],
        }))
        .unwrap();
        let book = OrderBook::from_response(&resp);
        assert_eq!(book.best_ask(), Some(0.52));
        assert_eq!(book.best_bid(), Some(0.50));
        assert!(book.asks[0].0 < book.asks[1].0);
        assert!(book.bids[0].0 > book.bids[1].0);
    }

    #[test]
    fn test_fillable_liquidity_early_exit() {
        let resp: BookResponse = serde_json::from_value(json!({
            "asks": [
                {"price": "0.40", "size": "100"},
                {"price": "0.45", "size": "100"},
                {"price": "0.60", "size": "1000"},
            ],
            "bids": [],
        }))
        .unwrap();
        let book = OrderBook::from_response(&resp);
        // Only levels at or below 0.50 count: 40 + 45 = 85 USDC available.
        assert!((book.fillable_usdc(0.50, 500.0) - 85.0).abs() < 1e-9);
        // Early exit once the target is reached.
        assert!((book.fillable_usdc(0.50, 30.0) - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_outcome_price_parsing() {
        let market: GammaMarket = serde_json::from_value(json!({
            "outcomePrices": "[\"0.97\", \"0.03\"]",
        }))
        .unwrap();
        assert_eq!(market.outcome_price(0), Some(0.97));
        assert_eq!(market.outcome_price(1), Some(0.03));
        assert_eq!(market.outcome_price(2), None);
    }
}
