use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::events::now_ts;
use crate::feeds::http::{FetchError, HttpFetcher};

pub const COINBASE_API: &str = "https://api.exchange.coinbase.com";
pub const KRAKEN_API: &str = "https://api.kraken.com";

/// Kraken's legacy asset codes, normalized to common symbols.
pub const KRAKEN_RENAMES: &[(&str, &str)] = &[("XBT", "BTC"), ("XDG", "DOGE")];

/// Default public taker/maker fee tiers.
pub const COINBASE_FEES: FeeSchedule = FeeSchedule {
    taker: 0.006,
    maker: 0.004,
};
pub const KRAKEN_FEES: FeeSchedule = FeeSchedule {
    taker: 0.0026,
    maker: 0.0016,
};

const TIMEOUT: Duration = Duration::from_secs(8);

#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    pub taker: f64,
    pub maker: f64,
}

#[derive(Debug, Clone)]
pub struct MarketMeta {
    pub symbol: String,
    pub active: bool,
    pub spot: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Ticker {
    /// 24h volume in quote currency (USD terms for */USD pairs).
    pub quote_volume: f64,
}

/// Depth-N order book snapshot with its observation timestamp.
#[derive(Debug, Clone, Default)]
pub struct RawBook {
    pub bids: Vec<(f64, f64)>,
    pub asks: Vec<(f64, f64)>,
    pub timestamp_s: f64,
}

/// A venue the scanner can trade on paper. Both implementations speak the
/// exchange's public REST API through the shared HTTP pool; enum dispatch
/// keeps the scan loop free of trait-object plumbing.
pub enum ExchangeClient {
    Coinbase(CoinbaseClient),
    Kraken(KrakenClient),
}

impl ExchangeClient {
    pub fn coinbase(http: Arc<HttpFetcher>, fees: FeeSchedule) -> Self {
        ExchangeClient::Coinbase(CoinbaseClient {
            http,
            fees,
            host: COINBASE_API.to_string(),
        })
    }

    pub fn kraken(http: Arc<HttpFetcher>, fees: FeeSchedule) -> Self {
        ExchangeClient::Kraken(KrakenClient {
            http,
            fees,
            host: KRAKEN_API.to_string(),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExchangeClient::Coinbase(_) => "coinbase",
            ExchangeClient::Kraken(_) => "kraken",
        }
    }

    pub fn fees(&self) -> FeeSchedule {
        match self {
            ExchangeClient::Coinbase(c) => c.fees,
            ExchangeClient::Kraken(k) => k.fees,
        }
    }

    /// Normalize a venue symbol to the common form used for pairing
    /// (Kraken renames XBT→BTC and XDG→DOGE; Coinbase is already common).
    pub fn normalize_symbol(&self, symbol: &str) -> String {
        match self {
            ExchangeClient::Coinbase(_) => symbol.to_string(),
            ExchangeClient::Kraken(_) => {
                let mut norm = symbol.to_string();
                for (old, new) in KRAKEN_RENAMES {
                    norm = norm.replace(old, new);
                }
                norm
            }
        }
    }

    pub async fn load_markets(&self) -> Result<Vec<MarketMeta>, FetchError> {
        match self {
            ExchangeClient::Coinbase(c) => c.load_markets().await,
            ExchangeClient::Kraken(k) => k.load_markets().await,
        }
    }

    /// Bulk 24h tickers keyed by the venue's own symbol.
    pub async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>, FetchError> {
        match self {
            ExchangeClient::Coinbase(c) => c.fetch_tickers().await,
            ExchangeClient::Kraken(k) => k.fetch_tickers().await,
        }
    }

    pub async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<RawBook, FetchError> {
        match self {
            ExchangeClient::Coinbase(c) => c.fetch_order_book(symbol, depth).await,
            ExchangeClient::Kraken(k) => k.fetch_order_book(symbol, depth).await,
        }
    }
}

// ── Coinbase Exchange ─────────────────────────────────────────────────────

pub struct CoinbaseClient {
    http: Arc<HttpFetcher>,
    fees: FeeSchedule,
    host: String,
}

impl CoinbaseClient {
    /// Product ids are `BASE-QUOTE`; the common form is `BASE/QUOTE`.
    fn product_id(symbol: &str) -> String {
        symbol.replace('/', "-")
    }

    async fn load_markets(&self) -> Result<Vec<MarketMeta>, FetchError> {
        let value = self
            .http
            .get_json(&format!("{}/products", self.host), &[], TIMEOUT)
            .await?;
        let products = value.as_array().cloned().unwrap_or_default();
        Ok(products
            .iter()
            .filter_map(|p| {
                let id = p.get("id").and_then(Value::as_str)?;
                let status = p.get("status").and_then(Value::as_str).unwrap_or("");
                let disabled = p
                    .get("trading_disabled")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some(MarketMeta {
                    symbol: id.replace('-', "/"),
                    active: status == "online" && !disabled,
                    // The Exchange API lists spot products only.
                    spot: true,
                })
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>, FetchError> {
        // One call for every product's 24h stats:
        // { "BTC-USD": { "stats_24hour": { "volume": "...", "last": "..." } }, ... }
        let value = self
            .http
            .get_json(&format!("{}/products/stats", self.host), &[], TIMEOUT)
            .await?;
        let map = match value {
            Value::Object(map) => map,
            _ => return Ok(HashMap::new()),
        };
        let mut tickers = HashMap::new();
        for (product_id, stats) in map {
            let day = stats.get("stats_24hour").unwrap_or(&stats);
            let volume = field_f64(day, "volume");
            let last = field_f64(day, "last");
            tickers.insert(
                product_id.replace('-', "/"),
                Ticker {
                    quote_volume: volume * last,
                },
            );
        }
        Ok(tickers)
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<RawBook, FetchError> {
        let url = format!("{}/products/{}/book", self.host, Self::product_id(symbol));
        let value = self
            .http
            .get_json(&url, &[("level", "2".to_string())], TIMEOUT)
            .await?;
        // Levels are [price, size, num_orders] with string price/size.
        let parse_side = |key: &str| -> Vec<(f64, f64)> {
            value
                .get(key)
                .and_then(Value::as_array)
                .map(|levels| {
                    levels
                        .iter()
                        .take(depth)
                        .filter_map(level_price_size)
                        .collect()
                })
                .unwrap_or_default()
        };
        Ok(RawBook {
            bids: parse_side("bids"),
            asks: parse_side("asks"),
            timestamp_s: now_ts(),
        })
    }
}

// ── Kraken ────────────────────────────────────────────────────────────────

pub struct KrakenClient {
    http: Arc<HttpFetcher>,
    fees: FeeSchedule,
    host: String,
}

impl KrakenClient {
    /// Unwrap Kraken's `{error: [...], result: {...}}` envelope.
    fn unwrap_result(value: Value) -> Result<Value, FetchError> {
        if let Some(errors) = value.get("error").and_then(Value::as_array) {
            if !errors.is_empty() {
                let msg = errors
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; ");
                // EGeneral:Too many requests comes through the body, not 429.
                if msg.contains("Too many requests") {
                    return Err(FetchError::RateLimited);
                }
                return Err(FetchError::Transient(msg));
            }
        }
        value
            .get("result")
            .cloned()
            .ok_or_else(|| FetchError::Transient("missing result".to_string()))
    }

    async fn load_markets(&self) -> Result<Vec<MarketMeta>, FetchError> {
        let value = self
            .http
            .get_json(&format!("{}/0/public/AssetPairs", self.host), &[], TIMEOUT)
            .await?;
        let result = Self::unwrap_result(value)?;
        let map = match result {
            Value::Object(map) => map,
            _ => return Ok(Vec::new()),
        };
        Ok(map
            .values()
            .filter_map(|pair| {
                // wsname is the `BASE/QUOTE` form (XBT/USD etc.).
                let wsname = pair.get("wsname").and_then(Value::as_str)?;
                let status = pair.get("status").and_then(Value::as_str).unwrap_or("online");
                Some(MarketMeta {
                    symbol: wsname.to_string(),
                    active: status == "online",
                    spot: true,
                })
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>, FetchError> {
        // Ticker without a pair param returns all tradeable pairs.
        let value = self
            .http
            .get_json(&format!("{}/0/public/Ticker", self.host), &[], TIMEOUT)
            .await?;
        let result = Self::unwrap_result(value)?;
        let map = match result {
            Value::Object(map) => map,
            _ => return Ok(HashMap::new()),
        };
        let mut tickers = HashMap::new();
        for (pair, tick) in map {
            // v = [today, last24h] base volume, c = [last price, lot].
            let vol24 = tick
                .pointer("/v/1")
                .map(|v| value_f64(v))
                .unwrap_or(0.0);
            let last = tick
                .pointer("/c/0")
                .map(|v| value_f64(v))
                .unwrap_or(0.0);
            tickers.insert(
                pair,
                Ticker {
                    quote_volume: vol24 * last,
                },
            );
        }
        Ok(tickers)
    }

    async fn fetch_order_book(
        &self,
        symbol: &str,
        depth: usize,
    ) -> Result<RawBook, FetchError> {
        // Depth accepts the wsname-style pair with the slash removed.
        let pair = symbol.replace('/', "");
        let params = [
            ("pair", pair.clone()),
            ("count", depth.to_string()),
        ];
        let value = self
            .http
            .get_json(&format!("{}/0/public/Depth", self.host), &params, TIMEOUT)
            .await?;
        let result = Self::unwrap_result(value)?;
        let book = match result {
            // Result is keyed by Kraken's internal pair name; take the
            // first (only) entry.
            Value::Object(map) => match map.into_iter().next() {
                Some((_, book)) => book,
                None => return Ok(RawBook::default()),
            },
            _ => return Ok(RawBook::default()),
        };

        // Levels are [price, volume, unix_ts].
        let mut level_ts: f64 = 0.0;
        let mut parse_side = |key: &str| -> Vec<(f64, f64)> {
            book.get(key)
                .and_then(Value::as_array)
                .map(|levels| {
                    levels
                        .iter()
                        .take(depth)
                        .filter_map(|level| {
                            if let Some(ts) = level.get(2).map(value_f64) {
                                level_ts = level_ts.max(ts);
                            }
                            level_price_size(level)
                        })
                        .collect()
                })
                .unwrap_or_default()
        };
        let bids = parse_side("bids");
        let asks = parse_side("asks");
        Ok(RawBook {
            bids,
            asks,
            timestamp_s: if level_ts > 0.0 { level_ts } else { now_ts() },
        })
    }
}

// ── Parse helpers ─────────────────────────────────────────────────────────

/// `[price, size, ...]` with string or numeric entries.
fn level_price_size(level: &Value) -> Option<(f64, f64)> {
    let arr = level.as_array()?;
    let price = value_f64(arr.first()?);
    let size = value_f64(arr.get(1)?);
    (price > 0.0 && size > 0.0).then_some((price, size))
}

fn value_f64(v: &Value) -> f64 {
    match v {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn field_f64(v: &Value, key: &str) -> f64 {
    v.get(key).map(value_f64).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coinbase() -> ExchangeClient {
        ExchangeClient::coinbase(
            Arc::new(HttpFetcher::new()),
            FeeSchedule {
                taker: 0.006,
                maker: 0.004,
            },
        )
    }

    fn kraken() -> ExchangeClient {
        ExchangeClient::kraken(
            Arc::new(HttpFetcher::new()),
            FeeSchedule {
                taker: 0.0026,
                maker: 0.0016,
            },
        )
    }

    #[test]
    fn test_kraken_symbol_normalization() {
        let k = kraken();
        assert_eq!(k.normalize_symbol("XBT/USD"), "BTC/USD");
        assert_eq!(k.normalize_symbol("XDG/USD"), "DOGE/USD");
        assert_eq!(k.normalize_symbol("ETH/USD"), "ETH/USD");
    }

    #[test]
    fn test_coinbase_symbol_passthrough() {
        let c = coinbase();
        assert_eq!(c.normalize_symbol("BTC/USD"), "BTC/USD");
        assert_eq!(CoinbaseClient::product_id("BTC/USD"), "BTC-USD");
    }

    #[test]
    fn test_kraken_envelope_unwrap() {
        let ok = json!({"error": [], "result": {"a": 1}});
        assert_eq!(KrakenClient::unwrap_result(ok).unwrap(), json!({"a": 1}));

        let err = json!({"error": ["EQuery:Unknown asset pair"]});
        assert!(matches!(
            KrakenClient::unwrap_result(err),
            Err(FetchError::Transient(_))
        ));

        let limited = json!({"error": ["EGeneral:Too many requests"]});
        assert!(matches!(
            KrakenClient::unwrap_result(limited),
            Err(FetchError::RateLimited)
        ));
    }

    #[test]
    fn test_level_parsing() {
        assert_eq!(
            level_price_size(&json!(["100.5", "2.0", 1699999999])),
            Some((100.5, 2.0))
        );
        assert_eq!(level_price_size(&json!([100.5, 2.0])), Some((100.5, 2.0)));
        assert_eq!(level_price_size(&json!(["0", "2.0"])), None);
        assert_eq!(level_price_size(&json!("garbage")), None);
    }
}
