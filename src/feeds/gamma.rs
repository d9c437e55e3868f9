use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::feeds::http::{FetchError, HttpFetcher};
use crate::models::market::{BookResponse, GammaMarket, OrderBook};
use crate::models::mirror::PositionData;

pub const GAMMA_API: &str = "https://gamma-api.polymarket.com";
pub const CLOB_API: &str = "https://clob.polymarket.com";
pub const DATA_API: &str = "https://data-api.polymarket.com";

const TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the Polymarket public endpoints: Gamma (market discovery and
/// prices), CLOB (order books), Data API (wallet positions). All traffic
/// shares one connection pool via [`HttpFetcher`].
pub struct GammaClient {
    http: Arc<HttpFetcher>,
    gamma_host: String,
    clob_host: String,
    data_host: String,
}

impl GammaClient {
    pub fn new(http: Arc<HttpFetcher>) -> Self {
        Self {
            http,
            gamma_host: GAMMA_API.to_string(),
            clob_host: CLOB_API.to_string(),
            data_host: DATA_API.to_string(),
        }
    }

    pub fn with_hosts(
        http: Arc<HttpFetcher>,
        gamma_host: String,
        clob_host: String,
        data_host: String,
    ) -> Self {
        Self {
            http,
            gamma_host,
            clob_host,
            data_host,
        }
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    // ── Market discovery ──────────────────────────────────────────────────

    /// Active binary markets matching any of the given tags, deduplicated by
    /// condition id. Per-tag failures are logged and skipped.
    pub async fn sports_markets(&self, tags: &[String]) -> Vec<GammaMarket> {
        let mut markets: Vec<GammaMarket> = Vec::new();
        for tag in tags {
            let params = [
                ("tag", tag.clone()),
                ("active", "true".to_string()),
                ("closed", "false".to_string()),
                ("limit", "100".to_string()),
            ];
            match self
                .http
                .get_json(&format!("{}/markets", self.gamma_host), &params, TIMEOUT)
                .await
            {
                Ok(value) => markets.extend(parse_market_list(value)),
                Err(e) => error!("Gamma API error for tag '{tag}': {e}"),
            }
        }

        let mut seen: HashSet<String> = HashSet::new();
        markets
            .into_iter()
            .filter(|m| {
                let cid = m.condition_id();
                cid != "unknown" && seen.insert(cid.to_string())
            })
            .collect()
    }

    /// Active markets for a single tag (used by the soccer catalogue cache).
    pub async fn markets_by_tag(&self, tag: &str, limit: usize) -> Vec<GammaMarket> {
        let params = [
            ("active", "true".to_string()),
            ("tag", tag.to_string()),
            ("limit", limit.to_string()),
        ];
        match self
            .http
            .get_json(&format!("{}/markets", self.gamma_host), &params, TIMEOUT)
            .await
        {
            Ok(value) => parse_market_list(value),
            Err(e) => {
                debug!("markets_by_tag({tag}) failed: {e}");
                Vec::new()
            }
        }
    }

    /// Markets carrying any of the given CLOB token ids (comma-joined query).
    pub async fn markets_by_token_ids(&self, token_ids: &[String]) -> Vec<GammaMarket> {
        if token_ids.is_empty() {
            return Vec::new();
        }
        let params = [("clobTokenIds", token_ids.join(","))];
        match self
            .http
            .get_json(&format!("{}/markets", self.gamma_host), &params, TIMEOUT)
            .await
        {
            Ok(value) => parse_market_list(value),
            Err(e) => {
                debug!("markets_by_token_ids failed: {e}");
                Vec::new()
            }
        }
    }

    // ── Order books ───────────────────────────────────────────────────────

    pub async fn order_book(&self, token_id: &str) -> Result<OrderBook, FetchError> {
        let params = [("token_id", token_id.to_string())];
        let value = self
            .http
            .get_json(&format!("{}/book", self.clob_host), &params, TIMEOUT)
            .await?;
        let resp: BookResponse = serde_json::from_value(value)
            .map_err(|e| FetchError::Transient(format!("bad book payload: {e}")))?;
        Ok(OrderBook::from_response(&resp))
    }

    /// Lowest ask for a token (the price to BUY it), or None on any failure.
    pub async fn best_ask(&self, token_id: &str) -> Option<f64> {
        match self.order_book(token_id).await {
            Ok(book) => book.best_ask(),
            Err(e) => {
                error!("Order book fetch failed for token {token_id}: {e}");
                None
            }
        }
    }

    /// USDC of fillable ask liquidity at or below `max_price`, early-exiting
    /// at `target_usdc`. Returns 0.0 on fetch failure.
    pub async fn fillable_liquidity(
        &self,
        token_id: &str,
        max_price: f64,
        target_usdc: f64,
    ) -> f64 {
        match self.order_book(token_id).await {
            Ok(book) => book.fillable_usdc(max_price, target_usdc),
            Err(e) => {
                error!("Liquidity fetch failed for token {token_id}: {e}");
                0.0
            }
        }
    }

    // ── Wallet positions ──────────────────────────────────────────────────

    /// Active (non-redeemable) positions for a wallet, with backoff on
    /// transient errors. `on_retry` fires before each backoff sleep.
    pub async fn wallet_positions<F>(
        &self,
        address: &str,
        on_retry: F,
    ) -> Result<Vec<PositionData>, FetchError>
    where
        F: FnMut(u32, f64, &FetchError),
    {
        let params = [
            ("user", address.to_string()),
            ("sizeThreshold", "0.01".to_string()),
            // Skip resolved markets; cap high enough that a whale with many
            // open positions is never silently truncated.
            ("redeemable", "false".to_string()),
            ("limit", "500".to_string()),
        ];
        let value = self
            .http
            .get_json_with_backoff(
                &format!("{}/positions", self.data_host),
                &params,
                TIMEOUT,
                on_retry,
            )
            .await?;
        Ok(parse_position_list(value))
    }

    /// Raw activity/trade history for a wallet; tries `/activity` first,
    /// then `/trades`.
    pub async fn wallet_activity(&self, address: &str, limit: usize) -> Vec<Value> {
        for path in ["/activity", "/trades"] {
            let params = [
                ("user", address.to_string()),
                ("limit", limit.to_string()),
            ];
            match self
                .http
                .get_json(
                    &format!("{}{}", self.data_host, path),
                    &params,
                    Duration::from_secs(15),
                )
                .await
            {
                Ok(Value::Array(items)) => return items,
                Ok(Value::Object(map)) => {
                    for key in ["data", "activities", "trades"] {
                        if let Some(Value::Array(items)) = map.get(key) {
                            return items.clone();
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => debug!("Activity fetch {path} failed: {e}"),
            }
        }
        Vec::new()
    }

    /// Redeemable (resolved but unclaimed) positions for a wallet.
    pub async fn wallet_redeemable(&self, address: &str) -> Vec<PositionData> {
        let params = [
            ("user", address.to_string()),
            ("sizeThreshold", "0.01".to_string()),
            ("redeemable", "true".to_string()),
            ("limit", "500".to_string()),
        ];
        match self
            .http
            .get_json(
                &format!("{}/positions", self.data_host),
                &params,
                Duration::from_secs(15),
            )
            .await
        {
            Ok(value) => parse_position_list(value),
            Err(e) => {
                debug!("Redeemable positions fetch failed: {e}");
                Vec::new()
            }
        }
    }
}

/// Markets arrive as a bare list or wrapped in `{"markets": [...]}`.
fn parse_market_list(value: Value) -> Vec<GammaMarket> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("markets") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .collect()
}

/// Positions arrive as a bare list or wrapped in `{"positions": [...]}`.
fn parse_position_list(value: Value) -> Vec<PositionData> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("positions") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|v| serde_json::from_value(v).ok())
        .filter(|p: &PositionData| !p.asset.is_empty())
        .collect()
}
