use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::events::now_ts;
use crate::feeds::gamma::GammaClient;
use crate::models::mirror::round4;

pub const ANALYSIS_FILE: &str = "rn1_analysis.json";

/// Derived statistics are refreshed at most every 5 minutes.
const CACHE_TTL_S: f64 = 300.0;

/// Market category keywords, checked against lowercased titles in order.
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Soccer",
        &[
            "soccer", "la liga", "premier league", "champions league", "bundesliga", "serie a",
            "ligue 1", "copa", "euro", "fifa", "o/u", "over/under", "btts", "both teams",
            "barcelona", "real madrid", "chelsea", "arsenal", "liverpool", "manchester", "psg",
            "juventus", "inter", "milan", "atletico", "dortmund",
        ],
    ),
    (
        "Basketball",
        &["nba", "basketball", "lakers", "celtics", "warriors", "bulls", "nets", "heat", "bucks"],
    ),
    (
        "American Football",
        &["nfl", "super bowl", "touchdown", "quarterback", "patriots", "chiefs", "cowboys"],
    ),
    ("Baseball", &["mlb", "baseball", "world series", "yankees", "dodgers"]),
    ("MMA/Boxing", &["ufc", "boxing", "mma", "fight", "knockout"]),
    (
        "Politics",
        &[
            "election", "president", "congress", "senate", "vote", "democrat", "republican",
            "governor", "mayor", "primary",
        ],
    ),
    (
        "Crypto",
        &["bitcoin", "btc", "ethereum", "eth", "crypto", "token", "market cap"],
    ),
];

fn categorize(title: &str) -> &'static str {
    let t = title.to_lowercase();
    for (cat, keywords) in CATEGORIES {
        if keywords.iter().any(|kw| t.contains(kw)) {
            return cat;
        }
    }
    "Other"
}

fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 * pct / 100.0).ceil() as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted[idx]
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Trade-history analyzer for a watched wallet: position sizing, entry
/// pricing, and market-category mix, cached to `logs/rn1_analysis.json`.
pub struct AddressAnalyzer {
    client: Arc<GammaClient>,
    cache_path: PathBuf,
}

impl AddressAnalyzer {
    pub fn new(client: Arc<GammaClient>, log_dir: &Path) -> Self {
        Self {
            client,
            cache_path: log_dir.join(ANALYSIS_FILE),
        }
    }

    /// Analysis for `address`, served from the cache while it is fresh.
    pub async fn analyze(&self, address: &str) -> Value {
        if let Some(cached) = self.load_cache(address) {
            debug!("Analysis cache hit for {}", &address[..12.min(address.len())]);
            return cached;
        }

        let report = self.build_report(address).await;
        self.save_cache(&report);
        report
    }

    async fn build_report(&self, address: &str) -> Value {
        let activity = self.client.wallet_activity(address, 500).await;
        let open_positions = self
            .client
            .wallet_positions(address, |_, _, _| {})
            .await
            .unwrap_or_default();
        let redeemable = self.client.wallet_redeemable(address).await;

        // Trade sizes in USDC from the activity feed.
        let mut sizes: Vec<f64> = activity
            .iter()
            .filter_map(|t| {
                t.get("usdcSize")
                    .or_else(|| t.get("size"))
                    .and_then(Value::as_f64)
            })
            .filter(|v| *v > 0.0)
            .collect();
        sizes.sort_by(|a, b| a.total_cmp(b));

        let mut entry_prices: Vec<f64> = activity
            .iter()
            .filter_map(|t| t.get("price").and_then(Value::as_f64))
            .filter(|p| *p > 0.0 && *p < 1.0)
            .collect();
        entry_prices.sort_by(|a, b| a.total_cmp(b));

        // Category mix over open + redeemable position titles.
        let mut categories: std::collections::HashMap<&'static str, u64> =
            std::collections::HashMap::new();
        for title in open_positions
            .iter()
            .chain(redeemable.iter())
            .map(|p| p.title_or_unknown())
        {
            *categories.entry(categorize(title)).or_insert(0) += 1;
        }

        info!(
            "Analyzed {}: {} activity rows, {} open, {} redeemable",
            &address[..12.min(address.len())],
            activity.len(),
            open_positions.len(),
            redeemable.len()
        );

        json!({
            "address": address,
            "generated_at": now_ts(),
            "trade_count": activity.len(),
            "open_positions": open_positions.len(),
            "redeemable_positions": redeemable.len(),
            "sizing": {
                "mean_usdc": round4(mean(&sizes)),
                "p25_usdc": round4(percentile(&sizes, 25.0)),
                "median_usdc": round4(percentile(&sizes, 50.0)),
                "p75_usdc": round4(percentile(&sizes, 75.0)),
            },
            "entry_price": {
                "mean": round4(mean(&entry_prices)),
                "p25": round4(percentile(&entry_prices, 25.0)),
                "median": round4(percentile(&entry_prices, 50.0)),
                "p75": round4(percentile(&entry_prices, 75.0)),
            },
            "categories": categories,
        })
    }

    fn load_cache(&self, address: &str) -> Option<Value> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        let cached: Value = serde_json::from_str(&raw).ok()?;
        let fresh = cached
            .get("generated_at")
            .and_then(Value::as_f64)
            .is_some_and(|ts| now_ts() - ts < CACHE_TTL_S);
        let same_address = cached.get("address").and_then(Value::as_str) == Some(address);
        (fresh && same_address).then_some(cached)
    }

    fn save_cache(&self, report: &Value) {
        if let Some(dir) = self.cache_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        if let Ok(raw) = serde_json::to_string_pretty(report) {
            let _ = std::fs::write(&self.cache_path, raw);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize() {
        assert_eq!(categorize("Will Arsenal beat Chelsea?"), "Soccer");
        assert_eq!(categorize("Lakers to win the NBA title"), "Basketball");
        assert_eq!(categorize("Bitcoin above 100k?"), "Crypto");
        assert_eq!(categorize("Will it rain tomorrow?"), "Other");
    }

    #[test]
    fn test_percentile() {
        let vals = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(percentile(&vals, 50.0), 2.0);
        assert_eq!(percentile(&vals, 100.0), 4.0);
        assert_eq!(percentile(&vals, 25.0), 1.0);
        assert_eq!(percentile(&[], 50.0), 0.0);
    }

    #[test]
    fn test_mean() {
        assert_eq!(mean(&[2.0, 4.0]), 3.0);
        assert_eq!(mean(&[]), 0.0);
    }
}
