use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Engine configuration, loaded from a YAML document with every block
/// optional except `strategy.min_profit_threshold_pct`. API credentials
/// may also arrive via environment (`.env` is honored):
///   API_FOOTBALL_KEY, SPORTRADAR_API_KEY
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub strategy: StrategyConfig,
    pub filters: FiltersConfig,
    pub paper_mode: PaperModeConfig,
    pub mirror_mode: MirrorModeConfig,
    pub datafeed_mode: DataFeedConfig,
    pub crypto_arb_mode: CryptoArbConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    /// Minimum arb profit as % of capital deployed. Required, > 0.
    pub min_profit_threshold_pct: f64,
    pub max_trade_size_usdc: f64,
    pub max_risk_per_trade_usdc: f64,
    pub slippage_tolerance_pct: f64,
    pub min_liquidity_usdc: f64,
    pub polling_interval_seconds: u64,
    pub fee_rate_bps: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            min_profit_threshold_pct: 1.0,
            max_trade_size_usdc: 100.0,
            max_risk_per_trade_usdc: 200.0,
            slippage_tolerance_pct: 1.0,
            min_liquidity_usdc: 50.0,
            polling_interval_seconds: 30,
            fee_rate_bps: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FiltersConfig {
    pub sports_tags: Vec<String>,
}

impl Default for FiltersConfig {
    fn default() -> Self {
        Self {
            sports_tags: vec!["Sports".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperModeConfig {
    pub enabled: bool,
    pub starting_balance_usdc: f64,
}

impl Default for PaperModeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            starting_balance_usdc: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchedAddressEntry {
    pub address: String,
    pub nickname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorModeConfig {
    pub starting_balance_usdc: f64,
    pub poll_interval_seconds: f64,
    pub watched_addresses: Vec<WatchedAddressEntry>,
}

impl Default for MirrorModeConfig {
    fn default() -> Self {
        Self {
            starting_balance_usdc: 20_000.0,
            poll_interval_seconds: 30.0,
            watched_addresses: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataFeedConfig {
    pub enabled: bool,
    pub api_football_key: Option<String>,
    pub sportradar_api_key: Option<String>,
    pub sportradar_basketball: bool,
    pub starting_balance_usdc: f64,
    pub poll_interval_seconds: f64,
    pub sportradar_poll_seconds: f64,
    pub min_edge_pct: f64,
    pub entry_window_seconds: f64,
    pub edge_tracker_poll_s: f64,
    pub edge_price_move_threshold: f64,
}

impl Default for DataFeedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_football_key: None,
            sportradar_api_key: None,
            sportradar_basketball: false,
            starting_balance_usdc: 20_000.0,
            poll_interval_seconds: 15.0,
            sportradar_poll_seconds: 30.0,
            min_edge_pct: 3.0,
            entry_window_seconds: 45.0,
            edge_tracker_poll_s: 3.0,
            edge_price_move_threshold: 0.02,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoArbConfig {
    pub enabled: bool,
    pub starting_balance_usdc: f64,
    pub scan_interval_seconds: f64,
    pub min_profit_pct: f64,
    pub max_position_usdc: f64,
    pub max_position_pct: f64,
    pub min_24h_volume_usdc: f64,
    /// Upper bound of the sweet-spot volume window; unbounded when unset.
    pub max_24h_volume_usdc: Option<f64>,
    pub order_book_depth: usize,
    pub min_order_book_age_s: f64,
}

impl Default for CryptoArbConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            starting_balance_usdc: 20_000.0,
            scan_interval_seconds: 35.0,
            min_profit_pct: 0.5,
            max_position_usdc: 500.0,
            max_position_pct: 0.02,
            min_24h_volume_usdc: 100_000.0,
            max_24h_volume_usdc: None,
            order_book_depth: 10,
            min_order_book_age_s: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from a YAML file, then apply environment credential overrides.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("cannot read config {}: {e}", path.display()))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(_) => {
                let mut config = Config::default();
                config.apply_env();
                config
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("API_FOOTBALL_KEY") {
            if !key.is_empty() {
                self.datafeed_mode.api_football_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("SPORTRADAR_API_KEY") {
            if !key.is_empty() {
                self.datafeed_mode.sportradar_api_key = Some(key);
            }
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.logging.log_dir)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.strategy.min_profit_threshold_pct > 0.0,
            "strategy.min_profit_threshold_pct must be > 0"
        );
        anyhow::ensure!(
            self.strategy.slippage_tolerance_pct >= 0.0,
            "strategy.slippage_tolerance_pct must be >= 0"
        );
        anyhow::ensure!(
            self.paper_mode.enabled,
            "live order placement is not wired in this build — enable paper_mode"
        );
        if self.datafeed_mode.enabled {
            anyhow::ensure!(
                self.datafeed_mode.api_football_key.is_some(),
                "datafeed_mode requires api_football_key (or API_FOOTBALL_KEY env)"
            );
        }
        anyhow::ensure!(
            self.crypto_arb_mode.max_position_pct > 0.0
                && self.crypto_arb_mode.max_position_pct <= 1.0,
            "crypto_arb_mode.max_position_pct must be in (0, 1]"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_profit_threshold_rejected() {
        let mut config = Config::default();
        config.strategy.min_profit_threshold_pct = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_datafeed_requires_key() {
        let mut config = Config::default();
        config.datafeed_mode.enabled = true;
        assert!(config.validate().is_err());
        config.datafeed_mode.api_football_key = Some("key".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_document() {
        let yaml = r#"
strategy:
  min_profit_threshold_pct: 2.5
crypto_arb_mode:
  enabled: true
  min_24h_volume_usdc: 250000
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.strategy.min_profit_threshold_pct, 2.5);
        // Unspecified fields keep defaults.
        assert_eq!(config.strategy.max_trade_size_usdc, 100.0);
        assert!(config.crypto_arb_mode.enabled);
        assert_eq!(config.crypto_arb_mode.min_24h_volume_usdc, 250_000.0);
        assert_eq!(config.crypto_arb_mode.order_book_depth, 10);
    }

    #[test]
    fn test_watched_addresses_parse() {
        let yaml = r#"
mirror_mode:
  poll_interval_seconds: 45
  watched_addresses:
    - address: "0xABC"
      nickname: whale
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.mirror_mode.poll_interval_seconds, 45.0);
        assert_eq!(config.mirror_mode.watched_addresses.len(), 1);
        assert_eq!(config.mirror_mode.watched_addresses[0].nickname, "whale");
    }
}
