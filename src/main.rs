use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use arbhawk::config::Config;
use arbhawk::crypto_arb::exchange::{ExchangeClient, COINBASE_FEES, KRAKEN_FEES};
use arbhawk::crypto_arb::CryptoArbBot;
use arbhawk::datafeed::DataFeedBot;
use arbhawk::events::EventBus;
use arbhawk::execution::paper::PaperTrader;
use arbhawk::execution::TradeEngine;
use arbhawk::feeds::gamma::GammaClient;
use arbhawk::feeds::http::HttpFetcher;
use arbhawk::mirror::MirrorBot;
use arbhawk::monitor::MarketMonitor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("================================================");
    info!("  ARBHAWK — multi-strategy signal engine v0.1.0");
    info!("  Prediction-market + crypto arb paper trading");
    info!("================================================");

    let config_path = config_path_from_args();
    let config = Config::load_or_default(&config_path);
    if let Err(e) = config.validate() {
        // Fatal config: one diagnostic line, never enter the main loop.
        error!("Config validation failed: {e}");
        std::process::exit(1);
    }

    let log_dir = config.log_dir();
    std::fs::create_dir_all(&log_dir)?;

    info!("--- Strategy configuration ---");
    info!("  Min profit:   {:.2}%", config.strategy.min_profit_threshold_pct);
    info!("  Max trade:    {} USDC/side", config.strategy.max_trade_size_usdc);
    info!("  Max risk:     {} USDC", config.strategy.max_risk_per_trade_usdc);
    info!("  Slippage tol: {:.2}%", config.strategy.slippage_tolerance_pct);
    info!("  Min liquidity:{} USDC", config.strategy.min_liquidity_usdc);
    info!("  Scan every:   {}s", config.strategy.polling_interval_seconds);

    // === Shared plumbing ===
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let bus = Arc::new(EventBus::new());
    let http = Arc::new(HttpFetcher::new());
    let gamma = Arc::new(GammaClient::new(http.clone()));

    // === Within-market arbitrage: monitor → paper trader ===
    let paper = Arc::new(PaperTrader::new(
        gamma.clone(),
        bus.clone(),
        &config.strategy,
        &config.paper_mode,
        &log_dir,
    ));
    {
        let (opportunity_tx, mut opportunity_rx) = mpsc::unbounded_channel();
        let monitor = Arc::new(MarketMonitor::new(
            gamma.clone(),
            bus.clone(),
            config.strategy.clone(),
            config.filters.sports_tags.clone(),
            opportunity_tx,
        ));
        monitor.start(&shutdown_tx);

        let trader = paper.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    opp = opportunity_rx.recv() => {
                        let Some(opp) = opp else { break };
                        let result = trader.execute(&opp).await;
                        if !result.outcome.is_success() {
                            warn!("Trade not executed [{}]: {}", result.outcome.as_str(), result.reason);
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
        info!("Paper trader active");
    }

    // === Mirror bot: watched wallets → slot portfolio ===
    let mirror = Arc::new(MirrorBot::new(
        bus.clone(),
        gamma.clone(),
        config.mirror_mode.starting_balance_usdc,
        config.mirror_mode.poll_interval_seconds,
        &log_dir,
    ));
    for entry in &config.mirror_mode.watched_addresses {
        mirror
            .monitor
            .add_address(&entry.address, &entry.nickname, None)
            .await;
    }
    mirror.clone().start(&shutdown_tx);

    // === DataFeed bot: live sports events → edge detection ===
    if config.datafeed_mode.enabled {
        let datafeed = Arc::new(DataFeedBot::new(
            http.clone(),
            gamma.clone(),
            bus.clone(),
            config.datafeed_mode.clone(),
            Some(mirror.portfolio.clone()),
        ));
        datafeed.start(&shutdown_tx);
    } else {
        info!("DataFeed mode disabled");
    }

    // === Crypto arb scanner ===
    if config.crypto_arb_mode.enabled {
        let crypto = Arc::new(CryptoArbBot::new(
            bus.clone(),
            config.crypto_arb_mode.clone(),
            ExchangeClient::coinbase(http.clone(), COINBASE_FEES),
            ExchangeClient::kraken(http.clone(), KRAKEN_FEES),
        ));
        crypto.start(&shutdown_tx);
    } else {
        info!("Crypto arb mode disabled");
    }

    info!("=== ARBHAWK running ===");
    info!("Press Ctrl+C to shutdown.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Cleaning up...");
    let _ = shutdown_tx.send(());

    paper.log_summary().await;
    info!("ARBHAWK shutdown complete.");
    Ok(())
}

fn config_path_from_args() -> PathBuf {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        }
    }
    PathBuf::from("config.yaml")
}
