pub mod analysis;
pub mod monitor;
pub mod portfolio;

use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::events::{now_ts, EventBus};
use crate::feeds::gamma::GammaClient;
use crate::monitor::truncate;
use analysis::AddressAnalyzer;
use monitor::{AddressMonitor, DeltaKind, PositionDelta};
use portfolio::MirrorPortfolio;

/// Seconds between bulk price refreshes of open positions.
const PRICE_UPDATE_INTERVAL_S: u64 = 30;

/// Wires the address monitor to the slot portfolio: position deltas from
/// watched wallets become mirrored paper trades, and trade results flow
/// back into per-address stats.
pub struct MirrorBot {
    bus: Arc<EventBus>,
    client: Arc<GammaClient>,
    pub portfolio: Arc<MirrorPortfolio>,
    pub monitor: Arc<AddressMonitor>,
    analyzer: AddressAnalyzer,
    delta_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<PositionDelta>>>,
    start_ts: std::sync::Mutex<f64>,
}

impl MirrorBot {
    pub fn new(
        bus: Arc<EventBus>,
        client: Arc<GammaClient>,
        starting_balance: f64,
        default_poll_interval_s: f64,
        log_dir: &Path,
    ) -> Self {
        let (delta_tx, delta_rx) = mpsc::unbounded_channel();
        let portfolio = Arc::new(MirrorPortfolio::new(bus.clone(), starting_balance));
        let monitor = Arc::new(AddressMonitor::new(
            client.clone(),
            bus.clone(),
            default_poll_interval_s,
            log_dir,
            delta_tx,
        ));
        let analyzer = AddressAnalyzer::new(client.clone(), log_dir);
        Self {
            bus,
            client,
            portfolio,
            monitor,
            analyzer,
            delta_rx: std::sync::Mutex::new(Some(delta_rx)),
            start_ts: std::sync::Mutex::new(0.0),
        }
    }

    /// Derived trading statistics for a watched wallet, cached on disk
    /// with a five-minute TTL (dashboard surface).
    pub async fn analyze_address(&self, address: &str) -> serde_json::Value {
        self.analyzer.analyze(address).await
    }

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner()) = now_ts();

        self.monitor.clone().start(shutdown_tx);
        Self::spawn_delta_consumer(self.clone(), shutdown_tx);
        Self::spawn_price_loop(self.clone(), shutdown_tx);
        info!("MirrorBot started");

        let bot = self.clone();
        tokio::spawn(async move { bot.emit_initial_state().await });
    }

    /// Consume position deltas from the monitor, in detection order.
    fn spawn_delta_consumer(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        let mut delta_rx = match bot
            .delta_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            Some(rx) => rx,
            None => {
                warn!("MirrorBot delta consumer already running");
                return;
            }
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    delta = delta_rx.recv() => {
                        let Some(delta) = delta else { break };
                        bot.handle_delta(delta).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn handle_delta(&self, delta: PositionDelta) {
        match delta.kind {
            DeltaKind::Opened => {
                info!(
                    "[mirror] {} opened → {}",
                    delta.source.nickname,
                    truncate(delta.data.title_or_unknown(), 55)
                );
                if self
                    .portfolio
                    .open_position(&delta.source, &delta.data)
                    .await
                    .is_some()
                {
                    self.monitor.note_mirrored(&delta.source.address).await;
                }
            }
            DeltaKind::Closed => {
                info!(
                    "[mirror] {} closed → {}",
                    delta.source.nickname,
                    truncate(delta.data.title_or_unknown(), 55)
                );
                if let Some(resolved) = self
                    .portfolio
                    .close_position_by_token(&delta.source, &delta.data)
                    .await
                {
                    self.monitor
                        .apply_trade_result(
                            &delta.source.address,
                            resolved.result,
                            resolved.pnl_usdc,
                        )
                        .await;
                }
            }
        }
    }

    fn spawn_price_loop(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(PRICE_UPDATE_INTERVAL_S));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        bot.portfolio.update_prices(&bot.client).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    /// Clear portfolio state and re-baseline every address.
    pub async fn reset(&self) {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner()) = now_ts();
        self.portfolio.reset().await;
        self.monitor.reset_all().await;
        self.bus
            .publish("mirror_bot_start", json!({ "ts": self.start_ts() }));
        info!("MirrorBot reset — fresh baseline");
    }

    pub fn start_ts(&self) -> f64 {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn snapshot(&self) -> serde_json::Value {
        json!({
            "overview": self.portfolio.overview().await,
            "positions": self.portfolio.positions().await,
            "queue": self.portfolio.queue().await,
            "resolved": self.portfolio.resolved(50).await,
            "addresses": self.monitor.addresses().await,
        })
    }

    /// Push current state immediately on start so late subscribers have
    /// something to render before the first poll lands.
    async fn emit_initial_state(&self) {
        let snap = self.snapshot().await;
        self.bus
            .publish("mirror_bot_start", json!({ "ts": self.start_ts() }));
        self.bus.publish("mirror_overview", snap["overview"].clone());
        self.bus
            .publish("mirror_positions", json!({ "positions": snap["positions"] }));
        self.bus
            .publish("mirror_queue", json!({ "queue": snap["queue"] }));
        self.bus
            .publish("mirror_addresses", json!({ "addresses": snap["addresses"] }));
    }
}
