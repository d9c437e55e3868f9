pub mod detector;
pub mod edge;
pub mod matcher;
pub mod portfolio;

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::DataFeedConfig;
use crate::events::{now_ts, EventBus};
use crate::feeds::football::FootballFeed;
use crate::feeds::gamma::GammaClient;
use crate::feeds::http::{FetchError, HttpFetcher};
use crate::feeds::sportradar::SportradarFeed;
use crate::mirror::portfolio::MirrorPortfolio;
use crate::models::datafeed::LiveEvent;
use detector::OpportunityDetector;
use edge::EdgeTracker;
use matcher::MarketMatcher;
use portfolio::DataFeedPortfolio;

/// Duplicate events within this window are suppressed; older dedup entries
/// are garbage-collected as new events arrive.
const DEDUP_WINDOW_S: f64 = 90.0;

/// Seconds between price-refresh/close passes over open positions.
const PRICE_LOOP_INTERVAL_S: u64 = 30;

/// Live sports event pipeline: two polling feeds diffing independent
/// sources, cross-feed dedup, market matching, model-based opportunity
/// detection, a slot portfolio, and edge-latency tracking — four
/// cooperative loops per instance.
pub struct DataFeedBot {
    bus: Arc<EventBus>,
    client: Arc<GammaClient>,
    cfg: DataFeedConfig,
    football: Arc<FootballFeed>,
    sportradar: Option<Arc<SportradarFeed>>,
    matcher: MarketMatcher,
    detector: OpportunityDetector,
    pub portfolio: Arc<DataFeedPortfolio>,
    pub edge: Arc<EdgeTracker>,
    /// Reference portfolio whose open positions are matched first.
    reference: Option<Arc<MirrorPortfolio>>,
    /// dedup key → first-seen timestamp, shared by both feed loops.
    dedup: DashMap<String, f64>,
    start_ts: std::sync::Mutex<f64>,
}

impl DataFeedBot {
    pub fn new(
        http: Arc<HttpFetcher>,
        client: Arc<GammaClient>,
        bus: Arc<EventBus>,
        cfg: DataFeedConfig,
        reference: Option<Arc<MirrorPortfolio>>,
    ) -> Self {
        let football = Arc::new(FootballFeed::new(
            http.clone(),
            bus.clone(),
            cfg.api_football_key.clone().unwrap_or_default(),
        ));
        let sportradar = cfg.sportradar_api_key.clone().map(|key| {
            Arc::new(SportradarFeed::new(http.clone(), bus.clone(), key))
        });
        let portfolio = Arc::new(DataFeedPortfolio::new(
            bus.clone(),
            cfg.starting_balance_usdc,
        ));
        let edge = Arc::new(EdgeTracker::with_threshold(
            client.clone(),
            bus.clone(),
            cfg.edge_price_move_threshold,
        ));
        let matcher = MarketMatcher::new(client.clone());
        let detector = OpportunityDetector::new(cfg.min_edge_pct, cfg.entry_window_seconds);

        Self {
            bus,
            client,
            cfg,
            football,
            sportradar,
            matcher,
            detector,
            portfolio,
            edge,
            reference,
            dedup: DashMap::new(),
            start_ts: std::sync::Mutex::new(0.0),
        }
    }

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner()) = now_ts();
        Self::spawn_football_loop(self.clone(), shutdown_tx);
        Self::spawn_sportradar_loop(self.clone(), shutdown_tx);
        Self::spawn_price_loop(self.clone(), shutdown_tx);
        Self::spawn_edge_loop(self.clone(), shutdown_tx);
        info!(
            "DataFeedBot started (poll_interval={:.0}s)",
            self.cfg.poll_interval_seconds
        );

        let bot = self.clone();
        tokio::spawn(async move { bot.emit_initial_state().await });
    }

    // ── Loops ─────────────────────────────────────────────────────────────

    fn spawn_football_loop(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        let interval = std::time::Duration::from_secs_f64(bot.cfg.poll_interval_seconds);

        tokio::spawn(async move {
            loop {
                match bot.football.poll().await {
                    Ok(events) => bot.handle_events(events).await,
                    Err(FetchError::RateLimited) => {
                        warn!("DataFeedBot: API-Football rate limited — skipping cycle");
                    }
                    Err(e) => error!("DataFeedBot poll error: {e}"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_sportradar_loop(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let Some(sportradar) = bot.sportradar.clone() else {
            return;
        };
        let mut shutdown = shutdown_tx.subscribe();
        let interval = std::time::Duration::from_secs_f64(bot.cfg.sportradar_poll_seconds);
        let include_basketball = bot.cfg.sportradar_basketball;

        tokio::spawn(async move {
            loop {
                let events = sportradar.poll(include_basketball).await;
                bot.handle_events(events).await;
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_price_loop(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(PRICE_LOOP_INTERVAL_S));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        bot.portfolio.update_prices(&bot.client).await;
                        bot.portfolio.close_resolved_markets(&bot.client).await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    fn spawn_edge_loop(bot: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        let interval = std::time::Duration::from_secs_f64(bot.cfg.edge_tracker_poll_s);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        bot.edge.poll_pending().await;
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    // ── Pipeline ──────────────────────────────────────────────────────────

    async fn handle_events(&self, events: Vec<LiveEvent>) {
        for event in events {
            if self.is_duplicate(&event) {
                continue;
            }
            self.bus.publish("datafeed_live_event", event.to_json());

            if !event.kind.is_actionable() {
                continue;
            }

            let reference = match &self.reference {
                Some(mirror) => mirror.position_titles().await,
                None => Vec::new(),
            };
            let Some(market) = self.matcher.find_market(&event, &reference).await else {
                continue;
            };

            if let Some(opp) = self.detector.evaluate(&event, &market) {
                self.bus.publish("datafeed_opportunity", opp.to_json());
                self.edge.track(&event, &opp).await;
                self.portfolio.open_position(&opp).await;
            }
        }
    }

    /// Suppress an event already seen (from either feed) within the dedup
    /// window; stale entries are collected on every call. The entry API
    /// makes check-and-insert atomic when both feed loops land at once.
    fn is_duplicate(&self, event: &LiveEvent) -> bool {
        let key = event.dedup_key();
        let now = now_ts();
        self.dedup.retain(|_, ts| now - *ts <= DEDUP_WINDOW_S);
        match self.dedup.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(_) => true,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        }
    }

    pub fn start_ts(&self) -> f64 {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub async fn reset(&self) {
        *self.start_ts.lock().unwrap_or_else(|e| e.into_inner()) = now_ts();
        self.portfolio.reset().await;
        self.bus
            .publish("datafeed_start", json!({ "ts": self.start_ts() }));
        info!("DataFeedBot reset");
    }

    pub async fn snapshot(&self) -> serde_json::Value {
        json!({
            "overview": self.portfolio.overview().await,
            "positions": self.portfolio.positions().await,
            "resolved": self.portfolio.resolved(50).await,
            "edge_stats": self.edge.stats().await,
            "start_ts": self.start_ts(),
        })
    }

    async fn emit_initial_state(&self) {
        let snap = self.snapshot().await;
        self.bus
            .publish("datafeed_start", json!({ "ts": self.start_ts() }));
        self.bus
            .publish("datafeed_overview", snap["overview"].clone());
        self.bus
            .publish("datafeed_positions", json!({ "positions": snap["positions"] }));
    }
}
