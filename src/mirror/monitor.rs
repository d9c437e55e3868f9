use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{error, info, warn};

use crate::events::{now_ts, EventBus};
use crate::feeds::gamma::GammaClient;
use crate::feeds::http::{FetchError, RATE_LIMIT_PAUSE_S};
use crate::models::mirror::{AddressRef, PositionData, TradeResultKind, WatchedAddress};

pub const ROSTER_FILE: &str = "mirror_addresses.json";

/// Maximum random jitter added to each address's poll schedule.
const POLL_JITTER_MAX_S: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Opened,
    Closed,
}

/// A position change observed at a watched wallet, delivered to the mirror
/// bot in detection order (opens before closes within one poll).
#[derive(Debug, Clone)]
pub struct PositionDelta {
    pub kind: DeltaKind,
    pub source: AddressRef,
    pub data: PositionData,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedAddress {
    address: String,
    nickname: String,
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Polls watched wallet addresses for active-position changes.
///
/// Per address: configurable interval with up to 5s random jitter,
/// exponential backoff on transient fetch errors, 60s cooldown on HTTP 429,
/// and a stale flag after five consecutive failures. The first successful
/// poll only records a baseline — no deltas are emitted for positions that
/// were already open when watching began.
pub struct AddressMonitor {
    client: Arc<GammaClient>,
    bus: Arc<EventBus>,
    default_interval_s: f64,
    roster: Mutex<HashMap<String, WatchedAddress>>,
    delta_tx: mpsc::UnboundedSender<PositionDelta>,
    persist_path: PathBuf,
}

impl AddressMonitor {
    pub fn new(
        client: Arc<GammaClient>,
        bus: Arc<EventBus>,
        default_interval_s: f64,
        log_dir: &std::path::Path,
        delta_tx: mpsc::UnboundedSender<PositionDelta>,
    ) -> Self {
        let mut monitor = Self {
            client,
            bus,
            default_interval_s,
            roster: Mutex::new(HashMap::new()),
            delta_tx,
            persist_path: log_dir.join(ROSTER_FILE),
        };
        monitor.load_persisted();
        monitor
    }

    // ── Roster management ─────────────────────────────────────────────────

    pub async fn add_address(&self, address: &str, nickname: &str, poll_interval: Option<f64>) {
        let key = address.to_lowercase();
        {
            let mut roster = self.roster.lock().await;
            match roster.get_mut(&key) {
                Some(existing) => existing.nickname = nickname.to_string(),
                None => {
                    roster.insert(
                        key.clone(),
                        WatchedAddress::new(
                            key.clone(),
                            nickname.to_string(),
                            poll_interval.unwrap_or(self.default_interval_s),
                        ),
                    );
                }
            }
        }
        self.persist().await;
        self.emit_address_list().await;
        info!("Watching {} ({nickname})", &address[..12.min(address.len())]);
    }

    pub async fn remove_address(&self, address: &str) -> bool {
        let key = address.to_lowercase();
        let existed = self.roster.lock().await.remove(&key).is_some();
        if existed {
            self.persist().await;
            self.emit_address_list().await;
            info!("Removed address {}", &address[..12.min(address.len())]);
        }
        existed
    }

    pub async fn update_address(
        &self,
        address: &str,
        nickname: Option<&str>,
        enabled: Option<bool>,
    ) -> bool {
        let key = address.to_lowercase();
        let found = {
            let mut roster = self.roster.lock().await;
            match roster.get_mut(&key) {
                Some(cfg) => {
                    if let Some(nick) = nickname {
                        cfg.nickname = nick.to_string();
                    }
                    if let Some(en) = enabled {
                        cfg.enabled = en;
                    }
                    true
                }
                None => false,
            }
        };
        if found {
            self.persist().await;
            self.emit_address_list().await;
        }
        found
    }

    pub async fn addresses(&self) -> Vec<serde_json::Value> {
        let roster = self.roster.lock().await;
        roster.values().map(|a| a.status_json()).collect()
    }

    /// Drop all baselines so the next poll re-snapshots without mirroring.
    pub async fn reset_all(&self) {
        let mut roster = self.roster.lock().await;
        for cfg in roster.values_mut() {
            cfg.is_initialized = false;
            cfg.last_positions.clear();
        }
    }

    /// Record that a mirrored trade was opened for this address.
    pub async fn note_mirrored(&self, address: &str) {
        let mut roster = self.roster.lock().await;
        if let Some(cfg) = roster.get_mut(address) {
            cfg.stats.trades_mirrored += 1;
        }
    }

    /// Fold a resolved mirrored trade back into the address's stats.
    pub async fn apply_trade_result(&self, address: &str, result: TradeResultKind, pnl: f64) {
        let mut roster = self.roster.lock().await;
        if let Some(cfg) = roster.get_mut(address) {
            cfg.stats.total_pnl_usdc += pnl;
            match result {
                TradeResultKind::Win => cfg.stats.wins += 1,
                TradeResultKind::Loss => cfg.stats.losses += 1,
                TradeResultKind::Push => {}
            }
        }
    }

    // ── Polling ───────────────────────────────────────────────────────────

    pub fn start(self: Arc<Self>, shutdown_tx: &broadcast::Sender<()>) {
        let mut shutdown = shutdown_tx.subscribe();
        info!("AddressMonitor started");

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let due = self.due_addresses().await;
                        for address in due {
                            self.poll_address(&address).await;
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        });
    }

    async fn due_addresses(&self) -> Vec<String> {
        let now = now_ts();
        let roster = self.roster.lock().await;
        let mut rng = rand::thread_rng();
        roster
            .values()
            .filter(|cfg| cfg.enabled && !cfg.is_rate_limited())
            .filter(|cfg| {
                let jitter = rng.gen_range(0.0..POLL_JITTER_MAX_S);
                now >= cfg.last_poll_ts + cfg.poll_interval_s + jitter
            })
            .map(|cfg| cfg.address.clone())
            .collect()
    }

    async fn poll_address(&self, address: &str) {
        let nickname = {
            let mut roster = self.roster.lock().await;
            let Some(cfg) = roster.get_mut(address) else {
                return;
            };
            cfg.last_poll_ts = now_ts();
            cfg.nickname.clone()
        };

        let bus = self.bus.clone();
        let addr_for_retry = address.to_string();
        let fetched = self
            .client
            .wallet_positions(address, |attempt, delay_s, err| {
                bus.publish(
                    "mirror_api_event",
                    json!({
                        "kind": "retry",
                        "address": addr_for_retry,
                        "attempt": attempt,
                        "delay_s": delay_s,
                        "error": err.to_string(),
                        "ts": now_ts(),
                    }),
                );
            })
            .await;

        match fetched {
            Ok(positions) => {
                self.process_positions(address, positions).await;
                let mut roster = self.roster.lock().await;
                if let Some(cfg) = roster.get_mut(address) {
                    cfg.last_successful_poll_ts = now_ts();
                    cfg.consecutive_failures = 0;
                    cfg.rate_limited_until = None;
                    self.bus.publish("mirror_address_status", cfg.status_json());
                }
            }
            Err(FetchError::RateLimited) => {
                let mut roster = self.roster.lock().await;
                if let Some(cfg) = roster.get_mut(address) {
                    cfg.rate_limited_until = Some(now_ts() + RATE_LIMIT_PAUSE_S);
                    cfg.consecutive_failures += 1;
                    warn!(
                        "Rate limited on {} ({nickname}) — pausing {RATE_LIMIT_PAUSE_S}s",
                        &address[..12.min(address.len())]
                    );
                    self.bus.publish(
                        "mirror_api_event",
                        json!({
                            "kind": "rate_limited",
                            "address": cfg.address,
                            "nickname": cfg.nickname,
                            "resume_at": cfg.rate_limited_until,
                            "ts": now_ts(),
                        }),
                    );
                    self.bus.publish("mirror_address_status", cfg.status_json());
                }
            }
            Err(err) => {
                let mut roster = self.roster.lock().await;
                if let Some(cfg) = roster.get_mut(address) {
                    cfg.consecutive_failures += 1;
                    error!(
                        "Poll failed for {} ({nickname}) attempt {}: {err}",
                        &address[..12.min(address.len())],
                        cfg.consecutive_failures
                    );
                    self.bus.publish(
                        "mirror_api_event",
                        json!({
                            "kind": "poll_error",
                            "address": cfg.address,
                            "nickname": cfg.nickname,
                            "consecutive_failures": cfg.consecutive_failures,
                            "error": err.to_string(),
                            "stale": cfg.is_stale(),
                            "ts": now_ts(),
                        }),
                    );
                    self.bus.publish("mirror_address_status", cfg.status_json());
                }
            }
        }
    }

    /// Diff the fetched snapshot against the last one. The first successful
    /// poll establishes the baseline and emits nothing; afterwards new
    /// token ids become Opened deltas and missing ones Closed deltas,
    /// opens first.
    async fn process_positions(&self, address: &str, positions: Vec<PositionData>) {
        let mut new_map: HashMap<String, PositionData> = HashMap::new();
        for p in positions {
            if !p.asset.is_empty() {
                new_map.insert(p.asset.clone(), p);
            }
        }

        let mut deltas: Vec<PositionDelta> = Vec::new();
        let (debug_payload, nickname);
        {
            let mut roster = self.roster.lock().await;
            let Some(cfg) = roster.get_mut(address) else {
                return;
            };
            nickname = cfg.nickname.clone();
            cfg.last_poll_count = new_map.len();

            info!(
                "[{nickname}] Poll: {} active positions fetched (initialized={}, baseline={})",
                new_map.len(),
                cfg.is_initialized,
                cfg.last_positions.len()
            );

            if !cfg.is_initialized {
                cfg.last_positions = new_map.clone();
                cfg.is_initialized = true;
                cfg.last_poll_new = 0;
                cfg.last_poll_closed = 0;
                info!(
                    "[{nickname}] Baseline snapshot: {} positions (not mirrored)",
                    cfg.last_positions.len()
                );
                debug_payload = poll_debug_json(cfg, &[], &[]);
            } else {
                let source = AddressRef {
                    address: cfg.address.clone(),
                    nickname: cfg.nickname.clone(),
                };

                let mut opened: Vec<PositionData> = Vec::new();
                let mut closed: Vec<PositionData> = Vec::new();
                for (tid, pos) in &new_map {
                    if !cfg.last_positions.contains_key(tid) {
                        opened.push(pos.clone());
                    }
                }
                for (tid, pos) in &cfg.last_positions {
                    if !new_map.contains_key(tid) {
                        closed.push(pos.clone());
                    }
                }
                // Deterministic delivery order within a poll.
                opened.sort_by(|a, b| a.asset.cmp(&b.asset));
                closed.sort_by(|a, b| a.asset.cmp(&b.asset));

                info!(
                    "[{nickname}] Diff: {} new, {} closed  (prev={}, curr={})",
                    opened.len(),
                    closed.len(),
                    cfg.last_positions.len(),
                    new_map.len()
                );

                cfg.last_poll_new = opened.len();
                cfg.last_poll_closed = closed.len();

                for pos in &opened {
                    info!(
                        "[{nickname}] opened → {}  asset={}  price={:?}",
                        crate::monitor::truncate(pos.title_or_unknown(), 55),
                        &pos.asset[..16.min(pos.asset.len())],
                        pos.cur_price
                    );
                    deltas.push(PositionDelta {
                        kind: DeltaKind::Opened,
                        source: source.clone(),
                        data: pos.clone(),
                    });
                }
                for pos in &closed {
                    info!(
                        "[{nickname}] closed → {}  asset={}",
                        crate::monitor::truncate(pos.title_or_unknown(), 55),
                        &pos.asset[..16.min(pos.asset.len())]
                    );
                    deltas.push(PositionDelta {
                        kind: DeltaKind::Closed,
                        source: source.clone(),
                        data: pos.clone(),
                    });
                }

                cfg.last_positions = new_map;
                debug_payload = poll_debug_json(cfg, &opened, &closed);
            }
        }

        // Deliver outside the roster lock; a dead consumer must not kill
        // the poll loop.
        for delta in deltas {
            if self.delta_tx.send(delta).is_err() {
                error!("[{nickname}] Position delta dropped — consumer gone");
            }
        }
        self.bus.publish("mirror_poll_debug", debug_payload);
    }

    // ── Persistence ───────────────────────────────────────────────────────

    async fn persist(&self) {
        let entries: Vec<PersistedAddress> = {
            let roster = self.roster.lock().await;
            roster
                .values()
                .map(|cfg| PersistedAddress {
                    address: cfg.address.clone(),
                    nickname: cfg.nickname.clone(),
                    enabled: cfg.enabled,
                })
                .collect()
        };
        if let Some(dir) = self.persist_path.parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        match serde_json::to_string_pretty(&entries) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.persist_path, raw) {
                    error!("Failed to persist addresses: {e}");
                }
            }
            Err(e) => error!("Failed to serialize addresses: {e}"),
        }
    }

    fn load_persisted(&mut self) {
        let raw = match std::fs::read_to_string(&self.persist_path) {
            Ok(raw) => raw,
            Err(_) => return,
        };
        let saved: Vec<PersistedAddress> = match serde_json::from_str(&raw) {
            Ok(saved) => saved,
            Err(e) => {
                warn!("Could not load persisted addresses: {e}");
                return;
            }
        };
        let roster = self.roster.get_mut();
        for entry in saved {
            let key = entry.address.to_lowercase();
            let mut cfg =
                WatchedAddress::new(key.clone(), entry.nickname, self.default_interval_s);
            cfg.enabled = entry.enabled;
            roster.insert(key, cfg);
        }
        info!("Loaded {} persisted addresses", roster.len());
    }

    async fn emit_address_list(&self) {
        let addresses = self.addresses().await;
        self.bus
            .publish("mirror_addresses", json!({ "addresses": addresses }));
    }
}

fn poll_debug_json(
    cfg: &WatchedAddress,
    opened: &[PositionData],
    closed: &[PositionData],
) -> serde_json::Value {
    let brief = |p: &PositionData| {
        json!({
            "title": crate::monitor::truncate(p.title_or_unknown(), 60),
            "asset": &p.asset[..20.min(p.asset.len())],
            "price": p.cur_price,
        })
    };
    json!({
        "address": cfg.address,
        "nickname": cfg.nickname,
        "ts": now_ts(),
        "initialized": cfg.is_initialized,
        "fetched": cfg.last_poll_count,
        "baseline_size": cfg.last_positions.len(),
        "new_count": opened.len(),
        "closed_count": closed.len(),
        "opened": opened.iter().map(brief).collect::<Vec<_>>(),
        "closed": closed.iter().map(|p| json!({
            "title": crate::monitor::truncate(p.title_or_unknown(), 60),
            "asset": &p.asset[..20.min(p.asset.len())],
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor(dir: &std::path::Path) -> (Arc<AddressMonitor>, mpsc::UnboundedReceiver<PositionDelta>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let http = Arc::new(crate::feeds::http::HttpFetcher::new());
        let monitor = AddressMonitor::new(
            Arc::new(GammaClient::new(http)),
            Arc::new(EventBus::new()),
            30.0,
            dir,
            tx,
        );
        (Arc::new(monitor), rx)
    }

    fn positions(n: usize) -> Vec<PositionData> {
        (0..n)
            .map(|i| PositionData {
                asset: format!("tok{i}"),
                condition_id: format!("cond{i}"),
                title: format!("Market {i}"),
                outcome: "Yes".into(),
                cur_price: Some(0.5),
                price: None,
                size: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_first_poll_is_baseline_no_deltas() {
        let dir = tempfile::tempdir().unwrap();
        let (m, mut rx) = monitor(dir.path());
        m.add_address("0xWHALE", "whale", None).await;

        m.process_positions("0xwhale", positions(3)).await;

        assert!(rx.try_recv().is_err(), "baseline poll must emit no deltas");
        let roster = m.roster.lock().await;
        let cfg = roster.get("0xwhale").unwrap();
        assert!(cfg.is_initialized);
        assert_eq!(cfg.last_poll_count, 3);
        assert_eq!(cfg.last_poll_new, 0);
        assert_eq!(cfg.last_poll_closed, 0);
    }

    #[tokio::test]
    async fn test_diff_emits_opens_before_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (m, mut rx) = monitor(dir.path());
        m.add_address("0xwhale", "whale", None).await;

        m.process_positions("0xwhale", positions(2)).await;

        // tok1 disappears, tok5 appears.
        let mut next = positions(1);
        next.push(PositionData {
            asset: "tok5".into(),
            title: "Market 5".into(),
            ..Default::default()
        });
        m.process_positions("0xwhale", next).await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.kind, DeltaKind::Opened);
        assert_eq!(first.data.asset, "tok5");
        let second = rx.try_recv().unwrap();
        assert_eq!(second.kind, DeltaKind::Closed);
        assert_eq!(second.data.asset, "tok1");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_reset_all_clears_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let (m, mut rx) = monitor(dir.path());
        m.add_address("0xwhale", "whale", None).await;
        m.process_positions("0xwhale", positions(2)).await;

        m.reset_all().await;
        // Next poll is a fresh baseline: still no deltas.
        m.process_positions("0xwhale", positions(5)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_roster_persist_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (m, _rx) = monitor(dir.path());
            m.add_address("0xWHALE", "whale", None).await;
            m.update_address("0xwhale", None, Some(false)).await;
        }

        let raw = std::fs::read_to_string(dir.path().join(ROSTER_FILE)).unwrap();
        let saved: Vec<PersistedAddress> = serde_json::from_str(&raw).unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].address, "0xwhale");
        assert!(!saved[0].enabled);
    }

    #[tokio::test]
    async fn test_stats_update_paths() {
        let dir = tempfile::tempdir().unwrap();
        let (m, _rx) = monitor(dir.path());
        m.add_address("0xwhale", "whale", None).await;

        m.note_mirrored("0xwhale").await;
        m.apply_trade_result("0xwhale", TradeResultKind::Win, 25.0).await;
        m.apply_trade_result("0xwhale", TradeResultKind::Loss, -10.0).await;

        let roster = m.roster.lock().await;
        let stats = &roster.get("0xwhale").unwrap().stats;
        assert_eq!(stats.trades_mirrored, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.losses, 1);
        assert!((stats.total_pnl_usdc - 15.0).abs() < 1e-9);
    }
}
