use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::events::{now_ts, EventBus};
use crate::feeds::gamma::GammaClient;
use crate::models::datafeed::{
    DetectedOpportunity, EdgeMeasurement, LiveEvent, PendingEdge,
};

/// A market is considered repriced once it moves this far from the price
/// seen at detection.
pub const PRICE_MOVE_THRESHOLD: f64 = 0.02;

/// Pending edges older than this are dropped without a measurement.
pub const MAX_TRACK_WINDOW_S: f64 = 120.0;

/// Minimum spacing between summary-stats events.
const STATS_EMIT_INTERVAL_S: f64 = 60.0;

const MEASUREMENT_CAP: usize = 200;

/// Measures how long the market takes to reprice after an event we
/// detected: the gap between our detection timestamp and the first ≥2¢
/// move of the matched token's price.
pub struct EdgeTracker {
    client: Arc<GammaClient>,
    bus: Arc<EventBus>,
    move_threshold: f64,
    pending: Mutex<HashMap<String, PendingEdge>>,
    measurements: Mutex<VecDeque<EdgeMeasurement>>,
    last_stats_emit: Mutex<f64>,
}

impl EdgeTracker {
    pub fn new(client: Arc<GammaClient>, bus: Arc<EventBus>) -> Self {
        Self::with_threshold(client, bus, PRICE_MOVE_THRESHOLD)
    }

    pub fn with_threshold(
        client: Arc<GammaClient>,
        bus: Arc<EventBus>,
        move_threshold: f64,
    ) -> Self {
        Self {
            client,
            bus,
            move_threshold,
            pending: Mutex::new(HashMap::new()),
            measurements: Mutex::new(VecDeque::new()),
            last_stats_emit: Mutex::new(now_ts()),
        }
    }

    /// Register an opportunity for latency tracking. Duplicate events
    /// (same fixture/type/minute) are ignored.
    pub async fn track(&self, event: &LiveEvent, opp: &DetectedOpportunity) {
        let event_id = format!(
            "{}_{}_{}",
            event.fixture_id,
            event.kind.as_str(),
            event.minute
        );
        let mut pending = self.pending.lock().await;
        if pending.contains_key(&event_id) {
            return;
        }
        debug!(
            "[edge] tracking {event_id} (token {}, price {:.3})",
            opp.token_id, opp.market_price
        );
        pending.insert(
            event_id.clone(),
            PendingEdge {
                event_id,
                event_type: event.kind.as_str().to_string(),
                event_ts: event.detected_at,
                token_id: opp.token_id.clone(),
                price_at_detection: opp.market_price,
                expected_direction: opp.outcome,
                fixture_id: event.fixture_id,
                feed_source: event.source,
            },
        );
    }

    /// One pass of the edge loop: expire old entries, fetch current prices
    /// for all pending tokens in one batched request, resolve any edge that
    /// has moved, and periodically emit summary stats.
    pub async fn poll_pending(&self) {
        let token_ids: Vec<String> = {
            let mut pending = self.pending.lock().await;
            let now = now_ts();
            pending.retain(|eid, p| {
                let keep = now - p.event_ts <= MAX_TRACK_WINDOW_S;
                if !keep {
                    debug!("[edge] expired without price move: {eid}");
                }
                keep
            });
            let mut ids: Vec<String> =
                pending.values().map(|p| p.token_id.clone()).collect();
            ids.sort();
            ids.dedup();
            ids
        };

        if !token_ids.is_empty() {
            let markets = self.client.markets_by_token_ids(&token_ids).await;
            let mut price_map: HashMap<String, f64> = HashMap::new();
            for market in &markets {
                if let Some(price) = market.best_ask.or(market.best_bid) {
                    for tid in market.token_id_list() {
                        price_map.insert(tid, price);
                    }
                }
            }
            if !price_map.is_empty() {
                self.resolve_moved(&price_map).await;
            }
        }

        self.maybe_emit_stats().await;
    }

    async fn resolve_moved(&self, price_map: &HashMap<String, f64>) {
        let mut resolved: Vec<EdgeMeasurement> = Vec::new();
        {
            let mut pending = self.pending.lock().await;
            let now = now_ts();
            pending.retain(|_, p| {
                let Some(&current) = price_map.get(&p.token_id) else {
                    return true;
                };
                let delta = current - p.price_at_detection;
                if delta.abs() < self.move_threshold {
                    return true;
                }
                resolved.push(EdgeMeasurement {
                    event_id: p.event_id.clone(),
                    event_type: p.event_type.clone(),
                    latency_s: now - p.event_ts,
                    price_at_detection: p.price_at_detection,
                    price_after_move: current,
                    price_delta: delta,
                    detected_at: p.event_ts,
                    price_moved_at: now,
                    feed_source: p.feed_source,
                });
                false
            });
        }

        if resolved.is_empty() {
            return;
        }

        let mut measurements = self.measurements.lock().await;
        for m in resolved {
            info!(
                "[edge] {} → price moved in {:.1}s (delta {:+.3})  [{}]",
                m.event_type,
                m.latency_s,
                m.price_delta,
                m.feed_source.as_str()
            );
            self.bus.publish("datafeed_edge_measurement", m.to_json());
            measurements.push_back(m);
            if measurements.len() > MEASUREMENT_CAP {
                measurements.pop_front();
            }
        }
    }

    async fn maybe_emit_stats(&self) {
        {
            let mut last = self.last_stats_emit.lock().await;
            if now_ts() - *last < STATS_EMIT_INTERVAL_S {
                return;
            }
            *last = now_ts();
        }
        let stats = self.stats().await;
        if stats["total_tracked"].as_u64().unwrap_or(0) > 0 {
            self.bus.publish("datafeed_edge_stats", stats);
        }
    }

    pub async fn stats(&self) -> serde_json::Value {
        let measurements = self.measurements.lock().await;
        if measurements.is_empty() {
            return json!({
                "total_tracked": 0,
                "avg_latency_s": null,
                "p50_latency_s": null,
                "p95_latency_s": null,
            });
        }

        let mut latencies: Vec<f64> = measurements.iter().map(|m| m.latency_s).collect();
        latencies.sort_by(|a, b| a.total_cmp(b));
        let n = latencies.len();
        let mean = latencies.iter().sum::<f64>() / n as f64;
        let p50 = latencies[n / 2];
        let p95 = latencies[((n as f64 * 0.95) as usize).min(n - 1)];

        json!({
            "total_tracked": n,
            "avg_latency_s": (mean * 100.0).round() / 100.0,
            "p50_latency_s": (p50 * 100.0).round() / 100.0,
            "p95_latency_s": (p95 * 100.0).round() / 100.0,
        })
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn measurements(&self) -> Vec<EdgeMeasurement> {
        self.measurements.lock().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::http::HttpFetcher;
    use crate::models::datafeed::{EventKind, FeedSource, MarketKind};
    use crate::models::market::Side;
    use serde_json::Value;

    fn tracker() -> EdgeTracker {
        EdgeTracker::new(
            Arc::new(GammaClient::new(Arc::new(HttpFetcher::new()))),
            Arc::new(EventBus::new()),
        )
    }

    fn event(minute: i64) -> LiveEvent {
        LiveEvent {
            fixture_id: 5,
            home_team: "Home".into(),
            away_team: "Away".into(),
            home_score: 1,
            away_score: 0,
            minute,
            kind: EventKind::Goal,
            detected_at: now_ts(),
            source: FeedSource::Sportradar,
            raw: Value::Null,
        }
    }

    fn opp(token: &str, price: f64) -> DetectedOpportunity {
        DetectedOpportunity {
            fixture_id: 5,
            market_id: "m".into(),
            market_question: "q".into(),
            token_id: token.into(),
            outcome: Side::Yes,
            fair_value: 0.7,
            market_price: price,
            edge_pct: 10.0,
            source_event: "goal 1-0 min 20".into(),
            detected_at: now_ts(),
            market_kind: MarketKind::GameWinner,
            ou_line: None,
        }
    }

    #[tokio::test]
    async fn test_track_dedups_same_event() {
        let t = tracker();
        t.track(&event(20), &opp("tok", 0.5)).await;
        t.track(&event(20), &opp("tok", 0.6)).await;
        assert_eq!(t.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_on_price_move() {
        let t = tracker();
        t.track(&event(20), &opp("tok", 0.50)).await;

        let mut prices = HashMap::new();
        prices.insert("tok".to_string(), 0.53);
        t.resolve_moved(&prices).await;

        assert_eq!(t.pending_count().await, 0);
        let measurements = t.measurements().await;
        assert_eq!(measurements.len(), 1);
        let m = &measurements[0];
        assert!(m.latency_s >= 0.0 && m.latency_s <= MAX_TRACK_WINDOW_S);
        assert!(m.price_delta.abs() >= PRICE_MOVE_THRESHOLD);
        assert!((m.price_delta - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_small_move_keeps_pending() {
        let t = tracker();
        t.track(&event(20), &opp("tok", 0.50)).await;

        let mut prices = HashMap::new();
        prices.insert("tok".to_string(), 0.51);
        t.resolve_moved(&prices).await;

        assert_eq!(t.pending_count().await, 1);
        assert!(t.measurements().await.is_empty());
    }

    #[tokio::test]
    async fn test_expiry_without_measurement() {
        let t = tracker();
        let mut e = event(20);
        e.detected_at = now_ts() - MAX_TRACK_WINDOW_S - 1.0;
        t.track(&e, &opp("tok", 0.50)).await;

        t.poll_pending().await;
        assert_eq!(t.pending_count().await, 0);
        assert!(t.measurements().await.is_empty());
    }

    #[tokio::test]
    async fn test_stats_shape() {
        let t = tracker();
        let empty = t.stats().await;
        assert_eq!(empty["total_tracked"], 0);
        assert!(empty["avg_latency_s"].is_null());

        t.track(&event(20), &opp("tok", 0.50)).await;
        let mut prices = HashMap::new();
        prices.insert("tok".to_string(), 0.60);
        t.resolve_moved(&prices).await;

        let stats = t.stats().await;
        assert_eq!(stats["total_tracked"], 1);
        assert!(stats["avg_latency_s"].is_number());
    }
}
