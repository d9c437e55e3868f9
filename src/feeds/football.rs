use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::info;

use crate::events::{now_ts, EventBus};
use crate::feeds::http::{classify_status, FetchError, HttpFetcher};
use crate::models::datafeed::{EventKind, FeedSource, LiveEvent};

pub const FIXTURES_URL: &str = "https://v3.football.api-sports.io/fixtures";

/// Live soccer feed via API-Football v3. Each poll fetches all in-play
/// fixtures and diffs them against the previous snapshot to surface
/// match_start / goal / red_card / match_end events.
pub struct FootballFeed {
    http: Arc<HttpFetcher>,
    bus: Arc<EventBus>,
    api_key: String,
    url: String,
    last_fixtures: Mutex<HashMap<i64, FixtureRecord>>,
    calls_remaining: Mutex<i64>,
}

impl FootballFeed {
    pub fn new(http: Arc<HttpFetcher>, bus: Arc<EventBus>, api_key: String) -> Self {
        Self {
            http,
            bus,
            api_key,
            url: FIXTURES_URL.to_string(),
            last_fixtures: Mutex::new(HashMap::new()),
            calls_remaining: Mutex::new(100),
        }
    }

    pub async fn poll(&self) -> Result<Vec<LiveEvent>, FetchError> {
        let resp = self
            .http
            .client()
            .get(&self.url)
            .query(&[("live", "all")])
            .header("x-apisports-key", &self.api_key)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let remaining = resp
            .headers()
            .get("x-ratelimit-requests-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0);
        *self.calls_remaining.lock().await = remaining;
        self.emit_api_status(remaining).await;

        if let Some(err) = classify_status(resp.status()) {
            return Err(err);
        }

        let body: FixturesResponse = resp
            .json()
            .await
            .map_err(|e| FetchError::Transient(format!("bad JSON: {e}")))?;

        let events = self.diff(body.response).await;
        info!(
            "DataFeed poll: {} new events ({} calls remaining)",
            events.len(),
            remaining
        );
        Ok(events)
    }

    /// Diff the fetched fixture set against the previous snapshot.
    async fn diff(&self, fixtures: Vec<FixtureRecord>) -> Vec<LiveEvent> {
        let mut new_events = Vec::new();
        let mut current: HashMap<i64, FixtureRecord> = HashMap::new();
        let mut last = self.last_fixtures.lock().await;

        for f in fixtures {
            let fid = f.fixture.id;
            match last.get(&fid) {
                None => {
                    new_events.push(make_event(&f, EventKind::MatchStart));
                }
                Some(prev) => {
                    let (ph, pa) = prev.score();
                    let (ch, ca) = f.score();
                    if ch > ph || ca > pa {
                        new_events.push(make_event(&f, EventKind::Goal));
                    } else if f.events.len() > prev.events.len() {
                        // New entry at the tail of the events array.
                        if let Some(latest) = f.events.last() {
                            if latest.kind.as_deref() == Some("Card")
                                && latest.detail.as_deref() == Some("Red Card")
                            {
                                new_events.push(make_event(&f, EventKind::RedCard));
                            }
                        }
                    }
                }
            }
            current.insert(fid, f);
        }

        // Fixtures gone from the live feed have ended.
        for (fid, prev) in last.iter() {
            if !current.contains_key(fid) {
                new_events.push(make_event(prev, EventKind::MatchEnd));
            }
        }

        *last = current;
        new_events
    }

    async fn emit_api_status(&self, remaining: i64) {
        let health = if remaining > 20 {
            "green"
        } else if remaining > 5 {
            "yellow"
        } else {
            "red"
        };
        self.bus.publish(
            "datafeed_api_status",
            json!({
                "source": "api_football",
                "calls_remaining": remaining,
                "last_call_ts": now_ts(),
                "health": health,
            }),
        );
    }
}

fn make_event(f: &FixtureRecord, kind: EventKind) -> LiveEvent {
    let (home_score, away_score) = f.score();
    LiveEvent {
        fixture_id: f.fixture.id,
        home_team: f
            .teams
            .home
            .as_ref()
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| "Home".to_string()),
        away_team: f
            .teams
            .away
            .as_ref()
            .and_then(|t| t.name.clone())
            .unwrap_or_else(|| "Away".to_string()),
        home_score,
        away_score,
        minute: f.fixture.status.elapsed.unwrap_or(0),
        kind,
        detected_at: now_ts(),
        source: FeedSource::ApiFootball,
        raw: serde_json::to_value(f).unwrap_or(Value::Null),
    }
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
struct FixturesResponse {
    #[serde(default)]
    response: Vec<FixtureRecord>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
pub struct FixtureRecord {
    #[serde(default)]
    fixture: FixtureInfo,
    #[serde(default)]
    teams: FixtureTeams,
    #[serde(default)]
    goals: FixtureGoals,
    #[serde(default)]
    events: Vec<FixtureEvent>,
}

impl FixtureRecord {
    fn score(&self) -> (i64, i64) {
        (self.goals.home.unwrap_or(0), self.goals.away.unwrap_or(0))
    }
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FixtureInfo {
    #[serde(default)]
    id: i64,
    #[serde(default)]
    status: FixtureStatus,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FixtureStatus {
    elapsed: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FixtureTeams {
    home: Option<TeamInfo>,
    away: Option<TeamInfo>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct TeamInfo {
    name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FixtureGoals {
    home: Option<i64>,
    away: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize, serde::Serialize)]
struct FixtureEvent {
    #[serde(rename = "type")]
    kind: Option<String>,
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn feed() -> FootballFeed {
        FootballFeed::new(
            Arc::new(HttpFetcher::new()),
            Arc::new(EventBus::new()),
            "test-key".into(),
        )
    }

    fn fixture(id: i64, home: i64, away: i64, elapsed: i64, events: Vec<Value>) -> FixtureRecord {
        serde_json::from_value(json!({
            "fixture": {"id": id, "status": {"elapsed": elapsed}},
            "teams": {"home": {"name": "Arsenal"}, "away": {"name": "Chelsea"}},
            "goals": {"home": home, "away": away},
            "events": events,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_new_fixture_is_match_start() {
        let f = feed();
        let events = f.diff(vec![fixture(1, 0, 0, 5, vec![])]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::MatchStart);
        assert_eq!(events[0].home_team, "Arsenal");
    }

    #[tokio::test]
    async fn test_score_change_is_goal() {
        let f = feed();
        f.diff(vec![fixture(1, 0, 0, 10, vec![])]).await;
        let events = f.diff(vec![fixture(1, 1, 0, 23, vec![])]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Goal);
        assert_eq!(events[0].home_score, 1);
        assert_eq!(events[0].minute, 23);
    }

    #[tokio::test]
    async fn test_red_card_detected_at_events_tail() {
        let f = feed();
        f.diff(vec![fixture(1, 1, 0, 30, vec![])]).await;
        let events = f
            .diff(vec![fixture(
                1,
                1,
                0,
                44,
                vec![json!({"type": "Card", "detail": "Red Card"})],
            )])
            .await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::RedCard);
    }

    #[tokio::test]
    async fn test_yellow_card_ignored() {
        let f = feed();
        f.diff(vec![fixture(1, 0, 0, 30, vec![])]).await;
        let events = f
            .diff(vec![fixture(
                1,
                0,
                0,
                35,
                vec![json!({"type": "Card", "detail": "Yellow Card"})],
            )])
            .await;
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn test_disappeared_fixture_is_match_end() {
        let f = feed();
        f.diff(vec![fixture(1, 2, 1, 90, vec![]), fixture(2, 0, 0, 15, vec![])])
            .await;
        let events = f.diff(vec![fixture(2, 0, 0, 20, vec![])]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::MatchEnd);
        assert_eq!(events[0].fixture_id, 1);
    }

    #[tokio::test]
    async fn test_no_change_no_events() {
        let f = feed();
        f.diff(vec![fixture(1, 1, 1, 60, vec![])]).await;
        let events = f.diff(vec![fixture(1, 1, 1, 61, vec![])]).await;
        assert!(events.is_empty());
    }
}
