use serde_json::{json, Value};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::events::{now_ts, EventBus};
use crate::feeds::http::HttpFetcher;
use crate::models::datafeed::{EventKind, FeedSource, LiveEvent};

pub const SOCCER_LIVE_URL: &str =
    "https://api.sportradar.us/soccer/trial/v4/en/schedules/live/summaries.json";
pub const NBA_SCHEDULE_URL: &str = "https://api.sportradar.us/nba/trial/v8/en/games";

/// Second live-data source: Sportradar trial HTTP polling. Soccer comes
/// from the live-summaries endpoint; basketball optionally from the daily
/// schedule (score changes stand in for goals). Diff keys are normalized
/// per sport since the two APIs shape their ids differently.
pub struct SportradarFeed {
    http: Arc<HttpFetcher>,
    bus: Arc<EventBus>,
    api_key: String,
    soccer_url: String,
    last_soccer: Mutex<HashMap<String, Value>>,
    last_basketball: Mutex<HashMap<String, Value>>,
    calls_remaining: Mutex<i64>,
}

impl SportradarFeed {
    pub fn new(http: Arc<HttpFetcher>, bus: Arc<EventBus>, api_key: String) -> Self {
        Self {
            http,
            bus,
            api_key,
            soccer_url: SOCCER_LIVE_URL.to_string(),
            last_soccer: Mutex::new(HashMap::new()),
            last_basketball: Mutex::new(HashMap::new()),
            calls_remaining: Mutex::new(1000),
        }
    }

    pub async fn poll(&self, include_basketball: bool) -> Vec<LiveEvent> {
        let mut events = self.poll_soccer().await;
        if include_basketball {
            events.extend(self.poll_basketball().await);
        }
        events
    }

    // ── Soccer ────────────────────────────────────────────────────────────

    async fn poll_soccer(&self) -> Vec<LiveEvent> {
        if self.api_key.is_empty() {
            return Vec::new();
        }
        let resp = match self
            .http
            .client()
            .get(&self.soccer_url)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(Duration::from_secs(12))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[sportradar] soccer poll error: {e}");
                return Vec::new();
            }
        };

        self.track_rate_limit(&resp).await;
        match resp.status().as_u16() {
            403 => {
                warn!("[sportradar] 403 Forbidden — check trial key");
                return Vec::new();
            }
            429 => {
                warn!("[sportradar] rate limited");
                self.emit_api_status("yellow").await;
                return Vec::new();
            }
            s if s >= 400 => {
                warn!("[sportradar] soccer poll HTTP {s}");
                return Vec::new();
            }
            _ => {}
        }

        let data: Value = match resp.json().await {
            Ok(v) => v,
            Err(e) => {
                warn!("[sportradar] bad soccer payload: {e}");
                return Vec::new();
            }
        };
        let summaries = data
            .get("summaries")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let events = self.diff_soccer(summaries).await;
        info!("[sportradar] poll: {} events", events.len());
        events
    }

    async fn diff_soccer(&self, summaries: Vec<Value>) -> Vec<LiveEvent> {
        let mut new_events = Vec::new();
        let mut current: HashMap<String, Value> = HashMap::new();
        let mut last = self.last_soccer.lock().await;

        for s in summaries {
            let match_id = s
                .pointer("/sport_event/id")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if match_id.is_empty() {
                continue;
            }

            let (home, away) = soccer_teams(&s);
            let home_score = score_field(&s, "/sport_event_status/home_score");
            let away_score = score_field(&s, "/sport_event_status/away_score");
            let minute = played_minute(&s);
            let status = s
                .pointer("/sport_event_status/status")
                .and_then(Value::as_str)
                .unwrap_or("");

            match last.get(&match_id) {
                None => {
                    if status == "live" || status == "inprogress" {
                        new_events.push(make_event(
                            &match_id, &home, &away, home_score, away_score, minute,
                            EventKind::MatchStart, s.clone(),
                        ));
                    }
                }
                Some(prev) => {
                    let ph = score_field(prev, "/sport_event_status/home_score");
                    let pa = score_field(prev, "/sport_event_status/away_score");
                    if home_score > ph || away_score > pa {
                        new_events.push(make_event(
                            &match_id, &home, &away, home_score, away_score, minute,
                            EventKind::Goal, s.clone(),
                        ));
                    }
                }
            }
            current.insert(match_id, s);
        }

        for (mid, prev) in last.iter() {
            if !current.contains_key(mid) {
                let (home, away) = soccer_teams(prev);
                new_events.push(make_event(
                    mid,
                    &home,
                    &away,
                    score_field(prev, "/sport_event_status/home_score"),
                    score_field(prev, "/sport_event_status/away_score"),
                    90,
                    EventKind::MatchEnd,
                    prev.clone(),
                ));
            }
        }

        *last = current;
        new_events
    }

    // ── Basketball ────────────────────────────────────────────────────────

    async fn poll_basketball(&self) -> Vec<LiveEvent> {
        if self.api_key.is_empty() {
            return Vec::new();
        }
        let today = chrono::Utc::now().format("%Y/%m/%d");
        let url = format!("{NBA_SCHEDULE_URL}/{today}/schedule.json");

        let resp = match self
            .http
            .client()
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .timeout(Duration::from_secs(12))
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("[sportradar] nba poll error: {e}");
                return Vec::new();
            }
        };

        self.track_rate_limit(&resp).await;
        if matches!(resp.status().as_u16(), 403 | 429) || resp.status().as_u16() >= 400 {
            return Vec::new();
        }

        let data: Value = match resp.json().await {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };
        let games = data
            .get("games")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let events = self.diff_basketball(games).await;
        info!("[sportradar] nba poll: {} events", events.len());
        events
    }

    async fn diff_basketball(&self, games: Vec<Value>) -> Vec<LiveEvent> {
        let mut new_events = Vec::new();
        let mut current: HashMap<String, Value> = HashMap::new();
        let mut last = self.last_basketball.lock().await;

        for g in games {
            let gid = g.get("id").and_then(Value::as_str).unwrap_or("").to_string();
            if gid.is_empty() {
                continue;
            }
            let home = team_name(&g, "/home/name");
            let away = team_name(&g, "/away/name");
            let hpts = score_field(&g, "/home_points");
            let apts = score_field(&g, "/away_points");
            let status = g.get("status").and_then(Value::as_str).unwrap_or("");

            match last.get(&gid) {
                None => {
                    if status == "inprogress" || status == "halftime" {
                        new_events.push(make_event(
                            &gid, &home, &away, hpts, apts, 0, EventKind::GameStart, g.clone(),
                        ));
                    }
                }
                Some(prev) => {
                    // Any score change stands in for a scoring event.
                    if hpts != score_field(prev, "/home_points")
                        || apts != score_field(prev, "/away_points")
                    {
                        new_events.push(make_event(
                            &gid, &home, &away, hpts, apts, 0, EventKind::Goal, g.clone(),
                        ));
                    }
                }
            }
            current.insert(gid, g);
        }

        for (gid, prev) in last.iter() {
            if !current.contains_key(gid) {
                new_events.push(make_event(
                    gid,
                    &team_name(prev, "/home/name"),
                    &team_name(prev, "/away/name"),
                    score_field(prev, "/home_points"),
                    score_field(prev, "/away_points"),
                    0,
                    EventKind::GameEnd,
                    prev.clone(),
                ));
            }
        }

        *last = current;
        new_events
    }

    // ── Helpers ───────────────────────────────────────────────────────────

    async fn track_rate_limit(&self, resp: &reqwest::Response) {
        if let Some(remaining) = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
        {
            *self.calls_remaining.lock().await = remaining;
        }
        let remaining = *self.calls_remaining.lock().await;
        let health = if remaining > 50 {
            "green"
        } else if remaining > 10 {
            "yellow"
        } else {
            "red"
        };
        self.emit_api_status(health).await;
    }

    async fn emit_api_status(&self, health: &str) {
        let remaining = *self.calls_remaining.lock().await;
        self.bus.publish(
            "datafeed_api_status",
            json!({
                "source": "sportradar",
                "calls_remaining": remaining,
                "last_call_ts": now_ts(),
                "health": health,
            }),
        );
    }
}

/// Stable integer fixture id from a string id like "sr:match:12345".
fn numeric_id(id: &str) -> i64 {
    if let Some(tail) = id.rsplit(':').next() {
        if let Ok(n) = tail.parse::<i64>() {
            return n;
        }
    }
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    (hasher.finish() & 0xFF_FFFF) as i64
}

fn soccer_teams(summary: &Value) -> (String, String) {
    let competitors = summary
        .pointer("/sport_event/competitors")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let find = |qualifier: &str, fallback: &str| {
        competitors
            .iter()
            .find(|c| c.get("qualifier").and_then(Value::as_str) == Some(qualifier))
            .and_then(|c| c.get("name").and_then(Value::as_str))
            .unwrap_or(fallback)
            .to_string()
    };
    (find("home", "Home"), find("away", "Away"))
}

fn team_name(game: &Value, pointer: &str) -> String {
    game.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or("Team")
        .to_string()
}

fn score_field(value: &Value, pointer: &str) -> i64 {
    value.pointer(pointer).and_then(Value::as_i64).unwrap_or(0)
}

/// Minute from the "MM:SS" clock string.
fn played_minute(summary: &Value) -> i64 {
    summary
        .pointer("/sport_event_status/clock/played")
        .and_then(Value::as_str)
        .and_then(|clock| clock.split(':').next())
        .and_then(|m| m.parse::<i64>().ok())
        .unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
fn make_event(
    id: &str,
    home: &str,
    away: &str,
    home_score: i64,
    away_score: i64,
    minute: i64,
    kind: EventKind,
    raw: Value,
) -> LiveEvent {
    LiveEvent {
        fixture_id: numeric_id(id),
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_score,
        away_score,
        minute,
        kind,
        detected_at: now_ts(),
        source: FeedSource::Sportradar,
        raw,
    }
}
