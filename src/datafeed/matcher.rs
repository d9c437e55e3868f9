use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::events::now_ts;
use crate::feeds::gamma::GammaClient;
use crate::models::datafeed::{LiveEvent, MarketKind, MatchedMarket};
use crate::models::market::GammaMarket;

/// Market catalogue cache lifetime.
const CACHE_TTL_S: f64 = 300.0;

/// Base acceptance score, and the relaxed one used when either team is
/// already present in the reference portfolio's open positions.
const MATCH_THRESHOLD: f64 = 0.50;
const REFERENCE_THRESHOLD: f64 = 0.35;

/// Abbreviations expanded before matching.
const ABBREVIATIONS: &[(&str, &str)] = &[
    ("man utd", "manchester united"),
    ("man city", "manchester city"),
    ("psg", "paris saint-germain"),
    ("inter", "inter milan"),
    ("atletico", "atletico madrid"),
    ("ac milan", "milan"),
    ("spurs", "tottenham"),
    ("bvb", "borussia dortmund"),
];

pub fn normalize(name: &str) -> String {
    let n = name.to_lowercase().trim().to_string();
    for (abbr, full) in ABBREVIATIONS {
        if n == *abbr {
            return full.to_string();
        }
    }
    n
}

/// Fuzzy-matches a live event's team names against active Polymarket soccer
/// markets. Positions already held by the reference portfolio are tried
/// first (with a relaxed threshold) to cut false matches; the global
/// catalogue, cached for five minutes, is the fallback.
pub struct MarketMatcher {
    client: Arc<GammaClient>,
    cache: Mutex<(Vec<GammaMarket>, f64)>,
    ou_re: Regex,
    btts_re: Regex,
}

impl MarketMatcher {
    pub fn new(client: Arc<GammaClient>) -> Self {
        Self {
            client,
            cache: Mutex::new((Vec::new(), 0.0)),
            ou_re: Regex::new(r"(?i)\bo/?u\s*(\d+(?:\.\d+)?)").expect("valid o/u regex"),
            btts_re: Regex::new(r"(?i)both teams (to )?score").expect("valid btts regex"),
        }
    }

    /// Find the best market for this event. `reference` carries the open
    /// positions of an external portfolio as (title, token_id, price).
    pub async fn find_market(
        &self,
        event: &LiveEvent,
        reference: &[(String, String, f64)],
    ) -> Option<MatchedMarket> {
        let home = normalize(&event.home_team);
        let away = normalize(&event.away_team);
        let team_in_reference = reference.iter().any(|(title, _, _)| {
            let t = normalize(title);
            t.contains(&home) || t.contains(&away)
        });
        let threshold = if team_in_reference {
            REFERENCE_THRESHOLD
        } else {
            MATCH_THRESHOLD
        };

        // Pass 1: reference-portfolio positions.
        let mut best: Option<(f64, MatchedMarket)> = None;
        for (title, token_id, price) in reference {
            let score = score(&normalize(title), &home, &away);
            if score >= threshold && best.as_ref().is_none_or(|(s, _)| score > *s) {
                let (kind, ou_line) = self.classify(title);
                best = Some((
                    score,
                    MatchedMarket {
                        market_id: String::new(),
                        question: title.clone(),
                        kind,
                        token_id: token_id.clone(),
                        token_id_no: String::new(),
                        current_price: *price,
                        ou_line,
                    },
                ));
            }
        }
        if let Some((score, market)) = best {
            debug!(
                "Matched '{} vs {}' → reference '{}' (score={score:.2})",
                event.home_team, event.away_team, market.question
            );
            return Some(market);
        }

        // Pass 2: global catalogue.
        let markets = self.catalogue().await;
        let mut best: Option<(f64, GammaMarket)> = None;
        for market in markets {
            let title = normalize(market.question());
            let s = score(&title, &home, &away);
            if best.as_ref().is_none_or(|(bs, _)| s > *bs) {
                best = Some((s, market));
            }
        }

        let (best_score, market) = best?;
        if best_score < threshold {
            return None;
        }
        // The catalogue only carries a usable price on the best ask.
        let price = market.best_ask?;
        let (yes_id, no_id) = market.extract_token_ids();
        if yes_id.is_empty() {
            return None;
        }
        let question = market.question().to_string();
        let (kind, ou_line) = self.classify(&question);
        debug!(
            "Matched '{} vs {}' → '{}' (score={best_score:.2})",
            event.home_team, event.away_team, question
        );
        Some(MatchedMarket {
            market_id: market.condition_id().to_string(),
            question,
            kind,
            token_id: yes_id,
            token_id_no: no_id,
            current_price: price,
            ou_line,
        })
    }

    /// Classify a market title: `o/u <number>` → over/under with parsed
    /// line, "both teams (to) score" → BTTS, anything else → game winner.
    pub fn classify(&self, title: &str) -> (MarketKind, Option<f64>) {
        if let Some(caps) = self.ou_re.captures(title) {
            let line = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok());
            if line.is_some() {
                return (MarketKind::OverUnder, line);
            }
        }
        if self.btts_re.is_match(title) {
            return (MarketKind::BothTeamsScore, None);
        }
        (MarketKind::GameWinner, None)
    }

    async fn catalogue(&self) -> Vec<GammaMarket> {
        {
            let cache = self.cache.lock().await;
            if !cache.0.is_empty() && now_ts() - cache.1 < CACHE_TTL_S {
                return cache.0.clone();
            }
        }

        let markets = self.client.markets_by_tag("Soccer", 200).await;
        if !markets.is_empty() {
            let mut cache = self.cache.lock().await;
            *cache = (markets.clone(), now_ts());
            debug!("MarketMatcher: cached {} soccer markets", markets.len());
        }
        markets
    }
}

/// Combined similarity of a market title to two team names: the better
/// normalized-Levenshtein ratio of title↔team, blended equally with the
/// share of team words present in the title.
pub fn score(title: &str, home: &str, away: &str) -> f64 {
    let ratio_home = strsim::normalized_levenshtein(title, home);
    let ratio_away = strsim::normalized_levenshtein(title, away);

    let title_words: HashSet<&str> = title.split_whitespace().collect();
    let team_words: HashSet<&str> = home
        .split_whitespace()
        .chain(away.split_whitespace())
        .collect();
    let overlap = team_words.intersection(&title_words).count();
    let word_score = if team_words.is_empty() {
        0.0
    } else {
        overlap as f64 / team_words.len() as f64
    };

    ratio_home.max(ratio_away) * 0.5 + word_score * 0.5
}
