//! End-to-end flows through the public API: bus replay ordering, the
//! mirror portfolio's slot/queue lifecycle, and detection math on live
//! event sequences.

use std::sync::Arc;

use arbhawk::events::EventBus;
use arbhawk::mirror::portfolio::{MirrorPortfolio, SLOTS, SLOT_SIZE_USDC};
use arbhawk::models::datafeed::{EventKind, FeedSource, LiveEvent, MarketKind, MatchedMarket};
use arbhawk::models::market::{GammaMarket, Side};
use arbhawk::models::mirror::{AddressRef, PositionData, TradeResultKind};
use arbhawk::datafeed::detector::OpportunityDetector;
use arbhawk::signals::arbitrage::find_arb_opportunity;

fn whale() -> AddressRef {
    AddressRef {
        address: "0xwhale".into(),
        nickname: "whale".into(),
    }
}

fn position(token: &str, price: f64) -> PositionData {
    serde_json::from_value(serde_json::json!({
        "asset": token,
        "conditionId": format!("cond-{token}"),
        "title": format!("Market {token}"),
        "outcome": "Yes",
        "curPrice": price,
    }))
    .unwrap()
}

fn goal_event(home: i64, away: i64, minute: i64) -> LiveEvent {
    LiveEvent {
        fixture_id: 42,
        home_team: "Arsenal".into(),
        away_team: "Chelsea".into(),
        home_score: home,
        away_score: away,
        minute,
        kind: EventKind::Goal,
        detected_at: arbhawk::events::now_ts(),
        source: FeedSource::ApiFootball,
        raw: serde_json::Value::Null,
    }
}

#[tokio::test]
async fn bus_replays_history_then_streams_live_in_order() {
    let bus = Arc::new(EventBus::new());

    for n in 0..5 {
        bus.publish("warmup", serde_json::json!({ "n": n }));
    }

    let sub = bus.subscribe();
    bus.publish("live", serde_json::json!({ "n": 5 }));

    // All five history events arrive before the live one, in publish order.
    for n in 0..5 {
        let event = sub.recv().await;
        assert_eq!(event.topic, "warmup");
        assert_eq!(event.data["n"], n);
    }
    let live = sub.recv().await;
    assert_eq!(live.topic, "live");

    bus.unsubscribe(&sub);
    bus.unsubscribe(&sub); // idempotent
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn mirror_portfolio_full_lifecycle_with_overflow() {
    let bus = Arc::new(EventBus::new());
    let portfolio = MirrorPortfolio::new(bus, 20_000.0);
    let source = whale();

    // Fill every slot.
    for i in 0..SLOTS {
        let opened = portfolio
            .open_position(&source, &position(&format!("tok{i}"), 0.50))
            .await;
        assert!(opened.is_some(), "slot {i} should open");
    }
    assert_eq!(portfolio.open_count().await, SLOTS);
    assert_eq!(portfolio.balance().await, 0.0);

    // Overflow goes to the queue, dedup drops a repeat.
    assert!(portfolio
        .open_position(&source, &position("queued-tok", 0.40))
        .await
        .is_none());
    assert!(portfolio
        .open_position(&source, &position("queued-tok", 0.40))
        .await
        .is_none());
    assert_eq!(portfolio.queue_len().await, 1);

    // A winning close frees a slot; the queued trade takes it over.
    let resolved = portfolio
        .close_position_by_token(&source, &position("tok0", 0.65))
        .await
        .expect("tok0 is open");
    assert_eq!(resolved.result, TradeResultKind::Win);
    assert_eq!(portfolio.queue_len().await, 0);
    assert_eq!(portfolio.open_count().await, SLOTS);

    // Accounting invariant: balance + deployed ≤ starting + realized.
    let balance = portfolio.balance().await;
    let deployed = portfolio.open_count().await as f64 * SLOT_SIZE_USDC;
    let realized = portfolio.realized_pnl().await;
    assert!(balance >= 0.0);
    assert!(balance + deployed <= 20_000.0 + realized + 1e-6);
}

#[tokio::test]
async fn goal_sequence_produces_opportunity_once_fresh() {
    let detector = OpportunityDetector::new(3.0, 45.0);
    let market = MatchedMarket {
        market_id: "m".into(),
        question: "Arsenal vs Chelsea winner".into(),
        kind: MarketKind::GameWinner,
        token_id: "tok-yes".into(),
        token_id_no: "tok-no".into(),
        current_price: 0.55,
        ou_line: None,
    };

    // 1-0 in the first half: fair 0.62 vs market 0.55 → 7pp edge, Yes.
    let opp = detector
        .evaluate(&goal_event(1, 0, 30), &market)
        .expect("edge should be detected");
    assert_eq!(opp.outcome, Side::Yes);
    assert!(opp.edge_pct > 3.0);

    // The same state seen stale is rejected.
    let mut stale = goal_event(1, 0, 30);
    stale.detected_at -= 60.0;
    assert!(detector.evaluate(&stale, &market).is_none());
}

#[test]
fn kernel_and_sizing_against_known_numbers() {
    let market: GammaMarket = serde_json::from_value(serde_json::json!({
        "conditionId": "0xc",
        "question": "Team A vs Team B",
        "tokens": [
            {"outcome": "Yes", "token_id": "ya"},
            {"outcome": "No", "token_id": "nb"},
        ],
    }))
    .unwrap();

    let opp = find_arb_opportunity(&market, 0.48, 0.49, 100.0, 200.0, 0.5).unwrap();
    assert!((opp.shares - 206.185567).abs() < 1e-3);
    assert!((opp.estimated_profit_usdc - 6.1856).abs() < 1e-3);
    assert!(opp.yes_ask + opp.no_ask < 1.0);

    assert!(find_arb_opportunity(&market, 0.55, 0.48, 100.0, 200.0, 0.5).is_none());
}
