// End-to-end decision pipeline tests.
//
// Trades are fed straight into a `Sentinel` with explicit timestamps, so no network or wall
// clock is involved. Delivery runs on tokio's paused clock.
//
// Run with: cargo test -p flow-sentinel --test pipeline

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use flow_sentinel::{
    Evaluation, Sentinel, SentinelConfig, Side, Trade,
    alert::{ChannelSink, Notification},
    config::{FilterConfig, FilterKind, InstrumentConfig},
    cooldown::CooldownManager,
    filter::FilterStack,
    signal::{DenyReason, SignalEngine, SignalLabel},
    types::symbol,
    window::WindowAggregator,
};
use tokio::sync::mpsc;

// ============================================================================
// Helpers
// ============================================================================

/// Wednesday 2024-01-03 12:00:00 UTC.
fn noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 3, 12, 0, 0).unwrap()
}

fn xrp_settings(filters: FilterConfig) -> SentinelConfig {
    SentinelConfig {
        instruments: vec![
            InstrumentConfig::new("XRPUSDT")
                .with_min_volume(1_000_000.0)
                .with_min_dominance(65.0)
                .with_min_price_change(0.6),
        ],
        filters,
        ..Default::default()
    }
}

fn sentinel(settings: &SentinelConfig) -> (Sentinel, mpsc::UnboundedReceiver<Notification>) {
    let store = Arc::new(settings.store().unwrap());
    let (sink, rx) = ChannelSink::new();
    (Sentinel::new(store, settings, Arc::new(sink)), rx)
}

fn trade(time: DateTime<Utc>, price: f64, notional: f64, side: Side) -> Trade {
    Trade {
        symbol: symbol("XRPUSDT"),
        time_ms: time.timestamp_millis(),
        price,
        quantity: notional / price,
        is_maker_sell: side == Side::Sell,
    }
}

/// $1.2M aggressive buying against $200k aggressive selling, ending at `last_price`. The
/// closing trade lands in the next wall-clock minute so the decision gate opens on it.
fn feed_squeeze(sentinel: &Sentinel, last_price: f64) -> Option<Evaluation> {
    let start = noon() + TimeDelta::seconds(10);
    let build_up = [
        (start, trade(start, 0.50, 1_000_000.0, Side::Buy)),
        (
            start + TimeDelta::seconds(20),
            trade(start + TimeDelta::seconds(20), 0.50, 200_000.0, Side::Sell),
        ),
    ];
    for (now, trade) in build_up {
        if let Some(evaluation) = sentinel.on_trade(&trade, now) {
            assert!(
                !matches!(evaluation, Evaluation::Fired(_)),
                "build-up must not fire: {evaluation:?}"
            );
        }
    }

    let close = noon() + TimeDelta::seconds(65);
    sentinel.on_trade(&trade(close, last_price, 200_000.0, Side::Buy), close)
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_short_squeeze_fires_and_is_delivered_next_minute() {
    let settings = xrp_settings(FilterConfig::disabled());
    let (sentinel, mut rx) = sentinel(&settings);

    let Some(Evaluation::Fired(alert)) = feed_squeeze(&sentinel, 0.504) else {
        panic!("expected the closing trade to fire");
    };

    assert_eq!(alert.direction, Side::Buy);
    assert_eq!(alert.label, SignalLabel::ShortSqueeze);
    assert_eq!(alert.label.to_string(), "short squeeze");
    assert!((alert.dominance_pct - 85.714).abs() < 0.01, "{}", alert.dominance_pct);
    assert!((alert.price_change_pct - 0.8).abs() < 1e-9, "{}", alert.price_change_pct);
    assert!((alert.volume_usd - 1_400_000.0).abs() < 1e-6);
    assert_eq!(alert.trade_count, 3);

    // Window reset and cooldown committed at decision time, before delivery
    assert_eq!(sentinel.windows().trade_count(&symbol("XRPUSDT")), 0);
    assert!(
        !sentinel
            .cooldowns()
            .is_eligible(&symbol("XRPUSDT"), Side::Buy, alert.time)
    );
    assert!(rx.try_recv().is_err());

    let delivered = tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("delivery within the next minute");
    assert_eq!(delivered, Some(Notification::FlowAlert(alert)));
    assert_eq!(sentinel.dispatcher().pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_falling_price_against_buy_flow_is_denied() {
    let settings = xrp_settings(FilterConfig::disabled());
    let (sentinel, mut rx) = sentinel(&settings);

    let Some(Evaluation::Denied(reason)) = feed_squeeze(&sentinel, 0.498) else {
        panic!("expected the closing trade to be denied");
    };

    assert!(matches!(reason, DenyReason::PriceChangeTooSmall { .. }), "{reason:?}");
    assert_eq!(reason.summary(), "price change too small");
    assert!(reason.to_string().starts_with("price change too small"));

    // Nothing committed on a denial
    assert_eq!(sentinel.windows().trade_count(&symbol("XRPUSDT")), 3);
    assert_eq!(sentinel.dispatcher().pending_count(), 0);
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_volatility_kill_switch_denies_and_notifies_once() {
    let mut filters = FilterConfig::disabled();
    filters.volatility.enabled = true;
    filters.volatility.threshold_pct = 2.0;
    filters.volatility.timeframe_minutes = 15.0;
    let settings = xrp_settings(filters);
    let (sentinel, mut rx) = sentinel(&settings);
    let start = noon();

    assert_eq!(sentinel.observe_reference_price(100.0, start).await, None);
    assert_eq!(
        sentinel
            .observe_reference_price(100.0, start + TimeDelta::minutes(1))
            .await,
        None
    );
    let trigger = sentinel
        .observe_reference_price(103.0, start + TimeDelta::minutes(2))
        .await
        .expect("3% move engages the kill-switch");
    assert!((trigger.move_pct - 3.0).abs() < 1e-9);
    assert_eq!(rx.recv().await, Some(Notification::VolatilityPause(trigger)));

    // An otherwise valid squeeze is blocked while paused
    let symbol = symbol("XRPUSDT");
    let now = start + TimeDelta::minutes(3);
    sentinel
        .windows()
        .record(&trade(now - TimeDelta::seconds(30), 0.50, 1_200_000.0, Side::Buy));
    sentinel.windows().record(&trade(now, 0.504, 200_000.0, Side::Sell));
    match sentinel.evaluate(&symbol, now) {
        Evaluation::Denied(DenyReason::Filter { kind, .. }) => assert_eq!(kind, FilterKind::Volatility),
        other => panic!("expected volatility denial, got {other:?}"),
    }

    // Still paused: no second notification
    assert_eq!(sentinel.observe_reference_price(106.0, now).await, None);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_stop_cluster_does_not_repause_from_expired_stops() {
    struct TestCase {
        offset_minutes: i64,
        expect_trigger: bool,
    }

    let mut filters = FilterConfig::disabled();
    filters.stop_cluster.enabled = true;
    filters.stop_cluster.max_stops = 2;
    filters.stop_cluster.window_minutes = 30.0;
    filters.stop_cluster.pause_minutes = 5.0;
    let settings = xrp_settings(filters);
    let (sentinel, _rx) = sentinel(&settings);

    let tests = vec![
        TestCase {
            // TC0: first stop
            offset_minutes: 0,
            expect_trigger: false,
        },
        TestCase {
            // TC1: second stop inside the window pauses
            offset_minutes: 10,
            expect_trigger: true,
        },
        TestCase {
            // TC2: 31 minutes after the first, pause over, old stops spent
            offset_minutes: 31,
            expect_trigger: false,
        },
    ];

    for (index, test) in tests.into_iter().enumerate() {
        let now = noon() + TimeDelta::minutes(test.offset_minutes);
        let trigger = sentinel.record_stop(now).await;
        assert_eq!(trigger.is_some(), test.expect_trigger, "TC{} failed", index);
    }

    let status = sentinel.status(noon() + TimeDelta::minutes(31));
    assert_eq!(status.filters.stop_cluster.pauses, 1);
    assert_eq!(status.filters.stop_cluster.paused_until, None);
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_cooldown_holds_for_exactly_five_minutes() {
    let settings = SentinelConfig {
        instruments: vec![InstrumentConfig::new("XRPUSDT").with_cooldown_minutes(5.0)],
        ..Default::default()
    };
    let cooldowns = CooldownManager::new(Arc::new(settings.store().unwrap()));
    let symbol = symbol("XRPUSDT");
    let start = noon();
    cooldowns.record_alert(&symbol, Side::Buy, start);

    for offset_ms in [0, 1, 60_000, 299_999] {
        let now = start + TimeDelta::milliseconds(offset_ms);
        assert!(!cooldowns.is_eligible(&symbol, Side::Buy, now), "{offset_ms}ms");
    }
    for offset_ms in [300_000, 300_001, 3_600_000] {
        let now = start + TimeDelta::milliseconds(offset_ms);
        assert!(cooldowns.is_eligible(&symbol, Side::Buy, now), "{offset_ms}ms");
    }

    // Sides are independent
    assert!(cooldowns.is_eligible(&symbol, Side::Sell, start));
}

#[test]
fn test_window_volume_matches_surviving_trades() {
    let window = Duration::from_secs(180);
    let aggregator = WindowAggregator::new(window);
    let symbol = symbol("XRPUSDT");
    let start = noon();

    // Mixed sides, one late print inside the window and one far outside it
    let offsets_secs = [0, 30, 95, 60, 200, 10, 240, 330, 300];
    let mut recorded = Vec::new();
    for (index, offset) in offsets_secs.into_iter().enumerate() {
        let side = if index % 3 == 0 { Side::Sell } else { Side::Buy };
        let trade = trade(
            start + TimeDelta::seconds(offset),
            0.5 + index as f64 * 0.001,
            10_000.0 + index as f64 * 1_000.0,
            side,
        );
        aggregator.record(&trade);
        recorded.push(trade);

        let latest = recorded.iter().map(|t| t.time_ms).max().unwrap();
        let cutoff = latest - window.as_millis() as i64;
        let expected: f64 = recorded
            .iter()
            .filter(|t| t.time_ms >= cutoff)
            .map(Trade::notional)
            .sum();

        let first = aggregator.snapshot(&symbol).unwrap();
        let second = aggregator.snapshot(&symbol).unwrap();
        assert_eq!(first, second, "snapshot after trade {index} not stable");
        assert!(
            (first.total_volume() - expected).abs() < 1e-6,
            "trade {index}: {} != {expected}",
            first.total_volume()
        );
        assert!((50.0..=100.0).contains(&first.dominance_pct), "{}", first.dominance_pct);
    }
}

#[test]
fn test_signal_engine_is_deterministic() {
    let mut filters = FilterConfig::default();
    filters.time.enabled = true;
    let settings = xrp_settings(filters);
    let store = Arc::new(settings.store().unwrap());
    let engine = SignalEngine::new(Arc::clone(&store), Arc::new(FilterStack::new(store)));

    let aggregator = WindowAggregator::new(Duration::from_secs(180));
    let now = noon();
    aggregator.record(&trade(now - TimeDelta::seconds(60), 0.50, 1_200_000.0, Side::Buy));
    aggregator.record(&trade(now, 0.504, 200_000.0, Side::Sell));
    let snapshot = aggregator.snapshot(&symbol("XRPUSDT")).unwrap();

    let first = engine.decide(&symbol("XRPUSDT"), &snapshot, now);
    for _ in 0..5 {
        assert_eq!(engine.decide(&symbol("XRPUSDT"), &snapshot, now), first);
    }
    assert!(first.is_allowed(), "{first:?}");
}
