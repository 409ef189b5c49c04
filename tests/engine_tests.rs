mod common;

use std::sync::Arc;

use chrono::Duration;
use rust_decimal::Decimal;

use polyconsensus::consensus::{
    ConsensusEngine, EngineHandle, EngineOutcome, EngineStats, IgnoreReason, ShardContext,
    Suppression, SuppressionReason,
};
use polyconsensus::errors::{IngestError, SubmitError};
use polyconsensus::models::{Notification, Side, WindowKey};
use polyconsensus::store::{AlertStore, MemoryAlertStore};

use common::{buy, event_clock_config, seed_registry, MARKET};

fn price(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

fn engine_with(store: Arc<dyn AlertStore>) -> ConsensusEngine {
    ConsensusEngine::new(
        event_clock_config(),
        seed_registry(&["0xaaa", "0xbbb", "0xccc", "0xddd"]),
        store,
    )
}

#[tokio::test]
async fn test_three_wallets_within_five_minutes_fire_one_alert() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    engine.ingest_raw(buy("0xaaa", 0, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 2, 500, price(41))).await;
    let outcome = engine.ingest_raw(buy("0xccc", 5, 500, price(42))).await;

    let alert = match outcome {
        EngineOutcome::Alerted(alert) => alert,
        other => panic!("expected an alert, got {other:?}"),
    };
    assert_eq!(alert.wallet_count, 3);
    assert_eq!(alert.total_usd, Decimal::from(1500));
    assert_eq!(alert.price, price(41));
    assert_eq!(alert.wallets.len(), 3);
    assert!(alert.wallets.iter().all(|w| w.win_rate.is_some()));

    let key = WindowKey::new(MARKET, 0, Side::Buy);
    assert_eq!(store.alerts_for(&key).await.len(), 1);
}

#[tokio::test]
async fn test_same_scenario_below_size_minimum_is_suppressed() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut config = event_clock_config();
    config.min_total_position_usd = Decimal::from(2000);
    let mut engine = ConsensusEngine::new(
        config,
        seed_registry(&["0xaaa", "0xbbb", "0xccc"]),
        store.clone(),
    );

    engine.ingest_raw(buy("0xaaa", 0, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 2, 500, price(41))).await;
    let outcome = engine.ingest_raw(buy("0xccc", 5, 500, price(42))).await;

    assert!(matches!(
        outcome,
        EngineOutcome::Suppressed(Suppression::PositionTooSmall { .. })
    ));
    assert!(store.is_empty().await);
    assert_eq!(engine.stats().suppressed(SuppressionReason::PositionTooSmall), 1);
}

#[tokio::test]
async fn test_redelivery_under_new_trade_id_does_not_inflate_size() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut config = event_clock_config();
    config.min_total_position_usd = Decimal::from(2000);
    let mut engine = ConsensusEngine::new(
        config,
        seed_registry(&["0xaaa", "0xbbb", "0xccc"]),
        store.clone(),
    );

    engine.ingest_raw(buy("0xaaa", 0, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 2, 500, price(41))).await;

    // The same two fills arrive again from another feed path with other ids.
    for (w, m) in [("0xaaa", 0), ("0xbbb", 2)] {
        let mut again = buy(w, m, 500, price(40));
        again.trade_id = Some(format!("0xtx-{w}"));
        assert!(matches!(
            engine.ingest_raw(again).await,
            EngineOutcome::Ignored(IgnoreReason::Duplicate)
        ));
    }

    let outcome = engine.ingest_raw(buy("0xccc", 5, 500, price(42))).await;
    assert!(matches!(
        outcome,
        EngineOutcome::Suppressed(Suppression::PositionTooSmall { .. })
    ));
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_repeat_ten_minutes_later_hits_cooldown() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    engine.ingest_raw(buy("0xaaa", 0, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 2, 500, price(41))).await;
    assert!(matches!(
        engine.ingest_raw(buy("0xccc", 5, 500, price(42))).await,
        EngineOutcome::Alerted(_)
    ));

    // Same three wallets trade again ten minutes later.
    engine.ingest_raw(buy("0xaaa", 10, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 12, 500, price(41))).await;
    let outcome = engine.ingest_raw(buy("0xccc", 15, 500, price(42))).await;

    assert!(matches!(
        outcome,
        EngineOutcome::Suppressed(Suppression::CooldownActive { .. })
    ));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_consensus_after_cooldown_fires_again() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    for (w, m) in [("0xaaa", 0), ("0xbbb", 2), ("0xccc", 5)] {
        engine.ingest_raw(buy(w, m, 500, price(40))).await;
    }
    for (w, m) in [("0xaaa", 40), ("0xbbb", 41), ("0xccc", 42)] {
        engine.ingest_raw(buy(w, m, 500, price(40))).await;
    }

    let alerts = store.recent(10).await.unwrap();
    assert_eq!(alerts.len(), 2);
    assert!(alerts[0].sent_at - alerts[1].sent_at >= Duration::minutes(30));
}

#[tokio::test]
async fn test_missing_condition_id_is_rejected_without_window() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store);

    let mut raw = buy("0xaaa", 0, 500, price(40));
    raw.condition_id = None;

    assert!(matches!(
        engine.ingest_raw(raw).await,
        EngineOutcome::Rejected(IngestError::MissingConditionId)
    ));
    assert_eq!(engine.active_windows(), 0);
    assert_eq!(engine.stats().snapshot().rejected, 1);
}

#[tokio::test]
async fn test_settled_market_price_always_suppressed() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    let p = Decimal::new(995, 3);
    engine.ingest_raw(buy("0xaaa", 0, 5_000, p)).await;
    engine.ingest_raw(buy("0xbbb", 1, 5_000, p)).await;
    let outcome = engine.ingest_raw(buy("0xccc", 2, 5_000, p)).await;

    let s = match outcome {
        EngineOutcome::Suppressed(s) => s,
        other => panic!("expected suppression, got {other:?}"),
    };
    assert_eq!(s.reason(), SuppressionReason::MarketClosing);
    assert!(store.is_empty().await);
}

#[tokio::test]
async fn test_store_failure_fails_closed() {
    let mut engine = engine_with(common::failing_store());

    engine.ingest_raw(buy("0xaaa", 0, 500, price(40))).await;
    engine.ingest_raw(buy("0xbbb", 2, 500, price(41))).await;
    let outcome = engine.ingest_raw(buy("0xccc", 5, 500, price(42))).await;

    assert!(matches!(
        outcome,
        EngineOutcome::Suppressed(Suppression::StoreUnavailable { .. })
    ));

    // The ingestion loop keeps going after the failure.
    assert!(matches!(
        engine.ingest_raw(buy("0xddd", 6, 500, price(42))).await,
        EngineOutcome::Suppressed(Suppression::StoreUnavailable { .. })
    ));
}

#[tokio::test]
async fn test_opposite_side_alert_blocks_conflicting_consensus() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    for (w, m) in [("0xaaa", 0), ("0xbbb", 1), ("0xccc", 2)] {
        engine.ingest_raw(buy(w, m, 500, price(40))).await;
    }

    let mut sells = Vec::new();
    for (w, m) in [("0xaaa", 4), ("0xbbb", 5), ("0xddd", 6)] {
        let mut raw = buy(w, m, 500, price(60));
        raw.side = Some("SELL".into());
        sells.push(engine.ingest_raw(raw).await);
    }

    let last = sells.pop().unwrap();
    assert!(matches!(
        last,
        EngineOutcome::Suppressed(Suppression::OppositeSideRecent { .. })
    ));
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_divergent_entry_prices_suppressed() {
    let store = Arc::new(MemoryAlertStore::new());
    let mut engine = engine_with(store.clone());

    engine.ingest_raw(buy("0xaaa", 0, 500, price(20))).await;
    engine.ingest_raw(buy("0xbbb", 1, 500, price(50))).await;
    let outcome = engine.ingest_raw(buy("0xccc", 2, 500, price(45))).await;

    assert!(matches!(
        outcome,
        EngineOutcome::Suppressed(Suppression::EntryPriceDivergence { .. })
    ));
}

#[tokio::test]
async fn test_sharded_engine_serializes_per_key() {
    let store = Arc::new(MemoryAlertStore::new());
    let stats = EngineStats::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(16);

    let (handle, tasks) = EngineHandle::spawn(
        4,
        ShardContext {
            config: event_clock_config(),
            registry: seed_registry(&["0xaaa", "0xbbb", "0xccc"]),
            store: store.clone(),
            outbound: Some(tx),
            stats: stats.clone(),
        },
    );

    // Two markets interleaved; each reaches consensus on its own shard.
    for (w, m) in [("0xaaa", 0), ("0xbbb", 1), ("0xccc", 2)] {
        handle.submit_raw(buy(w, m, 500, price(40))).await.unwrap();
        let mut other = buy(w, m, 600, price(55));
        other.condition_id = Some("0xbeef".into());
        handle.submit_raw(other).await.unwrap();
    }

    let mut bad = buy("0xaaa", 3, 500, price(40));
    bad.outcome_index = None;
    assert!(matches!(
        handle.submit_raw(bad).await,
        Err(SubmitError::Invalid(IngestError::MissingOutcomeIndex))
    ));

    drop(handle);
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(store.len().await, 2);
    let mut dispatched = Vec::new();
    while let Ok(notification) = rx.try_recv() {
        match notification {
            Notification::Alert(payload) => dispatched.push(payload.condition_id),
            other => panic!("unexpected notification {other:?}"),
        }
    }
    dispatched.sort();
    assert_eq!(dispatched, vec!["0xbeef".to_string(), MARKET.to_string()]);

    let snap = stats.snapshot();
    assert_eq!(snap.alerts, 2);
    assert_eq!(snap.rejected, 1);
}
