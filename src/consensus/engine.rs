use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::mpsc;

use crate::config::{ClockMode, ConsensusConfig};
use crate::errors::IngestError;
use crate::ingestion;
use crate::models::{
    short, Alert, AlertWallet, Notification, RawTrade, SuppressedPayload, TradeEvent, WindowKey,
};
use crate::registry::WalletRegistry;
use crate::store::{AlertStore, RecordOutcome};

use super::evaluator::{evaluate, Candidate, Evaluation};
use super::stats::EngineStats;
use super::suppression::{Suppression, SuppressionPipeline, SuppressionReason};
use super::window::{WindowManager, WindowUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Wallet absent from the registry or not eligible.
    IneligibleWallet,
    Duplicate,
    /// Older than the window relative to its newest event.
    Stale,
}

/// What one trade event did to the engine.
#[derive(Debug, Clone)]
pub enum EngineOutcome {
    Rejected(IngestError),
    Ignored(IgnoreReason),
    Accumulating { wallets: usize, required: usize },
    Suppressed(Suppression),
    Alerted(Alert),
}

/// Window manager, evaluator, suppression pipeline and store wired together
/// for one shard. Owns its windows exclusively; events for one key must all
/// reach the same engine.
pub struct ConsensusEngine {
    windows: WindowManager,
    pipeline: SuppressionPipeline,
    registry: WalletRegistry,
    store: Arc<dyn AlertStore>,
    outbound: Option<mpsc::Sender<Notification>>,
    stats: EngineStats,
    latest_seen: Option<DateTime<Utc>>,
    /// Last suppressed report per (key, reason).
    reported: HashMap<(WindowKey, SuppressionReason), DateTime<Utc>>,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig, registry: WalletRegistry, store: Arc<dyn AlertStore>) -> Self {
        Self {
            windows: WindowManager::new(config.window),
            pipeline: SuppressionPipeline::new(config),
            registry,
            store,
            outbound: None,
            stats: EngineStats::new(),
            latest_seen: None,
            reported: HashMap::new(),
        }
    }

    /// Hand persisted alerts and suppressed candidates to the dispatcher.
    pub fn with_outbound(mut self, tx: mpsc::Sender<Notification>) -> Self {
        self.outbound = Some(tx);
        self
    }

    pub fn with_stats(mut self, stats: EngineStats) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    pub fn config(&self) -> &ConsensusConfig {
        self.pipeline.config()
    }

    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }

    /// Validate a feed record and process it.
    pub async fn ingest_raw(&mut self, raw: RawTrade) -> EngineOutcome {
        match ingestion::accept(raw) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                self.stats.record_rejected();
                EngineOutcome::Rejected(e)
            }
        }
    }

    /// Window update, consensus evaluation, suppression, then record and
    /// dispatch. Never fails: every failure mode is an outcome.
    pub async fn handle_event(&mut self, event: TradeEvent) -> EngineOutcome {
        let start = Instant::now();
        let outcome = self.process(event).await;
        histogram!("pipeline_latency_seconds").record(start.elapsed().as_secs_f64());
        outcome
    }

    async fn process(&mut self, event: TradeEvent) -> EngineOutcome {
        if !self.registry.is_eligible(&event.wallet) {
            tracing::debug!(wallet = %event.wallet, "Trade from ineligible wallet ignored");
            self.stats.record_ignored();
            return EngineOutcome::Ignored(IgnoreReason::IneligibleWallet);
        }

        counter!("trade_events_total").increment(1);
        self.stats.record_event();
        let ts = event.timestamp;
        let wallet = event.wallet.clone();

        let snapshot = match self.windows.ingest(event) {
            WindowUpdate::Updated(snapshot) => snapshot,
            WindowUpdate::Duplicate => {
                counter!("trade_events_duplicate_total").increment(1);
                self.stats.record_ignored();
                tracing::debug!(wallet = %wallet, "Duplicate trade delivery ignored");
                return EngineOutcome::Ignored(IgnoreReason::Duplicate);
            }
            WindowUpdate::Stale => {
                self.stats.record_ignored();
                tracing::debug!(wallet = %wallet, timestamp = %ts, "Stale trade outside window ignored");
                return EngineOutcome::Ignored(IgnoreReason::Stale);
            }
        };
        self.latest_seen = Some(self.latest_seen.map_or(ts, |seen| seen.max(ts)));

        let in_window = snapshot.distinct_wallets();
        let snapshot = snapshot.retain_wallets(|w| self.registry.is_eligible(w));
        if snapshot.distinct_wallets() < in_window {
            tracing::debug!(
                key = %snapshot.key,
                dropped = in_window - snapshot.distinct_wallets(),
                "Wallets no longer eligible excluded from consensus"
            );
        }

        let candidate = match evaluate(&snapshot, self.config().min_consensus) {
            Evaluation::BelowThreshold { wallets, required } => {
                tracing::debug!(
                    key = %snapshot.key,
                    wallets,
                    required,
                    "Accumulating consensus"
                );
                return EngineOutcome::Accumulating { wallets, required };
            }
            Evaluation::Candidate(candidate) => candidate,
        };

        counter!("consensus_candidates_total").increment(1);
        self.stats.record_candidate();

        let now = self.now_for(&candidate);
        let checked = self.pipeline.run(&candidate, now, self.store.as_ref()).await;
        if let Err(suppression) = checked {
            return self.suppressed(&candidate, suppression, now);
        }

        let alert = self.build_alert(&candidate, now);
        let cooldown = self.config().cooldown;
        let recorded = self.store.record_unless_recent(&alert, cooldown).await;
        match recorded {
            Ok(RecordOutcome::Recorded) => {}
            Ok(RecordOutcome::CooldownActive(previous)) => {
                let s = Suppression::cooldown(previous.sent_at, now, cooldown);
                return self.suppressed(&candidate, s, now);
            }
            Ok(RecordOutcome::AlreadyRecorded) => {
                let s = Suppression::cooldown(now, now, cooldown);
                return self.suppressed(&candidate, s, now);
            }
            Err(e) => {
                tracing::error!(key = %candidate.key, error = %e, "Failed to record alert");
                let s = Suppression::StoreUnavailable {
                    error: e.to_string(),
                };
                return self.suppressed(&candidate, s, now);
            }
        }

        counter!("alerts_sent_total").increment(1);
        self.stats.record_alert();
        tracing::info!(
            alert_id = alert.short_id(),
            condition_id = %alert.condition_id,
            outcome = alert.outcome_index,
            side = %alert.side,
            wallets = alert.wallet_count,
            price = %alert.price,
            total_usd = %alert.total_usd,
            "Consensus alert recorded"
        );
        self.dispatch(&alert);

        EngineOutcome::Alerted(alert)
    }

    fn suppressed(
        &mut self,
        candidate: &Candidate,
        suppression: Suppression,
        now: DateTime<Utc>,
    ) -> EngineOutcome {
        let reason = suppression.reason();
        counter!("alerts_suppressed_total", "reason" => reason.as_str()).increment(1);
        self.stats.record_suppressed(reason);
        tracing::info!(
            condition_id = %candidate.key.condition_id,
            outcome = candidate.key.outcome_index,
            side = %candidate.key.side,
            wallets = candidate.wallet_count(),
            total_usd = %candidate.total_usd,
            reason = reason.as_str(),
            "Consensus suppressed: {suppression}"
        );
        self.report_suppressed(candidate, &suppression, now);
        EngineOutcome::Suppressed(suppression)
    }

    /// Send the suppressed candidate to the reports channel, at most once per
    /// (key, reason) within the dedup span. Cooldown suppressions follow an
    /// alert that was already sent and are never reported.
    fn report_suppressed(
        &mut self,
        candidate: &Candidate,
        suppression: &Suppression,
        now: DateTime<Utc>,
    ) {
        let reason = suppression.reason();
        if !self.config().report_suppressed
            || reason == SuppressionReason::Cooldown
            || self.outbound.is_none()
        {
            return;
        }

        let dedup_key = (candidate.key.clone(), reason);
        let dedup = self.config().suppressed_report_dedup;
        if let Some(last) = self.reported.get(&dedup_key) {
            if now - *last < dedup {
                tracing::debug!(
                    key = %candidate.key,
                    reason = reason.as_str(),
                    "Suppressed report already sent recently"
                );
                return;
            }
        }

        let payload = SuppressedPayload {
            condition_id: candidate.key.condition_id.clone(),
            outcome_index: candidate.key.outcome_index,
            side: candidate.key.side,
            reason: reason.as_str().to_string(),
            detail: suppression.to_string(),
            wallet_count: candidate.wallet_count() as i32,
            price: candidate.representative_price().round_dp(4),
            total_usd: candidate.total_usd,
            wallets: self.attribution(candidate),
            market_title: candidate.market_title(),
            suppressed_at: now,
        };
        if self.send_outbound(Notification::Suppressed(payload)) {
            self.reported.insert(dedup_key, now);
        }
    }

    fn dispatch(&self, alert: &Alert) {
        self.send_outbound(Notification::Alert(alert.payload()));
    }

    /// Non-blocking hand-off to the dispatcher. Returns whether it was queued.
    fn send_outbound(&self, notification: Notification) -> bool {
        let Some(tx) = &self.outbound else {
            return false;
        };
        let kind = notification.kind();
        match tx.try_send(notification) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("alerts_dispatch_dropped_total").increment(1);
                tracing::warn!(kind, "Notification queue full, not dispatched");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                counter!("alerts_dispatch_dropped_total").increment(1);
                tracing::warn!(kind, "Notification dispatcher stopped, not dispatched");
                false
            }
        }
    }

    fn now_for(&self, candidate: &Candidate) -> DateTime<Utc> {
        match self.config().clock {
            ClockMode::Wall => Utc::now(),
            ClockMode::Event => candidate.last_at,
        }
    }

    /// Per-wallet attribution, largest position first.
    fn attribution(&self, candidate: &Candidate) -> Vec<AlertWallet> {
        let mut wallets: Vec<AlertWallet> = candidate
            .wallets
            .iter()
            .map(|(address, position)| {
                let profile = self.registry.eligible(address);
                AlertWallet {
                    wallet: address.clone(),
                    usd_amount: position.usd,
                    entry_price: position.latest_price,
                    win_rate: profile.as_ref().map(|w| w.win_rate),
                    total_trades: profile.as_ref().map(|w| w.total_trades),
                }
            })
            .collect();
        wallets.sort_by(|a, b| b.usd_amount.cmp(&a.usd_amount));
        wallets
    }

    fn build_alert(&self, candidate: &Candidate, sent_at: DateTime<Utc>) -> Alert {
        let wallets = self.attribution(candidate);

        Alert {
            id: uuid::Uuid::new_v4(),
            alert_key: Alert::idempotency_key(&candidate.key, sent_at),
            condition_id: candidate.key.condition_id.clone(),
            outcome_index: candidate.key.outcome_index,
            side: candidate.key.side,
            wallet_count: candidate.wallet_count() as i32,
            price: candidate.representative_price().round_dp(4),
            total_usd: candidate.total_usd,
            first_event_at: candidate.first_at,
            last_event_at: candidate.last_at,
            wallets,
            market_title: candidate.market_title(),
            sent_at,
        }
    }

    /// Drop idle windows. In event-clock mode "now" is the newest event seen
    /// by this engine.
    pub fn sweep_now(&mut self) -> usize {
        let now = match self.config().clock {
            ClockMode::Wall => Utc::now(),
            ClockMode::Event => match self.latest_seen {
                Some(seen) => seen,
                None => return 0,
            },
        };
        let dedup = self.config().suppressed_report_dedup;
        self.reported.retain(|_, at| now - *at < dedup);
        self.windows.sweep(now)
    }
}

impl std::fmt::Debug for ConsensusEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusEngine")
            .field("windows", &self.windows.len())
            .field("latest_seen", &self.latest_seen.map(|t| t.to_rfc3339()))
            .field("outbound", &self.outbound.is_some())
            .finish()
    }
}

/// Short label for log lines.
pub fn describe(outcome: &EngineOutcome) -> String {
    match outcome {
        EngineOutcome::Rejected(e) => format!("rejected ({})", e.as_str()),
        EngineOutcome::Ignored(r) => format!("ignored ({r:?})"),
        EngineOutcome::Accumulating { wallets, required } => {
            format!("accumulating {wallets}/{required}")
        }
        EngineOutcome::Suppressed(s) => format!("suppressed ({})", s.reason().as_str()),
        EngineOutcome::Alerted(a) => format!(
            "alerted {} {}",
            a.short_id(),
            short(&a.condition_id, 12)
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertPayload, Side, Wallet};
    use crate::registry::EligibilityCriteria;
    use crate::store::MemoryAlertStore;
    use chrono::{Duration, TimeZone};
    use rust_decimal::Decimal;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 12, 0, 0).unwrap()
    }

    fn registry(wallets: &[&str]) -> WalletRegistry {
        let registry = WalletRegistry::new();
        let criteria = EligibilityCriteria::default();
        for w in wallets {
            registry.upsert(Wallet::new(w, 40, Decimal::new(72, 2)), &criteria);
        }
        registry
    }

    fn engine(store: Arc<MemoryAlertStore>) -> ConsensusEngine {
        let config = ConsensusConfig {
            min_total_position_usd: Decimal::from(1000),
            clock: ClockMode::Event,
            ..ConsensusConfig::default()
        };
        ConsensusEngine::new(config, registry(&["0xa", "0xb", "0xc", "0xd"]), store)
    }

    fn raw(wallet: &str, minute: i64) -> RawTrade {
        RawTrade {
            wallet: Some(wallet.into()),
            condition_id: Some("0xmarket".into()),
            outcome_index: Some(0),
            side: Some("BUY".into()),
            price: Some(Decimal::new(40, 2)),
            usd_amount: Some(Decimal::from(500)),
            timestamp: Some(t0() + Duration::minutes(minute)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_three_wallets_fire_one_alert() {
        let store = Arc::new(MemoryAlertStore::new());
        let mut engine = engine(store.clone());

        assert!(matches!(
            engine.ingest_raw(raw("0xa", 0)).await,
            EngineOutcome::Accumulating { wallets: 1, required: 3 }
        ));
        engine.ingest_raw(raw("0xb", 2)).await;
        let EngineOutcome::Alerted(alert) = engine.ingest_raw(raw("0xc", 5)).await else {
            panic!("expected alert");
        };

        assert_eq!(alert.wallet_count, 3);
        assert_eq!(alert.total_usd, Decimal::from(1500));
        assert_eq!(alert.sent_at, t0() + Duration::minutes(5));
        assert_eq!(alert.wallets[0].win_rate, Some(Decimal::new(72, 2)));
        assert_eq!(store.len().await, 1);

        // A fourth wallet joining two minutes later hits the cooldown.
        let outcome = engine.ingest_raw(raw("0xd", 7)).await;
        assert!(matches!(outcome, EngineOutcome::Suppressed(Suppression::CooldownActive { .. })));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_unknown_wallet_and_bad_record() {
        let store = Arc::new(MemoryAlertStore::new());
        let mut engine = engine(store);

        assert!(matches!(
            engine.ingest_raw(raw("0xstranger", 0)).await,
            EngineOutcome::Ignored(IgnoreReason::IneligibleWallet)
        ));

        let mut bad = raw("0xa", 0);
        bad.condition_id = None;
        assert!(matches!(
            engine.ingest_raw(bad).await,
            EngineOutcome::Rejected(IngestError::MissingConditionId)
        ));
        assert_eq!(engine.active_windows(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_delivery_ignored() {
        let store = Arc::new(MemoryAlertStore::new());
        let mut engine = engine(store);

        engine.ingest_raw(raw("0xa", 0)).await;
        assert!(matches!(
            engine.ingest_raw(raw("0xa", 0)).await,
            EngineOutcome::Ignored(IgnoreReason::Duplicate)
        ));
    }

    #[tokio::test]
    async fn test_full_outbound_queue_does_not_block() {
        let store = Arc::new(MemoryAlertStore::new());
        let (tx, mut rx) = mpsc::channel(1);
        tx.try_send(Notification::Alert(AlertPayload {
            alert_id: "filler".into(),
            condition_id: "0xother".into(),
            outcome_index: 0,
            side: Side::Buy,
            wallet_count: 0,
            price: Decimal::ZERO,
            total_usd: Decimal::ZERO,
            wallets: vec![],
            market_title: None,
            sent_at: t0(),
        }))
        .unwrap();

        let mut engine = engine(store.clone()).with_outbound(tx);
        engine.ingest_raw(raw("0xa", 0)).await;
        engine.ingest_raw(raw("0xb", 1)).await;
        assert!(matches!(
            engine.ingest_raw(raw("0xc", 2)).await,
            EngineOutcome::Alerted(_)
        ));

        // Alert persisted even though the notification was dropped.
        assert_eq!(store.len().await, 1);
        match rx.recv().await {
            Some(Notification::Alert(p)) => assert_eq!(p.alert_id, "filler"),
            other => panic!("expected the filler alert, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sweep_uses_latest_event_in_event_mode() {
        let store = Arc::new(MemoryAlertStore::new());
        let mut engine = engine(store);
        assert_eq!(engine.sweep_now(), 0);

        engine.ingest_raw(raw("0xa", 0)).await;
        let mut other = raw("0xb", 45);
        other.condition_id = Some("0xlater".into());
        engine.ingest_raw(other).await;
        assert_eq!(engine.active_windows(), 2);

        assert_eq!(engine.sweep_now(), 1);
        assert_eq!(engine.active_windows(), 1);
    }

    #[tokio::test]
    async fn test_wallet_turned_ineligible_stops_counting() {
        let store = Arc::new(MemoryAlertStore::new());
        let mut engine = engine(store.clone());
        let criteria = EligibilityCriteria::default();

        engine.ingest_raw(raw("0xa", 0)).await;
        // Maintenance drops 0xa's win rate while its trade is still in the window.
        engine.registry.replace_all(
            vec![
                Wallet::new("0xa", 40, Decimal::new(30, 2)),
                Wallet::new("0xb", 40, Decimal::new(80, 2)),
                Wallet::new("0xc", 40, Decimal::new(80, 2)),
            ],
            &criteria,
        );
        engine.ingest_raw(raw("0xb", 1)).await;
        let outcome = engine.ingest_raw(raw("0xc", 2)).await;

        assert!(matches!(
            outcome,
            EngineOutcome::Accumulating { wallets: 2, required: 3 }
        ));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_suppressed_candidate_reported_once_per_reason() {
        let store = Arc::new(MemoryAlertStore::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = engine(store).with_outbound(tx);

        let closing = |wallet: &str, minute: i64| RawTrade {
            price: Some(Decimal::new(99, 2)),
            ..raw(wallet, minute)
        };
        engine.ingest_raw(closing("0xa", 0)).await;
        engine.ingest_raw(closing("0xb", 1)).await;
        engine.ingest_raw(closing("0xc", 2)).await;
        // Same key, same reason, inside the dedup span.
        engine.ingest_raw(closing("0xd", 3)).await;

        match rx.try_recv() {
            Ok(Notification::Suppressed(p)) => {
                assert_eq!(p.reason, "market_closing");
                assert_eq!(p.wallet_count, 3);
                assert_eq!(p.wallets.len(), 3);
                assert_eq!(p.suppressed_at, t0() + Duration::minutes(2));
            }
            other => panic!("expected a suppressed report, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.stats().suppressed(SuppressionReason::MarketClosing), 2);

        // After the dedup span the same suppression is reported again.
        engine.ingest_raw(closing("0xa", 33)).await;
        engine.ingest_raw(closing("0xb", 34)).await;
        engine.ingest_raw(closing("0xc", 35)).await;
        assert!(matches!(rx.try_recv(), Ok(Notification::Suppressed(_))));
    }

    #[tokio::test]
    async fn test_cooldown_suppressions_not_reported() {
        let store = Arc::new(MemoryAlertStore::new());
        let (tx, mut rx) = mpsc::channel(8);
        let mut engine = engine(store).with_outbound(tx);

        for (w, m) in [("0xa", 0), ("0xb", 1), ("0xc", 2), ("0xd", 3)] {
            engine.ingest_raw(raw(w, m)).await;
        }

        assert!(matches!(rx.try_recv(), Ok(Notification::Alert(_))));
        assert!(rx.try_recv().is_err());
        assert_eq!(engine.stats().suppressed(SuppressionReason::Cooldown), 1);
    }
}
