use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::models::SuppressionReport;

use super::suppression::SuppressionReason;

/// In-process counters shared by every engine shard and read by the API.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    inner: Arc<Mutex<StatsInner>>,
}

#[derive(Debug, Default)]
struct StatsInner {
    events: u64,
    rejected: u64,
    ignored: u64,
    candidates: u64,
    alerts: u64,
    suppressed: BTreeMap<SuppressionReason, u64>,
}

/// Serializable view of `EngineStats`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatsSnapshot {
    pub events: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub candidates: u64,
    pub alerts: u64,
    pub suppressed_total: u64,
    /// Every reason is present, zero when never hit.
    pub suppressed: BTreeMap<&'static str, u64>,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<F: FnOnce(&mut StatsInner)>(&self, f: F) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner);
    }

    pub fn record_event(&self) {
        self.with(|s| s.events += 1);
    }

    pub fn record_rejected(&self) {
        self.with(|s| s.rejected += 1);
    }

    pub fn record_ignored(&self) {
        self.with(|s| s.ignored += 1);
    }

    pub fn record_candidate(&self) {
        self.with(|s| s.candidates += 1);
    }

    pub fn record_alert(&self) {
        self.with(|s| s.alerts += 1);
    }

    pub fn record_suppressed(&self, reason: SuppressionReason) {
        self.with(|s| *s.suppressed.entry(reason).or_insert(0) += 1);
    }

    pub fn suppressed(&self, reason: SuppressionReason) -> u64 {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.suppressed.get(&reason).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let suppressed: BTreeMap<&'static str, u64> = SuppressionReason::ALL
            .iter()
            .map(|r| (r.as_str(), inner.suppressed.get(r).copied().unwrap_or(0)))
            .collect();

        StatsSnapshot {
            events: inner.events,
            rejected: inner.rejected,
            ignored: inner.ignored,
            candidates: inner.candidates,
            alerts: inner.alerts,
            suppressed_total: suppressed.values().sum(),
            suppressed,
        }
    }
}

impl StatsSnapshot {
    /// Activity between `previous` and this snapshot.
    pub fn report_since(&self, previous: &StatsSnapshot, interval_secs: u64) -> SuppressionReport {
        let suppressed: BTreeMap<String, u64> = self
            .suppressed
            .iter()
            .map(|(reason, n)| {
                let before = previous.suppressed.get(reason).copied().unwrap_or(0);
                (reason.to_string(), n.saturating_sub(before))
            })
            .collect();

        SuppressionReport {
            interval_secs,
            candidates: self.candidates.saturating_sub(previous.candidates),
            alerts: self.alerts.saturating_sub(previous.alerts),
            suppressed_total: suppressed.values().sum(),
            suppressed,
        }
    }
}
