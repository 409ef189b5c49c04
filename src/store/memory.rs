use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::errors::StoreError;
use crate::models::{Alert, WindowKey};

use super::{AlertStore, RecordOutcome};

/// Process-local alert store. Used when no database is configured and in tests.
#[derive(Debug, Default)]
pub struct MemoryAlertStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    by_key: HashMap<WindowKey, Vec<Alert>>,
    alert_keys: HashSet<String>,
    log: Vec<Alert>,
}

impl MemoryInner {
    fn latest(&self, key: &WindowKey) -> Option<&Alert> {
        self.by_key
            .get(key)
            .and_then(|alerts| alerts.iter().max_by_key(|a| a.sent_at))
    }

    fn insert(&mut self, alert: &Alert) -> RecordOutcome {
        if !self.alert_keys.insert(alert.alert_key.clone()) {
            return RecordOutcome::AlreadyRecorded;
        }
        self.by_key
            .entry(alert.key())
            .or_default()
            .push(alert.clone());
        self.log.push(alert.clone());
        RecordOutcome::Recorded
    }
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every alert for the key, in insertion order.
    pub async fn alerts_for(&self, key: &WindowKey) -> Vec<Alert> {
        self.inner
            .lock()
            .await
            .by_key
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn lookup_latest(&self, key: &WindowKey) -> Result<Option<Alert>, StoreError> {
        Ok(self.inner.lock().await.latest(key).cloned())
    }

    async fn record(&self, alert: &Alert) -> Result<RecordOutcome, StoreError> {
        Ok(self.inner.lock().await.insert(alert))
    }

    async fn record_unless_recent(
        &self,
        alert: &Alert,
        cooldown: Duration,
    ) -> Result<RecordOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(latest) = inner.latest(&alert.key()) {
            if alert.sent_at - latest.sent_at < cooldown {
                return Ok(RecordOutcome::CooldownActive(latest.clone()));
            }
        }
        Ok(inner.insert(alert))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let inner = self.inner.lock().await;
        let mut alerts = inner.log.clone();
        alerts.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        alerts.truncate(limit);
        Ok(alerts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
