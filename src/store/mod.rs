pub mod memory;

pub use memory::MemoryAlertStore;

use async_trait::async_trait;
use chrono::Duration;

use crate::errors::StoreError;
use crate::models::{Alert, WindowKey};

/// Result of an attempt to persist an alert.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Recorded,
    /// An alert with the same idempotency key already exists.
    AlreadyRecorded,
    /// Another alert for the key landed inside the cooldown first.
    CooldownActive(Alert),
}

/// Durable, append-only record of sent alerts.
#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Most recent alert for the key, by `sent_at`.
    async fn lookup_latest(&self, key: &WindowKey) -> Result<Option<Alert>, StoreError>;

    /// Persist unconditionally (idempotent on `alert_key`).
    async fn record(&self, alert: &Alert) -> Result<RecordOutcome, StoreError>;

    /// Atomically re-check the cooldown against the latest alert for the key
    /// and persist only if it has elapsed at `alert.sent_at`.
    async fn record_unless_recent(
        &self,
        alert: &Alert,
        cooldown: Duration,
    ) -> Result<RecordOutcome, StoreError>;

    /// Newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<Alert>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
