use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::{Side, WindowKey};

/// One wallet's contribution to an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertWallet {
    pub wallet: String,
    /// Sum of this wallet's in-window notional.
    pub usd_amount: Decimal,
    /// Price of the wallet's most recent in-window trade.
    pub entry_price: Decimal,
    pub win_rate: Option<Decimal>,
    pub total_trades: Option<i32>,
}

/// A persisted, append-only record of a sent alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub alert_key: String,
    pub condition_id: String,
    pub outcome_index: i32,
    pub side: Side,
    pub wallet_count: i32,
    pub price: Decimal,
    pub total_usd: Decimal,
    pub first_event_at: DateTime<Utc>,
    pub last_event_at: DateTime<Utc>,
    pub wallets: Vec<AlertWallet>,
    pub market_title: Option<String>,
    pub sent_at: DateTime<Utc>,
}

impl Alert {
    pub fn key(&self) -> WindowKey {
        WindowKey::new(self.condition_id.clone(), self.outcome_index, self.side)
    }

    /// Idempotency key: sha256 of `condition_id:outcome:side:sent_at_ms`.
    pub fn idempotency_key(key: &WindowKey, sent_at: DateTime<Utc>) -> String {
        let raw = format!("{}:{}", key, sent_at.timestamp_millis());
        format!("{:x}", Sha256::digest(raw.as_bytes()))
    }

    /// First 8 hex chars of the idempotency key, shown in notifications.
    pub fn short_id(&self) -> &str {
        &self.alert_key[..8.min(self.alert_key.len())]
    }

    pub fn payload(&self) -> AlertPayload {
        AlertPayload {
            alert_id: self.short_id().to_string(),
            condition_id: self.condition_id.clone(),
            outcome_index: self.outcome_index,
            side: self.side,
            wallet_count: self.wallet_count,
            price: self.price,
            total_usd: self.total_usd,
            wallets: self.wallets.clone(),
            market_title: self.market_title.clone(),
            sent_at: self.sent_at,
        }
    }
}

/// Outgoing notification body handed to the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: String,
    pub condition_id: String,
    pub outcome_index: i32,
    pub side: Side,
    pub wallet_count: i32,
    pub price: Decimal,
    pub total_usd: Decimal,
    pub wallets: Vec<AlertWallet>,
    pub market_title: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// A candidate the pipeline held back, sent to the reports channel for review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressedPayload {
    pub condition_id: String,
    pub outcome_index: i32,
    pub side: Side,
    /// Machine reason string, e.g. `market_closing`.
    pub reason: String,
    /// Human-readable detail with the numbers that tripped the stage.
    pub detail: String,
    pub wallet_count: i32,
    pub price: Decimal,
    pub total_usd: Decimal,
    pub wallets: Vec<AlertWallet>,
    pub market_title: Option<String>,
    pub suppressed_at: DateTime<Utc>,
}

/// Consensus activity over one reporting interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuppressionReport {
    pub interval_secs: u64,
    pub candidates: u64,
    pub alerts: u64,
    pub suppressed_total: u64,
    pub suppressed: BTreeMap<String, u64>,
}

/// Everything the dispatcher delivers.
#[derive(Debug, Clone)]
pub enum Notification {
    Alert(AlertPayload),
    Suppressed(SuppressedPayload),
    Report(SuppressionReport),
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::Alert(_) => "alert",
            Notification::Suppressed(_) => "suppressed",
            Notification::Report(_) => "report",
        }
    }
}
