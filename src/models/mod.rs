pub mod alert;
pub mod wallet;

pub use alert::{
    Alert, AlertPayload, AlertWallet, Notification, SuppressedPayload, SuppressionReport,
};
pub use wallet::Wallet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn from_api_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "0" => Some(Side::Buy),
            "SELL" | "1" => Some(Side::Sell),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// WindowKey: (market, outcome, side)
// ---------------------------------------------------------------------------

/// Identity of one consensus window and of the alerts raised for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowKey {
    pub condition_id: String,
    pub outcome_index: i32,
    pub side: Side,
}

impl WindowKey {
    pub fn new(condition_id: impl Into<String>, outcome_index: i32, side: Side) -> Self {
        Self {
            condition_id: condition_id.into(),
            outcome_index,
            side,
        }
    }

    /// The same market/outcome on the other side of the book.
    pub fn opposite(&self) -> Self {
        Self {
            condition_id: self.condition_id.clone(),
            outcome_index: self.outcome_index,
            side: self.side.opposite(),
        }
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.condition_id, self.outcome_index, self.side)
    }
}

// ---------------------------------------------------------------------------
// RawTrade: unvalidated record from the trade feed
// ---------------------------------------------------------------------------

/// A trade as delivered by the feed, before validation.
///
/// Every field is optional because upstream sources disagree on which
/// fields they populate. `TradeEvent::try_from` decides what is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTrade {
    pub wallet: Option<String>,
    pub condition_id: Option<String>,
    pub outcome_index: Option<i32>,
    pub side: Option<String>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,
    pub usd_amount: Option<Decimal>,
    pub timestamp: Option<DateTime<Utc>>,
    pub trade_id: Option<String>,
    pub market_title: Option<String>,
}

// ---------------------------------------------------------------------------
// TradeEvent: core pipeline message
// ---------------------------------------------------------------------------

/// A validated, immutable trade by a registry wallet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Lowercase hex wallet address.
    pub wallet: String,
    pub condition_id: String,
    pub outcome_index: i32,
    pub side: Side,
    /// Execution price, a probability in (0, 1].
    pub price: Decimal,
    pub size: Decimal,
    /// USD notional. `size * price` when the feed does not supply it.
    pub usd: Decimal,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub trade_id: Option<String>,
    #[serde(default)]
    pub market_title: Option<String>,
}

impl TradeEvent {
    pub fn key(&self) -> WindowKey {
        WindowKey::new(self.condition_id.clone(), self.outcome_index, self.side)
    }

    /// Two deliveries of the same fill: equal trade ids, or the same
    /// (wallet, market, outcome, side, timestamp) whatever ids the feeds
    /// attached.
    pub fn is_same_trade(&self, other: &TradeEvent) -> bool {
        if let (Some(a), Some(b)) = (&self.trade_id, &other.trade_id) {
            if a == b {
                return true;
            }
        }
        self.wallet == other.wallet
            && self.timestamp == other.timestamp
            && self.condition_id == other.condition_id
            && self.outcome_index == other.outcome_index
            && self.side == other.side
    }
}

impl fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Trade: wallet={} market={} outcome={} side={} size={} price={} usd={}",
            short(&self.wallet, 10),
            short(&self.condition_id, 12),
            self.outcome_index,
            self.side,
            self.size,
            self.price,
            self.usd,
        )
    }
}

/// First `n` characters of an identifier, for log lines.
pub fn short(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
