use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{TradeEvent, WindowKey};

use super::window::{WalletPosition, WindowSnapshot};

/// A window that reached the distinct-wallet threshold, not yet validated.
#[derive(Debug, Clone, Serialize)]
pub struct Candidate {
    pub key: WindowKey,
    pub events: Vec<TradeEvent>,
    pub wallets: BTreeMap<String, WalletPosition>,
    pub total_usd: Decimal,
    pub first_at: DateTime<Utc>,
    pub last_at: DateTime<Utc>,
}

impl Candidate {
    pub fn wallet_count(&self) -> usize {
        self.wallets.len()
    }

    /// Mean of each wallet's latest entry price.
    pub fn representative_price(&self) -> Decimal {
        if self.wallets.is_empty() {
            return Decimal::ZERO;
        }
        let sum: Decimal = self.wallets.values().map(|p| p.latest_price).sum();
        sum / Decimal::from(self.wallets.len() as i64)
    }

    /// Time between the earliest and latest contributing event.
    pub fn span(&self) -> Duration {
        self.last_at - self.first_at
    }

    /// Entry prices of the first `n` distinct wallets to trade, in time order.
    pub fn first_entry_prices(&self, n: usize) -> Vec<Decimal> {
        let mut firsts: Vec<&WalletPosition> = self.wallets.values().collect();
        firsts.sort_by_key(|p| p.first_at);
        firsts.into_iter().take(n).map(|p| p.first_price).collect()
    }

    /// Market title carried by any event, for the notification.
    pub fn market_title(&self) -> Option<String> {
        self.events.iter().find_map(|e| e.market_title.clone())
    }
}

#[derive(Debug, Clone)]
pub enum Evaluation {
    Candidate(Candidate),
    BelowThreshold { wallets: usize, required: usize },
}

/// Count distinct wallets in the window and emit a candidate once the
/// threshold is met.
///
/// Pure function, no I/O. May return a candidate for the same key on every
/// update; deduplication belongs to the suppression pipeline.
pub fn evaluate(snapshot: &WindowSnapshot, min_consensus: usize) -> Evaluation {
    let wallets = snapshot.distinct_wallets();
    if wallets < min_consensus {
        return Evaluation::BelowThreshold {
            wallets,
            required: min_consensus,
        };
    }

    let (Some(first_at), Some(last_at)) = (snapshot.first_at(), snapshot.last_at()) else {
        return Evaluation::BelowThreshold {
            wallets: 0,
            required: min_consensus,
        };
    };

    Evaluation::Candidate(Candidate {
        key: snapshot.key.clone(),
        events: snapshot.events.clone(),
        wallets: snapshot.wallets.clone(),
        total_usd: snapshot.total_usd(),
        first_at,
        last_at,
    })
}
