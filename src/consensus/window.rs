use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::{TradeEvent, WindowKey};

/// Aggregate of one wallet's trades inside a window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletPosition {
    /// Sum of every in-window trade by this wallet.
    pub usd: Decimal,
    pub first_price: Decimal,
    pub first_at: DateTime<Utc>,
    pub latest_price: Decimal,
    pub latest_at: DateTime<Utc>,
    pub trades: usize,
}

/// Post-prune view of a window, detached from the manager.
#[derive(Debug, Clone, Serialize)]
pub struct WindowSnapshot {
    pub key: WindowKey,
    /// Ordered oldest first.
    pub events: Vec<TradeEvent>,
    pub wallets: BTreeMap<String, WalletPosition>,
}

impl WindowSnapshot {
    fn from_events(key: WindowKey, events: Vec<TradeEvent>) -> Self {
        let mut wallets: BTreeMap<String, WalletPosition> = BTreeMap::new();
        for e in &events {
            wallets
                .entry(e.wallet.clone())
                .and_modify(|p| {
                    p.usd += e.usd;
                    p.trades += 1;
                    if e.timestamp >= p.latest_at {
                        p.latest_at = e.timestamp;
                        p.latest_price = e.price;
                    }
                })
                .or_insert_with(|| WalletPosition {
                    usd: e.usd,
                    first_price: e.price,
                    first_at: e.timestamp,
                    latest_price: e.price,
                    latest_at: e.timestamp,
                    trades: 1,
                });
        }
        Self {
            key,
            events,
            wallets,
        }
    }

    pub fn distinct_wallets(&self) -> usize {
        self.wallets.len()
    }

    pub fn total_usd(&self) -> Decimal {
        self.wallets.values().map(|p| p.usd).sum()
    }

    pub fn first_at(&self) -> Option<DateTime<Utc>> {
        self.events.first().map(|e| e.timestamp)
    }

    pub fn last_at(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(|e| e.timestamp)
    }

    /// Keep only the events of wallets passing `keep`, recomputing the
    /// per-wallet aggregates.
    pub fn retain_wallets<F>(self, keep: F) -> Self
    where
        F: Fn(&str) -> bool,
    {
        if self.wallets.keys().all(|w| keep(w)) {
            return self;
        }
        let events = self.events.into_iter().filter(|e| keep(&e.wallet)).collect();
        Self::from_events(self.key, events)
    }
}

/// Result of offering one event to a window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Added,
    /// Same fill already present (at-least-once redelivery).
    Duplicate,
    /// Older than the window allows relative to its newest event.
    Stale,
}

/// Time-bounded buffer of trades for one (market, outcome, side).
#[derive(Debug, Clone)]
pub struct RollingWindow {
    key: WindowKey,
    events: VecDeque<TradeEvent>,
    last_updated: DateTime<Utc>,
}

impl RollingWindow {
    pub fn new(key: WindowKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            events: VecDeque::new(),
            last_updated: now,
        }
    }

    pub fn key(&self) -> &WindowKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn newest_at(&self) -> Option<DateTime<Utc>> {
        self.events.back().map(|e| e.timestamp)
    }

    pub fn oldest_at(&self) -> Option<DateTime<Utc>> {
        self.events.front().map(|e| e.timestamp)
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Insert in time order, then drop everything older than `span`
    /// before the newest event.
    pub fn push(&mut self, event: TradeEvent, span: Duration) -> Admission {
        if self.events.iter().any(|e| e.is_same_trade(&event)) {
            return Admission::Duplicate;
        }

        if let Some(newest) = self.newest_at() {
            if event.timestamp < newest - span {
                return Admission::Stale;
            }
        }

        let pos = self
            .events
            .partition_point(|e| e.timestamp <= event.timestamp);
        self.events.insert(pos, event);
        self.last_updated = Utc::now();
        self.prune(span);
        Admission::Added
    }

    /// Remove events older than `span` before the newest one. Returns how many.
    pub fn prune(&mut self, span: Duration) -> usize {
        let Some(newest) = self.newest_at() else {
            return 0;
        };
        let cutoff = newest - span;
        let before = self.events.len();
        while self.events.front().is_some_and(|e| e.timestamp < cutoff) {
            self.events.pop_front();
        }
        before - self.events.len()
    }

    /// A window with no event inside `span` of `now` is garbage.
    pub fn is_expired(&self, now: DateTime<Utc>, span: Duration) -> bool {
        match self.newest_at() {
            Some(newest) => newest < now - span,
            None => true,
        }
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        WindowSnapshot::from_events(self.key.clone(), self.events.iter().cloned().collect())
    }
}

/// Outcome of `WindowManager::ingest`.
#[derive(Debug, Clone)]
pub enum WindowUpdate {
    Updated(WindowSnapshot),
    Duplicate,
    Stale,
}

/// Owns every live window. Not shared: one manager per engine shard.
#[derive(Debug)]
pub struct WindowManager {
    windows: HashMap<WindowKey, RollingWindow>,
    span: Duration,
}

impl WindowManager {
    pub fn new(span: Duration) -> Self {
        Self {
            windows: HashMap::new(),
            span,
        }
    }

    pub fn span(&self) -> Duration {
        self.span
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn get(&self, key: &WindowKey) -> Option<&RollingWindow> {
        self.windows.get(key)
    }

    /// Locate or create the window for the event's key, append, prune,
    /// and return the post-prune state.
    pub fn ingest(&mut self, event: TradeEvent) -> WindowUpdate {
        let key = event.key();
        let span = self.span;

        let window = self.windows.entry(key.clone()).or_insert_with(|| {
            gauge!("active_windows").increment(1.0);
            RollingWindow::new(key.clone(), Utc::now())
        });

        match window.push(event, span) {
            Admission::Added => WindowUpdate::Updated(window.snapshot()),
            Admission::Duplicate => WindowUpdate::Duplicate,
            Admission::Stale => WindowUpdate::Stale,
        }
    }

    /// Drop windows with no event within the window duration of `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        let span = self.span;
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_expired(now, span));
        let removed = before - self.windows.len();
        if removed > 0 {
            gauge!("active_windows").decrement(removed as f64);
            tracing::debug!(removed, remaining = self.windows.len(), "Swept stale windows");
        }
        removed
    }
}
