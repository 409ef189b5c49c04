use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::gauge;
use rust_decimal::Decimal;
use sqlx::PgPool;

use crate::config::env_parse;
use crate::db::wallet_repo;
use crate::models::Wallet;

// ---------------------------------------------------------------------------
// Eligibility
// ---------------------------------------------------------------------------

/// Quality thresholds a wallet must meet to count toward consensus.
#[derive(Debug, Clone)]
pub struct EligibilityCriteria {
    pub min_trades: i32,
    pub max_trades: i32,
    pub min_win_rate: Decimal,
    pub max_win_rate: Decimal,
    /// Trades per day above this look like a bot.
    pub max_daily_frequency: Decimal,
}

impl Default for EligibilityCriteria {
    fn default() -> Self {
        Self {
            min_trades: 6,
            max_trades: 1500,
            min_win_rate: Decimal::new(65, 2),
            max_win_rate: Decimal::ONE,
            max_daily_frequency: Decimal::from(35),
        }
    }
}

impl EligibilityCriteria {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            min_trades: env_parse("WALLET_MIN_TRADES", d.min_trades),
            max_trades: env_parse("WALLET_MAX_TRADES", d.max_trades),
            min_win_rate: env_parse("WALLET_MIN_WIN_RATE", d.min_win_rate),
            max_win_rate: env_parse("WALLET_MAX_WIN_RATE", d.max_win_rate),
            max_daily_frequency: env_parse("WALLET_MAX_DAILY_FREQ", d.max_daily_frequency),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(String),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }
}

/// Check a wallet's lifetime statistics against the inclusion thresholds.
///
/// Criteria:
/// - Trade count within [min_trades, max_trades]
/// - Win rate within [min_win_rate, max_win_rate]
/// - Daily trading frequency at most max_daily_frequency (unknown passes)
pub fn check_eligibility(wallet: &Wallet, criteria: &EligibilityCriteria) -> Eligibility {
    if wallet.total_trades < criteria.min_trades {
        return Eligibility::Ineligible(format!(
            "too few trades: {} < {}",
            wallet.total_trades, criteria.min_trades
        ));
    }

    if wallet.total_trades > criteria.max_trades {
        return Eligibility::Ineligible(format!(
            "too many trades: {} > {}",
            wallet.total_trades, criteria.max_trades
        ));
    }

    if wallet.win_rate < criteria.min_win_rate || wallet.win_rate > criteria.max_win_rate {
        return Eligibility::Ineligible(format!(
            "win rate {} outside [{}, {}]",
            wallet.win_rate, criteria.min_win_rate, criteria.max_win_rate
        ));
    }

    if let Some(freq) = wallet.daily_trade_frequency {
        if freq > criteria.max_daily_frequency {
            return Eligibility::Ineligible(format!(
                "trading frequency {}/day > {} (bot pattern)",
                freq, criteria.max_daily_frequency
            ));
        }
    }

    Eligibility::Eligible
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// In-process snapshot of the wallets allowed to contribute to consensus.
///
/// Written by the refresher (or tests), read on every trade event. Absent,
/// ineligible and stale wallets are indistinguishable to readers.
#[derive(Debug, Clone, Default)]
pub struct WalletRegistry {
    inner: Arc<RwLock<HashMap<String, Entry>>>,
    /// Entries loaded longer ago than this are treated as ineligible.
    max_age: Option<chrono::Duration>,
}

#[derive(Debug, Clone)]
struct Entry {
    wallet: Wallet,
    loaded_at: DateTime<Utc>,
}

impl Entry {
    fn usable(&self, now: DateTime<Utc>, max_age: Option<chrono::Duration>) -> bool {
        self.wallet.eligible && max_age.map_or(true, |age| now - self.loaded_at <= age)
    }
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose entries expire `max_age` after they were loaded,
    /// unless a refresh replaces them first.
    pub fn with_max_age(max_age: chrono::Duration) -> Self {
        Self {
            max_age: Some(max_age),
            ..Self::default()
        }
    }

    /// Returns the wallet if it is present, eligible and fresh.
    pub fn eligible(&self, address: &str) -> Option<Wallet> {
        self.eligible_at(address, Utc::now())
    }

    pub fn eligible_at(&self, address: &str, now: DateTime<Utc>) -> Option<Wallet> {
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.get(&address.to_lowercase())
            .filter(|e| e.usable(now, self.max_age))
            .map(|e| e.wallet.clone())
    }

    pub fn is_eligible(&self, address: &str) -> bool {
        self.eligible(address).is_some()
    }

    /// Eligible addresses, for the trade poller.
    pub fn eligible_addresses(&self) -> Vec<String> {
        let now = Utc::now();
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values()
            .filter(|e| e.usable(now, self.max_age))
            .map(|e| e.wallet.address.clone())
            .collect()
    }

    pub fn len_eligible(&self) -> usize {
        let now = Utc::now();
        let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|e| e.usable(now, self.max_age)).count()
    }

    /// Insert or replace one wallet, recomputing its `eligible` flag.
    pub fn upsert(&self, wallet: Wallet, criteria: &EligibilityCriteria) {
        self.upsert_at(wallet, criteria, Utc::now());
    }

    pub fn upsert_at(&self, mut wallet: Wallet, criteria: &EligibilityCriteria, loaded_at: DateTime<Utc>) {
        wallet.address = wallet.address.to_lowercase();
        wallet.eligible = wallet.eligible && check_eligibility(&wallet, criteria).is_eligible();
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(wallet.address.clone(), Entry { wallet, loaded_at });
    }

    /// Swap in a fresh snapshot. Returns the number of eligible wallets.
    pub fn replace_all(&self, wallets: Vec<Wallet>, criteria: &EligibilityCriteria) -> usize {
        let loaded_at = Utc::now();
        let mut next = HashMap::with_capacity(wallets.len());
        for mut wallet in wallets {
            wallet.address = wallet.address.to_lowercase();
            match check_eligibility(&wallet, criteria) {
                Eligibility::Eligible => {}
                Eligibility::Ineligible(reason) => {
                    if wallet.eligible {
                        tracing::debug!(
                            wallet = %wallet.address,
                            reason = %reason,
                            "Wallet no longer eligible"
                        );
                    }
                    wallet.eligible = false;
                }
            }
            next.insert(wallet.address.clone(), Entry { wallet, loaded_at });
        }

        let eligible = next.values().filter(|e| e.wallet.eligible).count();
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *map = next;
        eligible
    }
}

/// Periodically reload the registry from the `wallets` table.
pub async fn run_registry_refresher(
    pool: PgPool,
    registry: WalletRegistry,
    criteria: EligibilityCriteria,
    interval_secs: u64,
) {
    tracing::info!(interval_secs, "Wallet registry refresher started");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;

        match wallet_repo::get_wallets(&pool).await {
            Ok(wallets) => {
                let total = wallets.len();
                let eligible = registry.replace_all(wallets, &criteria);
                gauge!("eligible_wallets").set(eligible as f64);
                tracing::info!(total, eligible, "Wallet registry refreshed");
            }
            Err(e) => {
                // The previous snapshot keeps serving until its entries expire.
                gauge!("eligible_wallets").set(registry.len_eligible() as f64);
                tracing::error!(error = %e, "Wallet registry refresh failed");
            }
        }
    }
}

/// One-off maintenance pass: recompute every wallet's eligibility against
/// `criteria`, persist flags that changed, then delete the ineligible rows.
/// Returns `(flags_changed, pruned)`.
pub async fn prune_wallets(pool: &PgPool, criteria: &EligibilityCriteria) -> anyhow::Result<(usize, u64)> {
    let mut changed = 0;
    for mut wallet in wallet_repo::get_wallets(pool).await? {
        let eligible = check_eligibility(&wallet, criteria);
        if eligible.is_eligible() != wallet.eligible {
            if let Eligibility::Ineligible(reason) = &eligible {
                tracing::info!(wallet = %wallet.address, reason = %reason, "Marking wallet ineligible");
            }
            wallet.eligible = eligible.is_eligible();
            wallet_repo::upsert_wallet(pool, &wallet).await?;
            changed += 1;
        }
    }

    let pruned = wallet_repo::prune_ineligible(pool).await?;
    tracing::info!(changed, pruned, "Wallet maintenance complete");
    Ok((changed, pruned))
}
