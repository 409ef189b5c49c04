use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::config::ConsensusConfig;
use crate::models::Alert;
use crate::store::AlertStore;

use super::evaluator::Candidate;

/// Number of earliest wallets whose entry prices are compared for divergence.
const DIVERGENCE_SAMPLE: usize = 3;

/// Machine-checkable suppression reason, used as a metric label and API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressionReason {
    Cooldown,
    MarketResolved,
    MarketClosing,
    PositionTooSmall,
    OutsideWindow,
    OppositeRecent,
    PriceDivergence,
    StoreUnavailable,
}

impl SuppressionReason {
    pub const ALL: [SuppressionReason; 8] = [
        SuppressionReason::Cooldown,
        SuppressionReason::MarketResolved,
        SuppressionReason::MarketClosing,
        SuppressionReason::PositionTooSmall,
        SuppressionReason::OutsideWindow,
        SuppressionReason::OppositeRecent,
        SuppressionReason::PriceDivergence,
        SuppressionReason::StoreUnavailable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SuppressionReason::Cooldown => "cooldown",
            SuppressionReason::MarketResolved => "market_resolved",
            SuppressionReason::MarketClosing => "market_closing",
            SuppressionReason::PositionTooSmall => "position_too_small",
            SuppressionReason::OutsideWindow => "outside_window",
            SuppressionReason::OppositeRecent => "opposite_recent",
            SuppressionReason::PriceDivergence => "price_divergence",
            SuppressionReason::StoreUnavailable => "store_unavailable",
        }
    }
}

/// Why a candidate did not become an alert.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Suppression {
    #[error("cooldown active: last alert {elapsed_min:.1} min ago, cooldown {cooldown_min:.1} min")]
    CooldownActive {
        last_sent_at: DateTime<Utc>,
        elapsed_min: f64,
        cooldown_min: f64,
    },

    #[error("market resolved: price {price}")]
    MarketResolved { price: Decimal },

    #[error("market closing: price {price} within {band} of 0 or 1")]
    MarketClosing { price: Decimal, band: Decimal },

    #[error("position too small: ${total_usd} < ${min_usd}")]
    PositionTooSmall { total_usd: Decimal, min_usd: Decimal },

    #[error("events outside consensus window: span {span_min:.1} min > {window_min:.1} min")]
    OutsideWindow { span_min: f64, window_min: f64 },

    #[error("opposite side alerted recently: {elapsed_min:.1} min ago, conflict window {conflict_min:.1} min")]
    OppositeSideRecent {
        opposite_sent_at: DateTime<Utc>,
        elapsed_min: f64,
        conflict_min: f64,
    },

    #[error("entry price divergence {divergence} > {max} (prices {prices:?})")]
    EntryPriceDivergence {
        divergence: Decimal,
        max: Decimal,
        prices: Vec<Decimal>,
    },

    #[error("cannot confirm no duplicate, alert store unavailable: {error}")]
    StoreUnavailable { error: String },
}

impl Suppression {
    /// Cooldown hit against an alert sent at `last_sent_at`.
    pub fn cooldown(last_sent_at: DateTime<Utc>, now: DateTime<Utc>, cooldown: Duration) -> Self {
        Suppression::CooldownActive {
            last_sent_at,
            elapsed_min: as_minutes(now - last_sent_at),
            cooldown_min: as_minutes(cooldown),
        }
    }

    pub fn reason(&self) -> SuppressionReason {
        match self {
            Suppression::CooldownActive { .. } => SuppressionReason::Cooldown,
            Suppression::MarketResolved { .. } => SuppressionReason::MarketResolved,
            Suppression::MarketClosing { .. } => SuppressionReason::MarketClosing,
            Suppression::PositionTooSmall { .. } => SuppressionReason::PositionTooSmall,
            Suppression::OutsideWindow { .. } => SuppressionReason::OutsideWindow,
            Suppression::OppositeSideRecent { .. } => SuppressionReason::OppositeRecent,
            Suppression::EntryPriceDivergence { .. } => SuppressionReason::PriceDivergence,
            Suppression::StoreUnavailable { .. } => SuppressionReason::StoreUnavailable,
        }
    }
}

fn as_minutes(d: Duration) -> f64 {
    d.num_milliseconds() as f64 / 60_000.0
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// Stage 1. A negative elapsed time (latest alert stamped after `now`) also
/// counts as inside the cooldown.
pub fn check_cooldown(
    latest: Option<&Alert>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> Result<(), Suppression> {
    let Some(latest) = latest else {
        return Ok(());
    };
    if now - latest.sent_at < cooldown {
        return Err(Suppression::cooldown(latest.sent_at, now, cooldown));
    }
    Ok(())
}

/// Stage 2. The hard band is checked first so a settled market always
/// reports as resolved.
pub fn check_price(price: Decimal, config: &ConsensusConfig) -> Result<(), Suppression> {
    let hard = config.resolved_band;
    if price <= hard || price >= Decimal::ONE - hard {
        return Err(Suppression::MarketResolved { price });
    }

    let soft = config.price_band;
    if price <= soft || price >= Decimal::ONE - soft {
        return Err(Suppression::MarketClosing { price, band: soft });
    }
    Ok(())
}

/// Stage 3.
pub fn check_size(total_usd: Decimal, config: &ConsensusConfig) -> Result<(), Suppression> {
    if total_usd < config.min_total_position_usd {
        return Err(Suppression::PositionTooSmall {
            total_usd,
            min_usd: config.min_total_position_usd,
        });
    }
    Ok(())
}

/// Stage 4. Re-checked here because a candidate may be built from a snapshot
/// taken after pruning.
pub fn check_span(span: Duration, config: &ConsensusConfig) -> Result<(), Suppression> {
    if span > config.window {
        return Err(Suppression::OutsideWindow {
            span_min: as_minutes(span),
            window_min: as_minutes(config.window),
        });
    }
    Ok(())
}

/// Stage 5. Reject when the opposite side of the same outcome alerted within
/// the conflict window.
pub fn check_opposite(
    opposite_latest: Option<&Alert>,
    now: DateTime<Utc>,
    conflict_window: Duration,
) -> Result<(), Suppression> {
    let Some(opposite) = opposite_latest else {
        return Ok(());
    };
    let elapsed = now - opposite.sent_at;
    if elapsed < conflict_window {
        return Err(Suppression::OppositeSideRecent {
            opposite_sent_at: opposite.sent_at,
            elapsed_min: as_minutes(elapsed),
            conflict_min: as_minutes(conflict_window),
        });
    }
    Ok(())
}

/// Stage 6. `(max - min) / max` over the first wallets' entry prices.
pub fn check_divergence(prices: &[Decimal], max_divergence: Decimal) -> Result<(), Suppression> {
    if prices.len() < 2 {
        return Ok(());
    }
    let (Some(max), Some(min)) = (prices.iter().max(), prices.iter().min()) else {
        return Ok(());
    };
    if max.is_zero() {
        return Ok(());
    }

    let divergence = (*max - *min) / *max;
    if divergence > max_divergence {
        return Err(Suppression::EntryPriceDivergence {
            divergence: divergence.round_dp(4),
            max: max_divergence,
            prices: prices.to_vec(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Ordered chain of validators a candidate must pass before it is alerted.
/// The first failing stage short-circuits.
#[derive(Debug, Clone)]
pub struct SuppressionPipeline {
    config: ConsensusConfig,
}

impl SuppressionPipeline {
    pub fn new(config: ConsensusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Run every stage against `candidate` as of `now`.
    ///
    /// Store lookups that fail suppress the candidate: a missed alert is
    /// preferable to a duplicate one.
    pub async fn run(
        &self,
        candidate: &Candidate,
        now: DateTime<Utc>,
        store: &dyn AlertStore,
    ) -> Result<(), Suppression> {
        let latest = store
            .lookup_latest(&candidate.key)
            .await
            .map_err(|e| Suppression::StoreUnavailable {
                error: e.to_string(),
            })?;
        check_cooldown(latest.as_ref(), now, self.config.cooldown)?;

        check_price(candidate.representative_price(), &self.config)?;
        check_size(candidate.total_usd, &self.config)?;
        check_span(candidate.span(), &self.config)?;

        let opposite = store
            .lookup_latest(&candidate.key.opposite())
            .await
            .map_err(|e| Suppression::StoreUnavailable {
                error: e.to_string(),
            })?;
        check_opposite(opposite.as_ref(), now, self.config.conflict_window)?;

        check_divergence(
            &candidate.first_entry_prices(DIVERGENCE_SAMPLE),
            self.config.max_entry_price_divergence,
        )?;

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
