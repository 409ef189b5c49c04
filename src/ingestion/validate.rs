use rust_decimal::Decimal;

use crate::errors::IngestError;
use crate::models::{RawTrade, Side, TradeEvent};

impl TryFrom<RawTrade> for TradeEvent {
    type Error = IngestError;

    /// Validate a feed record. A record without a market identifier is a
    /// hard failure here so it can never create a window downstream.
    fn try_from(raw: RawTrade) -> Result<Self, Self::Error> {
        let condition_id = raw
            .condition_id
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(IngestError::MissingConditionId)?;

        let outcome_index = raw
            .outcome_index
            .filter(|i| *i >= 0)
            .ok_or(IngestError::MissingOutcomeIndex)?;

        let wallet = raw
            .wallet
            .map(|w| w.trim().to_lowercase())
            .filter(|w| !w.is_empty())
            .ok_or(IngestError::MissingWallet)?;

        let side = raw
            .side
            .as_deref()
            .and_then(Side::from_api_str)
            .ok_or_else(|| IngestError::InvalidSide(raw.side.clone()))?;

        let timestamp = raw.timestamp.ok_or(IngestError::MissingTimestamp)?;

        let price = raw
            .price
            .filter(|p| *p > Decimal::ZERO && *p <= Decimal::ONE)
            .ok_or(IngestError::InvalidPrice(raw.price))?;

        let size = raw.size.filter(|s| *s > Decimal::ZERO);
        let supplied_usd = raw.usd_amount.filter(|u| *u > Decimal::ZERO);

        let (size, usd) = match (size, supplied_usd) {
            (Some(size), Some(usd)) => (size, usd),
            (Some(size), None) => (size, size * price),
            (None, Some(usd)) => (usd / price, usd),
            (None, None) => return Err(IngestError::InvalidSize),
        };

        Ok(TradeEvent {
            wallet,
            condition_id,
            outcome_index,
            side,
            price,
            size,
            usd,
            timestamp,
            trade_id: raw.trade_id.filter(|t| !t.is_empty()),
            market_title: raw.market_title.filter(|t| !t.is_empty()),
        })
    }
}
