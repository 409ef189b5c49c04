pub mod trade_poller;
pub mod validate;

use metrics::counter;

use crate::errors::IngestError;
use crate::models::{RawTrade, TradeEvent};

/// Validate one feed record. Rejections are logged and counted, never fatal.
pub fn accept(raw: RawTrade) -> Result<TradeEvent, IngestError> {
    let wallet = raw.wallet.clone();
    let trade_id = raw.trade_id.clone();

    TradeEvent::try_from(raw).inspect_err(|e| {
        counter!("trade_events_rejected_total", "reason" => e.as_str()).increment(1);
        tracing::warn!(
            wallet = wallet.as_deref().unwrap_or("-"),
            trade_id = trade_id.as_deref().unwrap_or("-"),
            reason = e.as_str(),
            "Rejected trade record: {e}"
        );
    })
}
