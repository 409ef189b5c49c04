use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;

use crate::consensus::EngineHandle;
use crate::errors::SubmitError;
use crate::polymarket::{ApiTrade, DataClient};
use crate::registry::WalletRegistry;

const TRADES_PER_POLL: u32 = 20;

/// Poll each eligible wallet's recent trades via the Data API and submit
/// unseen ones to the engine.
///
/// A wallet seen for the first time starts at "now", so history already on
/// the API never floods the windows at startup.
pub async fn run_trade_poller(
    data_client: DataClient,
    registry: WalletRegistry,
    engine: EngineHandle,
    interval_secs: u64,
) {
    tracing::info!(interval_secs, "Trade poller started");

    let mut last_seen: HashMap<String, DateTime<Utc>> = HashMap::new();

    loop {
        let wallets = registry.eligible_addresses();
        let mut submitted = 0u32;

        for wallet in &wallets {
            let cutoff = *last_seen.entry(wallet.clone()).or_insert_with(Utc::now);

            let trades = match data_client.get_user_trades(wallet, TRADES_PER_POLL).await {
                Ok(t) => t,
                Err(e) => {
                    tracing::debug!(error = %e, wallet = %wallet, "Trade poller: failed to fetch trades");
                    continue;
                }
            };

            let (fresh, latest) = new_trades(trades, cutoff);
            if latest > cutoff {
                last_seen.insert(wallet.clone(), latest);
            }

            for trade in fresh {
                match engine.submit_raw(trade.into_raw(wallet)).await {
                    Ok(()) => submitted += 1,
                    // Already logged and counted by validation.
                    Err(SubmitError::Invalid(_)) => {}
                    Err(e @ SubmitError::ShardClosed(_)) => {
                        tracing::error!(error = %e, "Engine stopped, trade poller exiting");
                        return;
                    }
                }
            }
        }

        if submitted > 0 {
            tracing::info!(
                wallets = wallets.len(),
                new_trades = submitted,
                "Trade poller cycle complete"
            );
        }

        sleep(Duration::from_secs(interval_secs.max(1))).await;
    }
}

/// Trades strictly newer than `cutoff`, oldest first, plus the newest
/// timestamp seen. Rows without a parseable timestamp are dropped here;
/// they could never be ordered against the cutoff.
fn new_trades(trades: Vec<ApiTrade>, cutoff: DateTime<Utc>) -> (Vec<ApiTrade>, DateTime<Utc>) {
    let mut latest = cutoff;
    let mut fresh: Vec<(DateTime<Utc>, ApiTrade)> = trades
        .into_iter()
        .filter_map(|t| t.traded_at().map(|ts| (ts, t)))
        .filter(|(ts, _)| *ts > cutoff)
        .collect();

    fresh.sort_by_key(|(ts, _)| *ts);
    if let Some((ts, _)) = fresh.last() {
        latest = latest.max(*ts);
    }
    (fresh.into_iter().map(|(_, t)| t).collect(), latest)
}
