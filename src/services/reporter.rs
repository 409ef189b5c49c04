use std::time::Duration;

use tokio::sync::mpsc;

use crate::consensus::{EngineStats, StatsSnapshot};
use crate::models::{Notification, SuppressionReport};

/// Every `interval_secs`, send the suppression counters accumulated since the
/// previous report. Quiet intervals (no candidates) send nothing.
pub async fn run_suppression_reporter(
    stats: EngineStats,
    tx: mpsc::Sender<Notification>,
    interval_secs: u64,
) {
    tracing::info!(interval_secs, "Suppression reporter started");

    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    // First tick completes immediately.
    ticker.tick().await;
    let mut previous = stats.snapshot();

    loop {
        ticker.tick().await;

        let Some(report) = next_report(&mut previous, stats.snapshot(), interval_secs) else {
            tracing::debug!("No consensus activity this interval");
            continue;
        };

        tracing::info!(
            candidates = report.candidates,
            alerts = report.alerts,
            suppressed = report.suppressed_total,
            "Suppression report"
        );
        if tx.send(Notification::Report(report)).await.is_err() {
            tracing::warn!("Dispatcher stopped, suppression reporter exiting");
            return;
        }
    }
}

/// Report the delta between `previous` and `current`, then advance `previous`.
fn next_report(
    previous: &mut StatsSnapshot,
    current: StatsSnapshot,
    interval_secs: u64,
) -> Option<SuppressionReport> {
    let report = current.report_since(previous, interval_secs);
    *previous = current;
    (report.candidates > 0).then_some(report)
}
