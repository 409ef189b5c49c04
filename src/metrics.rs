use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::consensus::SuppressionReason;

/// Install the Prometheus exporter and register all application metrics.
/// Returns a `PrometheusHandle` whose `render()` method produces the
/// text/plain Prometheus scrape payload.
pub fn init_metrics() -> PrometheusHandle {
    let builder = PrometheusBuilder::new();
    let handle = builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // Pre-register counters so they appear even before the first increment.
    counter!("trade_events_total").absolute(0);
    counter!("trade_events_duplicate_total").absolute(0);
    counter!("consensus_candidates_total").absolute(0);
    counter!("alerts_sent_total").absolute(0);
    counter!("alerts_dispatch_dropped_total").absolute(0);
    counter!("notifications_failed_total").absolute(0);
    for reason in SuppressionReason::ALL {
        counter!("alerts_suppressed_total", "reason" => reason.as_str()).absolute(0);
    }

    // Pre-register gauges at zero.
    gauge!("active_windows").set(0.0);
    gauge!("eligible_wallets").set(0.0);

    // Histogram is lazily created on first record; force creation.
    histogram!("pipeline_latency_seconds").record(0.0);

    handle
}
