use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::models::Notification;
use crate::polymarket::GammaClient;

use super::notifier::{
    format_consensus_alert, format_suppressed_alert, format_suppression_report, Notifier,
};

/// Drain the outbound queue: resolve market titles, format and send.
///
/// Runs apart from the engine so a slow notification channel never stalls
/// ingestion. Alerts go to the alert chat; suppressed candidates and reports
/// go to the reports chat. Without a notifier, everything is only logged.
pub async fn run_dispatcher(
    mut rx: mpsc::Receiver<Notification>,
    notifier: Option<Arc<Notifier>>,
    gamma: Option<GammaClient>,
) {
    tracing::info!(
        telegram = notifier.is_some(),
        "Alert dispatcher started"
    );

    let mut titles: HashMap<String, String> = HashMap::new();

    while let Some(notification) = rx.recv().await {
        let kind = notification.kind();
        let (message, is_alert) = match notification {
            Notification::Alert(mut payload) => {
                if payload.market_title.is_none() {
                    payload.market_title =
                        lookup_title(&mut titles, gamma.as_ref(), &payload.condition_id).await;
                }
                (format_consensus_alert(&payload), true)
            }
            Notification::Suppressed(mut payload) => {
                if payload.market_title.is_none() {
                    payload.market_title =
                        lookup_title(&mut titles, gamma.as_ref(), &payload.condition_id).await;
                }
                (format_suppressed_alert(&payload), false)
            }
            Notification::Report(report) => (format_suppression_report(&report), false),
        };

        match &notifier {
            Some(n) => {
                let sent = if is_alert {
                    n.send(&message).await
                } else {
                    n.send_report(&message).await
                };
                if sent {
                    tracing::info!(kind, "Notification sent");
                }
            }
            None => {
                tracing::info!(kind, "Notification (no notifier configured):\n{message}");
            }
        }
    }

    tracing::warn!("Alert dispatch channel closed");
}

async fn lookup_title(
    cache: &mut HashMap<String, String>,
    gamma: Option<&GammaClient>,
    condition_id: &str,
) -> Option<String> {
    if let Some(title) = cache.get(condition_id) {
        return Some(title.clone());
    }

    match gamma?.market_title(condition_id).await {
        Ok(title) => {
            cache.insert(condition_id.to_string(), title.clone());
            Some(title)
        }
        Err(e) => {
            tracing::debug!(error = %e, condition_id, "Market title lookup failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AlertPayload, Side, SuppressionReport};
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[tokio::test]
    async fn test_cached_title_skips_lookup() {
        let mut cache = HashMap::new();
        cache.insert("0xm".to_string(), "Cached market".to_string());
        assert_eq!(
            lookup_title(&mut cache, None, "0xm").await.as_deref(),
            Some("Cached market")
        );
        assert_eq!(lookup_title(&mut cache, None, "0xother").await, None);
    }

    #[tokio::test]
    async fn test_dispatcher_exits_when_queue_closes() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Notification::Alert(AlertPayload {
            alert_id: "abc".into(),
            condition_id: "0xm".into(),
            outcome_index: 0,
            side: Side::Buy,
            wallet_count: 3,
            price: Decimal::new(40, 2),
            total_usd: Decimal::from(1500),
            wallets: vec![],
            market_title: Some("Title".into()),
            sent_at: Utc::now(),
        }))
        .await
        .unwrap();
        tx.send(Notification::Report(SuppressionReport {
            interval_secs: 3600,
            candidates: 2,
            alerts: 1,
            suppressed_total: 1,
            suppressed: Default::default(),
        }))
        .await
        .unwrap();
        drop(tx);

        run_dispatcher(rx, None, None).await;
    }
}
