use metrics::counter;
use rust_decimal::Decimal;
use serde_json::json;

use crate::models::{short, AlertPayload, AlertWallet, Side, SuppressedPayload, SuppressionReport};

/// Telegram notification service. Failures are logged but never block the main flow.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    bot_token: String,
    chat_id: String,
    reports_chat_id: Option<String>,
}

impl Notifier {
    pub fn new(bot_token: String, chat_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            bot_token,
            chat_id,
            reports_chat_id: None,
        }
    }

    /// Route suppressed candidates and reports to a separate chat.
    pub fn with_reports_chat(mut self, chat_id: Option<String>) -> Self {
        self.reports_chat_id = chat_id;
        self
    }

    /// Send a message to the alert chat. Returns false (and logs) on failure.
    pub async fn send(&self, message: &str) -> bool {
        self.send_to(&self.chat_id, message).await
    }

    /// Send to the reports chat, or the alert chat when none is configured.
    pub async fn send_report(&self, message: &str) -> bool {
        let chat = self.reports_chat_id.as_deref().unwrap_or(&self.chat_id);
        self.send_to(chat, message).await
    }

    async fn send_to(&self, chat_id: &str, message: &str) -> bool {
        let url = format!(
            "https://api.telegram.org/bot{}/sendMessage",
            self.bot_token
        );

        let body = json!({
            "chat_id": chat_id,
            "text": message,
            "parse_mode": "Markdown",
            "disable_web_page_preview": true,
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => true,
            Ok(resp) => {
                counter!("notifications_failed_total").increment(1);
                tracing::warn!(
                    status = %resp.status(),
                    "Telegram sendMessage returned non-2xx"
                );
                false
            }
            Err(e) => {
                counter!("notifications_failed_total").increment(1);
                tracing::warn!(error = %e, "Failed to send Telegram notification");
                false
            }
        }
    }
}

fn short_wallet(wallet: &str) -> String {
    let chars = wallet.chars().count();
    if chars > 10 {
        let tail: String = wallet.chars().skip(chars - 4).collect();
        format!("{}...{}", short(wallet, 6), tail)
    } else {
        wallet.to_string()
    }
}

fn market_label(title: &Option<String>, condition_id: &str) -> String {
    title
        .clone()
        .unwrap_or_else(|| format!("`{}`", short(condition_id, 16)))
}

fn action(side: Side) -> &'static str {
    match side {
        Side::Buy => "bought",
        Side::Sell => "sold",
    }
}

fn push_wallet_lines(msg: &mut String, wallets: &[AlertWallet]) {
    for w in wallets {
        let stats = match (w.win_rate, w.total_trades) {
            (Some(wr), Some(n)) => format!(" | WR {}% ({} trades)", percent(wr), n),
            (Some(wr), None) => format!(" | WR {}%", percent(wr)),
            _ => String::new(),
        };
        msg.push_str(&format!(
            "\n`{}` ${} @ {}{}",
            short_wallet(&w.wallet),
            w.usd_amount.round_dp(0),
            w.entry_price.round_dp(3),
            stats,
        ));
    }
}

fn percent(fraction: Decimal) -> Decimal {
    (fraction * Decimal::ONE_HUNDRED).round_dp(1)
}

/// Format a consensus alert with per-wallet attribution.
pub fn format_consensus_alert(alert: &AlertPayload) -> String {
    let mut msg = format!(
        "*Smart Money Consensus* #{}\nMarket: {}\n{} wallets {} outcome {} within the window\nPrice: {}\nTotal: ${}\n",
        alert.alert_id,
        market_label(&alert.market_title, &alert.condition_id),
        alert.wallet_count,
        action(alert.side),
        alert.outcome_index,
        alert.price.round_dp(3),
        alert.total_usd.round_dp(0),
    );

    push_wallet_lines(&mut msg, &alert.wallets);
    msg
}

/// Format a suppressed candidate for the reports channel.
pub fn format_suppressed_alert(s: &SuppressedPayload) -> String {
    let mut msg = format!(
        "*Suppressed Consensus* ({})\nMarket: {}\n{} wallets {} outcome {} ({})\nPrice: {}\nTotal: ${}\nReason: {}\n",
        s.reason,
        market_label(&s.market_title, &s.condition_id),
        s.wallet_count,
        action(s.side),
        s.outcome_index,
        s.side,
        s.price.round_dp(3),
        s.total_usd.round_dp(0),
        s.detail,
    );

    push_wallet_lines(&mut msg, &s.wallets);
    msg
}

/// Format the periodic suppression counters.
pub fn format_suppression_report(r: &SuppressionReport) -> String {
    let mut msg = format!(
        "*Alerts Suppression Report* (last {} min)\nCandidates: {}\nAlerts sent: {}\nSuppressed: {}\n",
        r.interval_secs / 60,
        r.candidates,
        r.alerts,
        r.suppressed_total,
    );
    for (reason, n) in &r.suppressed {
        msg.push_str(&format!("\n- {reason}: {n}"));
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AlertWallet;
    use chrono::Utc;

    fn payload() -> AlertPayload {
        AlertPayload {
            alert_id: "deadbeef".into(),
            condition_id: "0x1234567890abcdef1234".into(),
            outcome_index: 1,
            side: Side::Buy,
            wallet_count: 2,
            price: Decimal::new(4250, 4),
            total_usd: Decimal::new(250075, 2),
            wallets: vec![
                AlertWallet {
                    wallet: "0xabcdef0123456789".into(),
                    usd_amount: Decimal::from(1500),
                    entry_price: Decimal::new(42, 2),
                    win_rate: Some(Decimal::new(7234, 4)),
                    total_trades: Some(88),
                },
                AlertWallet {
                    wallet: "0xshort".into(),
                    usd_amount: Decimal::from(1000),
                    entry_price: Decimal::new(43, 2),
                    win_rate: None,
                    total_trades: None,
                },
            ],
            market_title: None,
            sent_at: Utc::now(),
        }
    }

    #[test]
    fn test_format_includes_attribution() {
        let msg = format_consensus_alert(&payload());
        assert!(msg.contains("#deadbeef"));
        assert!(msg.contains("`0x1234567890abcd`"));
        assert!(msg.contains("2 wallets bought outcome 1"));
        assert!(msg.contains("`0xabcd...6789` $1500 @ 0.42 | WR 72.3% (88 trades)"));
        assert!(msg.contains("`0xshort` $1000 @ 0.43"));
    }

    #[test]
    fn test_short_wallet_handles_multibyte_addresses() {
        assert_eq!(short_wallet("0xabcdef0123456789"), "0xabcd...6789");
        assert_eq!(short_wallet("0xé€é€é€é€é€é€"), "0xé€é€...é€é€");
        assert_eq!(short_wallet("0xshort"), "0xshort");
    }

    #[test]
    fn test_format_suppressed_alert() {
        let p = payload();
        let s = SuppressedPayload {
            condition_id: p.condition_id.clone(),
            outcome_index: 1,
            side: Side::Sell,
            reason: "market_closing".into(),
            detail: "market closing: price 0.985 inside band 0.02".into(),
            wallet_count: 2,
            price: Decimal::new(985, 3),
            total_usd: Decimal::from(2500),
            wallets: p.wallets.clone(),
            market_title: Some("Will it rain in Paris?".into()),
            suppressed_at: Utc::now(),
        };

        let msg = format_suppressed_alert(&s);
        assert!(msg.contains("*Suppressed Consensus* (market_closing)"));
        assert!(msg.contains("2 wallets sold outcome 1 (SELL)"));
        assert!(msg.contains("Reason: market closing: price 0.985"));
        assert!(msg.contains("`0xabcd...6789` $1500 @ 0.42"));
    }

    #[test]
    fn test_format_suppression_report_lists_reasons() {
        let report = SuppressionReport {
            interval_secs: 3600,
            candidates: 5,
            alerts: 1,
            suppressed_total: 4,
            suppressed: [("cooldown".to_string(), 3), ("market_closing".to_string(), 1)]
                .into_iter()
                .collect(),
        };

        let msg = format_suppression_report(&report);
        assert!(msg.contains("(last 60 min)"));
        assert!(msg.contains("Candidates: 5"));
        assert!(msg.contains("- cooldown: 3"));
        assert!(msg.contains("- market_closing: 1"));
    }

    #[test]
    fn test_format_prefers_market_title() {
        let mut p = payload();
        p.market_title = Some("Will it rain in Paris?".into());
        let msg = format_consensus_alert(&p);
        assert!(msg.contains("Market: Will it rain in Paris?"));
        assert!(!msg.contains("0x1234567890abcd"));
    }
}
