use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::RawTrade;

// ---------------------------------------------------------------------------
// Trade (Data API, GET /trades?user=)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTrade {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    #[serde(default)]
    pub usdc_size: Option<Decimal>,
    /// Seconds, milliseconds, or an RFC 3339 string depending on the endpoint.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl ApiTrade {
    /// Stable identity for deduplication: trade id, else transaction hash.
    pub fn trade_id(&self) -> Option<String> {
        self.id
            .clone()
            .or_else(|| self.transaction_hash.clone())
            .filter(|s| !s.is_empty())
    }

    pub fn traded_at(&self) -> Option<DateTime<Utc>> {
        parse_trade_timestamp(self.timestamp.as_ref())
    }

    /// Convert to a feed record. `wallet` is used when the row has no
    /// proxy wallet of its own.
    pub fn into_raw(self, wallet: &str) -> RawTrade {
        let timestamp = self.traded_at();
        let trade_id = self.trade_id();
        RawTrade {
            wallet: self.proxy_wallet.or_else(|| Some(wallet.to_string())),
            condition_id: self.condition_id,
            outcome_index: self.outcome_index,
            side: self.side,
            price: self.price,
            size: self.size,
            usd_amount: self.usdc_size,
            timestamp,
            trade_id,
            market_title: self.title,
        }
    }
}

/// Values above 1e12 are milliseconds, otherwise seconds.
fn from_epoch(n: i64) -> Option<DateTime<Utc>> {
    if n > 1_000_000_000_000 {
        DateTime::from_timestamp(n / 1000, ((n % 1000) * 1_000_000) as u32)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

pub fn parse_trade_timestamp(ts: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| match t {
        serde_json::Value::Number(n) => from_epoch(n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?),
        serde_json::Value::String(s) => match s.parse::<i64>() {
            Ok(n) => from_epoch(n),
            Err(_) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        },
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Market (Gamma API)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    pub question: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub closed: Option<bool>,
}
