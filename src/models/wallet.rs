use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A tracked "smart money" wallet and its lifetime statistics.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    /// Lowercase hex address.
    pub address: String,
    pub display_name: Option<String>,
    pub total_trades: i32,
    /// Fraction in [0, 1].
    pub win_rate: Decimal,
    pub realized_pnl: Decimal,
    pub daily_trade_frequency: Option<Decimal>,
    pub eligible: bool,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(address: &str, total_trades: i32, win_rate: Decimal) -> Self {
        Self {
            address: address.to_lowercase(),
            display_name: None,
            total_trades,
            win_rate,
            realized_pnl: Decimal::ZERO,
            daily_trade_frequency: None,
            eligible: true,
            updated_at: Utc::now(),
        }
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.address)
    }
}
