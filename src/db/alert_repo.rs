use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::errors::StoreError;
use crate::models::{Alert, AlertWallet, Side, WindowKey};
use crate::store::{AlertStore, RecordOutcome};

#[derive(Debug, FromRow)]
struct AlertRow {
    id: Uuid,
    alert_key: String,
    condition_id: String,
    outcome_index: i32,
    side: String,
    wallet_count: i32,
    price: Decimal,
    total_usd: Decimal,
    first_event_at: DateTime<Utc>,
    last_event_at: DateTime<Utc>,
    market_title: Option<String>,
    sent_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct AlertWalletRow {
    alert_id: Uuid,
    wallet: String,
    usd_amount: Decimal,
    entry_price: Decimal,
    win_rate: Option<Decimal>,
    total_trades: Option<i32>,
}

impl AlertRow {
    fn into_alert(self, wallets: Vec<AlertWallet>) -> Result<Alert, StoreError> {
        let side = Side::from_api_str(&self.side)
            .ok_or_else(|| StoreError::Decode(format!("alert {} has side {:?}", self.id, self.side)))?;

        Ok(Alert {
            id: self.id,
            alert_key: self.alert_key,
            condition_id: self.condition_id,
            outcome_index: self.outcome_index,
            side,
            wallet_count: self.wallet_count,
            price: self.price,
            total_usd: self.total_usd,
            first_event_at: self.first_event_at,
            last_event_at: self.last_event_at,
            wallets,
            market_title: self.market_title,
            sent_at: self.sent_at,
        })
    }
}

impl From<AlertWalletRow> for AlertWallet {
    fn from(row: AlertWalletRow) -> Self {
        AlertWallet {
            wallet: row.wallet,
            usd_amount: row.usd_amount,
            entry_price: row.entry_price,
            win_rate: row.win_rate,
            total_trades: row.total_trades,
        }
    }
}

/// Postgres-backed alert store.
#[derive(Debug, Clone)]
pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

async fn fetch_latest(conn: &mut PgConnection, key: &WindowKey) -> Result<Option<Alert>, StoreError> {
    let row = sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT * FROM alerts
        WHERE condition_id = $1 AND outcome_index = $2 AND side = $3
        ORDER BY sent_at DESC
        LIMIT 1
        "#,
    )
    .bind(&key.condition_id)
    .bind(key.outcome_index)
    .bind(key.side.as_str())
    .fetch_optional(&mut *conn)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut wallets = fetch_wallets(conn, &[row.id]).await?;
    let wallets = wallets.remove(&row.id).unwrap_or_default();
    row.into_alert(wallets).map(Some)
}

async fn fetch_wallets(
    conn: &mut PgConnection,
    alert_ids: &[Uuid],
) -> Result<HashMap<Uuid, Vec<AlertWallet>>, StoreError> {
    let rows = sqlx::query_as::<_, AlertWalletRow>(
        "SELECT * FROM alert_wallets WHERE alert_id = ANY($1) ORDER BY usd_amount DESC",
    )
    .bind(alert_ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut grouped: HashMap<Uuid, Vec<AlertWallet>> = HashMap::new();
    for row in rows {
        grouped.entry(row.alert_id).or_default().push(row.into());
    }
    Ok(grouped)
}

/// Insert the alert and its wallet rows. Returns false if `alert_key` exists.
async fn insert_alert(conn: &mut PgConnection, alert: &Alert) -> Result<bool, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO alerts (id, alert_key, condition_id, outcome_index, side, wallet_count,
                            price, total_usd, first_event_at, last_event_at, market_title, sent_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        ON CONFLICT (alert_key) DO NOTHING
        "#,
    )
    .bind(alert.id)
    .bind(&alert.alert_key)
    .bind(&alert.condition_id)
    .bind(alert.outcome_index)
    .bind(alert.side.as_str())
    .bind(alert.wallet_count)
    .bind(alert.price)
    .bind(alert.total_usd)
    .bind(alert.first_event_at)
    .bind(alert.last_event_at)
    .bind(&alert.market_title)
    .bind(alert.sent_at)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    for w in &alert.wallets {
        sqlx::query(
            r#"
            INSERT INTO alert_wallets (alert_id, wallet, usd_amount, entry_price, win_rate, total_trades)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(alert.id)
        .bind(&w.wallet)
        .bind(w.usd_amount)
        .bind(w.entry_price)
        .bind(w.win_rate)
        .bind(w.total_trades)
        .execute(&mut *conn)
        .await?;
    }

    Ok(true)
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn lookup_latest(&self, key: &WindowKey) -> Result<Option<Alert>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        fetch_latest(&mut conn, key).await
    }

    async fn record(&self, alert: &Alert) -> Result<RecordOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_alert(&mut tx, alert).await?;
        tx.commit().await?;

        Ok(if inserted {
            RecordOutcome::Recorded
        } else {
            RecordOutcome::AlreadyRecorded
        })
    }

    /// Serialized per key by a transaction-scoped advisory lock, so two
    /// shards or processes cannot both pass the cooldown for one key.
    async fn record_unless_recent(
        &self,
        alert: &Alert,
        cooldown: Duration,
    ) -> Result<RecordOutcome, StoreError> {
        let key = alert.key();
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await?;

        if let Some(latest) = fetch_latest(&mut tx, &key).await? {
            if alert.sent_at - latest.sent_at < cooldown {
                tx.rollback().await?;
                return Ok(RecordOutcome::CooldownActive(latest));
            }
        }

        let inserted = insert_alert(&mut tx, alert).await?;
        tx.commit().await?;

        Ok(if inserted {
            RecordOutcome::Recorded
        } else {
            RecordOutcome::AlreadyRecorded
        })
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Alert>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts ORDER BY sent_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&mut *conn)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let mut wallets = fetch_wallets(&mut conn, &ids).await?;

        rows.into_iter()
            .map(|row| {
                let w = wallets.remove(&row.id).unwrap_or_default();
                row.into_alert(w)
            })
            .collect()
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
