use sqlx::PgPool;

use crate::models::Wallet;

/// Fetch every tracked wallet, eligible or not.
pub async fn get_wallets(pool: &PgPool) -> anyhow::Result<Vec<Wallet>> {
    let wallets = sqlx::query_as::<_, Wallet>(
        "SELECT * FROM wallets ORDER BY win_rate DESC, total_trades DESC",
    )
    .fetch_all(pool)
    .await?;

    Ok(wallets)
}

/// Insert a wallet or refresh its statistics.
pub async fn upsert_wallet(pool: &PgPool, wallet: &Wallet) -> anyhow::Result<Wallet> {
    let wallet = sqlx::query_as::<_, Wallet>(
        r#"
        INSERT INTO wallets (address, display_name, total_trades, win_rate, realized_pnl,
                             daily_trade_frequency, eligible, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
        ON CONFLICT (address) DO UPDATE
        SET display_name = COALESCE(EXCLUDED.display_name, wallets.display_name),
            total_trades = EXCLUDED.total_trades,
            win_rate = EXCLUDED.win_rate,
            realized_pnl = EXCLUDED.realized_pnl,
            daily_trade_frequency = EXCLUDED.daily_trade_frequency,
            eligible = EXCLUDED.eligible,
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(wallet.address.to_lowercase())
    .bind(&wallet.display_name)
    .bind(wallet.total_trades)
    .bind(wallet.win_rate)
    .bind(wallet.realized_pnl)
    .bind(wallet.daily_trade_frequency)
    .bind(wallet.eligible)
    .fetch_one(pool)
    .await?;

    Ok(wallet)
}

/// Delete wallets flagged ineligible. Returns the number removed.
pub async fn prune_ineligible(pool: &PgPool) -> anyhow::Result<u64> {
    let result = sqlx::query("DELETE FROM wallets WHERE eligible = false")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
