use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewTrade, Trade};

/// Insert a new trade record.
pub async fn insert_trade(pool: &PgPool, new: &NewTrade) -> anyhow::Result<Trade> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        INSERT INTO trades (id, portfolio_id, token_id, trade_type, amount, price, total_value,
                            pattern_id, pattern_type, reason, executed_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.portfolio_id)
    .bind(new.token_id)
    .bind(new.trade_type.as_str())
    .bind(new.amount)
    .bind(new.price)
    .bind(new.amount * new.price)
    .bind(new.pattern_id)
    .bind(&new.pattern_type)
    .bind(&new.reason)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    Ok(trade)
}

pub async fn get_trade(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Trade>> {
    let trade = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(trade)
}

/// Drop a trade that never took effect. Closed trades are left alone.
pub async fn delete_open_trade(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query("DELETE FROM trades WHERE id = $1 AND closed_at IS NULL")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}

/// Legacy lot lookup: newest unclosed buy for the pair at exactly `price`.
pub async fn find_open_buy_trade(
    pool: &PgPool,
    portfolio_id: Uuid,
    token_id: Uuid,
    price: Decimal,
) -> anyhow::Result<Option<Trade>> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        SELECT * FROM trades
        WHERE portfolio_id = $1 AND token_id = $2 AND trade_type = 'buy'
          AND price = $3 AND closed_at IS NULL
        ORDER BY executed_at DESC
        LIMIT 1
        "#,
    )
    .bind(portfolio_id)
    .bind(token_id)
    .bind(price)
    .fetch_optional(pool)
    .await?;

    Ok(trade)
}

/// Backfill exit fields on the entry trade.
pub async fn close_trade(
    pool: &PgPool,
    id: Uuid,
    exit_price: Decimal,
    realized_pnl: Decimal,
    closed_at: DateTime<Utc>,
) -> anyhow::Result<Option<Trade>> {
    let trade = sqlx::query_as::<_, Trade>(
        r#"
        UPDATE trades
        SET exit_price = $2, realized_pnl = $3, closed_at = $4
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(exit_price)
    .bind(realized_pnl)
    .bind(closed_at)
    .fetch_optional(pool)
    .await?;

    Ok(trade)
}

pub async fn closed_trades_for_pattern(
    pool: &PgPool,
    pattern_type: &str,
    limit: i64,
) -> anyhow::Result<Vec<Trade>> {
    let trades = sqlx::query_as::<_, Trade>(
        r#"
        SELECT * FROM trades
        WHERE pattern_type = $1 AND closed_at IS NOT NULL
        ORDER BY closed_at DESC
        LIMIT $2
        "#,
    )
    .bind(pattern_type)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(trades)
}

pub async fn recent_closed_trades(pool: &PgPool, limit: i64) -> anyhow::Result<Vec<Trade>> {
    let trades = sqlx::query_as::<_, Trade>(
        "SELECT * FROM trades WHERE closed_at IS NOT NULL ORDER BY closed_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(trades)
}
