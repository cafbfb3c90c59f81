use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{NewPosition, Position};

pub async fn get_position(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Position>> {
    let position = sqlx::query_as::<_, Position>("SELECT * FROM positions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(position)
}

/// The (single) position row for a portfolio/token pair, open or soft-closed.
pub async fn find_position(
    pool: &PgPool,
    portfolio_id: Uuid,
    token_id: Uuid,
) -> anyhow::Result<Option<Position>> {
    let position = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE portfolio_id = $1 AND token_id = $2 LIMIT 1",
    )
    .bind(portfolio_id)
    .bind(token_id)
    .fetch_optional(pool)
    .await?;

    Ok(position)
}

/// Positions with a non-zero amount.
pub async fn get_open_positions(pool: &PgPool, portfolio_id: Uuid) -> anyhow::Result<Vec<Position>> {
    let positions = sqlx::query_as::<_, Position>(
        "SELECT * FROM positions WHERE portfolio_id = $1 AND amount > 0 ORDER BY opened_at",
    )
    .bind(portfolio_id)
    .fetch_all(pool)
    .await?;

    Ok(positions)
}

pub async fn insert_position(pool: &PgPool, new: &NewPosition) -> anyhow::Result<Position> {
    let now = Utc::now();
    let position = sqlx::query_as::<_, Position>(
        r#"
        INSERT INTO positions (id, portfolio_id, token_id, amount, average_buy_price, entry_trade_id, opened_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(new.portfolio_id)
    .bind(new.token_id)
    .bind(new.amount)
    .bind(new.average_buy_price)
    .bind(new.entry_trade_id)
    .bind(now)
    .fetch_one(pool)
    .await?;

    Ok(position)
}

/// Revive a soft-closed row with a fresh lot. No-op if the row is open.
pub async fn reopen_position(
    pool: &PgPool,
    id: Uuid,
    amount: Decimal,
    average_buy_price: Decimal,
    entry_trade_id: Uuid,
) -> anyhow::Result<Option<Position>> {
    let now = Utc::now();
    let position = sqlx::query_as::<_, Position>(
        r#"
        UPDATE positions
        SET amount = $2, average_buy_price = $3, entry_trade_id = $4, opened_at = $5, updated_at = $5
        WHERE id = $1 AND amount = 0
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(amount)
    .bind(average_buy_price)
    .bind(entry_trade_id)
    .bind(now)
    .fetch_optional(pool)
    .await?;

    Ok(position)
}

/// Soft-close: zero the amount only if it is still `expected_amount`.
pub async fn close_position(pool: &PgPool, id: Uuid, expected_amount: Decimal) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE positions
        SET amount = 0, updated_at = $3
        WHERE id = $1 AND amount = $2 AND amount > 0
        "#,
    )
    .bind(id)
    .bind(expected_amount)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Put `amount` back on a row that a failed sell left at zero.
pub async fn restore_position(pool: &PgPool, id: Uuid, amount: Decimal) -> anyhow::Result<bool> {
    let result = sqlx::query("UPDATE positions SET amount = $2, updated_at = $3 WHERE id = $1 AND amount = 0")
        .bind(id)
        .bind(amount)
        .bind(Utc::now())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() == 1)
}
