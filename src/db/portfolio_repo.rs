use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Portfolio;

pub async fn get_portfolio(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Portfolio>> {
    let portfolio = sqlx::query_as::<_, Portfolio>("SELECT * FROM portfolios WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(portfolio)
}

/// All portfolios with the persisted auto-trading flag set.
pub async fn list_auto_trading(pool: &PgPool) -> anyhow::Result<Vec<Portfolio>> {
    let portfolios = sqlx::query_as::<_, Portfolio>(
        "SELECT * FROM portfolios WHERE auto_trading_enabled = TRUE ORDER BY id",
    )
    .fetch_all(pool)
    .await?;

    Ok(portfolios)
}

pub async fn set_auto_trading(
    pool: &PgPool,
    id: Uuid,
    enabled: bool,
) -> anyhow::Result<Option<Portfolio>> {
    let portfolio = sqlx::query_as::<_, Portfolio>(
        r#"
        UPDATE portfolios
        SET auto_trading_enabled = $2, updated_at = $3
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(enabled)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(portfolio)
}

/// Apply cash and realized-P&L deltas in a single statement so concurrent
/// writers never overwrite each other's balance.
pub async fn apply_cash_delta(
    pool: &PgPool,
    id: Uuid,
    cash_delta: Decimal,
    realized_pnl_delta: Decimal,
) -> anyhow::Result<Option<Portfolio>> {
    let portfolio = sqlx::query_as::<_, Portfolio>(
        r#"
        UPDATE portfolios
        SET cash_balance = cash_balance + $2,
            realized_pnl = realized_pnl + $3,
            updated_at = $4
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(cash_delta)
    .bind(realized_pnl_delta)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await?;

    Ok(portfolio)
}

pub async fn update_valuation(
    pool: &PgPool,
    id: Uuid,
    total_value: Decimal,
    total_pnl: Decimal,
) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE portfolios
        SET total_value = $2, total_pnl = $3, updated_at = $4
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(total_value)
    .bind(total_pnl)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}
