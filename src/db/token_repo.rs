use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{PricePoint, Token};

pub async fn get_token(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<Token>> {
    let token = sqlx::query_as::<_, Token>("SELECT * FROM tokens WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    Ok(token)
}

/// Most recent `limit` samples for a token, oldest first.
pub async fn price_history(pool: &PgPool, token_id: Uuid, limit: i64) -> anyhow::Result<Vec<PricePoint>> {
    let mut points = sqlx::query_as::<_, PricePoint>(
        r#"
        SELECT price, volume, timestamp FROM price_history
        WHERE token_id = $1
        ORDER BY timestamp DESC
        LIMIT $2
        "#,
    )
    .bind(token_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    points.reverse();
    Ok(points)
}
