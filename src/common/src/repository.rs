//! Database repository functions for engine orders, trades and liquidity.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{LiquidityRow, OrderRow, TradeRow};

/// Insert or update an order row.
/// Fill progress and status are overwritten on conflict.
pub async fn upsert_order(pool: &PgPool, order: &OrderRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO engine_orders
            (id, user_id, market_id, outcome_id, outcome, order_type,
             price_per_share, shares, filled_shares, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (id) DO UPDATE SET
            filled_shares = EXCLUDED.filled_shares,
            status = EXCLUDED.status,
            updated_at = NOW()
        "#,
    )
    .bind(order.id)
    .bind(order.user_id)
    .bind(order.market_id)
    .bind(order.outcome_id)
    .bind(&order.outcome)
    .bind(&order.order_type)
    .bind(order.price_per_share)
    .bind(order.shares)
    .bind(order.filled_shares)
    .bind(&order.status)
    .bind(order.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Insert a trade row. Trades are immutable, duplicates are ignored.
pub async fn insert_trade(pool: &PgPool, trade: &TradeRow) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO engine_trades
            (id, request_id, market_id, outcome_id, outcome, user_id, trade_type,
             shares, price_per_share, total_amount, counterparty, seq, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(trade.id)
    .bind(trade.request_id)
    .bind(trade.market_id)
    .bind(trade.outcome_id)
    .bind(&trade.outcome)
    .bind(trade.user_id)
    .bind(&trade.trade_type)
    .bind(trade.shares)
    .bind(trade.price_per_share)
    .bind(trade.total_amount)
    .bind(&trade.counterparty)
    .bind(trade.seq)
    .bind(trade.created_at)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert or update the liquidity state of a pool.
/// A row older than the stored one is ignored.
pub async fn upsert_liquidity(pool: &PgPool, row: &LiquidityRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO engine_liquidity
            (market_id, outcome_id, yes_reserve, no_reserve, draw_reserve,
             constant_product, total_liquidity, yes_price, version)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (market_id, COALESCE(outcome_id, '00000000-0000-0000-0000-000000000000'::uuid))
        DO UPDATE SET
            yes_reserve = EXCLUDED.yes_reserve,
            no_reserve = EXCLUDED.no_reserve,
            draw_reserve = EXCLUDED.draw_reserve,
            constant_product = EXCLUDED.constant_product,
            total_liquidity = EXCLUDED.total_liquidity,
            yes_price = EXCLUDED.yes_price,
            version = EXCLUDED.version,
            updated_at = NOW()
        WHERE engine_liquidity.version < EXCLUDED.version
        "#,
    )
    .bind(row.market_id)
    .bind(row.outcome_id)
    .bind(row.yes_reserve)
    .bind(row.no_reserve)
    .bind(row.draw_reserve)
    .bind(row.constant_product)
    .bind(row.total_liquidity)
    .bind(row.yes_price)
    .bind(row.version)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a user's trades in a market, oldest first.
/// Replaying these in order reconstructs the user's positions.
pub async fn get_trades_for_user(
    pool: &PgPool,
    user_id: Uuid,
    market_id: Uuid,
) -> Result<Vec<TradeRow>, sqlx::Error> {
    sqlx::query_as::<_, TradeRow>(
        r#"
        SELECT id, request_id, market_id, outcome_id, outcome, user_id, trade_type,
               shares, price_per_share, total_amount, counterparty, seq, created_at
        FROM engine_trades
        WHERE user_id = $1 AND market_id = $2
        ORDER BY created_at ASC, request_id, seq ASC
        "#,
    )
    .bind(user_id)
    .bind(market_id)
    .fetch_all(pool)
    .await
}
