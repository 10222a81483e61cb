//! Persisted row shapes for orders, trades and pool liquidity.
//!
//! These mirror the engine's domain types one-to-one and are also used as
//! the payload of real-time change notifications.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A resting limit order row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct OrderRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Option<Uuid>,
    /// "yes", "no" or "draw"
    pub outcome: String,
    /// "buy" or "sell"
    pub order_type: String,
    pub price_per_share: Decimal,
    pub shares: Decimal,
    pub filled_shares: Decimal,
    /// "open", "partially_filled", "filled" or "cancelled"
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// An executed fill segment row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct TradeRow {
    pub id: Uuid,
    /// Groups the segments of one committed request
    pub request_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Option<Uuid>,
    pub outcome: String,
    pub user_id: Uuid,
    pub trade_type: String,
    pub shares: Decimal,
    pub price_per_share: Decimal,
    pub total_amount: Decimal,
    /// Resting order id, or "amm"
    pub counterparty: String,
    /// Order of the segment within its request
    pub seq: i32,
    pub created_at: DateTime<Utc>,
}

/// Liquidity state of one reserve pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct LiquidityRow {
    pub market_id: Uuid,
    pub outcome_id: Option<Uuid>,
    pub yes_reserve: Decimal,
    pub no_reserve: Decimal,
    pub draw_reserve: Decimal,
    pub constant_product: Decimal,
    pub total_liquidity: Decimal,
    pub yes_price: Decimal,
    /// Pool snapshot version; stored rows only move forward
    pub version: i64,
}
