//! Postgres-backed event sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use common::{Database, LiquidityRow, OrderRow, TradeRow};

use crate::events::EventSink;

/// Persists engine events through the shared repository functions.
pub struct PgEventSink {
    db: Database,
}

impl PgEventSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn record_trade(&self, trade: &TradeRow) -> Result<()> {
        let inserted = common::insert_trade(self.db.pool(), trade)
            .await
            .with_context(|| format!("insert trade {}", trade.id))?;
        if !inserted {
            debug!("[SINK] Trade {} already stored", trade.id);
        }
        Ok(())
    }

    async fn record_order(&self, order: &OrderRow) -> Result<()> {
        common::upsert_order(self.db.pool(), order)
            .await
            .with_context(|| format!("upsert order {}", order.id))
    }

    async fn record_liquidity(&self, liquidity: &LiquidityRow) -> Result<()> {
        common::upsert_liquidity(self.db.pool(), liquidity)
            .await
            .with_context(|| format!("upsert liquidity for market {}", liquidity.market_id))
    }
}
