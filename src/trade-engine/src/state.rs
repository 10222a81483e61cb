//! Versioned state of one pool and its order book.

use serde::Serialize;

use common::LiquidityRow;

use crate::models::PoolKey;
use crate::orderbook::OrderBook;
use crate::pool::ReservePool;

/// Everything a trade on one pool reads or writes.
///
/// Published snapshots are immutable; commits mutate a clone and publish it
/// with `version + 1`.
#[derive(Debug, Clone, Serialize)]
pub struct PairState {
    pub key: PoolKey,
    pub version: u64,
    pub pool: ReservePool,
    pub book: OrderBook,
}

impl PairState {
    pub fn new(key: PoolKey, pool: ReservePool) -> Self {
        Self {
            key,
            version: 0,
            pool,
            book: OrderBook::new(),
        }
    }

    /// Pool reserves stamped with this snapshot's version.
    pub fn liquidity_row(&self) -> LiquidityRow {
        self.pool.to_row(self.key, self.version)
    }
}
