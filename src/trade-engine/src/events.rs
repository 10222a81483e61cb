//! Change notifications and the persistence sink that consumes them.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use common::{LiquidityRow, OrderRow, TradeRow};

/// Engine state change, published after each commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EngineEvent {
    TradeExecuted(TradeRow),
    PriceUpdated(LiquidityRow),
    OrderUpdated(OrderRow),
}

/// Writes engine events somewhere durable.
/// Mockable for testing via mockall.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_trade(&self, trade: &TradeRow) -> Result<()>;

    async fn record_order(&self, order: &OrderRow) -> Result<()>;

    async fn record_liquidity(&self, liquidity: &LiquidityRow) -> Result<()>;
}

/// Counters from one sink session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub written: u64,
    pub failed: u64,
    /// Events dropped because the sink fell behind the channel
    pub lagged: u64,
}

/// Drain `rx` into `sink` until every sender is gone.
///
/// Write failures are logged and counted; they never stop the loop.
pub async fn run_sink(mut rx: broadcast::Receiver<EngineEvent>, sink: &dyn EventSink) -> SinkStats {
    let mut stats = SinkStats::default();

    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!("[SINK] Lagged behind, {} events dropped", skipped);
                stats.lagged += skipped;
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let result = match &event {
            EngineEvent::TradeExecuted(row) => sink.record_trade(row).await,
            EngineEvent::OrderUpdated(row) => sink.record_order(row).await,
            EngineEvent::PriceUpdated(row) => sink.record_liquidity(row).await,
        };

        match result {
            Ok(()) => stats.written += 1,
            Err(e) => {
                warn!("[SINK] Failed to persist event: {:#}", e);
                stats.failed += 1;
            }
        }
    }

    debug!("[SINK] Channel closed");
    info!(
        "[SINK] Done: {} written, {} failed, {} lagged",
        stats.written, stats.failed, stats.lagged
    );
    stats
}
