//! Engine facade: market registry, per-pool commit slots, the position
//! ledger and the change-notification channel.
//!
//! Every pool has its own [`PairSlot`]. Quotes read the slot's published
//! snapshot without waiting. Commits take the slot's gate (bounded by
//! `lock_timeout`), mutate a clone of the snapshot and publish it with the
//! next version. An error anywhere in a commit drops the clone, so readers
//! never observe a partial trade. Pools of different markets, and different
//! outcomes of one market, never contend.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::events::EngineEvent;
use crate::executor::{Settlement, TradeExecutor};
use crate::ledger::{Position, PositionKey, PositionLedger};
use crate::models::{
    ExecuteRequest, Market, MarketKind, MarketStatus, NewMarket, Order, OrderStatus, OutcomeDef,
    PlaceOrder, PoolKey, QuoteRequest, Side, Token, Trade,
};
use crate::orderbook::BookDepth;
use crate::pool::ReservePool;
use crate::quote::{Breakdown, ExecutionMethod, Quote, QuoteCalculator};
use crate::state::PairState;

/// Commit gate and published snapshot of one pool.
#[derive(Debug)]
pub struct PairSlot {
    gate: Mutex<()>,
    snapshot: RwLock<Arc<PairState>>,
}

impl PairSlot {
    fn new(state: PairState) -> Self {
        Self {
            gate: Mutex::new(()),
            snapshot: RwLock::new(Arc::new(state)),
        }
    }

    /// Latest published state.
    pub fn snapshot(&self) -> Arc<PairState> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, state: Arc<PairState>) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = state;
    }
}

/// Result of a committed trade request.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteResponse {
    /// Shared by every fill of this request
    pub trade_id: Uuid,
    pub user_id: Uuid,
    pub shares: Decimal,
    pub price_per_share: Decimal,
    /// Buy: paid including fee. Sell: received net of fee.
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub slippage_pct: Decimal,
    pub execution_method: ExecutionMethod,
    pub breakdown: Breakdown,
    pub trades: Vec<Trade>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub maker_trades: Vec<Trade>,
    /// Snapshot version published by this trade
    pub version: u64,
}

impl ExecuteResponse {
    fn from_settlement(user_id: Uuid, settlement: Settlement, version: u64) -> Self {
        let quote = settlement.quote;
        Self {
            trade_id: settlement.request_id,
            user_id,
            shares: quote.shares,
            price_per_share: quote.price_per_share,
            total_amount: quote.total_cost,
            platform_fee: quote.platform_fee,
            slippage_pct: quote.slippage_pct,
            execution_method: quote.execution_method,
            breakdown: quote.breakdown,
            trades: settlement.trades,
            maker_trades: settlement.maker_trades,
            version,
        }
    }
}

/// Trade pricing and execution engine.
pub struct Engine {
    config: EngineConfig,
    calculator: QuoteCalculator,
    markets: RwLock<HashMap<Uuid, Market>>,
    pairs: RwLock<HashMap<PoolKey, Arc<PairSlot>>>,
    /// Order id -> owning pool, for cancellation by id
    orders: RwLock<HashMap<Uuid, PoolKey>>,
    ledger: PositionLedger,
    events: broadcast::Sender<EngineEvent>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            calculator: QuoteCalculator::new(&config),
            config,
            markets: RwLock::new(HashMap::new()),
            pairs: RwLock::new(HashMap::new()),
            orders: RwLock::new(HashMap::new()),
            ledger: PositionLedger::new(),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ledger(&self) -> &PositionLedger {
        &self.ledger
    }

    /// Receive every change published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    // ---- markets ----

    /// Register a market and seed its pools. The market starts `Pending`.
    pub fn create_market(&self, new: NewMarket) -> EngineResult<Market> {
        if new.name.trim().is_empty() {
            return Err(EngineError::InvalidAmount("market name is empty".to_string()));
        }
        if new.min_trade_size <= Decimal::ZERO || new.min_trade_size > new.max_trade_size {
            return Err(EngineError::InvalidAmount(format!(
                "trade size bounds [{}, {}] are invalid",
                new.min_trade_size, new.max_trade_size
            )));
        }
        if new.initial_liquidity < Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "initial liquidity must not be negative, got {}",
                new.initial_liquidity
            )));
        }

        let outcomes: Vec<OutcomeDef> = match new.kind {
            MarketKind::MultiChoice => {
                if new.outcome_labels.len() < 2 {
                    return Err(EngineError::InvalidOutcome(
                        "multi-choice markets need at least two outcomes".to_string(),
                    ));
                }
                new.outcome_labels
                    .iter()
                    .map(|label| OutcomeDef {
                        id: Uuid::new_v4(),
                        label: label.clone(),
                    })
                    .collect()
            }
            _ => {
                if !new.outcome_labels.is_empty() {
                    return Err(EngineError::InvalidOutcome(format!(
                        "{:?} markets take no outcome labels",
                        new.kind
                    )));
                }
                Vec::new()
            }
        };

        let market = Market {
            id: Uuid::new_v4(),
            name: new.name,
            kind: new.kind,
            status: MarketStatus::Pending,
            min_trade_size: new.min_trade_size,
            max_trade_size: new.max_trade_size,
            outcomes,
            created_at: Utc::now(),
        };

        let mut slots = Vec::new();
        for key in market.pool_keys() {
            let pool = ReservePool::new(
                market.kind.pool_kind(),
                new.initial_liquidity,
                self.config.min_reserve,
            )?;
            slots.push((key, PairState::new(key, pool)));
        }

        {
            let mut pairs = self.pairs.write().unwrap_or_else(PoisonError::into_inner);
            for (key, state) in slots {
                if !state.pool.is_empty() {
                    self.emit(EngineEvent::PriceUpdated(state.liquidity_row()));
                }
                pairs.insert(key, Arc::new(PairSlot::new(state)));
            }
        }
        self.markets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(market.id, market.clone());

        info!(
            "[ENGINE] Created {:?} market {} '{}' with {} pool(s), liquidity ${}",
            market.kind,
            market.id,
            market.name,
            market.pool_keys().len(),
            new.initial_liquidity
        );

        Ok(market)
    }

    pub fn market(&self, market_id: Uuid) -> EngineResult<Market> {
        self.markets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&market_id)
            .cloned()
            .ok_or(EngineError::MarketNotFound(market_id))
    }

    pub fn markets(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = self
            .markets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        markets.sort_by_key(|m| m.created_at);
        markets
    }

    /// Move a market through its lifecycle.
    ///
    /// Cancelling or resolving a market cancels every resting order on it.
    pub async fn set_market_status(
        &self,
        market_id: Uuid,
        status: MarketStatus,
    ) -> EngineResult<Market> {
        let market = {
            let mut markets = self.markets.write().unwrap_or_else(PoisonError::into_inner);
            let market = markets
                .get_mut(&market_id)
                .ok_or(EngineError::MarketNotFound(market_id))?;
            if !market.status.can_transition_to(status) {
                return Err(EngineError::InvalidTransition {
                    from: market.status,
                    to: status,
                });
            }
            market.status = status;
            market.clone()
        };

        info!("[ENGINE] Market {} -> {}", market_id, status);

        if matches!(status, MarketStatus::Cancelled | MarketStatus::Resolved) {
            for key in market.pool_keys() {
                let slot = self.slot(&key)?;
                let (cancelled, _) = self
                    .commit(
                        &slot,
                        |state| {
                            let ids: Vec<Uuid> =
                                state.book.open_orders().iter().map(|o| o.id).collect();
                            ids.into_iter()
                                .map(|id| state.book.cancel(id))
                                .collect::<EngineResult<Vec<Order>>>()
                        },
                        |cancelled, _| {
                            self.forget_orders(cancelled.iter());
                            cancelled
                                .iter()
                                .map(|o| EngineEvent::OrderUpdated(o.to_row()))
                                .collect()
                        },
                    )
                    .await?;
                if !cancelled.is_empty() {
                    debug!("[ENGINE] Cancelled {} resting orders on {}", cancelled.len(), key);
                }
            }
        }

        Ok(market)
    }

    // ---- liquidity ----

    /// Add collateral to a pool without moving its prices.
    pub async fn add_liquidity(
        &self,
        market_id: Uuid,
        outcome_id: Option<Uuid>,
        amount: Decimal,
    ) -> EngineResult<ReservePool> {
        let key = self.open_pool_key(market_id, outcome_id)?;
        let slot = self.slot(&key)?;

        let (total, state) = self
            .commit(
                &slot,
                |state| {
                    self.open_pool_key(market_id, outcome_id)?;
                    state.pool.add_liquidity(amount)
                },
                |_, state| vec![EngineEvent::PriceUpdated(state.liquidity_row())],
            )
            .await?;

        info!("[ENGINE] Added ${} liquidity to {} (total ${})", amount, key, total);
        Ok(state.pool.clone())
    }

    /// Withdraw a fraction of a pool. Returns the collateral withdrawn.
    pub async fn remove_liquidity(
        &self,
        market_id: Uuid,
        outcome_id: Option<Uuid>,
        fraction: Decimal,
    ) -> EngineResult<Decimal> {
        let key = self.open_pool_key(market_id, outcome_id)?;
        let slot = self.slot(&key)?;

        let (withdrawn, _) = self
            .commit(
                &slot,
                |state| {
                    self.open_pool_key(market_id, outcome_id)?;
                    state.pool.remove_liquidity(fraction)
                },
                |_, state| vec![EngineEvent::PriceUpdated(state.liquidity_row())],
            )
            .await?;

        info!("[ENGINE] Withdrew ${} liquidity from {}", withdrawn, key);
        Ok(withdrawn)
    }

    // ---- orders ----

    /// Rest a limit order on a pool's book.
    ///
    /// Sell orders are limited to shares held and not already resting.
    pub async fn place_order(&self, req: PlaceOrder) -> EngineResult<Order> {
        let market = self.market(req.market_id)?;
        market.ensure_active()?;
        let key = market.pool_key(req.outcome_id, req.token)?;
        let slot = self.slot(&key)?;

        let (order, _) = self
            .commit(
                &slot,
                |state| {
                    // Re-read under the gate: a cancel sweep may have run since
                    self.market(req.market_id)?.ensure_active()?;
                    if req.side == Side::Sell {
                        let held = self.ledger.shares(&PositionKey {
                            user_id: req.user_id,
                            pool: key,
                            token: req.token,
                        });
                        let reserved =
                            state.book.resting_shares(req.user_id, req.token, Side::Sell);
                        let available = (held - reserved).max(Decimal::ZERO);
                        if req.shares > available {
                            return Err(EngineError::InsufficientShares {
                                requested: req.shares,
                                available,
                            });
                        }
                    }

                    state.book.insert(Order {
                        id: Uuid::new_v4(),
                        user_id: req.user_id,
                        pool: key,
                        token: req.token,
                        side: req.side,
                        price: req.price,
                        shares: req.shares,
                        filled_shares: Decimal::ZERO,
                        status: OrderStatus::Open,
                        sequence: 0,
                        created_at: Utc::now(),
                    })
                },
                |order, _| {
                    self.orders
                        .write()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(order.id, key);
                    vec![EngineEvent::OrderUpdated(order.to_row())]
                },
            )
            .await?;

        info!(
            "[ENGINE] Order {} placed: {} {} {} @ {} on {}",
            order.id, order.side, order.shares, order.token, order.price, key
        );
        Ok(order)
    }

    /// Cancel a resting order. Only its owner may cancel it.
    pub async fn cancel_order(&self, user_id: Uuid, order_id: Uuid) -> EngineResult<Order> {
        let key = self
            .orders
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&order_id)
            .copied()
            .ok_or(EngineError::OrderNotFound(order_id))?;
        let slot = self.slot(&key)?;

        let (order, _) = self
            .commit(
                &slot,
                |state| {
                    match state.book.get(order_id) {
                        Some(order) if order.user_id == user_id => {}
                        _ => return Err(EngineError::OrderNotFound(order_id)),
                    }
                    state.book.cancel(order_id)
                },
                |order, _| {
                    self.forget_orders(std::iter::once(order));
                    vec![EngineEvent::OrderUpdated(order.to_row())]
                },
            )
            .await?;

        info!("[ENGINE] Order {} cancelled", order_id);
        Ok(order)
    }

    // ---- trading ----

    /// Price a request against the latest snapshot. Never blocks on commits.
    pub fn quote(&self, req: &QuoteRequest) -> EngineResult<Quote> {
        let market = self.market(req.market_id)?;
        market.ensure_active()?;
        let key = market.pool_key(req.outcome_id, req.token)?;
        let snapshot = self.slot(&key)?.snapshot();

        let quote = self
            .calculator
            .quote(&snapshot, req.token, req.trade_type, req.amount_or_shares)?;
        let notional = match req.trade_type {
            Side::Buy => req.amount_or_shares,
            Side::Sell => quote.gross(),
        };
        market.check_bounds(notional)?;

        debug!(
            "[ENGINE] Quote {} {} {} on {} v{}: {} shares @ {:.4} via {:?}",
            req.trade_type,
            req.amount_or_shares,
            req.token,
            key,
            snapshot.version,
            quote.shares,
            quote.price_per_share,
            quote.execution_method
        );

        Ok(quote)
    }

    /// Execute a request atomically: book fills, AMM residual and ledger
    /// entries all commit together or not at all.
    pub async fn execute(&self, req: &ExecuteRequest) -> EngineResult<ExecuteResponse> {
        let market = self.market(req.quote.market_id)?;
        let key = market.pool_key(req.quote.outcome_id, req.quote.token)?;
        let slot = self.slot(&key)?;

        let (settlement, state) = self
            .commit(
                &slot,
                |working| {
                    // Re-read under the gate so a concurrent status change is honoured
                    let market = self.market(req.quote.market_id)?;
                    TradeExecutor::new(&self.config, &self.calculator, &self.ledger)
                        .execute(&market, working, req)
                },
                |settlement, state| {
                    self.forget_orders(
                        settlement
                            .touched_orders
                            .iter()
                            .filter(|o| !o.status.is_resting()),
                    );
                    settlement_events(settlement, state)
                },
            )
            .await?;

        info!(
            "[EXEC] {} {} {} {} shares @ {:.4} for ${:.4} via {:?} (v{})",
            req.user_id,
            req.quote.trade_type,
            settlement.quote.shares,
            req.quote.token,
            settlement.quote.price_per_share,
            settlement.quote.total_cost,
            settlement.quote.execution_method,
            state.version
        );

        Ok(ExecuteResponse::from_settlement(
            req.user_id,
            settlement,
            state.version,
        ))
    }

    // ---- reads ----

    pub fn position(
        &self,
        user_id: Uuid,
        market_id: Uuid,
        outcome_id: Option<Uuid>,
        token: Token,
    ) -> EngineResult<Position> {
        let key = self.market(market_id)?.pool_key(outcome_id, token)?;
        Ok(self.ledger.position(&PositionKey {
            user_id,
            pool: key,
            token,
        }))
    }

    /// Latest published state of a pool.
    pub fn pool_state(
        &self,
        market_id: Uuid,
        outcome_id: Option<Uuid>,
    ) -> EngineResult<Arc<PairState>> {
        let key = self.market(market_id)?.pool_key(outcome_id, Token::Yes)?;
        Ok(self.slot(&key)?.snapshot())
    }

    pub fn order_book_depth(
        &self,
        market_id: Uuid,
        outcome_id: Option<Uuid>,
        token: Token,
    ) -> EngineResult<BookDepth> {
        let key = self.market(market_id)?.pool_key(outcome_id, token)?;
        Ok(self.slot(&key)?.snapshot().book.depth(token))
    }

    // ---- internals ----

    fn slot(&self, key: &PoolKey) -> EngineResult<Arc<PairSlot>> {
        self.pairs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or(EngineError::MarketNotFound(key.market_id))
    }

    /// Pool key for liquidity operations, refusing finished markets.
    fn open_pool_key(&self, market_id: Uuid, outcome_id: Option<Uuid>) -> EngineResult<PoolKey> {
        let market = self.market(market_id)?;
        if matches!(
            market.status,
            MarketStatus::Resolved | MarketStatus::Cancelled
        ) {
            return Err(EngineError::MarketNotActive(market.status));
        }
        market.pool_key(outcome_id, Token::Yes)
    }

    /// Run `mutate` on a private copy of the pool's state and publish it as
    /// the next version. Returns the closure's output and the new snapshot.
    ///
    /// `announce` runs after publication with the gate still held, so the
    /// events of one pool go out in commit order.
    async fn commit<T>(
        &self,
        slot: &PairSlot,
        mutate: impl FnOnce(&mut PairState) -> EngineResult<T>,
        announce: impl FnOnce(&T, &PairState) -> Vec<EngineEvent>,
    ) -> EngineResult<(T, Arc<PairState>)> {
        let timeout_ms = u64::try_from(self.config.lock_timeout.as_millis()).unwrap_or(u64::MAX);
        let _gate = tokio::time::timeout(self.config.lock_timeout, slot.gate.lock())
            .await
            .map_err(|_| {
                warn!("[ENGINE] Gave up waiting {}ms for pool lock", timeout_ms);
                EngineError::Timeout(timeout_ms)
            })?;

        let mut working = PairState::clone(&slot.snapshot());
        let out = mutate(&mut working)?;
        working.version += 1;

        let published = Arc::new(working);
        slot.publish(published.clone());
        for event in announce(&out, &published) {
            self.emit(event);
        }
        Ok((out, published))
    }

    /// Drop finished orders from the id index.
    fn forget_orders<'a>(&self, orders: impl Iterator<Item = &'a Order>) {
        let mut index = self.orders.write().unwrap_or_else(PoisonError::into_inner);
        for order in orders {
            index.remove(&order.id);
        }
    }

    fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }
}

/// Notifications for a settled trade: every fill, every touched order, and
/// the pool if the AMM moved.
fn settlement_events(settlement: &Settlement, state: &PairState) -> Vec<EngineEvent> {
    let mut events: Vec<EngineEvent> = settlement
        .trades
        .iter()
        .chain(settlement.maker_trades.iter())
        .map(|t| EngineEvent::TradeExecuted(t.to_row()))
        .collect();
    events.extend(
        settlement
            .touched_orders
            .iter()
            .map(|o| EngineEvent::OrderUpdated(o.to_row())),
    );
    if settlement.quote.amm.is_some() {
        events.push(EngineEvent::PriceUpdated(state.liquidity_row()));
    }
    events
}
