//! Trade executor: validates, quotes and commits one request against a
//! working copy of a pool's state.
//!
//! Flow: Quoted -> Matching (order book) -> Filling (AMM residual) -> Settled,
//! or Rejected at any step. The caller publishes the working copy only when
//! this returns Ok, so a failure at any step leaves no trace.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::ledger::{PositionKey, PositionLedger};
use crate::models::{Counterparty, ExecuteRequest, Market, Order, Side, Trade, TradeRole};
use crate::quote::{Quote, QuoteCalculator};
use crate::state::PairState;

/// Relative difference tolerated between the plan and what was applied.
const FILL_TOLERANCE: Decimal = dec!(0.000000001);

/// Stage a trade request has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Quoted,
    Matching,
    Filling,
    Settled,
    Rejected,
}

/// Outcome of a committed request.
#[derive(Debug, Clone, Serialize)]
pub struct Settlement {
    pub request_id: Uuid,
    pub quote: Quote,
    /// Taker fills: order book first, AMM last
    pub trades: Vec<Trade>,
    /// Mirrored fills credited to resting order owners
    pub maker_trades: Vec<Trade>,
    /// Resting orders after their fills
    pub touched_orders: Vec<Order>,
    pub state: TradeState,
}

impl Settlement {
    pub fn total_shares(&self) -> Decimal {
        self.trades.iter().map(|t| t.shares).sum()
    }

    pub fn gross_amount(&self) -> Decimal {
        self.trades.iter().map(|t| t.total_amount).sum()
    }
}

/// Commits trades against a working copy of one pool.
pub struct TradeExecutor<'a> {
    config: &'a EngineConfig,
    calculator: &'a QuoteCalculator,
    ledger: &'a PositionLedger,
}

impl<'a> TradeExecutor<'a> {
    pub fn new(
        config: &'a EngineConfig,
        calculator: &'a QuoteCalculator,
        ledger: &'a PositionLedger,
    ) -> Self {
        Self {
            config,
            calculator,
            ledger,
        }
    }

    /// Run a request to settlement, mutating `working` and the ledger.
    ///
    /// On error `working` may be partially modified and must be discarded;
    /// the ledger is untouched.
    pub fn execute(
        &self,
        market: &Market,
        working: &mut PairState,
        request: &ExecuteRequest,
    ) -> EngineResult<Settlement> {
        let mut stage = TradeState::Quoted;
        let result = self.run(market, working, request, &mut stage);

        if let Err(ref e) = result {
            warn!(
                "[EXEC] Rejected during {:?}: {} {} {} on {} ({})",
                stage,
                request.quote.trade_type,
                request.quote.amount_or_shares,
                request.quote.token,
                working.key,
                e
            );
        }

        result
    }

    fn run(
        &self,
        market: &Market,
        working: &mut PairState,
        request: &ExecuteRequest,
        stage: &mut TradeState,
    ) -> EngineResult<Settlement> {
        let req = &request.quote;
        let token = req.token;
        let side = req.trade_type;

        // Step 1: validate
        market.ensure_active()?;
        let key = market.pool_key(req.outcome_id, token)?;
        if key != working.key {
            return Err(EngineError::InvalidOutcome(format!(
                "request for {} routed to {}",
                key, working.key
            )));
        }
        if req.amount_or_shares <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "quantity must be positive, got {}",
                req.amount_or_shares
            )));
        }
        if side == Side::Sell {
            self.check_sellable(working, request)?;
        }

        // Step 2: quote against the live state
        let quote = self
            .calculator
            .quote(working, token, side, req.amount_or_shares)?;
        let notional = match side {
            Side::Buy => req.amount_or_shares,
            Side::Sell => quote.gross(),
        };
        market.check_bounds(notional)?;
        self.check_ticket(working, request, &quote)?;

        let request_id = Uuid::new_v4();
        let now = Utc::now();
        let mut trades = Vec::new();
        let mut maker_trades = Vec::new();
        let mut touched_orders = Vec::new();

        // Step 3: consume resting orders
        *stage = TradeState::Matching;
        for fill in &quote.book_fills {
            let filled = working.book.consume(fill.order_id, fill.shares)?;
            if !within(filled, fill.shares) {
                return Err(self.stale(&quote, working));
            }

            let total = filled * fill.price;
            trades.push(Trade {
                id: Uuid::new_v4(),
                request_id,
                user_id: request.user_id,
                pool: key,
                token,
                side,
                shares: filled,
                price: fill.price,
                total_amount: total,
                counterparty: Counterparty::Order(fill.order_id),
                role: TradeRole::Taker,
                seq: 0,
                created_at: now,
            });
            maker_trades.push(Trade {
                id: Uuid::new_v4(),
                request_id,
                user_id: fill.maker_id,
                pool: key,
                token,
                side: side.opposite(),
                shares: filled,
                price: fill.price,
                total_amount: total,
                counterparty: Counterparty::Order(fill.order_id),
                role: TradeRole::Maker,
                seq: 0,
                created_at: now,
            });
            if let Some(order) = working.book.get(fill.order_id) {
                touched_orders.push(order.clone());
            }
        }

        // Step 4: residual against the pool
        *stage = TradeState::Filling;
        if let Some(ref planned) = quote.amm {
            let residual = match side {
                Side::Buy => planned.amount,
                Side::Sell => planned.shares,
            };
            let applied = working.pool.apply(token, side, residual)?;
            if !within(applied.shares, planned.shares) || !within(applied.amount, planned.amount) {
                return Err(self.stale(&quote, working));
            }

            trades.push(Trade {
                id: Uuid::new_v4(),
                request_id,
                user_id: request.user_id,
                pool: key,
                token,
                side,
                shares: applied.shares,
                price: applied.avg_price,
                total_amount: applied.amount,
                counterparty: Counterparty::Amm,
                role: TradeRole::Taker,
                seq: 0,
                created_at: now,
            });
        }

        for (seq, trade) in trades.iter_mut().chain(maker_trades.iter_mut()).enumerate() {
            trade.seq = u32::try_from(seq).unwrap_or(u32::MAX);
        }

        let settlement = Settlement {
            request_id,
            quote,
            trades,
            maker_trades,
            touched_orders,
            state: TradeState::Settled,
        };

        // Step 6 precondition: what was applied is what was quoted
        if !within(settlement.total_shares(), settlement.quote.shares)
            || !within(settlement.gross_amount(), settlement.quote.gross())
        {
            return Err(self.stale(&settlement.quote, working));
        }

        // Step 5: ledger, last fallible step
        let batch: Vec<Trade> = settlement
            .trades
            .iter()
            .chain(settlement.maker_trades.iter())
            .cloned()
            .collect();
        self.ledger.append_batch(&batch)?;

        *stage = TradeState::Settled;
        debug!(
            "[EXEC] Settled {} on {}: {} trades, {} maker fills",
            request_id,
            key,
            settlement.trades.len(),
            settlement.maker_trades.len()
        );

        Ok(settlement)
    }

    /// Sells may not exceed held shares minus those already resting in the
    /// user's own sell orders.
    fn check_sellable(&self, working: &PairState, request: &ExecuteRequest) -> EngineResult<()> {
        let token = request.quote.token;
        let held = self.ledger.shares(&PositionKey {
            user_id: request.user_id,
            pool: working.key,
            token,
        });
        let reserved = working
            .book
            .resting_shares(request.user_id, token, Side::Sell);
        let available = (held - reserved).max(Decimal::ZERO);

        if request.quote.amount_or_shares > available {
            return Err(EngineError::InsufficientShares {
                requested: request.quote.amount_or_shares,
                available,
            });
        }
        Ok(())
    }

    /// Reject when the caller quoted an older snapshot and the price has
    /// moved more than the configured tolerance since.
    fn check_ticket(
        &self,
        working: &PairState,
        request: &ExecuteRequest,
        quote: &Quote,
    ) -> EngineResult<()> {
        let Some(ticket) = request.ticket else {
            return Ok(());
        };
        if ticket.version == working.version {
            return Ok(());
        }
        if ticket.price_per_share <= Decimal::ZERO {
            return Err(EngineError::StaleQuote {
                quoted: ticket.version,
                current: working.version,
            });
        }

        let drift = ((quote.price_per_share - ticket.price_per_share) / ticket.price_per_share).abs();
        if drift > self.config.stale_quote_tolerance {
            debug!(
                "[EXEC] Quote drifted {:.4}% (v{} -> v{})",
                drift * dec!(100),
                ticket.version,
                working.version
            );
            return Err(EngineError::StaleQuote {
                quoted: ticket.version,
                current: working.version,
            });
        }
        Ok(())
    }

    fn stale(&self, quote: &Quote, working: &PairState) -> EngineError {
        EngineError::StaleQuote {
            quoted: quote.version,
            current: working.version,
        }
    }
}

fn within(actual: Decimal, expected: Decimal) -> bool {
    let scale = expected.abs().max(Decimal::ONE);
    (actual - expected).abs() <= FILL_TOLERANCE * scale
}
