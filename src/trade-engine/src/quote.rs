//! Read-only trade pricing across the order book and the AMM.
//!
//! The executor commits exactly the plan returned here, so a preview and
//! the trade it leads to always use the same math.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{QuoteTicket, Side, Token};
use crate::pool::AmmQuote;
use crate::state::PairState;

/// Residual quantity below which the AMM is not consulted.
pub const DUST: Decimal = dec!(0.0000000001);

/// Shares, cost and average price of one execution venue.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LegBreakdown {
    pub shares: Decimal,
    pub cost: Decimal,
    pub avg_price: Decimal,
}

impl LegBreakdown {
    fn new(shares: Decimal, cost: Decimal) -> Self {
        let avg_price = if shares > Decimal::ZERO {
            cost / shares
        } else {
            Decimal::ZERO
        };
        Self {
            shares,
            cost,
            avg_price,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Breakdown {
    pub order_book: LegBreakdown,
    pub amm: LegBreakdown,
}

/// Where a trade was filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMethod {
    OrderBook,
    Amm,
    Hybrid,
}

/// A planned fill against one resting order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BookFill {
    pub order_id: Uuid,
    pub maker_id: Uuid,
    pub price: Decimal,
    pub shares: Decimal,
    pub cost: Decimal,
}

/// Full pricing of a request against one pool snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub token: Token,
    pub side: Side,
    /// Dollars for a buy, shares for a sell
    pub requested: Decimal,
    pub shares: Decimal,
    pub price_per_share: Decimal,
    pub slippage_pct: Decimal,
    pub platform_fee: Decimal,
    /// Buy: gross cost plus fee. Sell: gross proceeds minus fee.
    pub total_cost: Decimal,
    pub breakdown: Breakdown,
    pub execution_method: ExecutionMethod,
    /// AMM price before the trade (None when the pool is empty)
    pub price_before: Option<Decimal>,
    pub price_after: Option<Decimal>,
    /// Snapshot version the quote was computed against
    pub version: u64,
    pub book_fills: Vec<BookFill>,
    pub amm: Option<AmmQuote>,
}

impl Quote {
    /// Dollars exchanged before fees.
    pub fn gross(&self) -> Decimal {
        self.breakdown.order_book.cost + self.breakdown.amm.cost
    }

    /// Ticket a caller hands back on execute to detect a moved market.
    pub fn ticket(&self) -> QuoteTicket {
        QuoteTicket {
            version: self.version,
            price_per_share: self.price_per_share,
        }
    }
}

/// Prices requests without mutating pool or book.
#[derive(Debug, Clone)]
pub struct QuoteCalculator {
    fee_rate: Decimal,
    book_price_tolerance: Decimal,
}

impl QuoteCalculator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fee_rate: config.fee_rate,
            book_price_tolerance: config.book_price_tolerance,
        }
    }

    /// Worst resting price a request may match at.
    ///
    /// With an empty pool there is no reference price and any resting order
    /// qualifies.
    pub fn price_bound(&self, side: Side, amm_price: Option<Decimal>) -> Decimal {
        match (side, amm_price) {
            (Side::Buy, Some(p)) => p * self.book_price_tolerance,
            (Side::Sell, Some(p)) => (p / self.book_price_tolerance).min(Decimal::ONE),
            (Side::Buy, None) => Decimal::ONE,
            (Side::Sell, None) => Decimal::ZERO,
        }
    }

    /// Price `quantity` of `token` against a snapshot.
    pub fn quote(
        &self,
        state: &PairState,
        token: Token,
        side: Side,
        quantity: Decimal,
    ) -> EngineResult<Quote> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        if !state.pool.kind.supports(token) {
            return Err(EngineError::InvalidOutcome(token.to_string()));
        }

        let price_before = if state.pool.is_empty() {
            None
        } else {
            Some(state.pool.price(token)?)
        };
        let bound = self.price_bound(side, price_before);

        let mut remaining = quantity;
        let mut book_fills = Vec::new();

        for (order, available) in state.book.best_counter_orders(token, side, bound) {
            if remaining <= DUST {
                break;
            }

            let (shares, cost) = match side {
                Side::Buy => {
                    let level_cost = available * order.price;
                    if level_cost >= remaining {
                        ((remaining / order.price).min(available), remaining)
                    } else {
                        (available, level_cost)
                    }
                }
                Side::Sell => {
                    let shares = available.min(remaining);
                    (shares, shares * order.price)
                }
            };

            remaining -= match side {
                Side::Buy => cost,
                Side::Sell => shares,
            };

            book_fills.push(BookFill {
                order_id: order.id,
                maker_id: order.user_id,
                price: order.price,
                shares,
                cost,
            });
        }

        let amm = if remaining > DUST {
            if state.pool.is_empty() {
                return Err(if book_fills.is_empty() {
                    EngineError::NoLiquidity
                } else {
                    EngineError::InsufficientLiquidity(token.to_string())
                });
            }
            Some(state.pool.quote(token, side, remaining)?)
        } else {
            None
        };

        let book_shares: Decimal = book_fills.iter().map(|f| f.shares).sum();
        let book_cost: Decimal = book_fills.iter().map(|f| f.cost).sum();
        let (amm_shares, amm_cost) = amm
            .as_ref()
            .map(|q| (q.shares, q.amount))
            .unwrap_or((Decimal::ZERO, Decimal::ZERO));

        let shares = book_shares + amm_shares;
        if shares <= Decimal::ZERO {
            return Err(EngineError::NoLiquidity);
        }

        let gross = book_cost + amm_cost;
        let price_per_share = gross / shares;
        let platform_fee = gross * self.fee_rate;
        let total_cost = match side {
            Side::Buy => gross + platform_fee,
            Side::Sell => gross - platform_fee,
        };

        let slippage_pct = price_before
            .filter(|p| *p > Decimal::ZERO)
            .map(|p| ((price_per_share - p) / p).abs() * dec!(100))
            .unwrap_or(Decimal::ZERO);

        let execution_method = match (book_fills.is_empty(), amm.is_some()) {
            (false, true) => ExecutionMethod::Hybrid,
            (false, false) => ExecutionMethod::OrderBook,
            _ => ExecutionMethod::Amm,
        };

        let price_after = amm.as_ref().map(|q| q.price_after).or(price_before);

        Ok(Quote {
            token,
            side,
            requested: quantity,
            shares,
            price_per_share,
            slippage_pct,
            platform_fee,
            total_cost,
            breakdown: Breakdown {
                order_book: LegBreakdown::new(book_shares, book_cost),
                amm: LegBreakdown::new(amm_shares, amm_cost),
            },
            execution_method,
            price_before,
            price_after,
            version: state.version,
            book_fills,
            amm,
        })
    }
}
