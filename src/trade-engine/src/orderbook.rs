//! Resting limit orders for one pool, per token.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{Order, OrderStatus, Side, Token};

/// A single aggregated price level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// Aggregated depth for one token.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookDepth {
    /// Ask levels (sorted by price ascending - best first)
    pub asks: Vec<PriceLevel>,
    /// Bid levels (sorted by price descending - best first)
    pub bids: Vec<PriceLevel>,
}

impl BookDepth {
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first().map(|l| l.price)
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first().map(|l| l.price)
    }
}

/// Limit orders resting against one reserve pool.
///
/// Filled and cancelled orders are kept so that late consumers get
/// `OrderAlreadyFilled` rather than `OrderNotFound`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OrderBook {
    orders: HashMap<Uuid, Order>,
    next_sequence: u64,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an order to the book, assigning its FIFO sequence.
    pub fn insert(&mut self, mut order: Order) -> EngineResult<Order> {
        if order.price <= Decimal::ZERO || order.price >= Decimal::ONE {
            return Err(EngineError::InvalidPrice(order.price));
        }
        if order.shares <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "order shares must be positive, got {}",
                order.shares
            )));
        }

        order.filled_shares = Decimal::ZERO;
        order.status = OrderStatus::Open;
        order.sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!(
            "[BOOK] Resting {} {} {} @ {} (order {})",
            order.side, order.shares, order.token, order.price, order.id
        );

        self.orders.insert(order.id, order.clone());
        Ok(order)
    }

    pub fn get(&self, order_id: Uuid) -> Option<&Order> {
        self.orders.get(&order_id)
    }

    /// Orders that can fill an incoming request, best price first.
    ///
    /// An incoming buy matches asks priced at or below `price_bound`, lowest
    /// first; an incoming sell matches bids at or above it, highest first.
    /// Equal prices are ranked by arrival.
    pub fn best_counter_orders(
        &self,
        token: Token,
        incoming: Side,
        price_bound: Decimal,
    ) -> Vec<(Order, Decimal)> {
        let counter = incoming.opposite();
        let mut matches: Vec<(Order, Decimal)> = self
            .orders
            .values()
            .filter(|o| o.token == token && o.side == counter && o.status.is_resting())
            .filter(|o| match incoming {
                Side::Buy => o.price <= price_bound,
                Side::Sell => o.price >= price_bound,
            })
            .filter(|o| o.remaining() > Decimal::ZERO)
            .map(|o| (o.clone(), o.remaining()))
            .collect();

        matches.sort_by(|(a, _), (b, _)| {
            let by_price = match incoming {
                Side::Buy => a.price.cmp(&b.price),
                Side::Sell => b.price.cmp(&a.price),
            };
            by_price.then(a.sequence.cmp(&b.sequence))
        });

        matches
    }

    /// Fill up to `shares` of a resting order. Returns the shares filled.
    pub fn consume(&mut self, order_id: Uuid, shares: Decimal) -> EngineResult<Decimal> {
        if shares <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "fill must be positive, got {}",
                shares
            )));
        }

        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if !order.status.is_resting() {
            return Err(EngineError::OrderAlreadyFilled(order_id));
        }

        let filled = shares.min(order.remaining());
        order.filled_shares += filled;
        order.status = if order.remaining() <= Decimal::ZERO {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };

        debug!(
            "[BOOK] Order {} filled {} ({} / {}) -> {:?}",
            order_id, filled, order.filled_shares, order.shares, order.status
        );

        Ok(filled)
    }

    /// Cancel a resting order.
    pub fn cancel(&mut self, order_id: Uuid) -> EngineResult<Order> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(EngineError::OrderNotFound(order_id))?;

        if !order.status.is_resting() {
            return Err(EngineError::OrderAlreadyFilled(order_id));
        }

        order.status = OrderStatus::Cancelled;
        Ok(order.clone())
    }

    /// Unfilled shares a user has resting on one side of a token.
    pub fn resting_shares(&self, user_id: Uuid, token: Token, side: Side) -> Decimal {
        self.orders
            .values()
            .filter(|o| {
                o.user_id == user_id && o.token == token && o.side == side && o.status.is_resting()
            })
            .map(|o| o.remaining())
            .sum()
    }

    /// Resting orders, oldest first.
    pub fn open_orders(&self) -> Vec<&Order> {
        let mut open: Vec<&Order> = self
            .orders
            .values()
            .filter(|o| o.status.is_resting())
            .collect();
        open.sort_by_key(|o| o.sequence);
        open
    }

    /// Aggregated price levels for one token.
    pub fn depth(&self, token: Token) -> BookDepth {
        let mut asks: BTreeMap<Decimal, Decimal> = BTreeMap::new();
        let mut bids: BTreeMap<Decimal, Decimal> = BTreeMap::new();

        for order in self.orders.values() {
            if order.token != token || !order.status.is_resting() {
                continue;
            }
            let levels = match order.side {
                Side::Sell => &mut asks,
                Side::Buy => &mut bids,
            };
            *levels.entry(order.price).or_default() += order.remaining();
        }

        BookDepth {
            asks: asks
                .into_iter()
                .map(|(price, size)| PriceLevel { price, size })
                .collect(),
            bids: bids
                .into_iter()
                .rev()
                .map(|(price, size)| PriceLevel { price, size })
                .collect(),
        }
    }
}
