//! Per-user positions folded from the append-only trade history.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::{PoolKey, Side, Token, Trade};

/// Identifies one user's holding of one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PositionKey {
    pub user_id: Uuid,
    pub pool: PoolKey,
    pub token: Token,
}

impl PositionKey {
    pub fn of(trade: &Trade) -> Self {
        Self {
            user_id: trade.user_id,
            pool: trade.pool,
            token: trade.token,
        }
    }
}

/// Net shares held and their weighted-average cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Position {
    pub shares: Decimal,
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    pub fn avg_cost(&self) -> Decimal {
        if self.shares > Decimal::ZERO {
            self.cost_basis / self.shares
        } else {
            Decimal::ZERO
        }
    }

    /// Fold one fill into the position.
    ///
    /// Buys add `(shares, shares × price)`; sells subtract the same, so
    /// `cost_basis` is net cash paid in. `realized_pnl` books each sale
    /// against the average cost held before it.
    pub fn apply(&mut self, side: Side, shares: Decimal, price: Decimal) -> EngineResult<()> {
        match side {
            Side::Buy => {
                self.shares += shares;
                self.cost_basis += shares * price;
            }
            Side::Sell => {
                if shares > self.shares {
                    return Err(EngineError::InsufficientShares {
                        requested: shares,
                        available: self.shares,
                    });
                }
                let avg = self.avg_cost();
                self.shares -= shares;
                self.cost_basis -= shares * price;
                self.realized_pnl += shares * (price - avg);
            }
        }
        Ok(())
    }

    /// Rebuild a position from trades in chronological order.
    pub fn replay<'a>(trades: impl IntoIterator<Item = &'a Trade>) -> EngineResult<Self> {
        let mut position = Position::default();
        for trade in trades {
            position.apply(trade.side, trade.shares, trade.price)?;
        }
        Ok(position)
    }
}

#[derive(Debug, Default)]
struct History {
    position: Position,
    trades: Vec<Trade>,
}

/// Append-only store of fills, one history per (user, pool, token).
#[derive(Debug, Default)]
pub struct PositionLedger {
    histories: Mutex<HashMap<PositionKey, History>>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<PositionKey, History>> {
        self.histories.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn position(&self, key: &PositionKey) -> Position {
        self.lock()
            .get(key)
            .map(|h| h.position.clone())
            .unwrap_or_default()
    }

    pub fn shares(&self, key: &PositionKey) -> Decimal {
        self.position(key).shares
    }

    /// Fills recorded for a position, oldest first.
    pub fn trades(&self, key: &PositionKey) -> Vec<Trade> {
        self.lock()
            .get(key)
            .map(|h| h.trades.clone())
            .unwrap_or_default()
    }

    /// Every non-empty position a user holds.
    pub fn positions_for_user(&self, user_id: Uuid) -> Vec<(PositionKey, Position)> {
        self.lock()
            .iter()
            .filter(|(k, h)| k.user_id == user_id && !h.trades.is_empty())
            .map(|(k, h)| (*k, h.position.clone()))
            .collect()
    }

    /// Append all fills of one committed trade, or none of them.
    pub fn append_batch(&self, trades: &[Trade]) -> EngineResult<()> {
        let mut histories = self.lock();

        // Fold onto copies first so a failing fill leaves nothing behind.
        let mut staged: HashMap<PositionKey, Position> = HashMap::new();
        for trade in trades {
            let key = PositionKey::of(trade);
            let position = staged.entry(key).or_insert_with(|| {
                histories
                    .get(&key)
                    .map(|h| h.position.clone())
                    .unwrap_or_default()
            });
            position.apply(trade.side, trade.shares, trade.price)?;
        }

        for trade in trades {
            let history = histories.entry(PositionKey::of(trade)).or_default();
            history.trades.push(trade.clone());
        }
        for (key, position) in staged {
            debug!(
                "[LEDGER] {} {} {} -> {} shares @ avg {:.4}",
                key.user_id,
                key.pool,
                key.token,
                position.shares,
                position.avg_cost()
            );
            if let Some(history) = histories.get_mut(&key) {
                history.position = position;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Counterparty, TradeRole};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(user_id: Uuid, pool: PoolKey, side: Side, shares: Decimal, price: Decimal) -> Trade {
        Trade {
            id: Uuid::new_v4(),
            request_id: Uuid::new_v4(),
            user_id,
            pool,
            token: Token::No,
            side,
            shares,
            price,
            total_amount: shares * price,
            counterparty: Counterparty::Amm,
            role: TradeRole::Taker,
            seq: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_buys_accumulate_weighted_cost() {
        let mut p = Position::default();
        p.apply(Side::Buy, dec!(10), dec!(0.40)).unwrap();
        p.apply(Side::Buy, dec!(30), dec!(0.60)).unwrap();

        assert_eq!(p.shares, dec!(40));
        assert_eq!(p.cost_basis, dec!(22));
        assert_eq!(p.avg_cost(), dec!(0.55));
    }

    #[test]
    fn test_sell_subtracts_proceeds_from_cost_basis() {
        let mut p = Position::default();
        p.apply(Side::Buy, dec!(10), dec!(0.40)).unwrap();
        p.apply(Side::Sell, dec!(5), dec!(0.60)).unwrap();

        // 10 × 0.40 − 5 × 0.60
        assert_eq!(p.shares, dec!(5));
        assert_eq!(p.cost_basis, dec!(1.0));
        assert_eq!(p.realized_pnl, dec!(1.0));
    }

    #[test]
    fn test_full_exit_leaves_net_cash_in_basis() {
        let mut p = Position::default();
        p.apply(Side::Buy, dec!(40), dec!(0.55)).unwrap();
        p.apply(Side::Sell, dec!(10), dec!(0.75)).unwrap();

        assert_eq!(p.shares, dec!(30));
        assert_eq!(p.cost_basis, dec!(14.5));
        assert_eq!(p.realized_pnl, dec!(2.0));

        p.apply(Side::Sell, dec!(30), dec!(0.50)).unwrap();
        assert_eq!(p.shares, Decimal::ZERO);
        // 22 paid in, 7.5 + 15 taken out
        assert_eq!(p.cost_basis, dec!(-0.5));
        assert_eq!(p.avg_cost(), Decimal::ZERO);
    }

    #[test]
    fn test_oversell_rejected() {
        let mut p = Position::default();
        p.apply(Side::Buy, dec!(10), dec!(0.5)).unwrap();
        assert_eq!(
            p.apply(Side::Sell, dec!(15), dec!(0.5)),
            Err(EngineError::InsufficientShares {
                requested: dec!(15),
                available: dec!(10),
            })
        );
        assert_eq!(p.shares, dec!(10));
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let ledger = PositionLedger::new();
        let user = Uuid::new_v4();
        let pool = PoolKey::market(Uuid::new_v4());
        ledger
            .append_batch(&[trade(user, pool, Side::Buy, dec!(10), dec!(0.5))])
            .unwrap();

        let key = PositionKey {
            user_id: user,
            pool,
            token: Token::No,
        };
        let result = ledger.append_batch(&[
            trade(user, pool, Side::Buy, dec!(5), dec!(0.5)),
            trade(user, pool, Side::Sell, dec!(20), dec!(0.5)),
        ]);

        assert!(matches!(result, Err(EngineError::InsufficientShares { .. })));
        assert_eq!(ledger.shares(&key), dec!(10));
        assert_eq!(ledger.trades(&key).len(), 1);
    }

    #[test]
    fn test_replay_matches_ledger_position() {
        let ledger = PositionLedger::new();
        let user = Uuid::new_v4();
        let pool = PoolKey::market(Uuid::new_v4());

        ledger
            .append_batch(&[
                trade(user, pool, Side::Buy, dec!(12), dec!(0.41)),
                trade(user, pool, Side::Buy, dec!(8), dec!(0.47)),
            ])
            .unwrap();
        ledger
            .append_batch(&[trade(user, pool, Side::Sell, dec!(5), dec!(0.52))])
            .unwrap();

        let key = PositionKey {
            user_id: user,
            pool,
            token: Token::No,
        };
        let replayed = Position::replay(&ledger.trades(&key)).unwrap();
        assert_eq!(replayed, ledger.position(&key));
        assert_eq!(ledger.positions_for_user(user).len(), 1);
        assert!(ledger.positions_for_user(Uuid::new_v4()).is_empty());
    }
}
