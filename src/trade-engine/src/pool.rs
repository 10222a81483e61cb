//! Reserve pool: fixed-product market maker for one tradeable question.
//!
//! Every token of the pool has a reserve `r_i`. The marginal price of token
//! X is `(1/r_X) / Σ(1/r_i)`, so for a Binary pool `price(YES) = no / (yes + no)`
//! and for a ThreeOutcome pool the price of X is proportional to the product
//! of the other two reserves. The product of all reserves is held at
//! `constant_product` by every trade.
//!
//! Buying X for amount `A` adds `A` to every other reserve and sets X's
//! reserve to `K / Π(others)`. Integrating `dA / price` along that path gives
//! the exact share count `A + Δ`, where `Δ` is the drop in X's reserve.
//! Selling is the inverse path: the payout `P` solves
//! `(r_X + S - P) · Π(r_other - P) = K`.

use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use common::LiquidityRow;

use crate::error::{EngineError, EngineResult};
use crate::models::{PoolKey, PoolKind, Side, Token};

/// Bisection steps for the ThreeOutcome sell root.
const SOLVER_ITERATIONS: usize = 200;

/// Bisection stops once the bracket is this narrow.
const SOLVER_EPSILON: Decimal = dec!(0.00000000000000000001);

/// Largest collateral a pool may hold. Three reserves of this size keep the
/// reserve product well inside `Decimal` range.
pub const MAX_POOL_LIQUIDITY: Decimal = dec!(1000000000);

/// Result of pricing a trade against the pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AmmQuote {
    pub token: Token,
    pub side: Side,
    pub shares: Decimal,
    /// Dollars paid in (buy) or paid out (sell), before platform fees
    pub amount: Decimal,
    pub avg_price: Decimal,
    pub price_before: Decimal,
    pub price_after: Decimal,
    #[serde(skip)]
    reserves_after: Vec<Decimal>,
}

/// AMM reserves for one Binary or ThreeOutcome question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservePool {
    pub kind: PoolKind,
    pub yes_reserve: Decimal,
    pub no_reserve: Decimal,
    /// Zero unless the pool is ThreeOutcome
    pub draw_reserve: Decimal,
    pub constant_product: Decimal,
    pub total_liquidity: Decimal,
    min_reserve: Decimal,
}

impl ReservePool {
    /// Create a pool seeded with equal reserves (all tokens priced equally).
    pub fn new(kind: PoolKind, liquidity: Decimal, min_reserve: Decimal) -> EngineResult<Self> {
        let mut pool = Self::empty(kind, min_reserve);
        if liquidity > Decimal::ZERO {
            pool.add_liquidity(liquidity)?;
        }
        Ok(pool)
    }

    /// Pool with no liquidity; quotes fail until liquidity is added.
    pub fn empty(kind: PoolKind, min_reserve: Decimal) -> Self {
        Self {
            kind,
            yes_reserve: Decimal::ZERO,
            no_reserve: Decimal::ZERO,
            draw_reserve: Decimal::ZERO,
            constant_product: Decimal::ZERO,
            total_liquidity: Decimal::ZERO,
            min_reserve,
        }
    }

    /// Create a pool from explicit reserves, listed in `kind.tokens()` order.
    /// Total liquidity is taken as the largest reserve.
    pub fn with_reserves(
        kind: PoolKind,
        reserves: &[Decimal],
        min_reserve: Decimal,
    ) -> EngineResult<Self> {
        if reserves.len() != kind.tokens().len() {
            return Err(EngineError::InvalidAmount(format!(
                "{:?} pool needs {} reserves, got {}",
                kind,
                kind.tokens().len(),
                reserves.len()
            )));
        }
        if reserves.iter().any(|r| *r <= min_reserve) {
            return Err(EngineError::InvalidAmount(
                "reserves must exceed the minimum reserve".to_string(),
            ));
        }
        if reserves.iter().any(|r| *r > MAX_POOL_LIQUIDITY) {
            return Err(EngineError::InvalidAmount(format!(
                "reserves may not exceed {}",
                MAX_POOL_LIQUIDITY
            )));
        }

        let mut pool = Self::empty(kind, min_reserve);
        pool.set_reserves(reserves);
        pool.constant_product = product(reserves.iter().copied())?;
        pool.total_liquidity = reserves.iter().copied().max().unwrap_or_default();
        Ok(pool)
    }

    /// True when the pool cannot price anything.
    pub fn is_empty(&self) -> bool {
        self.reserves().iter().any(|r| *r <= Decimal::ZERO)
    }

    /// Reserves in `kind.tokens()` order.
    pub fn reserves(&self) -> Vec<Decimal> {
        match self.kind {
            PoolKind::Binary => vec![self.yes_reserve, self.no_reserve],
            PoolKind::ThreeOutcome => vec![self.yes_reserve, self.no_reserve, self.draw_reserve],
        }
    }

    fn set_reserves(&mut self, reserves: &[Decimal]) {
        self.yes_reserve = reserves[0];
        self.no_reserve = reserves[1];
        if self.kind == PoolKind::ThreeOutcome {
            self.draw_reserve = reserves[2];
        }
    }

    fn index(&self, token: Token) -> EngineResult<usize> {
        self.kind
            .tokens()
            .iter()
            .position(|t| *t == token)
            .ok_or_else(|| EngineError::InvalidOutcome(token.to_string()))
    }

    /// Current marginal price (implied probability) of a token.
    pub fn price(&self, token: Token) -> EngineResult<Decimal> {
        let i = self.index(token)?;
        if self.is_empty() {
            return Err(EngineError::NoLiquidity);
        }
        marginal_price(&self.reserves(), i)
    }

    /// Prices of every token of the pool. They sum to 1.
    pub fn prices(&self) -> EngineResult<Vec<(Token, Decimal)>> {
        self.kind
            .tokens()
            .iter()
            .map(|t| self.price(*t).map(|p| (*t, p)))
            .collect()
    }

    /// Relative deviation of the reserve product from `constant_product`.
    pub fn invariant_error(&self) -> Decimal {
        if self.constant_product.is_zero() {
            return Decimal::ZERO;
        }
        match product(self.reserves()) {
            Ok(p) => ((p - self.constant_product) / self.constant_product).abs(),
            Err(_) => Decimal::MAX,
        }
    }

    /// Price a trade without touching the reserves.
    ///
    /// `quantity` is dollars for a buy and shares for a sell.
    pub fn quote(&self, token: Token, side: Side, quantity: Decimal) -> EngineResult<AmmQuote> {
        if quantity <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }
        let i = self.index(token)?;
        if self.is_empty() {
            return Err(EngineError::InsufficientLiquidity(token.to_string()));
        }

        let reserves = self.reserves();
        let price_before = marginal_price(&reserves, i)?;

        let (reserves_after, shares, amount) = match side {
            Side::Buy => {
                let (after, shares) = self.buy_path(&reserves, i, quantity)?;
                (after, shares, quantity)
            }
            Side::Sell => {
                let (after, payout) = self.sell_path(&reserves, i, quantity)?;
                (after, quantity, payout)
            }
        };

        if shares <= Decimal::ZERO || amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "{} {} too small to trade",
                quantity, token
            )));
        }

        let price_after = marginal_price(&reserves_after, i)?;

        Ok(AmmQuote {
            token,
            side,
            shares,
            amount,
            avg_price: amount / shares,
            price_before,
            price_after,
            reserves_after,
        })
    }

    /// Execute a trade against the reserves.
    pub fn apply(&mut self, token: Token, side: Side, quantity: Decimal) -> EngineResult<AmmQuote> {
        let quote = self.quote(token, side, quantity)?;
        self.set_reserves(&quote.reserves_after);

        debug!(
            "[POOL] {} {} {:.4} shares for ${:.4} | price {:.4} -> {:.4}",
            side, token, quote.shares, quote.amount, quote.price_before, quote.price_after
        );

        Ok(quote)
    }

    /// Buy along the curve: `(r_X - Δ) · Π(r_other + A) = K`, shares = `A + Δ`.
    fn buy_path(
        &self,
        reserves: &[Decimal],
        i: usize,
        amount: Decimal,
    ) -> EngineResult<(Vec<Decimal>, Decimal)> {
        let mut after = reserves.to_vec();
        for (j, r) in after.iter_mut().enumerate() {
            if j != i {
                *r = r
                    .checked_add(amount)
                    .ok_or_else(|| overflow("reserve"))?;
            }
        }

        let others = product(after.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, r)| *r))?;
        let new_reserve = self
            .constant_product
            .checked_div(others)
            .ok_or_else(|| overflow("reserve"))?;

        if new_reserve <= self.min_reserve {
            return Err(EngineError::InsufficientLiquidity(
                self.kind.tokens()[i].to_string(),
            ));
        }

        let shares = reserves[i] + amount - new_reserve;
        after[i] = new_reserve;
        Ok((after, shares))
    }

    /// Sell along the curve, returning the new reserves and the payout.
    fn sell_path(
        &self,
        reserves: &[Decimal],
        i: usize,
        shares: Decimal,
    ) -> EngineResult<(Vec<Decimal>, Decimal)> {
        let deposited = reserves[i]
            .checked_add(shares)
            .ok_or_else(|| overflow("reserve"))?;
        let others: Vec<Decimal> = reserves
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(_, r)| *r)
            .collect();

        let payout = match self.kind {
            PoolKind::Binary => self.binary_payout(deposited, others[0])?,
            PoolKind::ThreeOutcome => self.bisect_payout(deposited, &others)?,
        };

        let mut after = reserves.to_vec();
        for (j, r) in after.iter_mut().enumerate() {
            if j != i {
                *r -= payout;
                if *r <= self.min_reserve {
                    return Err(EngineError::InsufficientLiquidity(
                        self.kind.tokens()[j].to_string(),
                    ));
                }
            }
        }

        // Pin the sold token's reserve to the invariant rather than to
        // `deposited - payout`, which can differ in the last digits.
        let others_after =
            product(after.iter().enumerate().filter(|(j, _)| *j != i).map(|(_, r)| *r))?;
        after[i] = self.constant_product / others_after;

        Ok((after, payout))
    }

    /// Smaller root of `P² - (x + o)P + x·o - K = 0`, with `x` already
    /// including the sold shares. Written as `2c / (b + √disc)` to avoid
    /// cancellation.
    fn binary_payout(&self, x: Decimal, o: Decimal) -> EngineResult<Decimal> {
        let b = x + o;
        let c = (x.checked_mul(o).ok_or_else(|| overflow("product"))? - self.constant_product)
            .max(Decimal::ZERO);
        let disc = b.checked_mul(b).ok_or_else(|| overflow("product"))? - dec!(4) * c;
        let root = disc
            .max(Decimal::ZERO)
            .sqrt()
            .ok_or_else(|| overflow("sqrt"))?;
        let denom = b + root;
        if denom.is_zero() {
            return Ok(Decimal::ZERO);
        }
        Ok(dec!(2) * c / denom)
    }

    /// Root of `(x - P) · Π(o - P) = K` on `[0, min(x, o...))`. The left side
    /// is strictly decreasing there, so bisection converges. Keeps the side
    /// where the product stays above `K` so the pool never pays out extra.
    fn bisect_payout(&self, x: Decimal, others: &[Decimal]) -> EngineResult<Decimal> {
        let upper = others.iter().copied().fold(x, Decimal::min);
        let mut lo = Decimal::ZERO;
        let mut hi = upper;

        for _ in 0..SOLVER_ITERATIONS {
            if hi - lo <= SOLVER_EPSILON {
                break;
            }
            let mid = (lo + hi) / dec!(2);
            let value = product(
                std::iter::once(x - mid).chain(others.iter().map(|o| *o - mid)),
            )?;
            if value > self.constant_product {
                lo = mid;
            } else {
                hi = mid;
            }
        }

        Ok(lo)
    }

    /// Add collateral, scaling every reserve by the same factor so prices are
    /// unchanged. Returns the new total liquidity.
    pub fn add_liquidity(&mut self, amount: Decimal) -> EngineResult<Decimal> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(format!(
                "liquidity must be positive, got {}",
                amount
            )));
        }
        if self.total_liquidity + amount > MAX_POOL_LIQUIDITY {
            return Err(EngineError::InvalidAmount(format!(
                "pool liquidity may not exceed {}, has {}",
                MAX_POOL_LIQUIDITY, self.total_liquidity
            )));
        }

        let reserves = if self.is_empty() || self.total_liquidity.is_zero() {
            vec![amount; self.kind.tokens().len()]
        } else {
            let factor = (self.total_liquidity + amount) / self.total_liquidity;
            self.reserves().iter().map(|r| *r * factor).collect()
        };

        self.constant_product = product(reserves.iter().copied())?;
        self.set_reserves(&reserves);
        self.total_liquidity += amount;

        debug!(
            "[POOL] Added ${} liquidity, total ${}, k={}",
            amount, self.total_liquidity, self.constant_product
        );

        Ok(self.total_liquidity)
    }

    /// Withdraw a fraction in (0, 1) of the pool, scaling reserves down.
    /// Returns the collateral withdrawn.
    pub fn remove_liquidity(&mut self, fraction: Decimal) -> EngineResult<Decimal> {
        if fraction <= Decimal::ZERO || fraction >= Decimal::ONE {
            return Err(EngineError::InvalidAmount(format!(
                "withdraw fraction must be in (0, 1), got {}",
                fraction
            )));
        }
        if self.is_empty() {
            return Err(EngineError::NoLiquidity);
        }

        let keep = Decimal::ONE - fraction;
        let reserves: Vec<Decimal> = self.reserves().iter().map(|r| *r * keep).collect();
        if reserves.iter().any(|r| *r <= self.min_reserve) {
            return Err(EngineError::InsufficientLiquidity("pool".to_string()));
        }

        let withdrawn = self.total_liquidity * fraction;
        self.constant_product = product(reserves.iter().copied())?;
        self.set_reserves(&reserves);
        self.total_liquidity -= withdrawn;

        Ok(withdrawn)
    }

    /// Liquidity row for persistence and notifications.
    pub fn to_row(&self, key: PoolKey, version: u64) -> LiquidityRow {
        LiquidityRow {
            market_id: key.market_id,
            outcome_id: key.outcome_id,
            yes_reserve: self.yes_reserve,
            no_reserve: self.no_reserve,
            draw_reserve: self.draw_reserve,
            constant_product: self.constant_product,
            total_liquidity: self.total_liquidity,
            yes_price: self.price(Token::Yes).unwrap_or_default(),
            version: i64::try_from(version).unwrap_or(i64::MAX),
        }
    }
}

/// `Π_{j≠i} r_j / Σ_k Π_{j≠k} r_j`, equal to `(1/r_i) / Σ(1/r_k)`.
fn marginal_price(reserves: &[Decimal], i: usize) -> EngineResult<Decimal> {
    let excluding = |k: usize| {
        product(
            reserves
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != k)
                .map(|(_, r)| *r),
        )
    };

    let numerator = excluding(i)?;
    let mut denominator = Decimal::ZERO;
    for k in 0..reserves.len() {
        denominator = denominator
            .checked_add(excluding(k)?)
            .ok_or_else(|| overflow("price"))?;
    }
    if denominator.is_zero() {
        return Err(EngineError::NoLiquidity);
    }
    Ok(numerator / denominator)
}

fn product(values: impl IntoIterator<Item = Decimal>) -> EngineResult<Decimal> {
    values.into_iter().try_fold(Decimal::ONE, |acc, v| {
        acc.checked_mul(v).ok_or_else(|| overflow("product"))
    })
}

fn overflow(what: &str) -> EngineError {
    EngineError::InvalidAmount(format!("{} overflow", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Decimal = dec!(0.000001);

    fn binary(yes: Decimal, no: Decimal) -> ReservePool {
        ReservePool::with_reserves(PoolKind::Binary, &[yes, no], MIN).unwrap()
    }

    fn three(liquidity: Decimal) -> ReservePool {
        ReservePool::new(PoolKind::ThreeOutcome, liquidity, MIN).unwrap()
    }

    fn assert_close(a: Decimal, b: Decimal, tolerance: Decimal) {
        assert!(
            (a - b).abs() <= tolerance,
            "expected {} ~= {} (tolerance {})",
            a,
            b,
            tolerance
        );
    }

    #[test]
    fn test_simple_amm_buy() {
        // Pool {1000, 1000, k = 1_000_000}, buy $100 of YES
        let mut pool = binary(dec!(1000), dec!(1000));
        assert_eq!(pool.constant_product, dec!(1000000));
        assert_eq!(pool.price(Token::Yes).unwrap(), dec!(0.5));

        let fill = pool.apply(Token::Yes, Side::Buy, dec!(100)).unwrap();

        assert!(fill.price_after > dec!(0.5));
        assert!(fill.shares < dec!(200));
        assert!(fill.shares > dec!(100));
        // shares = A + Δ = 100 + (1000 - 1e6/1100)
        assert_close(fill.shares, dec!(190.9090909090909090909), dec!(0.000000001));
        assert_close(pool.yes_reserve * pool.no_reserve, dec!(1000000), dec!(0.000001));
        assert!(pool.invariant_error() < dec!(0.000000001));
    }

    #[test]
    fn test_quote_does_not_mutate() {
        let pool = binary(dec!(1000), dec!(1000));
        let before = pool.clone();
        let quote = pool.quote(Token::Yes, Side::Buy, dec!(100)).unwrap();
        assert_eq!(pool, before);

        let mut applied = pool.clone();
        let fill = applied.apply(Token::Yes, Side::Buy, dec!(100)).unwrap();
        assert_eq!(quote, fill);
    }

    #[test]
    fn test_invariant_preserved_across_trade_sequence() {
        let mut pool = binary(dec!(5000), dec!(3000));
        let k = pool.constant_product;

        let steps = [
            (Token::Yes, Side::Buy, dec!(250)),
            (Token::No, Side::Buy, dec!(1200)),
            (Token::Yes, Side::Sell, dec!(100)),
            (Token::No, Side::Sell, dec!(333.333)),
            (Token::Yes, Side::Buy, dec!(0.01)),
            (Token::No, Side::Buy, dec!(4000)),
        ];

        for (token, side, qty) in steps {
            pool.apply(token, side, qty).unwrap();
            assert_eq!(pool.constant_product, k);
            assert!(
                pool.invariant_error() < dec!(0.000000001),
                "invariant drifted after {} {} {}: {}",
                side,
                token,
                qty,
                pool.invariant_error()
            );
        }
    }

    #[test]
    fn test_binary_prices_sum_to_one() {
        let pool = binary(dec!(700), dec!(300));
        assert_eq!(pool.price(Token::Yes).unwrap(), dec!(0.3));
        assert_eq!(pool.price(Token::No).unwrap(), dec!(0.7));
    }

    #[test]
    fn test_monotonic_price_impact() {
        for amount in [dec!(0.0001), dec!(1), dec!(50), dec!(10000)] {
            for token in [Token::Yes, Token::No] {
                let pool = binary(dec!(1000), dec!(1000));
                let q = pool.quote(token, Side::Buy, amount).unwrap();
                assert!(q.price_after > q.price_before, "{} {}", token, amount);
            }
        }

        let pool = three(dec!(1000));
        for token in [Token::Yes, Token::No, Token::Draw] {
            let q = pool.quote(token, Side::Buy, dec!(10)).unwrap();
            assert!(q.price_after > q.price_before);
        }
    }

    #[test]
    fn test_sell_lowers_price() {
        let pool = binary(dec!(1000), dec!(1000));
        let q = pool.quote(Token::Yes, Side::Sell, dec!(50)).unwrap();
        assert!(q.price_after < q.price_before);
        assert!(q.avg_price < q.price_before);
    }

    #[test]
    fn test_round_trip_returns_at_most_cost() {
        let mut pool = binary(dec!(1000), dec!(1000));
        let start = pool.clone();

        let buy = pool.apply(Token::Yes, Side::Buy, dec!(100)).unwrap();
        let sell = pool.apply(Token::Yes, Side::Sell, buy.shares).unwrap();

        assert!(sell.amount <= buy.amount + dec!(0.000000001));
        assert_close(sell.amount, buy.amount, dec!(0.000001));
        assert_close(pool.yes_reserve, start.yes_reserve, dec!(0.000001));
        assert_close(pool.no_reserve, start.no_reserve, dec!(0.000001));
    }

    #[test]
    fn test_binary_sell_closed_form() {
        // After buying $100 YES from 1000/1000, selling the shares back pays $100.
        let pool = binary(dec!(1000000) / dec!(1100), dec!(1100));
        let shares = dec!(1100) - dec!(1000000) / dec!(1100);
        let q = pool.quote(Token::Yes, Side::Sell, shares).unwrap();
        assert_close(q.amount, dec!(100), dec!(0.0000001));
    }

    #[test]
    fn test_three_outcome_probabilities_normalized() {
        let mut pool = three(dec!(1000));
        let third = Decimal::ONE / dec!(3);
        assert_close(pool.price(Token::Draw).unwrap(), third, dec!(0.000000001));

        let steps = [
            (Token::Yes, Side::Buy, dec!(200)),
            (Token::Draw, Side::Buy, dec!(75)),
            (Token::Yes, Side::Sell, dec!(120)),
            (Token::No, Side::Buy, dec!(500)),
            (Token::Draw, Side::Sell, dec!(40)),
        ];

        for (token, side, qty) in steps {
            pool.apply(token, side, qty).unwrap();
            let prices = pool.prices().unwrap();
            let sum: Decimal = prices.iter().map(|(_, p)| *p).sum();
            assert_close(sum, Decimal::ONE, dec!(0.000001));
            for (_, p) in prices {
                assert!(p > Decimal::ZERO && p < Decimal::ONE);
            }
            assert!(pool.invariant_error() < dec!(0.000000001));
        }
    }

    #[test]
    fn test_three_outcome_price_proportional_to_other_reserves() {
        let pool = ReservePool::with_reserves(
            PoolKind::ThreeOutcome,
            &[dec!(100), dec!(200), dec!(400)],
            MIN,
        )
        .unwrap();
        // yes ∝ 200*400, no ∝ 100*400, draw ∝ 100*200
        let total = dec!(80000) + dec!(40000) + dec!(20000);
        assert_eq!(pool.price(Token::Yes).unwrap(), dec!(80000) / total);
        assert_eq!(pool.price(Token::No).unwrap(), dec!(40000) / total);
        assert_eq!(pool.price(Token::Draw).unwrap(), dec!(20000) / total);
    }

    #[test]
    fn test_three_outcome_round_trip() {
        let mut pool = three(dec!(1000));
        let buy = pool.apply(Token::Draw, Side::Buy, dec!(60)).unwrap();
        let sell = pool.apply(Token::Draw, Side::Sell, buy.shares).unwrap();
        assert!(sell.amount <= buy.amount + dec!(0.000000001));
        assert_close(sell.amount, buy.amount, dec!(0.000001));
    }

    #[test]
    fn test_draw_rejected_on_binary_pool() {
        let pool = binary(dec!(1000), dec!(1000));
        assert_eq!(
            pool.quote(Token::Draw, Side::Buy, dec!(10)),
            Err(EngineError::InvalidOutcome("draw".to_string()))
        );
    }

    #[test]
    fn test_tiny_draw_reserve_still_three_outcome() {
        let pool = ReservePool::with_reserves(
            PoolKind::ThreeOutcome,
            &[dec!(1000), dec!(1000), dec!(0.0000011)],
            MIN,
        )
        .unwrap();
        assert_eq!(pool.kind, PoolKind::ThreeOutcome);
        assert!(pool.price(Token::Draw).is_ok());
        let sum: Decimal = pool.prices().unwrap().iter().map(|(_, p)| *p).sum();
        assert_close(sum, Decimal::ONE, dec!(0.000000001));
    }

    #[test]
    fn test_sell_draining_reserve_is_insufficient_liquidity() {
        let pool = ReservePool::with_reserves(PoolKind::Binary, &[dec!(10), dec!(10)], dec!(5))
            .unwrap();
        assert!(matches!(
            pool.quote(Token::Yes, Side::Sell, dec!(1000)),
            Err(EngineError::InsufficientLiquidity(_))
        ));
    }

    #[test]
    fn test_buy_draining_reserve_is_insufficient_liquidity() {
        let pool = ReservePool::with_reserves(PoolKind::Binary, &[dec!(10), dec!(10)], dec!(5))
            .unwrap();
        // 100 / (10 + 15) = 4 <= min reserve 5
        assert!(matches!(
            pool.quote(Token::Yes, Side::Buy, dec!(15)),
            Err(EngineError::InsufficientLiquidity(_))
        ));
    }

    #[test]
    fn test_empty_pool() {
        let pool = ReservePool::empty(PoolKind::Binary, MIN);
        assert!(pool.is_empty());
        assert_eq!(pool.price(Token::Yes), Err(EngineError::NoLiquidity));
        assert!(matches!(
            pool.quote(Token::Yes, Side::Buy, dec!(10)),
            Err(EngineError::InsufficientLiquidity(_))
        ));
    }

    #[test]
    fn test_non_positive_quantity_rejected() {
        let pool = binary(dec!(1000), dec!(1000));
        assert!(matches!(
            pool.quote(Token::Yes, Side::Buy, Decimal::ZERO),
            Err(EngineError::InvalidAmount(_))
        ));
        assert!(matches!(
            pool.quote(Token::Yes, Side::Sell, dec!(-1)),
            Err(EngineError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_add_and_remove_liquidity_keep_prices() {
        let mut pool = binary(dec!(600), dec!(400));
        let price = pool.price(Token::Yes).unwrap();

        pool.add_liquidity(dec!(300)).unwrap();
        assert_eq!(pool.total_liquidity, dec!(900));
        assert_close(pool.price(Token::Yes).unwrap(), price, dec!(0.000000000001));
        assert!(pool.invariant_error() < dec!(0.000000001));

        let withdrawn = pool.remove_liquidity(dec!(0.5)).unwrap();
        assert_eq!(withdrawn, dec!(450));
        assert_close(pool.price(Token::Yes).unwrap(), price, dec!(0.000000000001));
        assert!(pool.invariant_error() < dec!(0.000000001));

        assert!(pool.remove_liquidity(Decimal::ONE).is_err());
    }

    #[test]
    fn test_new_pool_seeds_equal_reserves() {
        let pool = ReservePool::new(PoolKind::Binary, dec!(1000), MIN).unwrap();
        assert_eq!(pool.yes_reserve, dec!(1000));
        assert_eq!(pool.no_reserve, dec!(1000));
        assert_eq!(pool.draw_reserve, Decimal::ZERO);
        assert_eq!(pool.constant_product, dec!(1000000));
        assert_eq!(pool.total_liquidity, dec!(1000));
    }

    #[test]
    fn test_liquidity_capped_below_product_overflow() {
        let mut pool =
            ReservePool::new(PoolKind::ThreeOutcome, MAX_POOL_LIQUIDITY, MIN).unwrap();
        assert_eq!(pool.constant_product, dec!(1000000000000000000000000000));

        let quote = pool.apply(Token::Draw, Side::Buy, dec!(1000000)).unwrap();
        assert!(quote.shares > dec!(1000000));
        assert!(pool.invariant_error() < dec!(0.000001));

        let before = pool.clone();
        assert!(matches!(
            pool.add_liquidity(dec!(1)),
            Err(EngineError::InvalidAmount(_))
        ));
        assert_eq!(pool, before);

        assert!(matches!(
            ReservePool::new(PoolKind::ThreeOutcome, dec!(5000000000), MIN),
            Err(EngineError::InvalidAmount(_))
        ));
    }
}
