//! Engine domain models: markets, tokens, orders, trades and request shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use common::{OrderRow, TradeRow};

use crate::error::{EngineError, EngineResult};

/// Market structure. Decides which pools exist and which tokens are valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketKind {
    Binary,
    ThreeOutcome,
    MultiChoice,
}

impl MarketKind {
    /// Pool kind backing each tradeable question of this market.
    pub fn pool_kind(&self) -> PoolKind {
        match self {
            MarketKind::ThreeOutcome => PoolKind::ThreeOutcome,
            MarketKind::Binary | MarketKind::MultiChoice => PoolKind::Binary,
        }
    }
}

/// Reserve pool structure. Always taken from the market, never from reserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolKind {
    Binary,
    ThreeOutcome,
}

impl PoolKind {
    /// Tokens traded against a pool of this kind, in reserve order.
    pub fn tokens(&self) -> &'static [Token] {
        match self {
            PoolKind::Binary => &[Token::Yes, Token::No],
            PoolKind::ThreeOutcome => &[Token::Yes, Token::No, Token::Draw],
        }
    }

    pub fn supports(&self, token: Token) -> bool {
        self.tokens().contains(&token)
    }
}

/// Market lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketStatus {
    Pending,
    Active,
    Closed,
    Resolved,
    Cancelled,
}

impl MarketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketStatus::Pending => "pending",
            MarketStatus::Active => "active",
            MarketStatus::Closed => "closed",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        }
    }

    /// Allowed lifecycle moves. Resolved and Cancelled are terminal.
    pub fn can_transition_to(&self, next: MarketStatus) -> bool {
        use MarketStatus::*;
        matches!(
            (self, next),
            (Pending, Active)
                | (Active, Closed)
                | (Closed, Resolved)
                | (Pending, Cancelled)
                | (Active, Cancelled)
                | (Closed, Cancelled)
        )
    }
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A tradeable side of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Token {
    Yes,
    No,
    Draw,
}

impl Token {
    pub fn as_str(&self) -> &'static str {
        match self {
            Token::Yes => "yes",
            Token::No => "no",
            Token::Draw => "draw",
        }
    }

    /// Parse token from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "yes" => Some(Token::Yes),
            "no" => Some(Token::No),
            "draw" => Some(Token::Draw),
            _ => None,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade or order direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies one reserve pool and its order book.
///
/// Binary and ThreeOutcome markets own a single pool (`outcome_id == None`);
/// each outcome of a MultiChoice market owns its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub market_id: Uuid,
    pub outcome_id: Option<Uuid>,
}

impl PoolKey {
    pub fn market(market_id: Uuid) -> Self {
        Self {
            market_id,
            outcome_id: None,
        }
    }

    pub fn outcome(market_id: Uuid, outcome_id: Uuid) -> Self {
        Self {
            market_id,
            outcome_id: Some(outcome_id),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome_id {
            Some(outcome) => write!(f, "{}/{}", self.market_id, outcome),
            None => write!(f, "{}", self.market_id),
        }
    }
}

/// One choice of a MultiChoice market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeDef {
    pub id: Uuid,
    pub label: String,
}

/// A tradeable event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: Uuid,
    pub name: String,
    pub kind: MarketKind,
    pub status: MarketStatus,
    pub min_trade_size: Decimal,
    pub max_trade_size: Decimal,
    /// Ordered choices; empty unless the market is MultiChoice
    pub outcomes: Vec<OutcomeDef>,
    pub created_at: DateTime<Utc>,
}

impl Market {
    /// Resolve the pool a request addresses, validating token and outcome.
    pub fn pool_key(&self, outcome_id: Option<Uuid>, token: Token) -> EngineResult<PoolKey> {
        if !self.kind.pool_kind().supports(token) {
            return Err(EngineError::InvalidOutcome(token.to_string()));
        }

        match (self.kind, outcome_id) {
            (MarketKind::MultiChoice, Some(outcome)) => {
                if self.outcomes.iter().any(|o| o.id == outcome) {
                    Ok(PoolKey::outcome(self.id, outcome))
                } else {
                    Err(EngineError::InvalidOutcome(outcome.to_string()))
                }
            }
            (MarketKind::MultiChoice, None) => {
                Err(EngineError::InvalidOutcome("missing outcome_id".to_string()))
            }
            (_, Some(outcome)) => Err(EngineError::InvalidOutcome(outcome.to_string())),
            (_, None) => Ok(PoolKey::market(self.id)),
        }
    }

    /// All pools owned by this market.
    pub fn pool_keys(&self) -> Vec<PoolKey> {
        match self.kind {
            MarketKind::MultiChoice => self
                .outcomes
                .iter()
                .map(|o| PoolKey::outcome(self.id, o.id))
                .collect(),
            _ => vec![PoolKey::market(self.id)],
        }
    }

    pub fn ensure_active(&self) -> EngineResult<()> {
        if self.status == MarketStatus::Active {
            Ok(())
        } else {
            Err(EngineError::MarketNotActive(self.status))
        }
    }

    pub fn check_bounds(&self, notional: Decimal) -> EngineResult<()> {
        if notional < self.min_trade_size || notional > self.max_trade_size {
            return Err(EngineError::OutOfBounds {
                amount: notional,
                min: self.min_trade_size,
                max: self.max_trade_size,
            });
        }
        Ok(())
    }
}

/// Parameters for creating a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMarket {
    pub name: String,
    pub kind: MarketKind,
    pub min_trade_size: Decimal,
    pub max_trade_size: Decimal,
    /// Choice labels for MultiChoice markets
    #[serde(default)]
    pub outcome_labels: Vec<String>,
    /// Collateral seeded into every pool of the market
    pub initial_liquidity: Decimal,
}

/// Limit order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Open => "open",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_resting(&self) -> bool {
        matches!(self, OrderStatus::Open | OrderStatus::PartiallyFilled)
    }
}

/// A resting limit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub pool: PoolKey,
    pub token: Token,
    pub side: Side,
    pub price: Decimal,
    pub shares: Decimal,
    pub filled_shares: Decimal,
    pub status: OrderStatus,
    /// Book arrival order, used as the FIFO tiebreak
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    pub fn remaining(&self) -> Decimal {
        self.shares - self.filled_shares
    }

    pub fn to_row(&self) -> OrderRow {
        OrderRow {
            id: self.id,
            user_id: self.user_id,
            market_id: self.pool.market_id,
            outcome_id: self.pool.outcome_id,
            outcome: self.token.as_str().to_string(),
            order_type: self.side.as_str().to_string(),
            price_per_share: self.price,
            shares: self.shares,
            filled_shares: self.filled_shares,
            status: self.status.as_str().to_string(),
            created_at: self.created_at,
        }
    }
}

/// Parameters for placing a limit order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub user_id: Uuid,
    pub market_id: Uuid,
    pub outcome_id: Option<Uuid>,
    pub token: Token,
    pub side: Side,
    pub price: Decimal,
    pub shares: Decimal,
}

/// Who the other side of a fill was.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counterparty {
    /// A resting limit order
    Order(Uuid),
    Amm,
}

impl fmt::Display for Counterparty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Counterparty::Order(id) => write!(f, "{}", id),
            Counterparty::Amm => write!(f, "amm"),
        }
    }
}

/// Whether the trade's user took or provided liquidity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeRole {
    Taker,
    Maker,
}

/// Immutable record of one executed fill segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: Uuid,
    pub request_id: Uuid,
    pub user_id: Uuid,
    pub pool: PoolKey,
    pub token: Token,
    pub side: Side,
    pub shares: Decimal,
    pub price: Decimal,
    pub total_amount: Decimal,
    pub counterparty: Counterparty,
    pub role: TradeRole,
    /// Position within its request: book fills, then the AMM fill, then
    /// the mirrored maker fills
    pub seq: u32,
    pub created_at: DateTime<Utc>,
}

impl Trade {
    pub fn to_row(&self) -> TradeRow {
        TradeRow {
            id: self.id,
            request_id: self.request_id,
            market_id: self.pool.market_id,
            outcome_id: self.pool.outcome_id,
            outcome: self.token.as_str().to_string(),
            user_id: self.user_id,
            trade_type: self.side.as_str().to_string(),
            shares: self.shares,
            price_per_share: self.price,
            total_amount: self.total_amount,
            counterparty: self.counterparty.to_string(),
            seq: i32::try_from(self.seq).unwrap_or(i32::MAX),
            created_at: self.created_at,
        }
    }
}

/// Price/size request shared by quote and execute.
///
/// Buys are sized in dollars, sells in shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuoteRequest {
    pub market_id: Uuid,
    #[serde(default)]
    pub outcome_id: Option<Uuid>,
    pub token: Token,
    pub trade_type: Side,
    pub amount_or_shares: Decimal,
}

/// What a caller saw when previewing; lets the commit detect a moved market.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuoteTicket {
    pub version: u64,
    pub price_per_share: Decimal,
}

/// A committing trade request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub quote: QuoteRequest,
    #[serde(default)]
    pub ticket: Option<QuoteTicket>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn market(kind: MarketKind, outcomes: Vec<OutcomeDef>) -> Market {
        Market {
            id: Uuid::new_v4(),
            name: "Test Market".to_string(),
            kind,
            status: MarketStatus::Active,
            min_trade_size: dec!(1),
            max_trade_size: dec!(1000),
            outcomes,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_draw_invalid_on_binary_market() {
        let m = market(MarketKind::Binary, vec![]);
        assert_eq!(
            m.pool_key(None, Token::Draw),
            Err(EngineError::InvalidOutcome("draw".to_string()))
        );
        assert_eq!(m.pool_key(None, Token::Yes), Ok(PoolKey::market(m.id)));
    }

    #[test]
    fn test_draw_valid_on_three_outcome_market() {
        let m = market(MarketKind::ThreeOutcome, vec![]);
        assert!(m.pool_key(None, Token::Draw).is_ok());
    }

    #[test]
    fn test_multi_choice_requires_known_outcome() {
        let choice = OutcomeDef {
            id: Uuid::new_v4(),
            label: "Team A".to_string(),
        };
        let m = market(MarketKind::MultiChoice, vec![choice.clone()]);

        assert_eq!(
            m.pool_key(Some(choice.id), Token::Yes),
            Ok(PoolKey::outcome(m.id, choice.id))
        );
        assert!(matches!(
            m.pool_key(None, Token::Yes),
            Err(EngineError::InvalidOutcome(_))
        ));
        assert!(matches!(
            m.pool_key(Some(Uuid::new_v4()), Token::Yes),
            Err(EngineError::InvalidOutcome(_))
        ));
        assert!(matches!(
            m.pool_key(Some(choice.id), Token::Draw),
            Err(EngineError::InvalidOutcome(_))
        ));
    }

    #[test]
    fn test_outcome_id_rejected_on_binary_market() {
        let m = market(MarketKind::Binary, vec![]);
        assert!(matches!(
            m.pool_key(Some(Uuid::new_v4()), Token::Yes),
            Err(EngineError::InvalidOutcome(_))
        ));
    }

    #[test]
    fn test_market_status_transitions() {
        assert!(MarketStatus::Pending.can_transition_to(MarketStatus::Active));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Closed));
        assert!(MarketStatus::Closed.can_transition_to(MarketStatus::Resolved));
        assert!(MarketStatus::Active.can_transition_to(MarketStatus::Cancelled));

        assert!(!MarketStatus::Resolved.can_transition_to(MarketStatus::Active));
        assert!(!MarketStatus::Cancelled.can_transition_to(MarketStatus::Active));
        assert!(!MarketStatus::Closed.can_transition_to(MarketStatus::Active));
        assert!(!MarketStatus::Pending.can_transition_to(MarketStatus::Resolved));
    }

    #[test]
    fn test_bounds() {
        let m = market(MarketKind::Binary, vec![]);
        assert!(m.check_bounds(dec!(1)).is_ok());
        assert!(m.check_bounds(dec!(1000)).is_ok());
        assert!(matches!(
            m.check_bounds(dec!(0.99)),
            Err(EngineError::OutOfBounds { .. })
        ));
        assert!(matches!(
            m.check_bounds(dec!(1000.01)),
            Err(EngineError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_execute_request_flattens_quote_fields() {
        let json = format!(
            r#"{{"user_id":"{}","market_id":"{}","token":"yes","trade_type":"buy","amount_or_shares":"20"}}"#,
            Uuid::nil(),
            Uuid::nil()
        );
        let req: ExecuteRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.quote.token, Token::Yes);
        assert_eq!(req.quote.trade_type, Side::Buy);
        assert_eq!(req.quote.amount_or_shares, dec!(20));
        assert!(req.quote.outcome_id.is_none());
        assert!(req.ticket.is_none());
    }
}
