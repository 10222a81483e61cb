//! Engine error taxonomy shared by the quote and execute paths.

use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::models::MarketStatus;

/// Every failure the engine reports to a caller.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("Outcome {0} is not valid for this market")]
    InvalidOutcome(String),

    #[error("Trade would drive the {0} reserve to or below zero")]
    InsufficientLiquidity(String),

    #[error("Requested {requested} shares but only {available} are available")]
    InsufficientShares {
        requested: Decimal,
        available: Decimal,
    },

    #[error("Pool and order book are both empty")]
    NoLiquidity,

    #[error("Quote version {quoted} is stale (current version {current})")]
    StaleQuote { quoted: u64, current: u64 },

    #[error("Order {0} not found")]
    OrderNotFound(Uuid),

    #[error("Order {0} is already filled or cancelled")]
    OrderAlreadyFilled(Uuid),

    #[error("Timed out after {0}ms waiting for the market")]
    Timeout(u64),

    #[error("Trade size {amount} outside market bounds [{min}, {max}]")]
    OutOfBounds {
        amount: Decimal,
        min: Decimal,
        max: Decimal,
    },

    #[error("Market {0} not found")]
    MarketNotFound(Uuid),

    #[error("Market is {0}, trading is disabled")]
    MarketNotActive(MarketStatus),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid price {0}: must be strictly between 0 and 1")]
    InvalidPrice(Decimal),

    #[error("Cannot move market from {from} to {to}")]
    InvalidTransition { from: MarketStatus, to: MarketStatus },
}

impl EngineError {
    /// Stable snake_case code for clients and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidOutcome(_) => "invalid_outcome",
            EngineError::InsufficientLiquidity(_) => "insufficient_liquidity",
            EngineError::InsufficientShares { .. } => "insufficient_shares",
            EngineError::NoLiquidity => "no_liquidity",
            EngineError::StaleQuote { .. } => "stale_quote",
            EngineError::OrderNotFound(_) => "order_not_found",
            EngineError::OrderAlreadyFilled(_) => "order_already_filled",
            EngineError::Timeout(_) => "timeout",
            EngineError::OutOfBounds { .. } => "out_of_bounds",
            EngineError::MarketNotFound(_) => "market_not_found",
            EngineError::MarketNotActive(_) => "market_not_active",
            EngineError::InvalidAmount(_) => "invalid_amount",
            EngineError::InvalidPrice(_) => "invalid_price",
            EngineError::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Message suitable for showing to the trader.
    pub fn user_message(&self) -> String {
        match self {
            EngineError::InvalidOutcome(_) => {
                "This outcome can't be traded in this market.".to_string()
            }
            EngineError::InsufficientLiquidity(_) => {
                "Not enough liquidity to complete this trade. Try a smaller amount.".to_string()
            }
            EngineError::InsufficientShares { available, .. } => {
                format!("You can sell at most {} shares.", available.round_dp(4))
            }
            EngineError::NoLiquidity => {
                "There is no liquidity in this market yet.".to_string()
            }
            EngineError::StaleQuote { .. } => {
                "Your quote has expired, please retry.".to_string()
            }
            EngineError::OrderNotFound(_) => "That order no longer exists.".to_string(),
            EngineError::OrderAlreadyFilled(_) => {
                "That order has already been filled or cancelled.".to_string()
            }
            EngineError::Timeout(_) => {
                "The market is busy right now, please try again.".to_string()
            }
            EngineError::OutOfBounds { min, max, .. } => {
                format!("Trade size must be between ${} and ${}.", min, max)
            }
            EngineError::MarketNotFound(_) => "This market does not exist.".to_string(),
            EngineError::MarketNotActive(status) => {
                format!("Trading is not open for this market ({}).", status)
            }
            EngineError::InvalidAmount(_) => "Enter an amount greater than zero.".to_string(),
            EngineError::InvalidPrice(_) => {
                "Limit price must be between $0.00 and $1.00.".to_string()
            }
            EngineError::InvalidTransition { from, to } => {
                format!("A {} market cannot become {}.", from, to)
            }
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
