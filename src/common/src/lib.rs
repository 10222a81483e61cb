//! Common library for the trading engine services.
//!
//! Provides shared functionality:
//! - Configuration loading from .env
//! - Database connection pooling and migrations
//! - Persisted row models and repository functions

pub mod config;
pub mod db;
pub mod models;
pub mod repository;

pub use config::{Config, ConfigError};
pub use db::{Database, DbError};
pub use models::{LiquidityRow, OrderRow, TradeRow};
pub use repository::{get_trades_for_user, insert_trade, upsert_liquidity, upsert_order};
