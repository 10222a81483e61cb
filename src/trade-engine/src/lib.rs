//! Trade pricing and execution engine for prediction markets.
//!
//! Users trade outcome tokens against a hybrid of resting limit orders and a
//! fixed-product market maker. Each tradeable question is a pool keyed by
//! market (and outcome, for multi-choice markets); trades on one pool are
//! serialized and atomic, trades on different pools run in parallel.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod ledger;
pub mod models;
pub mod orderbook;
pub mod pool;
pub mod quote;
pub mod sink;
pub mod state;

pub use config::EngineConfig;
pub use engine::{Engine, ExecuteResponse, PairSlot};
pub use error::{EngineError, EngineResult};
pub use events::{run_sink, EngineEvent, EventSink, SinkStats};
pub use ledger::{Position, PositionKey, PositionLedger};
pub use models::{
    ExecuteRequest, Market, MarketKind, MarketStatus, NewMarket, Order, OrderStatus, PlaceOrder,
    PoolKey, QuoteRequest, QuoteTicket, Side, Token, Trade,
};
pub use pool::ReservePool;
pub use quote::{ExecutionMethod, Quote, QuoteCalculator};
pub use sink::PgEventSink;
pub use state::PairState;
