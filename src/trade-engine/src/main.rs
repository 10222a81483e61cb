//! Trade engine CLI: randomized multi-trader simulation and one-off quotes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use common::{Config, Database};
use trade_engine::{
    run_sink, Engine, EngineConfig, EngineError, ExecuteRequest, Market, MarketKind,
    MarketStatus, NewMarket, PgEventSink, PlaceOrder, Position, QuoteRequest, Side, Token,
};

/// Prediction-market trade pricing and execution engine
#[derive(Parser, Debug)]
#[command(name = "trade-engine")]
#[command(about = "Hybrid order book + AMM trade engine for prediction markets")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run concurrent random traders against freshly seeded markets
    Simulate {
        /// Number of concurrent traders
        #[arg(long, default_value = "8")]
        traders: usize,

        /// Requests submitted by each trader
        #[arg(long, default_value = "50")]
        trades_per_trader: usize,

        /// Markets to create (kinds rotate binary, three-outcome, multi-choice)
        #[arg(long, default_value = "3")]
        markets: usize,

        /// Initial liquidity per pool
        #[arg(long, default_value = "1000")]
        liquidity: f64,

        /// Platform fee rate override (e.g., 0.01 = 1%)
        #[arg(long)]
        fee_rate: Option<f64>,

        /// RNG seed; trader i uses seed + i
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Persist events to Postgres (needs DATABASE_URL)
        #[arg(long)]
        persist: bool,
    },

    /// Print a quote against a freshly seeded pool
    Quote {
        #[arg(long, value_enum, default_value = "binary")]
        kind: KindArg,

        #[arg(long, value_enum, default_value = "yes")]
        token: TokenArg,

        #[arg(long, value_enum, default_value = "buy")]
        side: SideArg,

        /// Dollars for a buy, shares for a sell
        #[arg(long, default_value = "100")]
        amount: f64,

        /// Initial liquidity of the pool
        #[arg(long, default_value = "1000")]
        liquidity: f64,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum KindArg {
    Binary,
    ThreeOutcome,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TokenArg {
    Yes,
    No,
    Draw,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

impl From<KindArg> for MarketKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Binary => MarketKind::Binary,
            KindArg::ThreeOutcome => MarketKind::ThreeOutcome,
        }
    }
}

impl From<TokenArg> for Token {
    fn from(token: TokenArg) -> Self {
        match token {
            TokenArg::Yes => Token::Yes,
            TokenArg::No => Token::No,
            TokenArg::Draw => Token::Draw,
        }
    }
}

impl From<SideArg> for Side {
    fn from(side: SideArg) -> Self {
        match side {
            SideArg::Buy => Side::Buy,
            SideArg::Sell => Side::Sell,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with RUST_LOG env var support (default: info)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    match args.command {
        Command::Simulate {
            traders,
            trades_per_trader,
            markets,
            liquidity,
            fee_rate,
            seed,
            persist,
        } => {
            let mut config = EngineConfig::from_env();
            if let Some(rate) = fee_rate {
                config.fee_rate = Decimal::try_from(rate)?;
            }
            let sim = SimConfig {
                traders,
                trades_per_trader,
                markets,
                liquidity: Decimal::try_from(liquidity)?,
                seed,
                persist,
            };
            run_simulation(config, sim).await
        }
        Command::Quote {
            kind,
            token,
            side,
            amount,
            liquidity,
        } => {
            run_quote(
                kind.into(),
                token.into(),
                side.into(),
                Decimal::try_from(amount)?,
                Decimal::try_from(liquidity)?,
            )
            .await
        }
    }
}

#[derive(Debug, Clone)]
struct SimConfig {
    traders: usize,
    trades_per_trader: usize,
    markets: usize,
    liquidity: Decimal,
    seed: u64,
    persist: bool,
}

/// Outcome counters for one trader.
#[derive(Debug, Default)]
struct TraderStats {
    executed: u64,
    orders_placed: u64,
    volume: Decimal,
    fees: Decimal,
    /// Rejections by error kind
    rejected: BTreeMap<&'static str, u64>,
}

impl TraderStats {
    fn reject(&mut self, err: &EngineError) {
        *self.rejected.entry(err.kind()).or_default() += 1;
    }

    fn merge(&mut self, other: TraderStats) {
        self.executed += other.executed;
        self.orders_placed += other.orders_placed;
        self.volume += other.volume;
        self.fees += other.fees;
        for (kind, count) in other.rejected {
            *self.rejected.entry(kind).or_default() += count;
        }
    }
}

async fn run_simulation(config: EngineConfig, sim: SimConfig) -> Result<()> {
    if sim.traders == 0 || sim.markets == 0 {
        anyhow::bail!("simulation needs at least one trader and one market");
    }

    info!(
        "Simulating {} traders x {} requests on {} markets (fee {}, seed {})",
        sim.traders, sim.trades_per_trader, sim.markets, config.fee_rate, sim.seed
    );

    let engine = Arc::new(Engine::new(config));

    let sink_handle = if sim.persist {
        let base_config = Config::from_env()?;
        let db = Database::connect(&base_config)
            .await
            .context("connect to database")?;
        db.migrate().await.context("run migrations")?;
        info!("Database connected, persisting events");

        let rx = engine.subscribe();
        let sink = PgEventSink::new(db);
        Some(tokio::spawn(async move { run_sink(rx, &sink).await }))
    } else {
        None
    };

    let markets = seed_markets(&engine, &sim).await?;
    let markets = Arc::new(markets);

    let started = Instant::now();
    let mut tasks = JoinSet::new();
    let mut users = Vec::with_capacity(sim.traders);
    for i in 0..sim.traders {
        let user_id = Uuid::new_v4();
        users.push(user_id);
        let engine = engine.clone();
        let markets = markets.clone();
        let trades = sim.trades_per_trader;
        let seed = sim.seed.wrapping_add(i as u64);
        tasks.spawn(async move { run_trader(engine, markets, user_id, trades, seed).await });
    }

    let mut totals = TraderStats::default();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(stats) => totals.merge(stats),
            Err(e) => error!("Trader task failed: {}", e),
        }
    }
    let elapsed = started.elapsed();

    let violations = print_summary(&engine, &markets, &users, &totals, elapsed.as_millis());

    // Close the event channel so the sink drains and exits
    drop(markets);
    drop(engine);
    if let Some(handle) = sink_handle {
        let stats = handle.await.context("sink task")?;
        info!(
            "Persisted {} events ({} failed, {} lagged)",
            stats.written, stats.failed, stats.lagged
        );
    }

    if violations > 0 {
        anyhow::bail!("{} invariant violations detected", violations);
    }
    Ok(())
}

async fn seed_markets(engine: &Engine, sim: &SimConfig) -> Result<Vec<Market>> {
    let mut markets = Vec::with_capacity(sim.markets);

    for i in 0..sim.markets {
        let (kind, labels) = match i % 3 {
            0 => (MarketKind::Binary, vec![]),
            1 => (MarketKind::ThreeOutcome, vec![]),
            _ => (
                MarketKind::MultiChoice,
                vec!["Red".to_string(), "Green".to_string(), "Blue".to_string()],
            ),
        };

        let market = engine.create_market(NewMarket {
            name: format!("Simulated market #{}", i + 1),
            kind,
            min_trade_size: dec!(1),
            max_trade_size: dec!(500),
            outcome_labels: labels,
            initial_liquidity: sim.liquidity,
        })?;
        let market = engine
            .set_market_status(market.id, MarketStatus::Active)
            .await?;
        markets.push(market);
    }

    Ok(markets)
}

/// Submit random buys, sells and limit orders for one user.
async fn run_trader(
    engine: Arc<Engine>,
    markets: Arc<Vec<Market>>,
    user_id: Uuid,
    trades: usize,
    seed: u64,
) -> TraderStats {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut stats = TraderStats::default();

    for _ in 0..trades {
        let market = &markets[rng.gen_range(0..markets.len())];
        let outcome_id = if market.outcomes.is_empty() {
            None
        } else {
            Some(market.outcomes[rng.gen_range(0..market.outcomes.len())].id)
        };
        let tokens = market.kind.pool_kind().tokens();
        let token = tokens[rng.gen_range(0..tokens.len())];

        let held = engine
            .position(user_id, market.id, outcome_id, token)
            .map(|p| p.shares)
            .unwrap_or_default();

        // Occasionally rest a limit order near the current price
        if rng.gen_bool(0.15) {
            let order =
                random_order(&engine, &mut rng, market, outcome_id, token, user_id, held);
            if let Some(order) = order {
                match engine.place_order(order).await {
                    Ok(_) => stats.orders_placed += 1,
                    Err(e) => stats.reject(&e),
                }
            }
            continue;
        }

        let (side, qty) = if held > dec!(5) && rng.gen_bool(0.4) {
            let fraction = Decimal::from(rng.gen_range(10..=100u32)) / dec!(100);
            (Side::Sell, floor_shares(held * fraction))
        } else {
            (Side::Buy, Decimal::from(rng.gen_range(2..=60u32)))
        };

        let mut request = ExecuteRequest {
            user_id,
            quote: QuoteRequest {
                market_id: market.id,
                outcome_id,
                token,
                trade_type: side,
                amount_or_shares: qty,
            },
            ticket: None,
        };

        // Half the traders quote first and execute against the ticket
        if rng.gen_bool(0.5) {
            match engine.quote(&request.quote) {
                Ok(quote) => request.ticket = Some(quote.ticket()),
                Err(e) => {
                    stats.reject(&e);
                    continue;
                }
            }
            tokio::task::yield_now().await;
        }

        match engine.execute(&request).await {
            Ok(resp) => {
                stats.executed += 1;
                stats.volume += resp.total_amount;
                stats.fees += resp.platform_fee;
                debug!(
                    "{} {} {} {} -> {} shares via {:?}",
                    user_id, side, qty, token, resp.shares, resp.execution_method
                );
            }
            Err(e) => stats.reject(&e),
        }
    }

    stats
}

fn random_order(
    engine: &Engine,
    rng: &mut StdRng,
    market: &Market,
    outcome_id: Option<Uuid>,
    token: Token,
    user_id: Uuid,
    held: Decimal,
) -> Option<PlaceOrder> {
    let state = engine.pool_state(market.id, outcome_id).ok()?;
    let price = state.pool.price(token).ok()?;
    let offset = Decimal::from(rng.gen_range(1..=8u32)) / dec!(100);

    let (side, price, shares) = if held > dec!(5) && rng.gen_bool(0.5) {
        (Side::Sell, price + offset, floor_shares(held / dec!(2)))
    } else {
        (Side::Buy, price - offset, Decimal::from(rng.gen_range(5..=40u32)))
    };

    if price <= Decimal::ZERO || price >= Decimal::ONE {
        return None;
    }

    Some(PlaceOrder {
        user_id,
        market_id: market.id,
        outcome_id,
        token,
        side,
        price: price.round_dp(4),
        shares,
    })
}

/// Print the session summary and return the number of invariant violations.
fn print_summary(
    engine: &Engine,
    markets: &[Market],
    users: &[Uuid],
    totals: &TraderStats,
    elapsed_ms: u128,
) -> usize {
    let mut violations = 0;

    println!("\n========== SESSION SUMMARY ==========");
    println!("Elapsed:        {}ms", elapsed_ms);
    println!("Executed:       {}", totals.executed);
    println!("Orders placed:  {}", totals.orders_placed);
    println!("Volume:         ${:.2}", totals.volume);
    println!("Fees:           ${:.4}", totals.fees);
    if !totals.rejected.is_empty() {
        println!("Rejections:");
        for (kind, count) in &totals.rejected {
            println!("  {:<24} {}", kind, count);
        }
    }

    println!(
        "\n  {:<28} {:<12} {:>6} {:>40} {:>16}",
        "Pool", "Kind", "Ver", "Prices", "k drift"
    );
    for market in markets {
        let outcomes: Vec<Option<Uuid>> = if market.outcomes.is_empty() {
            vec![None]
        } else {
            market.outcomes.iter().map(|o| Some(o.id)).collect()
        };

        for outcome_id in outcomes {
            let Ok(state) = engine.pool_state(market.id, outcome_id) else {
                continue;
            };
            let prices = match state.pool.prices() {
                Ok(p) => p,
                Err(e) => {
                    warn!("Pool {} cannot be priced: {}", state.key, e);
                    violations += 1;
                    continue;
                }
            };
            let sum: Decimal = prices.iter().map(|(_, p)| *p).sum();
            let drift = state.pool.invariant_error();
            let rendered = prices
                .iter()
                .map(|(t, p)| format!("{}={:.4}", t, p))
                .collect::<Vec<_>>()
                .join(" ");

            println!(
                "  {:<28} {:<12} {:>6} {:>40} {:>16}",
                short_key(&state.key.to_string()),
                format!("{:?}", state.pool.kind),
                state.version,
                rendered,
                drift.round_dp(12)
            );

            if (sum - Decimal::ONE).abs() > dec!(0.000000001) {
                warn!("Pool {} prices sum to {}", state.key, sum);
                violations += 1;
            }
            if drift > dec!(0.000000001) {
                warn!("Pool {} reserve product drifted by {}", state.key, drift);
                violations += 1;
            }
        }
    }

    let mut replayed = 0usize;
    for user in users {
        for (key, position) in engine.ledger().positions_for_user(*user) {
            replayed += 1;
            let trades = engine.ledger().trades(&key);
            match Position::replay(&trades) {
                Ok(p) if p == position => {}
                Ok(p) => {
                    warn!("Position {:?} replays to {:?}, cached {:?}", key, p, position);
                    violations += 1;
                }
                Err(e) => {
                    warn!("Position {:?} fails to replay: {}", key, e);
                    violations += 1;
                }
            }
            if position.shares < Decimal::ZERO {
                warn!("Position {:?} is short", key);
                violations += 1;
            }
        }
    }

    println!("\nResting orders: {}", count_resting_orders(engine, markets));
    println!("Positions replayed: {}", replayed);
    println!(
        "Invariant checks: {}",
        if violations == 0 { "PASSED" } else { "FAILED" }
    );
    println!("=====================================\n");

    violations
}

fn count_resting_orders(engine: &Engine, markets: &[Market]) -> usize {
    markets
        .iter()
        .flat_map(|m| m.pool_keys().into_iter().map(move |k| (m.id, k.outcome_id)))
        .filter_map(|(market_id, outcome_id)| engine.pool_state(market_id, outcome_id).ok())
        .map(|state| state.book.open_orders().len())
        .sum()
}

/// Share quantities are truncated so a sell never exceeds what is held.
fn floor_shares(shares: Decimal) -> Decimal {
    shares.round_dp_with_strategy(6, RoundingStrategy::ToZero)
}

fn short_key(key: &str) -> String {
    if key.len() > 28 {
        format!("{}...", &key[..25])
    } else {
        key.to_string()
    }
}

async fn run_quote(
    kind: MarketKind,
    token: Token,
    side: Side,
    amount: Decimal,
    liquidity: Decimal,
) -> Result<()> {
    let engine = Engine::new(EngineConfig::from_env());
    let market = engine.create_market(NewMarket {
        name: "Quote preview".to_string(),
        kind,
        min_trade_size: dec!(0.01),
        max_trade_size: Decimal::MAX,
        outcome_labels: vec![],
        initial_liquidity: liquidity,
    })?;
    engine
        .set_market_status(market.id, MarketStatus::Active)
        .await?;

    let quote = engine
        .quote(&QuoteRequest {
            market_id: market.id,
            outcome_id: None,
            token,
            trade_type: side,
            amount_or_shares: amount,
        })
        .map_err(|e| anyhow::anyhow!("{}", e.user_message()))?;

    println!("{}", serde_json::to_string_pretty(&quote)?);
    Ok(())
}
