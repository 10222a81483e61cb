//! Engine configuration.

use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

/// Trading engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Platform fee rate applied to gross notional (e.g., 0.001 = 0.1%)
    pub fee_rate: Decimal,
    /// Resting orders must beat the AMM price by this factor to match.
    /// Buys match asks <= amm * tolerance, sells match bids >= amm / tolerance.
    /// Default: 0.95
    pub book_price_tolerance: Decimal,
    /// Maximum relative price move between quote and commit before the
    /// commit is rejected as stale (e.g., 0.01 = 1%)
    pub stale_quote_tolerance: Decimal,
    /// Maximum wait for a market's commit gate
    pub lock_timeout: Duration,
    /// Reserves may never fall to or below this value
    pub min_reserve: Decimal,
    /// Broadcast channel capacity for change notifications
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::ZERO,
            book_price_tolerance: dec!(0.95),
            stale_quote_tolerance: dec!(0.01),
            lock_timeout: Duration::from_millis(2000),
            min_reserve: dec!(0.000001),
            event_capacity: 1024,
        }
    }
}

impl EngineConfig {
    /// Load overrides from environment variables.
    ///
    /// Optional variables (defaults in parentheses):
    /// - ENGINE_FEE_RATE (0)
    /// - ENGINE_BOOK_PRICE_TOLERANCE (0.95)
    /// - ENGINE_STALE_QUOTE_TOLERANCE (0.01)
    /// - ENGINE_LOCK_TIMEOUT_MS (2000)
    /// - ENGINE_MIN_RESERVE (0.000001)
    /// - ENGINE_EVENT_CAPACITY (1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let fee_rate = decimal_var("ENGINE_FEE_RATE", defaults.fee_rate, |v| {
            v >= Decimal::ZERO && v < Decimal::ONE
        });
        let book_price_tolerance = decimal_var(
            "ENGINE_BOOK_PRICE_TOLERANCE",
            defaults.book_price_tolerance,
            |v| v > Decimal::ZERO && v <= Decimal::ONE,
        );
        let stale_quote_tolerance = decimal_var(
            "ENGINE_STALE_QUOTE_TOLERANCE",
            defaults.stale_quote_tolerance,
            |v| v >= Decimal::ZERO,
        );
        let min_reserve = decimal_var("ENGINE_MIN_RESERVE", defaults.min_reserve, |v| {
            v > Decimal::ZERO
        });

        let lock_timeout = std::env::var("ENGINE_LOCK_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.lock_timeout);

        let event_capacity = std::env::var("ENGINE_EVENT_CAPACITY")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .filter(|c| *c > 0)
            .unwrap_or(defaults.event_capacity);

        Self {
            fee_rate,
            book_price_tolerance,
            stale_quote_tolerance,
            lock_timeout,
            min_reserve,
            event_capacity,
        }
    }
}

fn decimal_var(name: &str, default: Decimal, valid: impl Fn(Decimal) -> bool) -> Decimal {
    match std::env::var(name) {
        Ok(raw) => match raw.parse::<Decimal>() {
            Ok(v) if valid(v) => v,
            _ => {
                warn!("[CONFIG] Ignoring invalid {}={}, using {}", name, raw, default);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.fee_rate, Decimal::ZERO);
        assert_eq!(config.book_price_tolerance, dec!(0.95));
        assert_eq!(config.lock_timeout, Duration::from_millis(2000));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("ENGINE_FEE_RATE", "0.002");
        std::env::set_var("ENGINE_LOCK_TIMEOUT_MS", "250");

        let config = EngineConfig::from_env();
        assert_eq!(config.fee_rate, dec!(0.002));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.book_price_tolerance, dec!(0.95));

        std::env::remove_var("ENGINE_FEE_RATE");
        std::env::remove_var("ENGINE_LOCK_TIMEOUT_MS");
    }

    #[test]
    #[serial]
    fn test_config_invalid_values_use_default() {
        std::env::set_var("ENGINE_BOOK_PRICE_TOLERANCE", "1.5");
        std::env::set_var("ENGINE_FEE_RATE", "not_a_number");

        let config = EngineConfig::from_env();
        assert_eq!(config.book_price_tolerance, dec!(0.95));
        assert_eq!(config.fee_rate, Decimal::ZERO);

        std::env::remove_var("ENGINE_BOOK_PRICE_TOLERANCE");
        std::env::remove_var("ENGINE_FEE_RATE");
    }
}
