//! Types for the backtesting engine

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::metrics::PerformanceMetrics;

/// A single candlestick (OHLCV) for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in milliseconds since the Unix epoch
    pub timestamp: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub exchange: String,
}

impl Candle {
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Absolute body size |close - open|
    pub fn body(&self) -> Decimal {
        (self.close - self.open).abs()
    }
}

/// Trading signal emitted once per candle by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

/// Direction of a position or trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Long,
    Short,
}

/// Why a trade was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Signal,
    StopLoss,
}

/// The single open position held by a portfolio
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub side: TradeSide,
    pub entry_time: i64,
    /// Fill price including slippage
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub entry_fee: Decimal,
}

impl Position {
    /// Mark-to-market value of the position at `price`.
    ///
    /// Shorts hold their entry notional as collateral, so their value is
    /// `quantity * (2 * entry - price)`, floored at zero (liquidated).
    pub fn market_value(&self, price: Decimal) -> Decimal {
        match self.side {
            TradeSide::Long => self.quantity * price,
            TradeSide::Short => {
                (self.quantity * (self.entry_price * dec!(2) - price)).max(Decimal::ZERO)
            }
        }
    }

    /// Unrealized P&L as a percentage of entry notional (fees excluded)
    pub fn unrealized_pct(&self, price: Decimal) -> f64 {
        let notional = self.entry_price * self.quantity;
        if notional <= Decimal::ZERO {
            return 0.0;
        }
        let pnl = self.market_value(price) - notional;
        decimal_to_f64(pnl / notional * dec!(100))
    }
}

/// A closed round-trip trade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    /// Monotonically increasing within a run, starting at 1
    pub id: u64,
    pub side: TradeSide,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    /// Net of entry and exit fees
    pub pnl: Decimal,
    pub pnl_pct: Decimal,
    pub fees: Decimal,
    pub exit_reason: ExitReason,
}

impl Trade {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn holding_ms(&self) -> i64 {
        (self.exit_time - self.entry_time).max(0)
    }
}

/// A point on the equity curve, one per processed candle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: i64,
    pub total_value: Decimal,
    pub cash: Decimal,
    pub position_value: Decimal,
}

/// Position sizing mode
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizingMode {
    /// `position_size` is a number of units
    Fixed,
    /// `position_size` is a fraction (0, 1] of current total equity
    #[default]
    PercentOfPortfolio,
}

/// Configuration for a backtest run. Read-only for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    pub initial_balance: Decimal,
    /// Fee rate for market orders (e.g. 0.0005 = 0.05%)
    pub taker_fee_rate: Decimal,
    /// Fee rate for passive orders. Validated and reported with results;
    /// simulated fills are market orders and always pay the taker rate.
    pub maker_fee_rate: Decimal,
    /// Adverse price adjustment applied to every fill
    pub slippage_rate: Decimal,
    pub sizing_mode: SizingMode,
    pub position_size: Decimal,
    /// Force-exit a trade once its loss exceeds this percentage of entry notional
    pub max_loss_per_trade_pct: Option<f64>,
    /// When false, Sell while flat is ignored and Sell while long only exits
    pub allow_short: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_balance: Decimal::from(10000),
            taker_fee_rate: dec!(0.0005),
            maker_fee_rate: dec!(0.0002),
            slippage_rate: dec!(0.0005),
            sizing_mode: SizingMode::PercentOfPortfolio,
            position_size: dec!(0.95),
            max_loss_per_trade_pct: None,
            allow_short: false,
        }
    }
}

impl BacktestConfig {
    pub fn with_initial_balance(mut self, balance: Decimal) -> Self {
        self.initial_balance = balance;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let unit_rate = |name: &str, rate: Decimal| {
            if rate < Decimal::ZERO || rate >= Decimal::ONE {
                Err(EngineError::InvalidConfig(format!(
                    "{name} must be in [0, 1), got {rate}"
                )))
            } else {
                Ok(())
            }
        };
        unit_rate("taker_fee_rate", self.taker_fee_rate)?;
        unit_rate("maker_fee_rate", self.maker_fee_rate)?;
        unit_rate("slippage_rate", self.slippage_rate)?;

        if self.initial_balance <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "initial_balance must be positive, got {}",
                self.initial_balance
            )));
        }
        if self.position_size <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "position_size must be positive, got {}",
                self.position_size
            )));
        }
        if self.sizing_mode == SizingMode::PercentOfPortfolio && self.position_size > Decimal::ONE
        {
            return Err(EngineError::InvalidConfig(format!(
                "percent-of-portfolio position_size must be <= 1, got {}",
                self.position_size
            )));
        }
        if let Some(max_loss) = self.max_loss_per_trade_pct {
            if !(max_loss > 0.0 && max_loss <= 100.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "max_loss_per_trade_pct must be in (0, 100], got {max_loss}"
                )));
            }
        }
        Ok(())
    }
}

/// A scalar strategy parameter value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<usize> for ParamValue {
    fn from(v: usize) -> Self {
        ParamValue::Number(v as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Bool(b) => write!(f, "{b}"),
            ParamValue::Number(n) => write!(f, "{n}"),
        }
    }
}

/// Named strategy parameters; also a point in the optimizer's search space
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyParameters(BTreeMap<String, ParamValue>);

impl StrategyParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: &str, value: impl Into<ParamValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<ParamValue> {
        self.0.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Numeric parameter, falling back to `default` when absent
    pub fn get_f64(&self, name: &str, default: f64) -> Result<f64> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Number(n)) if n.is_finite() => Ok(*n),
            Some(other) => Err(EngineError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a finite number, got {other}"),
            }),
        }
    }

    /// Non-negative integer parameter, falling back to `default` when absent
    pub fn get_usize(&self, name: &str, default: usize) -> Result<usize> {
        let value = self.get_f64(name, default as f64)?;
        if value < 0.0 || value.fract() != 0.0 {
            return Err(EngineError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a non-negative integer, got {value}"),
            });
        }
        Ok(value as usize)
    }

    pub fn get_bool(&self, name: &str, default: bool) -> Result<bool> {
        match self.0.get(name) {
            None => Ok(default),
            Some(ParamValue::Bool(b)) => Ok(*b),
            Some(other) => Err(EngineError::InvalidParameter {
                name: name.to_string(),
                reason: format!("expected a boolean, got {other}"),
            }),
        }
    }
}

impl std::fmt::Display for StrategyParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Result of a backtest run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub strategy_name: String,
    pub symbol: String,
    pub timeframe: String,
    pub start_time: i64,
    pub end_time: i64,
    pub initial_balance: Decimal,
    pub final_balance: Decimal,
    pub metrics: PerformanceMetrics,
    /// Closed trades only
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<PortfolioSnapshot>,
    /// Position still open after the last candle, marked to market in `final_balance`
    pub open_position: Option<Position>,
    pub config: BacktestConfig,
}

pub(crate) fn decimal_to_f64(value: Decimal) -> f64 {
    use rust_decimal::prelude::ToPrimitive;
    value.to_f64().unwrap_or(0.0)
}

pub(crate) fn f64_to_decimal(value: f64) -> Decimal {
    use rust_decimal::prelude::FromPrimitive;
    Decimal::from_f64(value).unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(BacktestConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_oversized_percentage() {
        let config = BacktestConfig {
            position_size: dec!(1.5),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_rejects_negative_fee() {
        let config = BacktestConfig {
            taker_fee_rate: dec!(-0.01),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parameter_getters() {
        let params = StrategyParameters::new()
            .with("period", 14usize)
            .with("threshold", 2.5)
            .with("enabled", true);

        assert_eq!(params.get_usize("period", 0).unwrap(), 14);
        assert_eq!(params.get_f64("threshold", 0.0).unwrap(), 2.5);
        assert!(params.get_bool("enabled", false).unwrap());
        assert_eq!(params.get_usize("missing", 7).unwrap(), 7);
    }

    #[test]
    fn test_parameter_type_mismatch_is_error() {
        let params = StrategyParameters::new()
            .with("period", 2.5)
            .with("flag", 1.0);
        assert!(params.get_usize("period", 0).is_err());
        assert!(params.get_bool("flag", false).is_err());
    }

    #[test]
    fn test_parameters_deserialize_untagged() {
        let params: StrategyParameters =
            serde_json::from_str(r#"{"fast": 10, "trail": true}"#).unwrap();
        assert_eq!(params.get("fast"), Some(ParamValue::Number(10.0)));
        assert_eq!(params.get("trail"), Some(ParamValue::Bool(true)));
    }

    #[test]
    fn test_short_value_floors_at_zero() {
        let pos = Position {
            side: TradeSide::Short,
            entry_time: 0,
            entry_price: dec!(100),
            quantity: dec!(2),
            entry_fee: Decimal::ZERO,
        };
        assert_eq!(pos.market_value(dec!(90)), dec!(220));
        assert_eq!(pos.market_value(dec!(250)), Decimal::ZERO);
    }
}
