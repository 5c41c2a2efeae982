//! Strategy contract and the built-in strategies
//!
//! A strategy is initialized with parameters once per run, then asked for a
//! signal on every candle after its warm-up. `history` always ends at the
//! current candle, so nothing later is ever visible.

mod buy_and_hold;
mod fvg_sweep;
mod order_block_choch;
mod trend;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::optimizer::ParameterGrid;
use crate::patterns::{analyze_window, DetectorCache, SmartMoneyConfig, SmartMoneySnapshot};
use crate::portfolio::VirtualPortfolio;
use crate::types::{Candle, Position, Signal, StrategyParameters, TradeSide};

pub use buy_and_hold::BuyAndHold;
pub use fvg_sweep::FvgSweep;
pub use order_block_choch::OrderBlockChoch;
pub use trend::TrendFollowing;

/// Trait for candle-by-candle signal generation
pub trait Strategy: Send {
    fn name(&self) -> &str;
    fn description(&self) -> &str;

    /// Apply parameters and clear all run state
    fn initialize(&mut self, params: &StrategyParameters) -> Result<()>;

    /// Candles that must exist before the first `on_candle` call
    fn warmup_period(&self) -> usize;

    fn on_candle(
        &mut self,
        candle: &Candle,
        portfolio: &VirtualPortfolio,
        history: &[Candle],
    ) -> Signal;
}

/// Built-in strategy identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyId {
    BuyAndHold,
    TrendFollowing,
    FvgSweep,
    OrderBlockChoch,
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StrategyId::BuyAndHold => write!(f, "Buy & Hold"),
            StrategyId::TrendFollowing => write!(f, "Trend Following"),
            StrategyId::FvgSweep => write!(f, "FVG Liquidity Sweep"),
            StrategyId::OrderBlockChoch => write!(f, "Order Block CHOCH"),
        }
    }
}

impl std::str::FromStr for StrategyId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "buy_and_hold" | "buy_hold" => Ok(StrategyId::BuyAndHold),
            "trend_following" | "trend" => Ok(StrategyId::TrendFollowing),
            "fvg_sweep" | "fvg" => Ok(StrategyId::FvgSweep),
            "order_block_choch" | "order_block" => Ok(StrategyId::OrderBlockChoch),
            other => Err(EngineError::InvalidParameter {
                name: "strategy".to_string(),
                reason: format!("unknown strategy `{other}`"),
            }),
        }
    }
}

impl StrategyId {
    pub fn all() -> &'static [StrategyId] {
        &[
            StrategyId::BuyAndHold,
            StrategyId::TrendFollowing,
            StrategyId::FvgSweep,
            StrategyId::OrderBlockChoch,
        ]
    }

    /// Fresh instance with default parameters
    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyId::BuyAndHold => Box::new(BuyAndHold::default()),
            StrategyId::TrendFollowing => Box::new(TrendFollowing::default()),
            StrategyId::FvgSweep => Box::new(FvgSweep::default()),
            StrategyId::OrderBlockChoch => Box::new(OrderBlockChoch::default()),
        }
    }

    /// Search space used when optimizing this strategy
    pub fn default_grid(&self) -> ParameterGrid {
        match self {
            StrategyId::BuyAndHold => {
                ParameterGrid::new().add("max_holding_candles", [0usize, 500, 1000, 2000])
            }
            StrategyId::TrendFollowing => ParameterGrid::new()
                .add("fast_period", [5usize, 10, 20, 30])
                .add("slow_period", [40usize, 50, 100, 200])
                .add("trailing_stop_pct", [3.0, 5.0, 8.0])
                .add("max_holding_candles", [100usize, 200]),
            StrategyId::FvgSweep => ParameterGrid::new()
                .add("min_gap_pct", [0.05, 0.1, 0.25])
                .add("swing_lookback", [3usize, 5, 8])
                .add("sweep_window", [10usize, 20, 40])
                .add("take_profit_pct", [2.0, 4.0, 6.0])
                .add("stop_loss_pct", [1.0, 2.0]),
            StrategyId::OrderBlockChoch => ParameterGrid::new()
                .add("displacement_multiplier", [1.5, 2.0, 3.0])
                .add("swing_lookback", [3usize, 5, 8])
                .add("ob_window", [15usize, 30])
                .add("take_profit_pct", [2.0, 4.0, 6.0])
                .add("stop_loss_pct", [1.0, 2.0]),
        }
    }
}

/// Time-based exit shared by every strategy.
///
/// Counts candles for whichever position is open, long or short. A flip opens
/// a new position, so the count restarts.
#[derive(Debug, Clone, Default)]
pub struct HoldTimer {
    max_candles: Option<usize>,
    held: usize,
    entry_time: Option<i64>,
}

impl HoldTimer {
    /// `max_candles == 0` disables the limit
    pub fn new(max_candles: usize) -> Self {
        Self {
            max_candles: (max_candles > 0).then_some(max_candles),
            held: 0,
            entry_time: None,
        }
    }

    /// Advance one candle. Returns true once the open position has been held
    /// for the maximum number of candles.
    pub fn tick(&mut self, portfolio: &VirtualPortfolio) -> bool {
        match portfolio.position() {
            Some(p) => {
                if self.entry_time != Some(p.entry_time) {
                    self.entry_time = Some(p.entry_time);
                    self.held = 0;
                }
                self.held += 1;
                self.max_candles.is_some_and(|max| self.held >= max)
            }
            None => {
                self.entry_time = None;
                self.held = 0;
                false
            }
        }
    }

    pub fn held(&self) -> usize {
        self.held
    }
}

/// The signal that closes `position`. With shorting enabled the portfolio
/// turns it into a flip.
pub(crate) fn exit_signal(position: &Position) -> Signal {
    match position.side {
        TradeSide::Long => Signal::Sell,
        TradeSide::Short => Signal::Buy,
    }
}

/// Fixed take-profit / stop-loss bracket around the entry price, in percent
#[derive(Debug, Clone, Copy)]
pub struct Bracket {
    pub take_profit_pct: f64,
    pub stop_loss_pct: f64,
}

impl Bracket {
    pub fn from_params(params: &StrategyParameters) -> Result<Self> {
        let bracket = Self {
            take_profit_pct: params.get_f64("take_profit_pct", 4.0)?,
            stop_loss_pct: params.get_f64("stop_loss_pct", 2.0)?,
        };
        positive("take_profit_pct", bracket.take_profit_pct)?;
        positive("stop_loss_pct", bracket.stop_loss_pct)?;
        if bracket.stop_loss_pct >= 100.0 {
            return Err(EngineError::InvalidParameter {
                name: "stop_loss_pct".to_string(),
                reason: "must be below 100".to_string(),
            });
        }
        Ok(bracket)
    }

    /// Take-profit or stop-loss reached, mirrored for shorts
    pub fn hit(&self, position: &Position, close: Decimal) -> bool {
        let hundred = dec!(100);
        let tp = crate::types::f64_to_decimal(self.take_profit_pct) / hundred;
        let sl = crate::types::f64_to_decimal(self.stop_loss_pct) / hundred;
        let entry = position.entry_price;
        match position.side {
            TradeSide::Long => {
                close >= entry * (Decimal::ONE + tp) || close <= entry * (Decimal::ONE - sl)
            }
            TradeSide::Short => {
                close <= entry * (Decimal::ONE - tp) || close >= entry * (Decimal::ONE + sl)
            }
        }
    }
}

pub(crate) fn positive(name: &str, value: f64) -> Result<()> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("must be positive, got {value}"),
        })
    }
}

/// Smart-money analysis of closed candles, recomputed every `interval`
/// candles over a trailing window.
///
/// The candle being decided on is never part of the analysis: features and
/// their fill/sweep flags describe the market up to the previous close.
#[derive(Debug, Clone)]
pub(crate) struct StructureFeed {
    config: SmartMoneyConfig,
    window: usize,
    cache: DetectorCache<SmartMoneySnapshot>,
}

impl StructureFeed {
    pub(crate) fn new(config: SmartMoneyConfig, window: usize, interval: usize) -> Self {
        Self {
            config,
            window: window.max(1),
            cache: DetectorCache::new(interval),
        }
    }

    pub(crate) fn update(&mut self, history: &[Candle]) {
        let closed = &history[..history.len().saturating_sub(1)];
        if self
            .cache
            .last_computed_at()
            .is_some_and(|at| closed.len() < at)
        {
            self.cache.reset();
        }
        let (config, window) = (&self.config, self.window);
        if self
            .cache
            .refresh(closed, |h| analyze_window(h, window, config))
        {
            tracing::trace!(closed = closed.len(), "structure refreshed");
        }
    }

    pub(crate) fn snapshot(&self) -> &SmartMoneySnapshot {
        self.cache.get()
    }

    /// History length covered by the current snapshot
    pub(crate) fn computed_at(&self) -> usize {
        self.cache.last_computed_at().unwrap_or(0)
    }
}

/// Whether a feature completed at candle `formed_at` has been followed by
/// `confirmation` further closed candles before candle `now`
pub(crate) fn is_confirmed(formed_at: usize, confirmation: usize, now: usize) -> bool {
    formed_at + confirmation < now
}
