//! Strategy Lab engine: backtesting, pattern detection, and optimization
//!
//! Provides:
//! - Bar-by-bar backtest engine over a virtual portfolio with fees and slippage
//! - Smart-money detectors (fair value gaps, order blocks, liquidity sweeps,
//!   market structure) and a bull/bear/sideways regime classifier
//! - Performance metrics (Sharpe, Sortino, drawdown, profit factor, ...)
//! - Parallel grid-search optimizer
//! - Regime-aware strategy selection
//!
//! The crate does no I/O: candles come in, results go out.

pub mod engine;
pub mod error;
pub mod fees;
pub mod metrics;
pub mod optimizer;
pub mod patterns;
pub mod portfolio;
pub mod selector;
pub mod strategy;
pub mod types;

// Re-exports for convenience
pub use engine::{infer_timeframe, BacktestEngine};
pub use error::{EngineError, Result};
pub use metrics::{calculate_metrics, PerformanceMetrics, PROFIT_FACTOR_MAX};
pub use optimizer::{
    fitness, DeepOptimizer, OptimizationResult, OptimizeProgress, OptimizeStatus,
    OptimizerConfig, ParameterGrid, ScoredCombination, WORST_FITNESS,
};
pub use patterns::{classify_regime, MarketRegime, RegimeConfig};
pub use portfolio::VirtualPortfolio;
pub use selector::{
    evaluate_strategies, regime_bonus, select_best_strategy, select_for_market, Selection,
    StrategyKind,
};
pub use strategy::{
    BuyAndHold, FvgSweep, HoldTimer, OrderBlockChoch, Strategy, StrategyId, TrendFollowing,
};
pub use types::{
    BacktestConfig, BacktestResult, Candle, ExitReason, ParamValue, PortfolioSnapshot, Position,
    Signal, SizingMode, StrategyParameters, Trade, TradeSide,
};
