//! Parallel parameter optimization for backtesting strategies
//!
//! Expands a parameter grid into its full Cartesian product, backtests every
//! combination on a rayon worker pool, scores results with a composite
//! fitness and re-runs the winner for a complete result.

use rust_decimal::Decimal;
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, RwLock,
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::engine::BacktestEngine;
use crate::error::{EngineError, Result};
use crate::metrics::PerformanceMetrics;
use crate::strategy::Strategy;
use crate::types::{BacktestConfig, BacktestResult, Candle, ParamValue, StrategyParameters};

/// Score given to combinations that never traded
pub const WORST_FITNESS: f64 = f64::MIN;

// ============================================================================
// Types
// ============================================================================

/// One named parameter and the values to try for it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

/// Ordered set of parameter axes. The first axis varies slowest when
/// combinations are expanded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterGrid {
    axes: Vec<GridAxis>,
}

impl ParameterGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an axis, replacing any existing axis with the same name in place
    pub fn add<V, I>(mut self, name: &str, values: I) -> Self
    where
        V: Into<ParamValue>,
        I: IntoIterator<Item = V>,
    {
        let values: Vec<ParamValue> = values.into_iter().map(Into::into).collect();
        match self.axes.iter_mut().find(|a| a.name == name) {
            Some(axis) => axis.values = values,
            None => self.axes.push(GridAxis {
                name: name.to_string(),
                values,
            }),
        }
        self
    }

    pub fn axes(&self) -> &[GridAxis] {
        &self.axes
    }

    /// Number of combinations in the Cartesian product
    pub fn len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|a| a.values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every combination of one value per axis
    pub fn combinations(&self) -> Vec<StrategyParameters> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut combos = vec![StrategyParameters::new()];
        for axis in &self.axes {
            combos = combos
                .into_iter()
                .flat_map(|base| {
                    axis.values
                        .iter()
                        .map(move |&value| base.clone().with(&axis.name, value))
                })
                .collect();
        }
        combos
    }
}

/// Optimizer settings. `backtest` is shared read-only by every worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub backtest: BacktestConfig,
    /// Worker threads; `None` uses available parallelism
    pub workers: Option<usize>,
    /// Upper bound on the profit factor used in fitness
    pub profit_factor_cap: f64,
    /// Log progress every this many percent of completed combinations
    pub progress_step_pct: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            backtest: BacktestConfig::default(),
            workers: None,
            profit_factor_cap: 10.0,
            progress_step_pct: 10,
        }
    }
}

/// A scored parameter combination, as reported by a worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub rank: usize,
    pub parameters: StrategyParameters,
    pub fitness: f64,
    pub final_balance: Decimal,
    pub metrics: PerformanceMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy_name: String,
    pub best_parameters: StrategyParameters,
    pub best_fitness: f64,
    /// Full re-run of the best combination
    pub best_result: BacktestResult,
    /// Every successful combination, best first
    pub all_results: Vec<ScoredCombination>,
    pub duration: Duration,
    pub combinations_tested: usize,
    pub combinations_total: usize,
}

/// Optimization run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizeStatus {
    Idle,
    Running,
    Complete,
    Cancelled,
}

/// Progress shared between the optimizer's workers and any observer
pub struct OptimizeProgress {
    pub status: RwLock<OptimizeStatus>,
    pub total_combinations: AtomicU32,
    pub completed: AtomicU32,
    pub failed: AtomicU32,
    pub cancelled: AtomicBool,
}

impl OptimizeProgress {
    pub fn new() -> Self {
        Self {
            status: RwLock::new(OptimizeStatus::Idle),
            total_combinations: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            failed: AtomicU32::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    /// Reset for a new optimization run
    pub fn reset(&self, total: usize) {
        self.set_status(OptimizeStatus::Running);
        self.total_combinations
            .store(total.min(u32::MAX as usize) as u32, Ordering::Relaxed);
        self.completed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.cancelled.store(false, Ordering::Relaxed);
    }

    /// Request early termination; combinations already running finish
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> OptimizeStatus {
        self.status
            .read()
            .map(|s| *s)
            .unwrap_or(OptimizeStatus::Idle)
    }

    fn set_status(&self, status: OptimizeStatus) {
        if let Ok(mut s) = self.status.write() {
            *s = status;
        }
    }

    /// Get progress as percentage
    pub fn progress_pct(&self) -> f32 {
        let total = self.total_combinations.load(Ordering::Relaxed);
        let done = self.completed.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            (done as f32 / total as f32) * 100.0
        }
    }

    pub fn is_running(&self) -> bool {
        self.status() == OptimizeStatus::Running
    }
}

impl Default for OptimizeProgress {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scoring
// ============================================================================

/// Composite fitness, higher is better:
/// `max(0, return%) * max(win rate, 0.01) * min(profit factor, cap) / max(drawdown%, 1)`
/// with the win rate as a fraction. Combinations without trades score
/// [`WORST_FITNESS`].
pub fn fitness(metrics: &PerformanceMetrics, profit_factor_cap: f64) -> f64 {
    if metrics.total_trades == 0 {
        return WORST_FITNESS;
    }

    let ret = metrics.total_return_pct.max(0.0);
    let win_rate = (metrics.win_rate / 100.0).max(0.01);
    let profit_factor = metrics.profit_factor.min(profit_factor_cap).max(0.0);
    let drawdown = metrics.max_drawdown_pct.max(1.0);

    let score = ret * win_rate * profit_factor / drawdown;
    if score.is_finite() {
        score
    } else {
        WORST_FITNESS
    }
}

// ============================================================================
// Optimizer
// ============================================================================

#[derive(Default)]
pub struct DeepOptimizer {
    progress: Arc<OptimizeProgress>,
}

impl DeepOptimizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a progress tracker with an observer (e.g. to cancel)
    pub fn with_progress(progress: Arc<OptimizeProgress>) -> Self {
        Self { progress }
    }

    pub fn progress(&self) -> Arc<OptimizeProgress> {
        Arc::clone(&self.progress)
    }

    /// Grid-search `grid` for the strategy built by `factory`.
    ///
    /// Each combination gets a fresh strategy instance. Combinations whose
    /// initialization fails or whose backtest errors or panics are logged and
    /// excluded. Fails only when the grid is empty or nothing succeeded.
    pub fn optimize<F>(
        &self,
        factory: F,
        candles: &[Candle],
        grid: &ParameterGrid,
        config: &OptimizerConfig,
    ) -> Result<OptimizationResult>
    where
        F: Fn() -> Box<dyn Strategy> + Sync,
    {
        let started = Instant::now();
        let combos = grid.combinations();
        if combos.is_empty() {
            return Err(EngineError::EmptyGrid);
        }
        config.backtest.validate()?;

        let total = combos.len();
        let strategy_name = factory().name().to_string();
        let workers = config
            .workers
            .filter(|&w| w > 0)
            .unwrap_or_else(rayon::current_num_threads);
        let step = (total * config.progress_step_pct.clamp(1, 100) as usize / 100).max(1);

        self.progress.reset(total);
        info!(
            strategy = %strategy_name,
            combinations = total,
            candles = candles.len(),
            workers,
            "Starting parameter optimization"
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| EngineError::WorkerPool(e.to_string()))?;

        let progress = &self.progress;
        let backtest = &config.backtest;
        let outcomes: Vec<Option<ScoredCombination>> = pool.install(|| {
            combos
                .par_iter()
                .map(|params| {
                    if progress.is_cancelled() {
                        return None;
                    }
                    let outcome = evaluate_guarded(&factory, params, candles, backtest);
                    let done = progress.completed.fetch_add(1, Ordering::Relaxed) as usize + 1;
                    if done % step == 0 || done == total {
                        info!(
                            completed = done,
                            total,
                            pct = progress.progress_pct() as u32,
                            "Optimization progress"
                        );
                    }

                    match outcome {
                        Ok(result) => Some(ScoredCombination {
                            rank: 0,
                            parameters: params.clone(),
                            fitness: fitness(&result.metrics, config.profit_factor_cap),
                            final_balance: result.final_balance,
                            metrics: result.metrics,
                        }),
                        Err(e) => {
                            progress.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(params = %params, error = %e, "Combination excluded");
                            None
                        }
                    }
                })
                .collect()
        });

        let cancelled = self.progress.is_cancelled();
        let scored: Vec<ScoredCombination> = outcomes.into_iter().flatten().collect();
        let failed = self.progress.failed.load(Ordering::Relaxed) as usize;

        if scored.is_empty() {
            self.progress.set_status(if cancelled {
                OptimizeStatus::Cancelled
            } else {
                OptimizeStatus::Complete
            });
            return Err(EngineError::NoValidCombinations { failed, total });
        }

        let all_results = finalize_results(scored);
        let best = &all_results[0];

        // Workers only keep scalar metrics; rebuild the full result once
        let best_result = evaluate_guarded(&factory, &best.parameters, candles, backtest)?;
        debug!(params = %best.parameters, "Best combination re-run");

        if cancelled {
            warn!(
                tested = all_results.len(),
                total, "Optimization cancelled, returning partial results"
            );
            self.progress.set_status(OptimizeStatus::Cancelled);
        } else {
            self.progress.set_status(OptimizeStatus::Complete);
        }

        let duration = started.elapsed();
        info!(
            strategy = %strategy_name,
            params = %best.parameters,
            fitness = best.fitness,
            tested = all_results.len(),
            failed,
            elapsed_ms = duration.as_millis() as u64,
            "Optimization complete"
        );

        Ok(OptimizationResult {
            strategy_name,
            best_parameters: best.parameters.clone(),
            best_fitness: best.fitness,
            best_result,
            combinations_tested: all_results.len(),
            combinations_total: total,
            all_results,
            duration,
        })
    }
}

/// Build, initialize and backtest one combination, converting panics to errors
fn evaluate_guarded<F>(
    factory: &F,
    params: &StrategyParameters,
    candles: &[Candle],
    config: &BacktestConfig,
) -> Result<BacktestResult>
where
    F: Fn() -> Box<dyn Strategy> + Sync,
{
    catch_unwind(AssertUnwindSafe(|| {
        let mut strategy = factory();
        strategy.initialize(params)?;
        BacktestEngine::evaluate(strategy.as_mut(), candles, config)
    }))
    .unwrap_or_else(|panic| {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(EngineError::EvaluationPanicked(message))
    })
}

/// Stable sort by fitness, best first, then assign ranks. Ties keep grid order.
fn finalize_results(mut scored: Vec<ScoredCombination>) -> Vec<ScoredCombination> {
    scored.sort_by(|a, b| b.fitness.total_cmp(&a.fitness));
    for (i, s) in scored.iter_mut().enumerate() {
        s.rank = i + 1;
    }
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::from_closes;
    use crate::portfolio::VirtualPortfolio;
    use crate::strategy::{StrategyId, TrendFollowing};
    use crate::types::Signal;

    fn wave(n: usize) -> Vec<Candle> {
        let closes: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64;
                100.0 + 20.0 * (t / 25.0).sin() + 0.05 * t
            })
            .collect();
        from_closes(&closes)
    }

    /// Alternates Buy and Sell every `period` candles. Panics when `explode`
    /// is set and never trades when `idle` is set.
    #[derive(Default)]
    struct Cadence {
        period: usize,
        explode: bool,
        idle: bool,
        seen: usize,
    }

    impl Strategy for Cadence {
        fn name(&self) -> &str {
            "Cadence"
        }

        fn description(&self) -> &str {
            "fixed-interval test strategy"
        }

        fn initialize(&mut self, params: &StrategyParameters) -> Result<()> {
            self.period = params.get_usize("period", 5)?;
            if self.period == 0 {
                return Err(EngineError::InvalidParameter {
                    name: "period".to_string(),
                    reason: "zero".to_string(),
                });
            }
            self.explode = params.get_bool("explode", false)?;
            self.idle = params.get_bool("idle", false)?;
            self.seen = 0;
            Ok(())
        }

        fn warmup_period(&self) -> usize {
            0
        }

        fn on_candle(
            &mut self,
            _candle: &Candle,
            _portfolio: &VirtualPortfolio,
            _history: &[Candle],
        ) -> Signal {
            if self.explode {
                panic!("degenerate parameters");
            }
            self.seen += 1;
            if self.idle || self.seen % self.period != 0 {
                return Signal::Hold;
            }
            if (self.seen / self.period) % 2 == 1 {
                Signal::Buy
            } else {
                Signal::Sell
            }
        }
    }

    fn cadence() -> Box<dyn Strategy> {
        Box::new(Cadence::default())
    }

    fn single_worker() -> OptimizerConfig {
        OptimizerConfig {
            workers: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_grid_expansion_order() {
        let grid = ParameterGrid::new()
            .add("a", [1usize, 2, 3])
            .add("b", [10usize, 20, 30, 40]);
        let combos = grid.combinations();

        assert_eq!(grid.len(), 12);
        assert_eq!(combos.len(), 12);
        assert_eq!(combos[0].get_usize("a", 0).unwrap(), 1);
        assert_eq!(combos[0].get_usize("b", 0).unwrap(), 10);
        assert_eq!(combos[1].get_usize("b", 0).unwrap(), 20);
        assert_eq!(combos[4].get_usize("a", 0).unwrap(), 2);
    }

    #[test]
    fn test_empty_axis_means_empty_grid() {
        let grid = ParameterGrid::new()
            .add("a", [1usize, 2])
            .add("b", Vec::<usize>::new());
        assert!(grid.is_empty());
        assert!(ParameterGrid::new().combinations().is_empty());

        let err = DeepOptimizer::new()
            .optimize(cadence, &wave(50), &grid, &single_worker())
            .unwrap_err();
        assert!(matches!(err, EngineError::EmptyGrid));
    }

    #[test]
    fn test_twelve_combinations_best_dominates() {
        let candles = wave(400);
        let grid = ParameterGrid::new()
            .add("fast_period", [3usize, 5, 8])
            .add("slow_period", [10usize, 20, 30, 40]);

        let optimizer = DeepOptimizer::new();
        let result = optimizer
            .optimize(
                || Box::new(TrendFollowing::default()) as Box<dyn Strategy>,
                &candles,
                &grid,
                &OptimizerConfig::default(),
            )
            .unwrap();

        // Every combination is evaluated exactly once; the best re-run is not counted
        let progress = optimizer.progress();
        let failed = progress.failed.load(Ordering::Relaxed) as usize;
        assert_eq!(progress.completed.load(Ordering::Relaxed), 12);
        assert_eq!(failed + result.combinations_tested, 12);
        assert_eq!(failed, 0);
        assert_eq!(result.combinations_total, 12);
        assert_eq!(result.combinations_tested, 12);
        assert_eq!(result.all_results.len(), result.combinations_tested);
        for other in &result.all_results {
            assert!(result.best_fitness >= other.fitness);
        }
        assert_eq!(result.all_results[0].rank, 1);
        assert_eq!(result.strategy_name, "Trend Following");
        assert_eq!(
            result.best_result.metrics.total_trades,
            result.all_results[0].metrics.total_trades
        );
    }

    #[test]
    fn test_failing_combinations_are_excluded() {
        let grid = ParameterGrid::new()
            .add("explode", [false, true])
            .add("period", [0usize, 3, 7]);
        let optimizer = DeepOptimizer::new();
        let result = optimizer
            .optimize(cadence, &wave(120), &grid, &OptimizerConfig::default())
            .unwrap();

        // period 0 fails in initialize, explode panics during the run
        assert_eq!(result.combinations_total, 6);
        assert_eq!(result.combinations_tested, 2);
        assert!(result
            .all_results
            .iter()
            .all(|r| !r.parameters.get_bool("explode", true).unwrap()));
        assert_eq!(optimizer.progress().failed.load(Ordering::Relaxed), 4);
        assert_eq!(optimizer.progress().status(), OptimizeStatus::Complete);
    }

    #[test]
    fn test_all_failing_is_an_error() {
        let grid = ParameterGrid::new().add("explode", [true]);
        let err = DeepOptimizer::new()
            .optimize(cadence, &wave(30), &grid, &single_worker())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::NoValidCombinations { failed: 1, total: 1 }
        ));
    }

    #[test]
    fn test_zero_trades_ranked_last() {
        let grid = ParameterGrid::new()
            .add("idle", [true, false])
            .add("period", [4usize, 9]);
        let result = DeepOptimizer::new()
            .optimize(cadence, &wave(200), &grid, &single_worker())
            .unwrap();

        let last_two = &result.all_results[2..];
        for r in last_two {
            assert_eq!(r.metrics.total_trades, 0);
            assert_eq!(r.fitness, WORST_FITNESS);
        }
        assert!(result.all_results[0].metrics.total_trades > 0);
    }

    #[test]
    fn test_cancellation_stops_between_combinations() {
        let progress = Arc::new(OptimizeProgress::new());
        let optimizer = DeepOptimizer::with_progress(Arc::clone(&progress));
        let observer = Arc::clone(&progress);
        let grid = ParameterGrid::new().add("period", [2usize, 3, 4, 5, 6, 7]);

        let result = optimizer
            .optimize(
                move || {
                    if observer.completed.load(Ordering::Relaxed) >= 1 {
                        observer.cancel();
                    }
                    cadence()
                },
                &wave(100),
                &grid,
                &single_worker(),
            )
            .unwrap();

        assert!(result.combinations_tested < 6);
        assert_eq!(progress.status(), OptimizeStatus::Cancelled);
    }

    #[test]
    fn test_fitness_formula() {
        let metrics = PerformanceMetrics {
            total_trades: 10,
            total_return_pct: 20.0,
            win_rate: 60.0,
            profit_factor: 2.5,
            max_drawdown_pct: 5.0,
            ..Default::default()
        };
        assert!((fitness(&metrics, 10.0) - 20.0 * 0.6 * 2.5 / 5.0).abs() < 1e-12);

        let capped = PerformanceMetrics {
            profit_factor: 999.99,
            max_drawdown_pct: 0.2,
            ..metrics.clone()
        };
        // Drawdown floored at 1 and profit factor capped
        assert!((fitness(&capped, 10.0) - 20.0 * 0.6 * 10.0).abs() < 1e-9);

        let losing = PerformanceMetrics {
            total_return_pct: -15.0,
            ..metrics.clone()
        };
        assert_eq!(fitness(&losing, 10.0), 0.0);
        assert_eq!(fitness(&PerformanceMetrics::default(), 10.0), WORST_FITNESS);
    }

    #[test]
    fn test_default_grids_optimize() {
        let candles = wave(300);
        let id = StrategyId::BuyAndHold;
        let result = DeepOptimizer::new()
            .optimize(|| id.build(), &candles, &id.default_grid(), &single_worker())
            .unwrap();
        assert_eq!(result.combinations_total, id.default_grid().len());
    }
}
