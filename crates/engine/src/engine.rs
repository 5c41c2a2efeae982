//! Bar-by-bar backtesting engine

use rust_decimal::Decimal;
use tracing::{debug, info};

use crate::error::Result;
use crate::metrics::calculate_metrics;
use crate::portfolio::VirtualPortfolio;
use crate::strategy::Strategy;
use crate::types::*;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Backtesting engine that simulates bar-by-bar execution
pub struct BacktestEngine;

impl BacktestEngine {
    /// Run `strategy` over `candles` starting from `initial_balance`.
    ///
    /// The strategy must already be initialized. Candles before the strategy's
    /// warm-up period are visible in history but produce no signal and no
    /// equity snapshot. A position still open at the end is marked to market
    /// and reported in `open_position`, not closed into a trade.
    pub fn run(
        strategy: &mut dyn Strategy,
        candles: &[Candle],
        initial_balance: Decimal,
        config: &BacktestConfig,
    ) -> Result<BacktestResult> {
        config.validate()?;

        let mut portfolio = VirtualPortfolio::new(initial_balance);
        let warmup = strategy.warmup_period().min(candles.len());
        let symbol = candles.first().map(|c| c.symbol.clone()).unwrap_or_default();

        info!(
            strategy = strategy.name(),
            symbol = %symbol,
            candles = candles.len(),
            warmup,
            balance = %initial_balance,
            "Starting backtest"
        );

        for i in warmup..candles.len() {
            let candle = &candles[i];

            if let Some(max_loss) = config.max_loss_per_trade_pct {
                let breached = portfolio
                    .position()
                    .map(|p| p.unrealized_pct(candle.close) <= -max_loss)
                    .unwrap_or(false);
                if breached {
                    debug!(time = candle.timestamp, max_loss, "Per-trade stop triggered");
                    portfolio.force_close(candle, config, ExitReason::StopLoss);
                }
            }

            let signal = strategy.on_candle(candle, &portfolio, &candles[..=i]);
            portfolio.apply(signal, candle, config);
            portfolio.snapshot(candle);
        }

        let final_balance = portfolio
            .snapshots()
            .last()
            .map(|s| s.total_value)
            .unwrap_or(initial_balance);
        let (open_position, trades, equity_curve) = portfolio.into_parts();

        let start_time = candles.first().map(|c| c.timestamp).unwrap_or(0);
        let end_time = candles.last().map(|c| c.timestamp).unwrap_or(0);
        let period_days = (end_time - start_time) as f64 / MS_PER_DAY;

        let metrics = calculate_metrics(&trades, &equity_curve, initial_balance, period_days);

        info!(
            strategy = strategy.name(),
            total_trades = metrics.total_trades,
            win_rate = metrics.win_rate,
            return_pct = metrics.total_return_pct,
            max_drawdown_pct = metrics.max_drawdown_pct,
            final_balance = %final_balance,
            "Backtest complete"
        );

        Ok(BacktestResult {
            strategy_name: strategy.name().to_string(),
            symbol,
            timeframe: infer_timeframe(candles),
            start_time,
            end_time,
            initial_balance,
            final_balance,
            metrics,
            trades,
            equity_curve,
            open_position,
            config: config.clone(),
        })
    }

    /// `run` with the starting balance taken from `config`
    pub fn evaluate(
        strategy: &mut dyn Strategy,
        candles: &[Candle],
        config: &BacktestConfig,
    ) -> Result<BacktestResult> {
        Self::run(strategy, candles, config.initial_balance, config)
    }
}

/// Label for the median spacing between candles, e.g. "15m" or "1d"
pub fn infer_timeframe(candles: &[Candle]) -> String {
    let mut gaps: Vec<i64> = candles
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|g| *g > 0)
        .collect();
    if gaps.is_empty() {
        return "unknown".to_string();
    }
    gaps.sort_unstable();
    let median_secs = gaps[gaps.len() / 2] / 1000;

    const UNITS: [(i64, &str); 4] = [(604_800, "w"), (86_400, "d"), (3_600, "h"), (60, "m")];
    for (size, suffix) in UNITS {
        if median_secs >= size && median_secs % size == 0 {
            return format!("{}{}", median_secs / size, suffix);
        }
    }
    format!("{median_secs}s")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{BuyAndHold, TrendFollowing};
    use rust_decimal_macros::dec;

    fn make_candles(prices: &[f64]) -> Vec<Candle> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| {
                let price = f64_to_decimal(p).round_dp(4);
                Candle {
                    timestamp: (i as i64) * 3_600_000,
                    open: price,
                    high: price + dec!(1),
                    low: price - dec!(1),
                    close: price,
                    volume: dec!(100),
                    symbol: "BTCUSDT".to_string(),
                    exchange: "sim".to_string(),
                }
            })
            .collect()
    }

    fn wave(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + 20.0 * ((i as f64) / 15.0).sin() + (i as f64) * 0.05)
            .collect()
    }

    /// Signals from a fixed script, indexed by candle position
    struct Scripted {
        signals: Vec<Signal>,
        warmup: usize,
        seen_lengths: Vec<usize>,
    }

    impl Strategy for Scripted {
        fn name(&self) -> &str {
            "Scripted"
        }

        fn description(&self) -> &str {
            "replays a fixed signal list"
        }

        fn initialize(&mut self, _params: &StrategyParameters) -> Result<()> {
            Ok(())
        }

        fn warmup_period(&self) -> usize {
            self.warmup
        }

        fn on_candle(
            &mut self,
            _candle: &Candle,
            _portfolio: &VirtualPortfolio,
            history: &[Candle],
        ) -> Signal {
            self.seen_lengths.push(history.len());
            self.signals
                .get(history.len() - 1)
                .copied()
                .unwrap_or(Signal::Hold)
        }
    }

    #[test]
    fn test_empty_candles() {
        let mut strategy = BuyAndHold::default();
        let result =
            BacktestEngine::evaluate(&mut strategy, &[], &BacktestConfig::default()).unwrap();
        assert_eq!(result.metrics.total_trades, 0);
        assert_eq!(result.final_balance, dec!(10000));
        assert!(result.equity_curve.is_empty());
    }

    #[test]
    fn test_equity_curve_matches_processed_candles() {
        let candles = make_candles(&wave(120));
        let mut strategy = Scripted {
            signals: vec![],
            warmup: 20,
            seen_lengths: vec![],
        };
        let result =
            BacktestEngine::evaluate(&mut strategy, &candles, &BacktestConfig::default()).unwrap();

        assert_eq!(result.equity_curve.len(), 100);
        assert!(result
            .equity_curve
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_history_is_growing_prefix() {
        let candles = make_candles(&wave(30));
        let mut strategy = Scripted {
            signals: vec![],
            warmup: 5,
            seen_lengths: vec![],
        };
        BacktestEngine::evaluate(&mut strategy, &candles, &BacktestConfig::default()).unwrap();

        let expected: Vec<usize> = (6..=30).collect();
        assert_eq!(strategy.seen_lengths, expected);
    }

    #[test]
    fn test_open_position_not_counted_as_trade() {
        let candles = make_candles(&wave(50));
        let mut strategy = BuyAndHold::default();
        let result =
            BacktestEngine::evaluate(&mut strategy, &candles, &BacktestConfig::default()).unwrap();

        assert_eq!(result.metrics.total_trades, 0);
        assert!(result.trades.is_empty());
        let open = result.open_position.as_ref().unwrap();
        let last = result.equity_curve.last().unwrap();
        assert_eq!(last.position_value, open.market_value(candles[49].close));
        assert_eq!(result.final_balance, last.cash + last.position_value);
    }

    #[test]
    fn test_snapshots_balance_and_pnl_reconciles() {
        let candles = make_candles(&wave(300));
        let mut strategy = TrendFollowing::default();
        strategy
            .initialize(
                &StrategyParameters::new()
                    .with("fast_period", 5usize)
                    .with("slow_period", 20usize),
            )
            .unwrap();
        let config = BacktestConfig::default();
        let result = BacktestEngine::evaluate(&mut strategy, &candles, &config).unwrap();

        for snap in &result.equity_curve {
            assert_eq!(snap.total_value, snap.cash + snap.position_value);
            assert!(snap.cash >= Decimal::ZERO);
        }

        let realized: Decimal = result.trades.iter().map(|t| t.pnl).sum();
        let last = result.equity_curve.last().unwrap();
        let open_cost = result
            .open_position
            .as_ref()
            .map(|p| p.quantity * p.entry_price + p.entry_fee)
            .unwrap_or(Decimal::ZERO);
        // cash = initial + realized - cost of the still-open position
        assert_eq!(last.cash, result.initial_balance + realized - open_cost);
        assert!(result.metrics.total_trades > 0);
    }

    #[test]
    fn test_per_trade_stop_loss() {
        let mut prices = vec![100.0; 5];
        prices.extend([95.0, 80.0, 79.0, 78.0]);
        let candles = make_candles(&prices);
        let mut signals = vec![Signal::Hold; 9];
        signals[2] = Signal::Buy;
        let mut strategy = Scripted {
            signals,
            warmup: 0,
            seen_lengths: vec![],
        };
        let config = BacktestConfig {
            max_loss_per_trade_pct: Some(10.0),
            ..Default::default()
        };
        let result = BacktestEngine::evaluate(&mut strategy, &candles, &config).unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].exit_reason, ExitReason::StopLoss);
        assert_eq!(result.trades[0].exit_time, candles[6].timestamp);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let candles = make_candles(&wave(10));
        let config = BacktestConfig {
            position_size: Decimal::ZERO,
            ..Default::default()
        };
        let mut strategy = BuyAndHold::default();
        assert!(BacktestEngine::evaluate(&mut strategy, &candles, &config).is_err());
    }

    #[test]
    fn test_infer_timeframe() {
        let candles = make_candles(&wave(5));
        assert_eq!(infer_timeframe(&candles), "1h");
        assert_eq!(infer_timeframe(&candles[..1]), "unknown");
    }
}
