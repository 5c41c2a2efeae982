use ta::indicators::SimpleMovingAverage;
use ta::Next;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::portfolio::VirtualPortfolio;
use crate::types::{decimal_to_f64, Candle, Signal, StrategyParameters, TradeSide};

use super::{positive, HoldTimer, Strategy};

#[derive(Debug, Clone)]
struct TrendParams {
    fast_period: usize,
    slow_period: usize,
    trailing_stop_pct: f64,
    max_holding_candles: usize,
    cooldown_candles: usize,
}

impl Default for TrendParams {
    fn default() -> Self {
        Self {
            fast_period: 20,
            slow_period: 50,
            trailing_stop_pct: 5.0,
            max_holding_candles: 200,
            cooldown_candles: 5,
        }
    }
}

impl TrendParams {
    fn from_params(params: &StrategyParameters) -> Result<Self> {
        let d = Self::default();
        let p = Self {
            fast_period: params.get_usize("fast_period", d.fast_period)?,
            slow_period: params.get_usize("slow_period", d.slow_period)?,
            trailing_stop_pct: params.get_f64("trailing_stop_pct", d.trailing_stop_pct)?,
            max_holding_candles: params.get_usize("max_holding_candles", d.max_holding_candles)?,
            cooldown_candles: params.get_usize("cooldown_candles", d.cooldown_candles)?,
        };
        if p.fast_period == 0 || p.fast_period >= p.slow_period {
            return Err(EngineError::InvalidParameter {
                name: "fast_period".to_string(),
                reason: format!(
                    "must be positive and below slow_period ({} >= {})",
                    p.fast_period, p.slow_period
                ),
            });
        }
        positive("trailing_stop_pct", p.trailing_stop_pct)?;
        if p.trailing_stop_pct >= 100.0 {
            return Err(EngineError::InvalidParameter {
                name: "trailing_stop_pct".to_string(),
                reason: "must be below 100".to_string(),
            });
        }
        Ok(p)
    }
}

/// Long-only moving-average trend follower.
///
/// Enters when the fast SMA is above the slow SMA and price is above the
/// slow SMA. Exits on a trailing stop from the highest close since entry, on
/// the fast SMA dropping below the slow one, or after the maximum holding
/// time. After an exit it waits `cooldown_candles` before re-entering, so a
/// persisting trend is re-joined rather than scaled into.
#[derive(Debug, Clone)]
pub struct TrendFollowing {
    params: TrendParams,
    fast: SimpleMovingAverage,
    slow: SimpleMovingAverage,
    fast_value: f64,
    slow_value: f64,
    /// Number of history candles already fed to the averages
    fed: usize,
    peak_close: f64,
    cooldown: usize,
    timer: HoldTimer,
}

impl Default for TrendFollowing {
    fn default() -> Self {
        let params = TrendParams::default();
        Self {
            fast: sma(params.fast_period),
            slow: sma(params.slow_period),
            timer: HoldTimer::new(params.max_holding_candles),
            params,
            fast_value: 0.0,
            slow_value: 0.0,
            fed: 0,
            peak_close: 0.0,
            cooldown: 0,
        }
    }
}

fn sma(period: usize) -> SimpleMovingAverage {
    SimpleMovingAverage::new(period).unwrap_or_default()
}

impl TrendFollowing {
    fn catch_up(&mut self, history: &[Candle]) {
        if history.len() < self.fed {
            // A shorter history means a new run without initialize
            self.reset_state();
        }
        for candle in &history[self.fed..] {
            let close = decimal_to_f64(candle.close);
            self.fast_value = self.fast.next(close);
            self.slow_value = self.slow.next(close);
        }
        self.fed = history.len();
    }

    fn reset_state(&mut self) {
        self.fast = sma(self.params.fast_period);
        self.slow = sma(self.params.slow_period);
        self.fast_value = 0.0;
        self.slow_value = 0.0;
        self.fed = 0;
        self.peak_close = 0.0;
        self.cooldown = 0;
        self.timer = HoldTimer::new(self.params.max_holding_candles);
    }
}

impl Strategy for TrendFollowing {
    fn name(&self) -> &str {
        "Trend Following"
    }

    fn description(&self) -> &str {
        "SMA trend filter with trailing stop and re-entry cooldown"
    }

    fn initialize(&mut self, params: &StrategyParameters) -> Result<()> {
        self.params = TrendParams::from_params(params)?;
        self.reset_state();
        Ok(())
    }

    fn warmup_period(&self) -> usize {
        self.params.slow_period
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        portfolio: &VirtualPortfolio,
        history: &[Candle],
    ) -> Signal {
        self.catch_up(history);
        if self.fed < self.params.slow_period {
            return Signal::Hold;
        }

        let close = decimal_to_f64(candle.close);
        let expired = self.timer.tick(portfolio);
        let side = portfolio.position().map(|p| p.side);

        if side == Some(TradeSide::Short) && expired {
            // Shorts only come from exit flips, the timer still bounds them
            self.peak_close = close;
            return Signal::Buy;
        }

        if side == Some(TradeSide::Long) {
            self.peak_close = self.peak_close.max(close);
            let stop = self.peak_close * (1.0 - self.params.trailing_stop_pct / 100.0);
            let crossed_down = self.fast_value < self.slow_value;
            if expired || close <= stop || crossed_down {
                debug!(
                    close,
                    peak = self.peak_close,
                    expired,
                    crossed_down,
                    "trend exit"
                );
                self.cooldown = self.params.cooldown_candles;
                self.peak_close = 0.0;
                return Signal::Sell;
            }
            return Signal::Hold;
        }

        if self.cooldown > 0 {
            self.cooldown -= 1;
            return Signal::Hold;
        }

        if self.fast_value > self.slow_value && close > self.slow_value {
            self.peak_close = close;
            return Signal::Buy;
        }
        Signal::Hold
    }
}
