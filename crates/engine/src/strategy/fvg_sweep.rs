use tracing::debug;

use crate::error::{EngineError, Result};
use crate::patterns::{FvgConfig, SmartMoneyConfig, SwingConfig};
use crate::portfolio::VirtualPortfolio;
use crate::types::{Candle, Signal, StrategyParameters};

use super::{exit_signal, is_confirmed, Bracket, HoldTimer, Strategy, StructureFeed};

#[derive(Debug, Clone)]
struct FvgSweepParams {
    min_gap_pct: f64,
    swing_lookback: usize,
    sweep_window: usize,
    recompute_interval: usize,
    analysis_window: usize,
    confirmation_candles: usize,
    max_holding_candles: usize,
    bracket: Bracket,
}

impl Default for FvgSweepParams {
    fn default() -> Self {
        Self {
            min_gap_pct: 0.1,
            swing_lookback: 5,
            sweep_window: 20,
            recompute_interval: 10,
            analysis_window: 300,
            confirmation_candles: 1,
            max_holding_candles: 48,
            bracket: Bracket {
                take_profit_pct: 4.0,
                stop_loss_pct: 2.0,
            },
        }
    }
}

impl FvgSweepParams {
    fn from_params(params: &StrategyParameters) -> Result<Self> {
        let d = Self::default();
        let p = Self {
            min_gap_pct: params.get_f64("min_gap_pct", d.min_gap_pct)?,
            swing_lookback: params.get_usize("swing_lookback", d.swing_lookback)?,
            sweep_window: params.get_usize("sweep_window", d.sweep_window)?,
            recompute_interval: params.get_usize("recompute_interval", d.recompute_interval)?,
            analysis_window: params.get_usize("analysis_window", d.analysis_window)?,
            confirmation_candles: params
                .get_usize("confirmation_candles", d.confirmation_candles)?,
            max_holding_candles: params.get_usize("max_holding_candles", d.max_holding_candles)?,
            bracket: Bracket::from_params(params)?,
        };
        if p.min_gap_pct < 0.0 {
            return Err(EngineError::InvalidParameter {
                name: "min_gap_pct".to_string(),
                reason: "must not be negative".to_string(),
            });
        }
        if p.swing_lookback == 0 || p.recompute_interval == 0 {
            return Err(EngineError::InvalidParameter {
                name: "swing_lookback".to_string(),
                reason: "swing_lookback and recompute_interval must be at least 1".to_string(),
            });
        }
        if p.analysis_window < p.warmup() {
            return Err(EngineError::InvalidParameter {
                name: "analysis_window".to_string(),
                reason: format!("must cover at least {} candles", p.warmup()),
            });
        }
        Ok(p)
    }

    fn warmup(&self) -> usize {
        2 * self.swing_lookback + 3
    }

    fn feed(&self) -> StructureFeed {
        let config = SmartMoneyConfig {
            fvg: FvgConfig {
                min_gap_pct: self.min_gap_pct,
            },
            swing: SwingConfig {
                lookback: self.swing_lookback,
            },
            ..Default::default()
        };
        StructureFeed::new(config, self.analysis_window, self.recompute_interval)
    }
}

/// Long entries on a retrace into a bullish fair value gap that formed
/// shortly after sell-side liquidity below a swing low was swept.
///
/// Exits on the take-profit/stop-loss bracket or the maximum holding time.
#[derive(Debug, Clone)]
pub struct FvgSweep {
    params: FvgSweepParams,
    feed: StructureFeed,
    timer: HoldTimer,
}

impl Default for FvgSweep {
    fn default() -> Self {
        let params = FvgSweepParams::default();
        Self {
            feed: params.feed(),
            timer: HoldTimer::new(params.max_holding_candles),
            params,
        }
    }
}

impl FvgSweep {
    /// Index of the gap the current candle enters, if any qualifies
    fn entry_gap(&self, candle: &Candle, history: &[Candle]) -> Option<usize> {
        let now = history.len().saturating_sub(1);
        let snapshot = self.feed.snapshot();
        let since = self.feed.computed_at();

        let sweeps: Vec<usize> = snapshot
            .liquidity_zones
            .iter()
            .filter(|z| !z.is_high && z.swept)
            .filter_map(|z| z.swept_at)
            .collect();

        snapshot
            .fair_value_gaps
            .iter()
            .rev()
            .filter(|g| g.bullish && !g.filled)
            .filter(|g| is_confirmed(g.index + 1, self.params.confirmation_candles, now))
            .filter(|g| {
                // Candles closed after the snapshot may already have filled it
                let first = (g.index + 2).max(since);
                history
                    .get(first..now)
                    .map_or(true, |closed| !closed.iter().any(|c| g.touched_by(c)))
            })
            .filter(|g| {
                sweeps
                    .iter()
                    .any(|&s| s <= g.index && s + self.params.sweep_window >= g.index)
            })
            .find(|g| g.touched_by(candle) && candle.close >= g.bottom)
            .map(|g| g.index)
    }
}

impl Strategy for FvgSweep {
    fn name(&self) -> &str {
        "FVG Liquidity Sweep"
    }

    fn description(&self) -> &str {
        "Buy retracements into bullish fair value gaps that follow a swept swing low"
    }

    fn initialize(&mut self, params: &StrategyParameters) -> Result<()> {
        self.params = FvgSweepParams::from_params(params)?;
        self.feed = self.params.feed();
        self.timer = HoldTimer::new(self.params.max_holding_candles);
        Ok(())
    }

    fn warmup_period(&self) -> usize {
        self.params.warmup()
    }

    fn on_candle(
        &mut self,
        candle: &Candle,
        portfolio: &VirtualPortfolio,
        history: &[Candle],
    ) -> Signal {
        self.feed.update(history);
        let expired = self.timer.tick(portfolio);

        match portfolio.position() {
            Some(position) => {
                if expired || self.params.bracket.hit(position, candle.close) {
                    exit_signal(position)
                } else {
                    Signal::Hold
                }
            }
            None => match self.entry_gap(candle, history) {
                Some(gap) => {
                    debug!(gap, close = %candle.close, "fvg retrace entry");
                    Signal::Buy
                }
                None => Signal::Hold,
            },
        }
    }
}
