use tracing::debug;

use crate::error::{EngineError, Result};
use crate::patterns::{BreakType, OrderBlockConfig, SmartMoneyConfig, SwingConfig};
use crate::portfolio::VirtualPortfolio;
use crate::types::{Candle, Signal, StrategyParameters};

use super::{exit_signal, is_confirmed, Bracket, HoldTimer, Strategy, StructureFeed};

#[derive(Debug, Clone)]
struct ObChochParams {
    displacement_multiplier: f64,
    body_lookback: usize,
    swing_lookback: usize,
    ob_window: usize,
    recompute_interval: usize,
    analysis_window: usize,
    confirmation_candles: usize,
    max_holding_candles: usize,
    bracket: Bracket,
}

impl Default for ObChochParams {
    fn default() -> Self {
        Self {
            displacement_multiplier: 2.0,
            body_lookback: 10,
            swing_lookback: 5,
            ob_window: 30,
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

impl ObChochParams {
    fn from_params(params: &StrategyParameters) -> Result<Self> {
        let d = Self::default();
        let p = Self {
            displacement_multiplier: params
                .get_f64("displacement_multiplier", d.displacement_multiplier)?,
            body_lookback: params.get_usize("body_lookback", d.body_lookback)?,
            swing_lookback: params.get_usize("swing_lookback", d.swing_lookback)?,
            ob_window: params.get_usize("ob_window", d.ob_window)?,
            recompute_interval: params.get_usize("recompute_interval", d.recompute_interval)?,
            analysis_window: params.get_usize("analysis_window", d.analysis_window)?,
            confirmation_candles: params
                .get_usize("confirmation_candles", d.confirmation_candles)?,
            max_holding_candles: params.get_usize("max_holding_candles", d.max_holding_candles)?,
            bracket: Bracket::from_params(params)?,
        };
        super::positive("displacement_multiplier", p.displacement_multiplier)?;
        for (name, value) in [
            ("body_lookback", p.body_lookback),
            ("swing_lookback", p.swing_lookback),
            ("ob_window", p.ob_window),
            ("recompute_interval", p.recompute_interval),
        ] {
            if value == 0 {
                return Err(EngineError::InvalidParameter {
                    name: name.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
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
        (2 * self.swing_lookback + 3).max(self.body_lookback + 1)
    }

    fn feed(&self) -> StructureFeed {
        let config = SmartMoneyConfig {
            swing: SwingConfig {
                lookback: self.swing_lookback,
            },
            order_block: OrderBlockConfig {
                displacement_multiplier: self.displacement_multiplier,
                body_lookback: self.body_lookback,
                ..Default::default()
            },
            ..Default::default()
        };
        StructureFeed::new(config, self.analysis_window, self.recompute_interval)
    }
}

/// Long entries on the first retracement into a bullish order block that
/// preceded a bullish change of character.
///
/// The CHOCH must be the latest confirmed structure break, and each CHOCH is
/// traded at most once.
#[derive(Debug, Clone)]
pub struct OrderBlockChoch {
    params: ObChochParams,
    feed: StructureFeed,
    timer: HoldTimer,
    traded_choch: Option<usize>,
}

impl Default for OrderBlockChoch {
    fn default() -> Self {
        let params = ObChochParams::default();
        Self {
            feed: params.feed(),
            timer: HoldTimer::new(params.max_holding_candles),
            traded_choch: None,
            params,
        }
    }
}

impl OrderBlockChoch {
    /// `(choch index, order block index)` when the current candle is a valid
    /// retracement entry
    fn setup(&self, candle: &Candle, now: usize) -> Option<(usize, usize)> {
        let snapshot = self.feed.snapshot();
        let confirmation = self.params.confirmation_candles;

        let last_break = snapshot
            .structure
            .breaks
            .iter()
            .rev()
            .find(|b| is_confirmed(b.index, confirmation, now))?;
        if last_break.kind != BreakType::BullishChoch || self.traded_choch == Some(last_break.index)
        {
            return None;
        }
        let choch = last_break.index;

        let block = snapshot
            .order_blocks
            .iter()
            .filter(|b| b.bullish && b.index < choch && b.index + self.params.ob_window >= choch)
            .max_by_key(|b| b.index)?;

        let retraced = candle.low <= block.top && candle.close >= block.bottom;
        retraced.then_some((choch, block.index))
    }
}

impl Strategy for OrderBlockChoch {
    fn name(&self) -> &str {
        "Order Block CHOCH"
    }

    fn description(&self) -> &str {
        "Buy the retracement into the order block behind a bullish change of character"
    }

    fn initialize(&mut self, params: &StrategyParameters) -> Result<()> {
        self.params = ObChochParams::from_params(params)?;
        self.feed = self.params.feed();
        self.timer = HoldTimer::new(self.params.max_holding_candles);
        self.traded_choch = None;
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
        let now = history.len().saturating_sub(1);

        if let Some(position) = portfolio.position() {
            return if expired || self.params.bracket.hit(position, candle.close) {
                exit_signal(position)
            } else {
                Signal::Hold
            };
        }

        match self.setup(candle, now) {
            Some((choch, block)) => {
                debug!(choch, block, close = %candle.close, "order block retrace entry");
                self.traded_choch = Some(choch);
                Signal::Buy
            }
            None => Signal::Hold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::{from_closes, ohlc};
    use crate::strategy::test_support::run;
    use rust_decimal_macros::dec;

    /// Two bearish breaks, a bearish order block candle at 16, displacement
    /// at 17 closing through the swing high at 14 (bullish CHOCH).
    fn reversal() -> Vec<Candle> {
        let mut candles = from_closes(&[
            110.0, 109.0, 108.0, 109.0, 110.0, 108.0, 106.0, 105.0, 106.0, 107.0, 105.0, 103.0,
            102.0, 103.0, 104.0, 103.0,
        ]);
        candles.push(ohlc(16, dec!(103.5), dec!(104), dec!(102), dec!(102.5)));
        candles.push(ohlc(17, dec!(102.5), dec!(109), dec!(102.4), dec!(108.5)));
        for (i, close) in [(18, dec!(109)), (19, dec!(108)), (20, dec!(106))] {
            candles.push(ohlc(i, close, close + dec!(0.5), close - dec!(0.5), close));
        }
        candles
    }

    fn params() -> StrategyParameters {
        StrategyParameters::new()
            .with("swing_lookback", 2usize)
            .with("recompute_interval", 1usize)
    }

    fn retrace(i: usize) -> Candle {
        ohlc(i, dec!(105), dec!(105.5), dec!(103.5), dec!(104))
    }

    #[test]
    fn test_retrace_entry_and_take_profit() {
        let mut candles = reversal();
        candles.push(retrace(21));
        candles.push(ohlc(22, dec!(106), dec!(106.5), dec!(105.5), dec!(106)));
        candles.push(ohlc(23, dec!(108.5), dec!(109), dec!(108), dec!(108.5)));

        let mut strategy = OrderBlockChoch::default();
        let result = run(&mut strategy, &params(), &candles);

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.trades[0].entry_time, candles[21].timestamp);
        assert_eq!(result.trades[0].exit_time, candles[23].timestamp);
        assert!(result.trades[0].pnl > dec!(0));
    }

    #[test]
    fn test_each_choch_traded_once() {
        let mut candles = reversal();
        candles.push(retrace(21));
        candles.push(ohlc(22, dec!(106), dec!(106.5), dec!(105.5), dec!(106)));
        candles.push(ohlc(23, dec!(108.5), dec!(109), dec!(108), dec!(108.5)));
        candles.push(retrace(24));

        let mut strategy = OrderBlockChoch::default();
        let result = run(&mut strategy, &params(), &candles);

        assert_eq!(result.trades.len(), 1);
        assert!(result.open_position.is_none());
    }

    #[test]
    fn test_no_entry_without_retrace() {
        let mut candles = reversal();
        candles.push(ohlc(21, dec!(107), dec!(107.5), dec!(106.5), dec!(107)));

        let mut strategy = OrderBlockChoch::default();
        let result = run(&mut strategy, &params(), &candles);
        assert!(result.trades.is_empty());
        assert!(result.open_position.is_none());
    }

    #[test]
    fn test_warmup_covers_body_lookback() {
        let mut strategy = OrderBlockChoch::default();
        strategy
            .initialize(&params().with("body_lookback", 20usize))
            .unwrap();
        assert_eq!(strategy.warmup_period(), 21);
        assert!(strategy
            .initialize(&StrategyParameters::new().with("ob_window", 0usize))
            .is_err());
    }
}
