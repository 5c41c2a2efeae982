use crate::error::Result;
use crate::portfolio::VirtualPortfolio;
use crate::types::{Candle, Signal, StrategyParameters};

use super::{exit_signal, HoldTimer, Strategy};

/// Buys on the first candle and holds. With `max_holding_candles` set, sells
/// once that many candles have passed and stays out. With shorting enabled
/// every expiry flips the position instead.
#[derive(Debug, Clone, Default)]
pub struct BuyAndHold {
    timer: HoldTimer,
    entered: bool,
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "Buy & Hold"
    }

    fn description(&self) -> &str {
        "Benchmark: buy once at the start and hold"
    }

    fn initialize(&mut self, params: &StrategyParameters) -> Result<()> {
        self.timer = HoldTimer::new(params.get_usize("max_holding_candles", 0)?);
        self.entered = false;
        Ok(())
    }

    fn warmup_period(&self) -> usize {
        0
    }

    fn on_candle(
        &mut self,
        _candle: &Candle,
        portfolio: &VirtualPortfolio,
        _history: &[Candle],
    ) -> Signal {
        if self.timer.tick(portfolio) {
            if let Some(position) = portfolio.position() {
                return exit_signal(position);
            }
        }
        if !self.entered && portfolio.is_flat() {
            self.entered = true;
            return Signal::Buy;
        }
        Signal::Hold
    }
}
