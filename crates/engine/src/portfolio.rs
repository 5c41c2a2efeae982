//! Virtual portfolio: cash, at most one open position, trade and equity log

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

use crate::fees::{calculate_fee, fill_price, OrderSide};
use crate::types::*;

const QUANTITY_DP: u32 = 10;

/// Simulated single-instrument account, mutated only by the engine
#[derive(Debug, Clone)]
pub struct VirtualPortfolio {
    initial_balance: Decimal,
    cash: Decimal,
    position: Option<Position>,
    trades: Vec<Trade>,
    snapshots: Vec<PortfolioSnapshot>,
    next_trade_id: u64,
}

impl VirtualPortfolio {
    pub fn new(initial_balance: Decimal) -> Self {
        Self {
            initial_balance,
            cash: initial_balance,
            position: None,
            trades: Vec::new(),
            snapshots: Vec::new(),
            next_trade_id: 1,
        }
    }

    pub fn initial_balance(&self) -> Decimal {
        self.initial_balance
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn is_flat(&self) -> bool {
        self.position.is_none()
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    pub fn snapshots(&self) -> &[PortfolioSnapshot] {
        &self.snapshots
    }

    /// Mark-to-market value of the open position at `price`
    pub fn position_value(&self, price: Decimal) -> Decimal {
        self.position
            .as_ref()
            .map(|p| p.market_value(price))
            .unwrap_or(Decimal::ZERO)
    }

    /// Cash plus the open position marked at `price`
    pub fn total_value(&self, price: Decimal) -> Decimal {
        self.cash + self.position_value(price)
    }

    /// Apply a strategy signal at the candle close.
    ///
    /// Returns the trade closed by this signal, if any. Buy while long and
    /// Sell while short are ignored; Sell while flat only opens a short when
    /// `config.allow_short` is set.
    pub fn apply(
        &mut self,
        signal: Signal,
        candle: &Candle,
        config: &BacktestConfig,
    ) -> Option<Trade> {
        let current = self.position.as_ref().map(|p| p.side);

        match (signal, current) {
            (Signal::Hold, _) => None,
            (Signal::Buy, None) => {
                self.open(TradeSide::Long, candle, config);
                None
            }
            (Signal::Buy, Some(TradeSide::Long)) => None,
            (Signal::Buy, Some(TradeSide::Short)) => {
                let trade = self.close(candle, config, ExitReason::Signal);
                self.open(TradeSide::Long, candle, config);
                trade
            }
            (Signal::Sell, Some(TradeSide::Long)) => {
                let trade = self.close(candle, config, ExitReason::Signal);
                if config.allow_short {
                    self.open(TradeSide::Short, candle, config);
                }
                trade
            }
            (Signal::Sell, None) => {
                if config.allow_short {
                    self.open(TradeSide::Short, candle, config);
                }
                None
            }
            (Signal::Sell, Some(TradeSide::Short)) => None,
        }
    }

    /// Close the open position regardless of signal (stop-loss exits)
    pub fn force_close(
        &mut self,
        candle: &Candle,
        config: &BacktestConfig,
        reason: ExitReason,
    ) -> Option<Trade> {
        self.close(candle, config, reason)
    }

    /// Record one equity snapshot marked at the candle close
    pub fn snapshot(&mut self, candle: &Candle) -> &PortfolioSnapshot {
        let position_value = self.position_value(candle.close);
        self.snapshots.push(PortfolioSnapshot {
            timestamp: candle.timestamp,
            total_value: self.cash + position_value,
            cash: self.cash,
            position_value,
        });
        &self.snapshots[self.snapshots.len() - 1]
    }

    pub(crate) fn into_parts(self) -> (Option<Position>, Vec<Trade>, Vec<PortfolioSnapshot>) {
        (self.position, self.trades, self.snapshots)
    }

    /// Quantity to open at `fill` so that cost plus fee never exceeds cash.
    fn size_position(
        &self,
        fill: Decimal,
        rate: Decimal,
        candle: &Candle,
        config: &BacktestConfig,
    ) -> Decimal {
        if fill <= Decimal::ZERO || self.cash <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let desired = match config.sizing_mode {
            SizingMode::Fixed => config.position_size,
            SizingMode::PercentOfPortfolio => {
                let equity = self.total_value(candle.close);
                let budget = (equity * config.position_size).min(self.cash);
                budget * (Decimal::ONE - rate) / fill
            }
        };

        let affordable = self.cash / (fill * (Decimal::ONE + rate));
        // Truncate so that quantity * fill * (1 + rate) cannot round above cash.
        desired
            .min(affordable)
            .round_dp_with_strategy(QUANTITY_DP, RoundingStrategy::ToZero)
            .max(Decimal::ZERO)
    }

    fn open(&mut self, side: TradeSide, candle: &Candle, config: &BacktestConfig) {
        let order_side = match side {
            TradeSide::Long => OrderSide::Buy,
            TradeSide::Short => OrderSide::Sell,
        };
        let rate = config.taker_fee_rate;
        let fill = fill_price(candle.close, order_side, config.slippage_rate);
        let quantity = self.size_position(fill, rate, candle, config);

        if quantity <= Decimal::ZERO {
            debug!(time = candle.timestamp, cash = %self.cash, "Skipped entry: nothing affordable");
            return;
        }

        let fee = calculate_fee(quantity, fill, rate);
        // Shorts post their entry notional as collateral, so cash moves the same way.
        self.cash -= quantity * fill + fee;

        debug!(
            side = ?side,
            price = %fill,
            quantity = %quantity,
            fee = %fee,
            time = candle.timestamp,
            "Opened position"
        );

        self.position = Some(Position {
            side,
            entry_time: candle.timestamp,
            entry_price: fill,
            quantity,
            entry_fee: fee,
        });
    }

    fn close(
        &mut self,
        candle: &Candle,
        config: &BacktestConfig,
        reason: ExitReason,
    ) -> Option<Trade> {
        let pos = self.position.take()?;
        let rate = config.taker_fee_rate;

        let (exit_price, value) = match pos.side {
            TradeSide::Long => {
                let exit = fill_price(candle.close, OrderSide::Sell, config.slippage_rate);
                (exit, pos.quantity * exit)
            }
            TradeSide::Short => {
                let exit = fill_price(candle.close, OrderSide::Buy, config.slippage_rate);
                let value = (pos.quantity * (pos.entry_price * dec!(2) - exit)).max(Decimal::ZERO);
                (exit, value)
            }
        };

        let exit_fee = calculate_fee(pos.quantity, exit_price, rate).min(value);
        self.cash += value - exit_fee;

        let cost = pos.quantity * pos.entry_price;
        let pnl = value - exit_fee - cost - pos.entry_fee;
        let pnl_pct = if cost > Decimal::ZERO {
            pnl / cost * dec!(100)
        } else {
            Decimal::ZERO
        };

        let trade = Trade {
            id: self.next_trade_id,
            side: pos.side,
            entry_time: pos.entry_time,
            exit_time: candle.timestamp,
            entry_price: pos.entry_price,
            exit_price,
            quantity: pos.quantity,
            pnl,
            pnl_pct,
            fees: pos.entry_fee + exit_fee,
            exit_reason: reason,
        };
        self.next_trade_id += 1;

        debug!(
            id = trade.id,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            pnl = %trade.pnl,
            reason = ?reason,
            "Closed position"
        );

        self.trades.push(trade.clone());
        Some(trade)
    }
}
