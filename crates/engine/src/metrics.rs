//! Performance statistics from a trade log and equity curve

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{decimal_to_f64, PortfolioSnapshot, Trade};

/// Profit factor reported when there are profits but no losses
pub const PROFIT_FACTOR_MAX: f64 = 999.99;

const MS_PER_YEAR: f64 = 365.0 * 86_400_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

/// Derived statistics for one backtest. Percentages are 0–100 scale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub total_pnl: Decimal,
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub max_drawdown: Decimal,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,

    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub largest_win: Decimal,
    pub largest_loss: Decimal,
    pub avg_trade_pnl: Decimal,
    pub total_fees: Decimal,
    pub max_consecutive_losses: u32,

    pub duration_days: f64,
    pub avg_holding_period_hours: f64,
}

/// Compute metrics for a finished run.
///
/// `trades` holds closed trades only. `period_days` is the span of the
/// candle series the run covered.
pub fn calculate_metrics(
    trades: &[Trade],
    equity_curve: &[PortfolioSnapshot],
    initial_balance: Decimal,
    period_days: f64,
) -> PerformanceMetrics {
    let hundred = dec!(100);
    let final_balance = equity_curve
        .last()
        .map(|s| s.total_value)
        .unwrap_or(initial_balance);

    let total_pnl = final_balance - initial_balance;
    let total_return_pct = if initial_balance > Decimal::ZERO {
        decimal_to_f64(total_pnl / initial_balance * hundred)
    } else {
        0.0
    };

    let (max_drawdown, max_drawdown_pct) = max_drawdown(equity_curve, initial_balance);

    let returns = period_returns(equity_curve);
    let periods_per_year = periods_per_year(equity_curve);
    let sharpe_ratio = sharpe(&returns, periods_per_year);
    let sortino_ratio = sortino(&returns, periods_per_year);

    // Trade statistics
    let total_trades = trades.len() as u32;
    let winning_trades = trades.iter().filter(|t| t.is_win()).count() as u32;
    // Break-even trades count as neither
    let losing_trades = trades.iter().filter(|t| t.pnl < Decimal::ZERO).count() as u32;

    let win_rate = if total_trades > 0 {
        winning_trades as f64 / total_trades as f64 * 100.0
    } else {
        0.0
    };

    let gross_profit: Decimal = trades.iter().filter(|t| t.is_win()).map(|t| t.pnl).sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.pnl < Decimal::ZERO)
        .map(|t| t.pnl.abs())
        .sum();
    let profit_factor = if gross_loss > Decimal::ZERO {
        decimal_to_f64(gross_profit / gross_loss)
    } else if gross_profit > Decimal::ZERO {
        PROFIT_FACTOR_MAX
    } else {
        0.0
    };

    let avg_win = if winning_trades > 0 {
        gross_profit / Decimal::from(winning_trades)
    } else {
        Decimal::ZERO
    };
    let avg_loss = if losing_trades > 0 {
        gross_loss / Decimal::from(losing_trades)
    } else {
        Decimal::ZERO
    };
    let largest_win = trades
        .iter()
        .map(|t| t.pnl)
        .filter(|p| *p > Decimal::ZERO)
        .max()
        .unwrap_or(Decimal::ZERO);
    let largest_loss = trades
        .iter()
        .map(|t| t.pnl)
        .filter(|p| *p < Decimal::ZERO)
        .min()
        .map(|p| p.abs())
        .unwrap_or(Decimal::ZERO);

    let realized: Decimal = trades.iter().map(|t| t.pnl).sum();
    let avg_trade_pnl = if total_trades > 0 {
        realized / Decimal::from(total_trades)
    } else {
        Decimal::ZERO
    };
    let total_fees = trades.iter().map(|t| t.fees).sum();

    let max_consecutive_losses = {
        let mut max_streak = 0u32;
        let mut current = 0u32;
        for trade in trades {
            if trade.pnl < Decimal::ZERO {
                current += 1;
                max_streak = max_streak.max(current);
            } else {
                current = 0;
            }
        }
        max_streak
    };

    let avg_holding_period_hours = if total_trades > 0 {
        let total_ms: i64 = trades.iter().map(|t| t.holding_ms()).sum();
        total_ms as f64 / total_trades as f64 / MS_PER_HOUR
    } else {
        0.0
    };

    PerformanceMetrics {
        total_pnl,
        total_return_pct,
        annualized_return_pct: annualized_return(equity_curve, initial_balance),
        max_drawdown,
        max_drawdown_pct,
        sharpe_ratio,
        sortino_ratio,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        profit_factor,
        gross_profit,
        gross_loss,
        avg_win,
        avg_loss,
        largest_win,
        largest_loss,
        avg_trade_pnl,
        total_fees,
        max_consecutive_losses,
        duration_days: period_days.max(0.0),
        avg_holding_period_hours,
    }
}

/// Largest peak-to-trough decline, absolute and as % of the running peak.
pub fn max_drawdown(equity_curve: &[PortfolioSnapshot], initial_balance: Decimal) -> (Decimal, f64) {
    let mut peak = initial_balance;
    let mut max_dd = Decimal::ZERO;
    let mut max_dd_pct = 0.0f64;

    for snap in equity_curve {
        if snap.total_value > peak {
            peak = snap.total_value;
        }
        let dd = peak - snap.total_value;
        if dd > max_dd {
            max_dd = dd;
        }
        if peak > Decimal::ZERO {
            let pct = decimal_to_f64(dd / peak * dec!(100));
            if pct > max_dd_pct {
                max_dd_pct = pct;
            }
        }
    }

    (max_dd, max_dd_pct.clamp(0.0, 100.0))
}

/// Simple returns between consecutive snapshots
fn period_returns(equity_curve: &[PortfolioSnapshot]) -> Vec<f64> {
    equity_curve
        .windows(2)
        .filter(|w| w[0].total_value > Decimal::ZERO)
        .map(|w| decimal_to_f64(w[1].total_value / w[0].total_value) - 1.0)
        .collect()
}

/// Snapshots per year implied by the median spacing of the curve
fn periods_per_year(equity_curve: &[PortfolioSnapshot]) -> f64 {
    let mut gaps: Vec<i64> = equity_curve
        .windows(2)
        .map(|w| w[1].timestamp - w[0].timestamp)
        .filter(|g| *g > 0)
        .collect();
    if gaps.is_empty() {
        return 0.0;
    }
    gaps.sort_unstable();
    MS_PER_YEAR / gaps[gaps.len() / 2] as f64
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Annualized Sharpe ratio; 0 for fewer than two returns or zero variance
pub fn sharpe(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let m = mean(returns);
    let variance =
        returns.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (returns.len() as f64 - 1.0);
    let std_dev = variance.sqrt();
    if !std_dev.is_finite() || std_dev < 1e-12 {
        return 0.0;
    }
    m / std_dev * periods_per_year.sqrt()
}

/// Annualized Sortino ratio using the deviation of negative returns only.
/// 0 when there are no losing periods.
pub fn sortino(returns: &[f64], periods_per_year: f64) -> f64 {
    if returns.len() < 2 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if negative.is_empty() {
        return 0.0;
    }
    let downside = (negative.iter().map(|r| r.powi(2)).sum::<f64>() / negative.len() as f64).sqrt();
    if downside < 1e-12 {
        return 0.0;
    }
    mean(returns) / downside * periods_per_year.sqrt()
}

/// ((1 + mean daily return)^365 - 1) × 100 from end-of-day equity (UTC days).
fn annualized_return(equity_curve: &[PortfolioSnapshot], initial_balance: Decimal) -> f64 {
    let mut day_close: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for snap in equity_curve {
        if let Some(dt) = DateTime::from_timestamp_millis(snap.timestamp) {
            day_close.insert(dt.date_naive(), snap.total_value);
        }
    }
    if day_close.is_empty() || initial_balance <= Decimal::ZERO {
        return 0.0;
    }

    let mut prev = initial_balance;
    let mut daily = Vec::with_capacity(day_close.len());
    for value in day_close.values() {
        if prev > Decimal::ZERO {
            daily.push(decimal_to_f64(*value / prev) - 1.0);
        }
        prev = *value;
    }
    if daily.is_empty() {
        return 0.0;
    }

    let annualized = ((1.0 + mean(&daily)).powf(365.0) - 1.0) * 100.0;
    if annualized.is_finite() {
        annualized.clamp(-100.0, 99_999.99)
    } else {
        99_999.99
    }
}
