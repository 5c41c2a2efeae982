//! Fair value gap detection
//!
//! A bullish gap exists at candle `i` when `candles[i-1].high < candles[i+1].low`:
//! the zone between those two prices was never traded. Bearish gaps mirror this.
//! A gap is filled once a later candle trades back into the zone.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::types::{f64_to_decimal, Candle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FvgConfig {
    /// Minimum gap height as a percentage of the middle candle's close
    pub min_gap_pct: f64,
}

impl Default for FvgConfig {
    fn default() -> Self {
        Self { min_gap_pct: 0.1 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FairValueGap {
    /// Index of the middle (displacement) candle
    pub index: usize,
    pub top: Decimal,
    pub bottom: Decimal,
    pub bullish: bool,
    pub filled: bool,
    pub filled_at: Option<usize>,
}

impl FairValueGap {
    /// Whether `candle` trades inside the gap zone
    pub fn touched_by(&self, candle: &Candle) -> bool {
        candle.low <= self.top && candle.high >= self.bottom
    }
}

pub fn detect_fair_value_gaps(candles: &[Candle], config: &FvgConfig) -> Vec<FairValueGap> {
    if candles.len() < 3 {
        return Vec::new();
    }
    let min_pct = f64_to_decimal(config.min_gap_pct.max(0.0));
    let mut gaps = Vec::new();

    for i in 1..candles.len() - 1 {
        let prev = &candles[i - 1];
        let mid = &candles[i];
        let next = &candles[i + 1];

        let zone = if prev.high < next.low {
            Some((next.low, prev.high, true))
        } else if prev.low > next.high {
            Some((prev.low, next.high, false))
        } else {
            None
        };

        let Some((top, bottom, bullish)) = zone else {
            continue;
        };
        if mid.close <= Decimal::ZERO {
            continue;
        }
        let size_pct = (top - bottom) / mid.close * dec!(100);
        if size_pct < min_pct {
            continue;
        }

        gaps.push(FairValueGap {
            index: i,
            top,
            bottom,
            bullish,
            filled: false,
            filled_at: None,
        });
    }

    update_fill_status(&mut gaps, candles);
    gaps
}

/// Mark gaps filled by any candle after the one that completed them.
/// Already-filled gaps are left untouched.
pub fn update_fill_status(gaps: &mut [FairValueGap], candles: &[Candle]) {
    for gap in gaps.iter_mut().filter(|g| !g.filled) {
        let first = gap.index + 2;
        if first >= candles.len() {
            continue;
        }
        if let Some(offset) = candles[first..].iter().position(|c| gap.touched_by(c)) {
            gap.filled = true;
            gap.filled_at = Some(first + offset);
        }
    }
}
