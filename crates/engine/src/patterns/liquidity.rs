//! Swing points and the liquidity resting beyond them

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::Candle;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Candles on each side a swing must exceed
    pub lookback: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self { lookback: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub index: usize,
    pub price: Decimal,
    pub is_high: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityZone {
    /// Index of the swing candle
    pub index: usize,
    pub price: Decimal,
    pub is_high: bool,
    pub swept: bool,
    pub swept_at: Option<usize>,
}

/// Strict local highs and lows over `± lookback` candles, ordered by index.
///
/// Candles closer than `lookback` to either edge cannot be confirmed and are
/// never reported.
pub fn detect_swing_points(candles: &[Candle], config: &SwingConfig) -> Vec<SwingPoint> {
    let lb = config.lookback.max(1);
    if candles.len() < 2 * lb + 1 {
        return Vec::new();
    }

    let mut swings = Vec::new();
    for i in lb..candles.len() - lb {
        let neighbours = || (i - lb..=i + lb).filter(move |&j| j != i);
        let c = &candles[i];

        if neighbours().all(|j| candles[j].high < c.high) {
            swings.push(SwingPoint {
                index: i,
                price: c.high,
                is_high: true,
            });
        }
        if neighbours().all(|j| candles[j].low > c.low) {
            swings.push(SwingPoint {
                index: i,
                price: c.low,
                is_high: false,
            });
        }
    }
    swings
}

/// Liquidity zones at every swing point, with sweep status.
///
/// A high zone is swept by the first later candle whose high exceeds it, a
/// low zone by the first later candle whose low undercuts it.
pub fn detect_liquidity_zones(candles: &[Candle], config: &SwingConfig) -> Vec<LiquidityZone> {
    let mut zones: Vec<LiquidityZone> = detect_swing_points(candles, config)
        .into_iter()
        .map(|s| LiquidityZone {
            index: s.index,
            price: s.price,
            is_high: s.is_high,
            swept: false,
            swept_at: None,
        })
        .collect();
    update_sweep_status(&mut zones, candles);
    zones
}

/// Mark zones pierced by later candles. Already-swept zones are left untouched.
pub fn update_sweep_status(zones: &mut [LiquidityZone], candles: &[Candle]) {
    for zone in zones.iter_mut().filter(|z| !z.swept) {
        let first = zone.index + 1;
        if first >= candles.len() {
            continue;
        }
        let pierced = candles[first..].iter().position(|c| {
            if zone.is_high {
                c.high > zone.price
            } else {
                c.low < zone.price
            }
        });
        if let Some(offset) = pierced {
            zone.swept = true;
            zone.swept_at = Some(first + offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::{from_closes, ohlc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_swing_high_and_low() {
        let candles = from_closes(&[10.0, 11.0, 12.0, 15.0, 12.0, 11.0, 8.0, 11.0, 12.0]);
        let swings = detect_swing_points(&candles, &SwingConfig { lookback: 2 });

        assert!(swings.iter().any(|s| s.is_high && s.index == 3));
        assert!(swings.iter().any(|s| !s.is_high && s.index == 6));
        assert!(swings.windows(2).all(|w| w[0].index <= w[1].index));
    }

    #[test]
    fn test_too_short_for_lookback() {
        let candles = from_closes(&[1.0, 2.0, 3.0]);
        assert!(detect_swing_points(&candles, &SwingConfig { lookback: 2 }).is_empty());
    }

    #[test]
    fn test_sweep_records_first_piercing_candle() {
        let mut candles = from_closes(&[10.0, 11.0, 12.0, 15.0, 12.0, 11.0, 8.0, 11.0, 12.0]);
        candles.push(ohlc(9, dec!(12), dec!(14), dec!(11), dec!(13)));
        candles.push(ohlc(10, dec!(13), dec!(16), dec!(12), dec!(14)));
        candles.push(ohlc(11, dec!(14), dec!(17), dec!(13), dec!(16)));

        let zones = detect_liquidity_zones(&candles, &SwingConfig { lookback: 2 });
        let high = zones.iter().find(|z| z.is_high && z.index == 3).unwrap();
        assert!(high.swept);
        assert_eq!(high.swept_at, Some(10));

        let low = zones.iter().find(|z| !z.is_high && z.index == 6).unwrap();
        assert!(!low.swept);
    }

    #[test]
    fn test_sweep_never_reverts() {
        let candles = from_closes(&[10.0, 11.0, 12.0, 15.0, 12.0, 11.0, 16.0, 11.0, 12.0]);
        let mut zones = detect_liquidity_zones(&candles, &SwingConfig { lookback: 2 });
        let swept_before: Vec<bool> = zones.iter().map(|z| z.swept).collect();

        update_sweep_status(&mut zones, &candles[..5]);
        let swept_after: Vec<bool> = zones.iter().map(|z| z.swept).collect();
        assert_eq!(swept_before, swept_after);
    }
}
