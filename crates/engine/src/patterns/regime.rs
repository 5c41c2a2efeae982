//! Market regime classification (bull / bear / sideways)

use serde::{Deserialize, Serialize};
use ta::indicators::SimpleMovingAverage;
use ta::Next;

use crate::types::{decimal_to_f64, Candle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketRegime {
    Bull,
    Bear,
    Sideways,
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarketRegime::Bull => write!(f, "Bull"),
            MarketRegime::Bear => write!(f, "Bear"),
            MarketRegime::Sideways => write!(f, "Sideways"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Trailing candles used for the trend slope
    pub window: usize,
    /// Long moving average period
    pub ma_period: usize,
    /// Minimum fitted move over the window, in %, to call a trend
    pub trend_threshold_pct: f64,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            window: 90,
            ma_period: 200,
            trend_threshold_pct: 5.0,
        }
    }
}

/// Classify the regime at the end of `candles`.
///
/// Bull needs an up-sloping window and a close above the long MA; Bear the
/// mirror. Anything else, including too little data, is Sideways.
pub fn classify_regime(candles: &[Candle], config: &RegimeConfig) -> MarketRegime {
    let needed = config.window.max(config.ma_period);
    if config.window < 2 || config.ma_period == 0 || candles.len() < needed {
        return MarketRegime::Sideways;
    }

    let Ok(mut sma) = SimpleMovingAverage::new(config.ma_period) else {
        return MarketRegime::Sideways;
    };
    let mut long_ma = 0.0;
    for candle in &candles[candles.len() - config.ma_period..] {
        long_ma = sma.next(decimal_to_f64(candle.close));
    }

    let closes: Vec<f64> = candles[candles.len() - config.window..]
        .iter()
        .map(|c| decimal_to_f64(c.close))
        .collect();
    let trend_pct = fitted_move_pct(&closes);
    let last_close = closes[closes.len() - 1];

    if trend_pct > config.trend_threshold_pct && last_close > long_ma {
        MarketRegime::Bull
    } else if trend_pct < -config.trend_threshold_pct && last_close < long_ma {
        MarketRegime::Bear
    } else {
        MarketRegime::Sideways
    }
}

/// Least-squares slope across the series, expressed as the total fitted move
/// relative to the series mean, in percent.
fn fitted_move_pct(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    if mean_y.abs() < f64::EPSILON {
        return 0.0;
    }

    let (mut cov, mut var) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        cov += dx * (y - mean_y);
        var += dx * dx;
    }
    if var == 0.0 {
        return 0.0;
    }
    cov / var * (n - 1.0) / mean_y * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::from_closes;

    #[test]
    fn test_insufficient_data_is_sideways() {
        let candles = from_closes(&[100.0; 50]);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            MarketRegime::Sideways
        );
    }

    #[test]
    fn test_uptrend_is_bull() {
        let closes: Vec<f64> = (0..250).map(|i| 100.0 + i as f64 * 0.5).collect();
        let candles = from_closes(&closes);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            MarketRegime::Bull
        );
    }

    #[test]
    fn test_downtrend_is_bear() {
        let closes: Vec<f64> = (0..250).map(|i| 300.0 - i as f64 * 0.5).collect();
        let candles = from_closes(&closes);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            MarketRegime::Bear
        );
    }

    #[test]
    fn test_range_is_sideways() {
        let closes: Vec<f64> = (0..250)
            .map(|i| 100.0 + 3.0 * (i as f64 / 5.0).sin())
            .collect();
        let candles = from_closes(&closes);
        assert_eq!(
            classify_regime(&candles, &RegimeConfig::default()),
            MarketRegime::Sideways
        );
    }

    #[test]
    fn test_fitted_move() {
        let values: Vec<f64> = (0..11).map(|i| 100.0 + i as f64).collect();
        // Fitted move of 10 over a mean of 105
        assert!((fitted_move_pct(&values) - 10.0 / 105.0 * 100.0).abs() < 1e-9);
    }
}
