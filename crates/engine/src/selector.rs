//! Regime-aware strategy selection
//!
//! Every candidate is backtested once over the same candles and scored as
//! `Sharpe + regime_bonus`. The regime is classified from the trailing
//! window of the same history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::engine::BacktestEngine;
use crate::patterns::{classify_regime, MarketRegime, RegimeConfig};
use crate::strategy::Strategy;
use crate::types::{BacktestConfig, BacktestResult, Candle};

/// Bonus added to trend-following strategies in trending regimes
pub const TREND_REGIME_BONUS: f64 = 0.5;
/// Bonus added to buy-and-hold in bull regimes
pub const BUY_AND_HOLD_BULL_BONUS: f64 = 0.3;

/// Strategy families the regime bonus distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    BuyAndHold,
    TrendFollowing,
    SmartMoney,
    Other,
}

impl StrategyKind {
    /// Classify a strategy by its display name
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("buy") && name.contains("hold") {
            StrategyKind::BuyAndHold
        } else if name.contains("trend") || name.contains("moving average") {
            StrategyKind::TrendFollowing
        } else if ["fvg", "order block", "smart money", "choch", "liquidity"]
            .iter()
            .any(|k| name.contains(k))
        {
            StrategyKind::SmartMoney
        } else {
            StrategyKind::Other
        }
    }
}

/// Score adjustment for a strategy family in a regime
pub fn regime_bonus(kind: StrategyKind, regime: MarketRegime) -> f64 {
    match (kind, regime) {
        (StrategyKind::TrendFollowing, MarketRegime::Bull | MarketRegime::Bear) => {
            TREND_REGIME_BONUS
        }
        (StrategyKind::BuyAndHold, MarketRegime::Bull) => BUY_AND_HOLD_BULL_BONUS,
        _ => 0.0,
    }
}

/// Backtest every strategy once, keyed by strategy name.
///
/// Strategies are run as given, so they must already be initialized.
/// A strategy whose run fails is logged and left out.
pub fn evaluate_strategies(
    strategies: Vec<Box<dyn Strategy>>,
    candles: &[Candle],
    initial_capital: Decimal,
) -> BTreeMap<String, BacktestResult> {
    let config = BacktestConfig::default().with_initial_balance(initial_capital);
    let mut results = BTreeMap::new();

    for mut strategy in strategies {
        let name = strategy.name().to_string();
        match BacktestEngine::run(strategy.as_mut(), candles, initial_capital, &config) {
            Ok(result) => {
                if results.insert(name.clone(), result).is_some() {
                    warn!(strategy = %name, "Duplicate strategy name, keeping the later run");
                }
            }
            Err(e) => warn!(strategy = %name, error = %e, "Strategy evaluation failed, skipping"),
        }
    }

    results
}

/// Score of one result under `regime`
pub fn selection_score(name: &str, result: &BacktestResult, regime: MarketRegime) -> f64 {
    result.metrics.sharpe_ratio + regime_bonus(StrategyKind::from_name(name), regime)
}

/// Name of the highest-scoring strategy. Ties go to the first name in map
/// order; `None` only when `results` is empty.
pub fn select_best_strategy(
    results: &BTreeMap<String, BacktestResult>,
    regime: MarketRegime,
) -> Option<String> {
    let mut best: Option<(&String, f64)> = None;
    for (name, result) in results {
        let score = selection_score(name, result, regime);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((name, score));
        }
    }
    best.map(|(name, _)| name.clone())
}

/// Outcome of a full regime-aware selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Selection {
    pub regime: MarketRegime,
    pub best: Option<String>,
    pub scores: BTreeMap<String, f64>,
    pub results: BTreeMap<String, BacktestResult>,
}

/// Evaluate `strategies`, classify the regime at the end of `candles` and
/// pick the best candidate for it.
pub fn select_for_market(
    strategies: Vec<Box<dyn Strategy>>,
    candles: &[Candle],
    initial_capital: Decimal,
    regime_config: &RegimeConfig,
) -> Selection {
    let regime = classify_regime(candles, regime_config);
    let results = evaluate_strategies(strategies, candles, initial_capital);
    let scores = results
        .iter()
        .map(|(name, result)| (name.clone(), selection_score(name, result, regime)))
        .collect();
    let best = select_best_strategy(&results, regime);

    info!(
        regime = %regime,
        candidates = results.len(),
        best = best.as_deref().unwrap_or("none"),
        "Strategy selected"
    );

    Selection {
        regime,
        best,
        scores,
        results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::PerformanceMetrics;
    use crate::patterns::test_support::from_closes;
    use crate::strategy::{BuyAndHold, TrendFollowing};
    use rust_decimal_macros::dec;

    fn result_with_sharpe(name: &str, sharpe: f64) -> BacktestResult {
        BacktestResult {
            strategy_name: name.to_string(),
            symbol: "TEST".to_string(),
            timeframe: "1h".to_string(),
            start_time: 0,
            end_time: 0,
            initial_balance: dec!(10000),
            final_balance: dec!(10000),
            metrics: PerformanceMetrics {
                sharpe_ratio: sharpe,
                ..Default::default()
            },
            trades: vec![],
            equity_curve: vec![],
            open_position: None,
            config: BacktestConfig::default(),
        }
    }

    fn results(entries: &[(&str, f64)]) -> BTreeMap<String, BacktestResult> {
        entries
            .iter()
            .map(|(name, sharpe)| (name.to_string(), result_with_sharpe(name, *sharpe)))
            .collect()
    }

    #[test]
    fn test_kind_from_name() {
        assert_eq!(StrategyKind::from_name("Buy & Hold"), StrategyKind::BuyAndHold);
        assert_eq!(StrategyKind::from_name("Trend Following"), StrategyKind::TrendFollowing);
        assert_eq!(StrategyKind::from_name("FVG Liquidity Sweep"), StrategyKind::SmartMoney);
        assert_eq!(StrategyKind::from_name("Order Block CHOCH"), StrategyKind::SmartMoney);
        assert_eq!(StrategyKind::from_name("Mean Reversion"), StrategyKind::Other);
    }

    #[test]
    fn test_bonus_table() {
        use MarketRegime::*;
        assert_eq!(regime_bonus(StrategyKind::TrendFollowing, Bull), TREND_REGIME_BONUS);
        assert_eq!(regime_bonus(StrategyKind::TrendFollowing, Bear), TREND_REGIME_BONUS);
        assert_eq!(regime_bonus(StrategyKind::TrendFollowing, Sideways), 0.0);
        assert_eq!(regime_bonus(StrategyKind::BuyAndHold, Bull), BUY_AND_HOLD_BULL_BONUS);
        assert_eq!(regime_bonus(StrategyKind::BuyAndHold, Bear), 0.0);
        assert_eq!(regime_bonus(StrategyKind::SmartMoney, Bull), 0.0);
    }

    #[test]
    fn test_regime_changes_winner() {
        let results = results(&[("Buy & Hold", 1.0), ("Trend Following", 0.9)]);
        assert_eq!(
            select_best_strategy(&results, MarketRegime::Bull).as_deref(),
            Some("Trend Following")
        );
        assert_eq!(
            select_best_strategy(&results, MarketRegime::Sideways).as_deref(),
            Some("Buy & Hold")
        );
    }

    #[test]
    fn test_tie_keeps_first_in_map_order() {
        let results = results(&[("Beta", 0.7), ("Alpha", 0.7)]);
        assert_eq!(
            select_best_strategy(&results, MarketRegime::Sideways).as_deref(),
            Some("Alpha")
        );
        assert_eq!(select_best_strategy(&BTreeMap::new(), MarketRegime::Bull), None);
    }

    #[test]
    fn test_evaluate_and_select_in_uptrend() {
        let closes: Vec<f64> = (0..260)
            .map(|i| 100.0 + i as f64 * 0.5 + 2.0 * (i as f64 / 3.0).sin())
            .collect();
        let candles = from_closes(&closes);
        let strategies: Vec<Box<dyn Strategy>> = vec![
            Box::new(BuyAndHold::default()),
            Box::new(TrendFollowing::default()),
        ];

        let selection =
            select_for_market(strategies, &candles, dec!(5000), &RegimeConfig::default());

        assert_eq!(selection.regime, MarketRegime::Bull);
        assert_eq!(selection.results.len(), 2);
        assert!(selection.results.contains_key("Buy & Hold"));
        assert_eq!(selection.results["Buy & Hold"].initial_balance, dec!(5000));
        let best = selection.best.expect("two candidates");
        let top = selection.scores[&best];
        assert!(selection.scores.values().all(|s| *s <= top));
    }
}
