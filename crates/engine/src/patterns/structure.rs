//! Market structure: breaks of swing points and changes of character
//!
//! Swings become usable once confirmed, `lookback` candles after they print.
//! A close beyond the latest unbroken swing in the direction of the current
//! bias is a break of structure (BOS); a close beyond it against the bias is
//! a change of character (CHOCH) and flips the bias.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::liquidity::{detect_swing_points, SwingConfig, SwingPoint};
use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakType {
    BullishChoch,
    BearishChoch,
    BullishBos,
    BearishBos,
}

impl BreakType {
    pub fn is_bullish(&self) -> bool {
        matches!(self, BreakType::BullishChoch | BreakType::BullishBos)
    }

    pub fn is_choch(&self) -> bool {
        matches!(self, BreakType::BullishChoch | BreakType::BearishChoch)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureBias {
    Bullish,
    Bearish,
    #[default]
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureBreak {
    /// Candle whose close broke the swing
    pub index: usize,
    /// Price of the broken swing
    pub level: Decimal,
    pub swing_index: usize,
    pub kind: BreakType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketStructure {
    pub breaks: Vec<StructureBreak>,
    /// Bias after the last candle
    pub bias: StructureBias,
}

impl MarketStructure {
    pub fn last_choch(&self) -> Option<&StructureBreak> {
        self.breaks.iter().rev().find(|b| b.kind.is_choch())
    }
}

pub fn detect_market_structure(candles: &[Candle], config: &SwingConfig) -> MarketStructure {
    let lookback = config.lookback.max(1);
    let swings = detect_swing_points(candles, config);

    let mut structure = MarketStructure::default();
    let mut pending = swings.iter().peekable();
    let mut last_high: Option<&SwingPoint> = None;
    let mut last_low: Option<&SwingPoint> = None;

    for (i, candle) in candles.iter().enumerate() {
        // Swings confirmed before this candle become the active levels.
        while let Some(swing) = pending.peek() {
            if swing.index + lookback >= i {
                break;
            }
            if swing.is_high {
                last_high = Some(swing);
            } else {
                last_low = Some(swing);
            }
            pending.next();
        }

        if let Some(high) = last_high {
            if candle.close > high.price {
                let kind = if structure.bias == StructureBias::Bearish {
                    BreakType::BullishChoch
                } else {
                    BreakType::BullishBos
                };
                structure.breaks.push(StructureBreak {
                    index: i,
                    level: high.price,
                    swing_index: high.index,
                    kind,
                });
                structure.bias = StructureBias::Bullish;
                last_high = None;
            }
        }

        if let Some(low) = last_low {
            if candle.close < low.price {
                let kind = if structure.bias == StructureBias::Bullish {
                    BreakType::BearishChoch
                } else {
                    BreakType::BearishBos
                };
                structure.breaks.push(StructureBreak {
                    index: i,
                    level: low.price,
                    swing_index: low.index,
                    kind,
                });
                structure.bias = StructureBias::Bearish;
                last_low = None;
            }
        }
    }

    structure
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::from_closes;

    /// Up-leg, pullback, then a collapse through the pullback low, then recovery.
    fn reversal_series() -> Vec<Candle> {
        from_closes(&[
            10.0, 11.0, 12.0, 14.0, 12.0, 11.0, 10.5, 11.0, 12.0, 15.0, 16.0, 14.0, 13.0, 12.0,
            9.0, 8.0, 7.5, 8.0, 9.0, 10.0, 12.0, 17.0, 18.0,
        ])
    }

    #[test]
    fn test_bos_then_choch() {
        let candles = reversal_series();
        let structure = detect_market_structure(&candles, &SwingConfig { lookback: 2 });
        let kinds: Vec<BreakType> = structure.breaks.iter().map(|b| b.kind).collect();

        assert_eq!(kinds.first(), Some(&BreakType::BullishBos));
        assert!(kinds.contains(&BreakType::BearishChoch));
        assert_eq!(kinds.last(), Some(&BreakType::BullishChoch));
        assert_eq!(structure.bias, StructureBias::Bullish);
    }

    #[test]
    fn test_breaks_only_after_confirmation() {
        let candles = reversal_series();
        let lookback = 2;
        let structure = detect_market_structure(&candles, &SwingConfig { lookback });
        for b in &structure.breaks {
            assert!(b.index > b.swing_index + lookback);
        }
    }

    #[test]
    fn test_flat_market_has_no_breaks() {
        let candles = from_closes(&[10.0; 30]);
        let structure = detect_market_structure(&candles, &SwingConfig::default());
        assert!(structure.breaks.is_empty());
        assert_eq!(structure.bias, StructureBias::Neutral);
    }

    #[test]
    fn test_last_choch() {
        let candles = reversal_series();
        let structure = detect_market_structure(&candles, &SwingConfig { lookback: 2 });
        assert_eq!(
            structure.last_choch().map(|b| b.kind),
            Some(BreakType::BullishChoch)
        );
    }
}
