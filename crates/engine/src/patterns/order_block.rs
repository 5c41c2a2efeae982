//! Order block detection
//!
//! An order block is the last opposite-coloured candle before a displacement
//! candle, one whose body is much larger than the recent average body.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{f64_to_decimal, Candle};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderBlockConfig {
    /// Body size, as a multiple of the average body, that counts as displacement
    pub displacement_multiplier: f64,
    /// Candles averaged to get the reference body size
    pub body_lookback: usize,
    /// How far back from the displacement to look for the opposite candle
    pub max_search: usize,
}

impl Default for OrderBlockConfig {
    fn default() -> Self {
        Self {
            displacement_multiplier: 2.0,
            body_lookback: 10,
            max_search: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBlock {
    /// Index of the order block candle
    pub index: usize,
    pub top: Decimal,
    pub bottom: Decimal,
    /// Bullish blocks are bearish candles preceding an up move
    pub bullish: bool,
    pub displacement_index: usize,
}

impl OrderBlock {
    pub fn contains(&self, price: Decimal) -> bool {
        price >= self.bottom && price <= self.top
    }
}

pub fn detect_order_blocks(candles: &[Candle], config: &OrderBlockConfig) -> Vec<OrderBlock> {
    let lookback = config.body_lookback.max(1);
    let multiplier = f64_to_decimal(config.displacement_multiplier.max(0.0));
    let mut blocks: Vec<OrderBlock> = Vec::new();

    for i in lookback..candles.len() {
        let candle = &candles[i];
        let body = candle.body();
        if body <= Decimal::ZERO {
            continue;
        }

        let avg_body = candles[i - lookback..i]
            .iter()
            .map(Candle::body)
            .sum::<Decimal>()
            / Decimal::from(lookback);
        if body < avg_body * multiplier {
            continue;
        }

        let bullish = candle.is_bullish();
        let earliest = i.saturating_sub(config.max_search.max(1));
        let opposite = (earliest..i).rev().find(|&j| {
            if bullish {
                candles[j].is_bearish()
            } else {
                candles[j].is_bullish()
            }
        });

        let Some(j) = opposite else {
            continue;
        };
        if blocks.iter().any(|b| b.index == j && b.bullish == bullish) {
            continue;
        }

        blocks.push(OrderBlock {
            index: j,
            top: candles[j].high,
            bottom: candles[j].low,
            bullish,
            displacement_index: i,
        });
    }

    blocks
}
