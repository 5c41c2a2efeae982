//! Smart-money structural analysis over candle windows
//!
//! Every detector is a pure function of its input slice. Strategies keep a
//! [`DetectorCache`] and refresh a [`SmartMoneySnapshot`] every few candles
//! instead of on every candle.

pub mod cache;
pub mod fvg;
pub mod liquidity;
pub mod order_block;
pub mod regime;
pub mod structure;

use serde::{Deserialize, Serialize};

use crate::types::Candle;

pub use cache::{DetectorCache, MonotoneFlags};
pub use fvg::{detect_fair_value_gaps, update_fill_status, FairValueGap, FvgConfig};
pub use liquidity::{
    detect_liquidity_zones, detect_swing_points, update_sweep_status, LiquidityZone, SwingConfig,
    SwingPoint,
};
pub use order_block::{detect_order_blocks, OrderBlock, OrderBlockConfig};
pub use regime::{classify_regime, MarketRegime, RegimeConfig};
pub use structure::{
    detect_market_structure, BreakType, MarketStructure, StructureBias, StructureBreak,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SmartMoneyConfig {
    pub fvg: FvgConfig,
    pub swing: SwingConfig,
    pub order_block: OrderBlockConfig,
}

/// All structural features for one window. Indices are absolute positions in
/// the full candle history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SmartMoneySnapshot {
    pub fair_value_gaps: Vec<FairValueGap>,
    pub liquidity_zones: Vec<LiquidityZone>,
    pub order_blocks: Vec<OrderBlock>,
    pub structure: MarketStructure,
}

impl MonotoneFlags for SmartMoneySnapshot {
    fn merge_flags(&mut self, previous: &Self) {
        self.fair_value_gaps.merge_flags(&previous.fair_value_gaps);
        self.liquidity_zones.merge_flags(&previous.liquidity_zones);
    }
}

/// Run every detector over `candles`
pub fn analyze(candles: &[Candle], config: &SmartMoneyConfig) -> SmartMoneySnapshot {
    SmartMoneySnapshot {
        fair_value_gaps: detect_fair_value_gaps(candles, &config.fvg),
        liquidity_zones: detect_liquidity_zones(candles, &config.swing),
        order_blocks: detect_order_blocks(candles, &config.order_block),
        structure: detect_market_structure(candles, &config.swing),
    }
}

/// Run every detector over the trailing `window` candles of `history`,
/// reporting indices relative to the start of `history`.
pub fn analyze_window(
    history: &[Candle],
    window: usize,
    config: &SmartMoneyConfig,
) -> SmartMoneySnapshot {
    let offset = history.len().saturating_sub(window.max(1));
    let mut snapshot = analyze(&history[offset..], config);
    if offset > 0 {
        snapshot.shift(offset);
    }
    snapshot
}

impl SmartMoneySnapshot {
    fn shift(&mut self, offset: usize) {
        for gap in &mut self.fair_value_gaps {
            gap.index += offset;
            gap.filled_at = gap.filled_at.map(|i| i + offset);
        }
        for zone in &mut self.liquidity_zones {
            zone.index += offset;
            zone.swept_at = zone.swept_at.map(|i| i + offset);
        }
        for block in &mut self.order_blocks {
            block.index += offset;
            block.displacement_index += offset;
        }
        for b in &mut self.structure.breaks {
            b.index += offset;
            b.swing_index += offset;
        }
    }
}
