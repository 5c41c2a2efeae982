//! Interval-based recomputation of detector outputs

use crate::types::Candle;

use super::fvg::FairValueGap;
use super::liquidity::LiquidityZone;

/// Outputs whose status flags only ever move from false to true
pub trait MonotoneFlags {
    /// Carry set flags over from an earlier computation of the same features
    fn merge_flags(&mut self, previous: &Self);
}

impl MonotoneFlags for Vec<FairValueGap> {
    fn merge_flags(&mut self, previous: &Self) {
        for gap in self.iter_mut().filter(|g| !g.filled) {
            let earlier = previous
                .iter()
                .find(|p| p.index == gap.index && p.bullish == gap.bullish && p.filled);
            if let Some(p) = earlier {
                gap.filled = true;
                gap.filled_at = p.filled_at;
            }
        }
    }
}

impl MonotoneFlags for Vec<LiquidityZone> {
    fn merge_flags(&mut self, previous: &Self) {
        for zone in self.iter_mut().filter(|z| !z.swept) {
            let earlier = previous
                .iter()
                .find(|p| p.index == zone.index && p.is_high == zone.is_high && p.swept);
            if let Some(p) = earlier {
                zone.swept = true;
                zone.swept_at = p.swept_at;
            }
        }
    }
}

/// Cached detector output, refreshed once the history has grown by `interval`
#[derive(Debug, Clone)]
pub struct DetectorCache<T> {
    interval: usize,
    last_computed_at: Option<usize>,
    value: T,
}

impl<T: Default + MonotoneFlags> DetectorCache<T> {
    pub fn new(interval: usize) -> Self {
        Self {
            interval: interval.max(1),
            last_computed_at: None,
            value: T::default(),
        }
    }

    pub fn get(&self) -> &T {
        &self.value
    }

    /// History length at the last computation
    pub fn last_computed_at(&self) -> Option<usize> {
        self.last_computed_at
    }

    pub fn needs_refresh(&self, history_len: usize) -> bool {
        match self.last_computed_at {
            None => true,
            Some(at) => history_len >= at + self.interval || history_len < at,
        }
    }

    /// Recompute with `detect` if the growth threshold was crossed.
    /// Returns true when a recomputation happened.
    pub fn refresh<F>(&mut self, history: &[Candle], detect: F) -> bool
    where
        F: FnOnce(&[Candle]) -> T,
    {
        if !self.needs_refresh(history.len()) {
            return false;
        }
        self.recompute(history, detect);
        true
    }

    /// Unconditional recomputation; repeated calls on the same history yield
    /// the same value.
    pub fn recompute<F>(&mut self, history: &[Candle], detect: F)
    where
        F: FnOnce(&[Candle]) -> T,
    {
        let mut fresh = detect(history);
        fresh.merge_flags(&self.value);
        self.value = fresh;
        self.last_computed_at = Some(history.len());
    }

    pub fn reset(&mut self) {
        self.last_computed_at = None;
        self.value = T::default();
    }
}
