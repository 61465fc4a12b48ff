use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order handling knobs for the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Equal child orders per logical entry or exit.
    pub micro_slices: u32,
    /// Exit after holding this long regardless of price.
    pub time_stop_s: i64,
    /// Trailing stop distance in ATRs below the post-entry high (0 disables).
    pub trail_atr_k: Decimal,
    pub pyramid_max: u32,
    pub pyramid_step_pct: Decimal,
    /// Partial take-profit levels in multiples of initial risk (0 disables).
    pub partial_r1: Decimal,
    pub partial_r2: Decimal,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            micro_slices: 3,
            time_stop_s: 120,
            trail_atr_k: Decimal::ZERO,
            pyramid_max: 0,
            pyramid_step_pct: Decimal::ZERO,
            partial_r1: Decimal::ZERO,
            partial_r2: Decimal::ZERO,
        }
    }
}

/// Pre-entry filters. Zero values disable the corresponding check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub atr_window: usize,
    pub min_atr_pct: Decimal,
    pub max_atr_pct: Decimal,
    pub atr_block_consec: u32,
    pub atr_block_cooldown_s: i64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            ema_fast: 0,
            ema_slow: 0,
            atr_window: 14,
            min_atr_pct: Decimal::ZERO,
            max_atr_pct: Decimal::ZERO,
            atr_block_consec: 0,
            atr_block_cooldown_s: 0,
        }
    }
}

impl FilterConfig {
    #[must_use]
    pub const fn trend_filter_enabled(&self) -> bool {
        self.ema_fast > 1 && self.ema_slow > 1
    }
}
