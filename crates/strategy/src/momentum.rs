use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spotgate_core::events::{EntrySignal, Tick};
use spotgate_core::traits::Strategy;
use std::collections::{BTreeMap, VecDeque};

/// Minimum price history retained regardless of the breakout window.
const MIN_HISTORY: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MomentumConfig {
    /// Lookback in ticks for the breakout range.
    pub breakout_window: usize,
    /// Minimum (max - min) / min range, in basis points.
    pub min_range_bps: Decimal,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            breakout_window: 60,
            min_range_bps: dec!(5),
        }
    }
}

/// Range breakout: buy when the last price prints at the top of a window
/// whose range is wide enough.
pub struct MomentumStrategy {
    symbol: String,
    config: MomentumConfig,
    prices: VecDeque<Decimal>,
}

impl MomentumStrategy {
    #[must_use]
    pub fn new(symbol: impl Into<String>, config: MomentumConfig) -> Self {
        let capacity = config.breakout_window.max(MIN_HISTORY);
        Self {
            symbol: symbol.into(),
            config,
            prices: VecDeque::with_capacity(capacity),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MomentumConfig {
        &self.config
    }
}

impl Strategy for MomentumStrategy {
    fn on_tick(&mut self, tick: &Tick) -> Option<EntrySignal> {
        if tick.symbol != self.symbol {
            return None;
        }

        let last = tick.last;
        self.prices.push_back(last);
        while self.prices.len() > self.config.breakout_window.max(MIN_HISTORY) {
            self.prices.pop_front();
        }

        let window = self.config.breakout_window;
        if window == 0 || self.prices.len() < window {
            return None;
        }

        let recent = self.prices.iter().skip(self.prices.len() - window);
        let (min, max) = recent.fold((Decimal::MAX, Decimal::MIN), |(lo, hi), &p| {
            (lo.min(p), hi.max(p))
        });
        if min <= Decimal::ZERO {
            return None;
        }

        let range_bps = (max - min) / min * Decimal::from(10_000);
        if range_bps >= self.config.min_range_bps && last >= max {
            let mut features = BTreeMap::new();
            features.insert("range_bps".to_string(), range_bps.round_dp(4));
            return Some(EntrySignal {
                symbol: self.symbol.clone(),
                reason: "breakout".to_string(),
                features,
                timestamp: tick.timestamp,
            });
        }
        None
    }

    fn name(&self) -> &str {
        "momentum"
    }
}
