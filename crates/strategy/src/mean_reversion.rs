use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spotgate_core::events::{EntrySignal, Tick};
use spotgate_core::traits::Strategy;
use std::collections::{BTreeMap, VecDeque};

const MAX_HISTORY: usize = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeanReversionConfig {
    /// Bollinger lookback in ticks.
    pub window: usize,
    /// Band width in standard deviations.
    pub k: Decimal,
}

impl Default for MeanReversionConfig {
    fn default() -> Self {
        Self {
            window: 60,
            k: dec!(2.0),
        }
    }
}

/// Mid, lower and upper Bollinger bands over the last `window` prices
/// (population standard deviation).
#[must_use]
pub fn bollinger(
    prices: &VecDeque<Decimal>,
    window: usize,
    k: Decimal,
) -> Option<(Decimal, Decimal, Decimal)> {
    if window == 0 || prices.len() < window {
        return None;
    }
    let n = Decimal::from(window);
    let recent: Vec<Decimal> = prices.iter().skip(prices.len() - window).copied().collect();
    let mean = recent.iter().copied().sum::<Decimal>() / n;
    let variance = recent
        .iter()
        .map(|p| (*p - mean) * (*p - mean))
        .sum::<Decimal>()
        / n;
    let std = Decimal::try_from(variance.to_f64()?.sqrt()).ok()?;
    Some((mean, mean - k * std, mean + k * std))
}

/// Buys when the last price closes below the lower Bollinger band.
pub struct MeanReversionStrategy {
    symbol: String,
    config: MeanReversionConfig,
    prices: VecDeque<Decimal>,
}

impl MeanReversionStrategy {
    #[must_use]
    pub fn new(symbol: impl Into<String>, config: MeanReversionConfig) -> Self {
        Self {
            symbol: symbol.into(),
            config,
            prices: VecDeque::with_capacity(MAX_HISTORY),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &MeanReversionConfig {
        &self.config
    }
}

impl Strategy for MeanReversionStrategy {
    fn on_tick(&mut self, tick: &Tick) -> Option<EntrySignal> {
        if tick.symbol != self.symbol {
            return None;
        }

        self.prices.push_back(tick.last);
        while self.prices.len() > MAX_HISTORY.max(self.config.window) {
            self.prices.pop_front();
        }

        let (mid, lower, upper) = bollinger(&self.prices, self.config.window, self.config.k)?;
        if tick.last < lower {
            let mut features = BTreeMap::new();
            features.insert("mid".to_string(), mid.round_dp(8));
            features.insert("lower".to_string(), lower.round_dp(8));
            features.insert("upper".to_string(), upper.round_dp(8));
            return Some(EntrySignal {
                symbol: self.symbol.clone(),
                reason: "below_lower_band".to_string(),
                features,
                timestamp: tick.timestamp,
            });
        }
        None
    }

    fn name(&self) -> &str {
        "meanrev"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration};

    fn tick(i: i64, price: Decimal) -> Tick {
        let ts = DateTime::from_timestamp(1_704_067_200, 0).unwrap() + Duration::minutes(i);
        Tick::from_bar("ETH/USDT", ts, price, price, price, price, dec!(1), dec!(1))
    }

    #[test]
    fn test_bollinger_bands() {
        let prices: VecDeque<Decimal> = [dec!(1), dec!(3)].into_iter().collect();
        let (mid, lower, upper) = bollinger(&prices, 2, dec!(2)).unwrap();
        assert_eq!(mid, dec!(2));
        assert_eq!(lower, dec!(0));
        assert_eq!(upper, dec!(4));
    }

    #[test]
    fn test_buy_below_lower_band() {
        let mut strat = MeanReversionStrategy::new(
            "ETH/USDT",
            MeanReversionConfig {
                window: 10,
                k: dec!(1.5),
            },
        );
        for i in 0..9 {
            let p = if i % 2 == 0 { dec!(100) } else { dec!(101) };
            assert!(strat.on_tick(&tick(i, p)).is_none());
        }
        let signal = strat.on_tick(&tick(9, dec!(95))).expect("dip signal");
        assert_eq!(signal.reason, "below_lower_band");
        assert!(signal.features["lower"] > dec!(95));
    }

    #[test]
    fn test_constant_prices_never_signal() {
        let mut strat = MeanReversionStrategy::new("ETH/USDT", MeanReversionConfig::default());
        for i in 0..100 {
            assert!(strat.on_tick(&tick(i, dec!(50))).is_none());
        }
    }
}
