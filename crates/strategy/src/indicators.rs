//! Streaming indicators used by the router's entry filters and trailing stop.

use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Exponential moving average seeded with the first observation.
#[derive(Debug, Clone)]
pub struct Ema {
    alpha: Decimal,
    value: Option<Decimal>,
}

impl Ema {
    #[must_use]
    pub fn new(period: usize) -> Self {
        Self {
            alpha: Decimal::TWO / (Decimal::from(period) + Decimal::ONE),
            value: None,
        }
    }

    pub fn update(&mut self, price: Decimal) -> Decimal {
        let next = match self.value {
            None => price,
            Some(prev) => price * self.alpha + prev * (Decimal::ONE - self.alpha),
        };
        self.value = Some(next);
        next
    }

    #[must_use]
    pub const fn value(&self) -> Option<Decimal> {
        self.value
    }
}

/// Simple-average true range over the last `window` bars.
///
/// Needs `window + 1` bars before producing a value.
#[derive(Debug, Clone)]
pub struct Atr {
    window: usize,
    bars: VecDeque<(Decimal, Decimal, Decimal)>,
}

impl Atr {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self {
            window,
            bars: VecDeque::with_capacity(window + 1),
        }
    }

    pub fn update(&mut self, high: Decimal, low: Decimal, close: Decimal) {
        if self.window == 0 {
            return;
        }
        self.bars.push_back((high, low, close));
        while self.bars.len() > self.window + 1 {
            self.bars.pop_front();
        }
    }

    #[must_use]
    pub fn value(&self) -> Option<Decimal> {
        if self.window == 0 || self.bars.len() < self.window + 1 {
            return None;
        }
        let mut iter = self.bars.iter();
        let (_, _, mut prev_close) = *iter.next()?;
        let mut sum = Decimal::ZERO;
        for &(high, low, close) in iter {
            let tr = (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs());
            sum += tr;
            prev_close = close;
        }
        Some(sum / Decimal::from(self.window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ema_seeds_then_smooths() {
        let mut ema = Ema::new(3); // alpha = 0.5
        assert_eq!(ema.update(dec!(10)), dec!(10));
        assert_eq!(ema.update(dec!(20)), dec!(15));
        assert_eq!(ema.value(), Some(dec!(15)));
    }

    #[test]
    fn test_atr_requires_window_plus_one() {
        let mut atr = Atr::new(2);
        atr.update(dec!(11), dec!(9), dec!(10));
        atr.update(dec!(12), dec!(10), dec!(11));
        assert_eq!(atr.value(), None);

        atr.update(dec!(15), dec!(11), dec!(14));
        // TRs: max(2, 2, 0) = 2 and max(4, 4, 0) = 4
        assert_eq!(atr.value(), Some(dec!(3)));
    }

    #[test]
    fn test_atr_gap_uses_previous_close() {
        let mut atr = Atr::new(1);
        atr.update(dec!(10), dec!(10), dec!(10));
        atr.update(dec!(6), dec!(5), dec!(5));
        assert_eq!(atr.value(), Some(dec!(5)));
    }

    #[test]
    fn test_atr_disabled() {
        let mut atr = Atr::new(0);
        atr.update(dec!(1), dec!(1), dec!(1));
        assert_eq!(atr.value(), None);
    }
}
