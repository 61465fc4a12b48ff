//! OHLCV bar model.
//!
//! Bars are keyed by their open time in epoch milliseconds, the format used by
//! the on-disk CSV cache.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One candle as stored in the CSV cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OhlcvBar {
    /// Bar open time, epoch milliseconds
    #[serde(rename = "timestamp")]
    pub timestamp_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(default)]
    pub volume: Decimal,
}

impl OhlcvBar {
    #[must_use]
    pub const fn new(
        timestamp_ms: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Open time as a UTC timestamp, if representable.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// `low <= min(open, close)` and `high >= max(open, close)`.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.low <= self.open.min(self.close) && self.high >= self.open.max(self.close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_timestamp_from_millis() {
        let bar = OhlcvBar::new(1_704_067_200_000, dec!(1), dec!(2), dec!(0.5), dec!(1.5), dec!(10));
        assert_eq!(bar.timestamp().unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(bar.is_consistent());
    }

    #[test]
    fn test_inconsistent_bar() {
        let bar = OhlcvBar::new(0, dec!(1), dec!(1.2), dec!(1.1), dec!(1.15), dec!(0));
        assert!(!bar.is_consistent());
    }
}
