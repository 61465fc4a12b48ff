//! Bar timeframes supported by the loader.

use crate::error::DataError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

const SUPPORTED: [(&str, u32); 10] = [
    ("1s", 1),
    ("5s", 5),
    ("15s", 15),
    ("30s", 30),
    ("1m", 60),
    ("3m", 180),
    ("5m", 300),
    ("15m", 900),
    ("30m", 1800),
    ("1h", 3600),
];

/// A validated bar interval, e.g. `1m` or `15s`. Serializes as its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    label: &'static str,
    seconds: u32,
}

impl Timeframe {
    /// # Errors
    ///
    /// Returns `DataError::UnsupportedTimeframe` for labels outside the table.
    pub fn parse(label: &str) -> Result<Self, DataError> {
        SUPPORTED
            .iter()
            .find(|(l, _)| *l == label)
            .map(|&(label, seconds)| Self { label, seconds })
            .ok_or_else(|| DataError::UnsupportedTimeframe(label.to_string()))
    }

    #[must_use]
    pub const fn seconds(&self) -> u32 {
        self.seconds
    }

    #[must_use]
    pub const fn millis(&self) -> i64 {
        self.seconds as i64 * 1000
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.label
    }

    /// Sub-minute frames can be synthesized from cached 1m bars.
    #[must_use]
    pub const fn is_subminute(&self) -> bool {
        self.seconds < 60
    }

    /// The 1m timeframe.
    #[must_use]
    pub const fn one_minute() -> Self {
        Self {
            label: "1m",
            seconds: 60,
        }
    }
}

/// # Errors
///
/// Returns `DataError::UnsupportedTimeframe` for unknown labels.
pub fn timeframe_to_seconds(label: &str) -> Result<u32, DataError> {
    Timeframe::parse(label).map(|tf| tf.seconds())
}

impl FromStr for Timeframe {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label)
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Self::parse(&label).map_err(serde::de::Error::custom)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_uses_label() {
        let tf = Timeframe::parse("15s").unwrap();
        let json = serde_json::to_string(&tf).unwrap();
        assert_eq!(json, "\"15s\"");
        assert_eq!(serde_json::from_str::<Timeframe>(&json).unwrap(), tf);
        assert!(serde_json::from_str::<Timeframe>("\"4h\"").is_err());
    }

    #[test]
    fn test_known_timeframes() {
        assert_eq!(timeframe_to_seconds("1m").unwrap(), 60);
        assert_eq!(timeframe_to_seconds("15s").unwrap(), 15);
        assert_eq!(Timeframe::parse("1h").unwrap().millis(), 3_600_000);
    }

    #[test]
    fn test_unsupported_timeframe() {
        assert!(matches!(
            Timeframe::parse("4h"),
            Err(DataError::UnsupportedTimeframe(tf)) if tf == "4h"
        ));
    }

    #[test]
    fn test_subminute() {
        assert!(Timeframe::parse("5s").unwrap().is_subminute());
        assert!(!Timeframe::one_minute().is_subminute());
    }

    #[test]
    fn test_serde_as_label() {
        let tf: Timeframe = serde_json::from_str("\"5m\"").unwrap();
        assert_eq!(tf.seconds(), 300);
        assert_eq!(serde_json::to_string(&tf).unwrap(), "\"5m\"");
    }
}
