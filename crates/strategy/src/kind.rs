use crate::mean_reversion::MeanReversionStrategy;
use crate::momentum::MomentumStrategy;
use crate::overrides::ResolvedParams;
use serde::{Deserialize, Serialize};
use spotgate_core::traits::Strategy;
use std::fmt;
use std::str::FromStr;

/// Which strategies a run uses, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Momentum,
    #[serde(alias = "mean_reversion")]
    MeanRev,
    /// Momentum first, then mean reversion.
    Ensemble,
}

impl StrategyKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Momentum => "momentum",
            Self::MeanRev => "meanrev",
            Self::Ensemble => "ensemble",
        }
    }

    /// Builds the per-symbol strategy stack in priority order.
    #[must_use]
    pub fn build(&self, symbol: &str, params: &ResolvedParams) -> Vec<Box<dyn Strategy>> {
        let momentum = || -> Box<dyn Strategy> {
            Box::new(MomentumStrategy::new(symbol, params.momentum.clone()))
        };
        let meanrev = || -> Box<dyn Strategy> {
            Box::new(MeanReversionStrategy::new(symbol, params.meanrev.clone()))
        };
        match self {
            Self::Momentum => vec![momentum()],
            Self::MeanRev => vec![meanrev()],
            Self::Ensemble => vec![momentum(), meanrev()],
        }
    }
}

impl FromStr for StrategyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "momentum" => Ok(Self::Momentum),
            "meanrev" | "mean_reversion" => Ok(Self::MeanRev),
            "ensemble" => Ok(Self::Ensemble),
            other => Err(format!(
                "unknown strategy '{other}' (expected momentum, meanrev or ensemble)"
            )),
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kinds() {
        assert_eq!("momentum".parse::<StrategyKind>().unwrap(), StrategyKind::Momentum);
        assert_eq!("MeanRev".parse::<StrategyKind>().unwrap(), StrategyKind::MeanRev);
        assert!("ml".parse::<StrategyKind>().is_err());
    }

    #[test]
    fn test_ensemble_priority() {
        let stack = StrategyKind::Ensemble.build("BTC/USDT", &ResolvedParams::default());
        let names: Vec<&str> = stack.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["momentum", "meanrev"]);
    }
}
