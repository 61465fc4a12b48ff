//! Typed partial configuration updates.
//!
//! Every config has a matching `*Overrides` struct whose fields are all
//! optional. `apply_overrides` validates the whole partial before writing
//! anything, so a rejected override leaves the target untouched.

use crate::mean_reversion::MeanReversionConfig;
use crate::momentum::MomentumConfig;
use crate::params::{ExecutionConfig, FilterConfig};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spotgate_core::config::RiskConfig;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OverrideError {
    #[error("invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("malformed parameter JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> OverrideError {
    OverrideError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn require_fraction(field: &'static str, value: Decimal) -> Result<Decimal, OverrideError> {
    if value < Decimal::ZERO || value > Decimal::ONE {
        return Err(invalid(field, format!("{value} is outside [0, 1]")));
    }
    Ok(value)
}

fn require_non_negative(field: &'static str, value: Decimal) -> Result<Decimal, OverrideError> {
    if value < Decimal::ZERO {
        return Err(invalid(field, format!("{value} is negative")));
    }
    Ok(value)
}

fn require_at_least<T: PartialOrd + std::fmt::Display>(
    field: &'static str,
    value: T,
    min: T,
) -> Result<T, OverrideError> {
    if value < min {
        return Err(invalid(field, format!("{value} is below {min}")));
    }
    Ok(value)
}

/// Validated, all-or-nothing partial update.
pub trait ApplyOverrides {
    type Overrides;

    /// # Errors
    ///
    /// Returns `OverrideError::Invalid` naming the first bad field; `self`
    /// is unchanged in that case.
    fn apply_overrides(&mut self, overrides: &Self::Overrides) -> Result<(), OverrideError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomentumOverrides {
    pub breakout_window: Option<usize>,
    pub min_range_bps: Option<Decimal>,
}

impl ApplyOverrides for MomentumConfig {
    type Overrides = MomentumOverrides;

    fn apply_overrides(&mut self, o: &MomentumOverrides) -> Result<(), OverrideError> {
        let mut next = self.clone();
        if let Some(v) = o.breakout_window {
            next.breakout_window = require_at_least("momentum.breakout_window", v, 2)?;
        }
        if let Some(v) = o.min_range_bps {
            next.min_range_bps = require_non_negative("momentum.min_range_bps", v)?;
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeanReversionOverrides {
    pub window: Option<usize>,
    pub k: Option<Decimal>,
}

impl ApplyOverrides for MeanReversionConfig {
    type Overrides = MeanReversionOverrides;

    fn apply_overrides(&mut self, o: &MeanReversionOverrides) -> Result<(), OverrideError> {
        let mut next = self.clone();
        if let Some(v) = o.window {
            next.window = require_at_least("meanrev.window", v, 2)?;
        }
        if let Some(v) = o.k {
            if v <= Decimal::ZERO {
                return Err(invalid("meanrev.k", format!("{v} must be positive")));
            }
            next.k = v;
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskOverrides {
    pub max_pos_pct: Option<Decimal>,
    pub per_trade_sl_pct: Option<Decimal>,
    pub tp_pct: Option<Decimal>,
    pub dd_soft: Option<Decimal>,
    pub dd_hard: Option<Decimal>,
    pub flash_crash_drop_1h: Option<Decimal>,
    pub max_concurrent_pos: Option<usize>,
    pub kill_switch_breaches: Option<usize>,
    pub dd_warn: Option<Decimal>,
    pub dd_halt: Option<Decimal>,
    pub var_max: Option<Decimal>,
}

impl ApplyOverrides for RiskConfig {
    type Overrides = RiskOverrides;

    fn apply_overrides(&mut self, o: &RiskOverrides) -> Result<(), OverrideError> {
        let mut next = self.clone();
        let fractions = [
            ("risk.max_pos_pct", o.max_pos_pct, &mut next.max_pos_pct),
            ("risk.per_trade_sl_pct", o.per_trade_sl_pct, &mut next.per_trade_sl_pct),
            ("risk.tp_pct", o.tp_pct, &mut next.tp_pct),
            ("risk.dd_soft", o.dd_soft, &mut next.dd_soft),
            ("risk.dd_hard", o.dd_hard, &mut next.dd_hard),
            ("risk.flash_crash_drop_1h", o.flash_crash_drop_1h, &mut next.flash_crash_drop_1h),
            ("risk.dd_warn", o.dd_warn, &mut next.dd_warn),
            ("risk.dd_halt", o.dd_halt, &mut next.dd_halt),
            ("risk.var_max", o.var_max, &mut next.var_max),
        ];
        for (field, value, slot) in fractions {
            if let Some(v) = value {
                *slot = require_fraction(field, v)?;
            }
        }
        if let Some(v) = o.max_concurrent_pos {
            next.max_concurrent_pos = require_at_least("risk.max_concurrent_pos", v, 1)?;
        }
        if let Some(v) = o.kill_switch_breaches {
            next.kill_switch_breaches = require_at_least("risk.kill_switch_breaches", v, 1)?;
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionOverrides {
    pub micro_slices: Option<u32>,
    pub time_stop_s: Option<i64>,
    pub trail_atr_k: Option<Decimal>,
    pub pyramid_max: Option<u32>,
    pub pyramid_step_pct: Option<Decimal>,
    pub partial_r1: Option<Decimal>,
    pub partial_r2: Option<Decimal>,
}

impl ApplyOverrides for ExecutionConfig {
    type Overrides = ExecutionOverrides;

    fn apply_overrides(&mut self, o: &ExecutionOverrides) -> Result<(), OverrideError> {
        let mut next = self.clone();
        if let Some(v) = o.micro_slices {
            next.micro_slices = require_at_least("execution.micro_slices", v, 1)?;
        }
        if let Some(v) = o.time_stop_s {
            next.time_stop_s = require_at_least("execution.time_stop_s", v, 0)?;
        }
        if let Some(v) = o.pyramid_max {
            next.pyramid_max = v;
        }
        let non_negative = [
            ("execution.trail_atr_k", o.trail_atr_k, &mut next.trail_atr_k),
            ("execution.pyramid_step_pct", o.pyramid_step_pct, &mut next.pyramid_step_pct),
            ("execution.partial_r1", o.partial_r1, &mut next.partial_r1),
            ("execution.partial_r2", o.partial_r2, &mut next.partial_r2),
        ];
        for (field, value, slot) in non_negative {
            if let Some(v) = value {
                *slot = require_non_negative(field, v)?;
            }
        }
        *self = next;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterOverrides {
    pub ema_fast: Option<usize>,
    pub ema_slow: Option<usize>,
    pub atr_window: Option<usize>,
    pub min_atr_pct: Option<Decimal>,
    pub max_atr_pct: Option<Decimal>,
    pub atr_block_consec: Option<u32>,
    pub atr_block_cooldown_s: Option<i64>,
}

impl ApplyOverrides for FilterConfig {
    type Overrides = FilterOverrides;

    fn apply_overrides(&mut self, o: &FilterOverrides) -> Result<(), OverrideError> {
        let mut next = self.clone();
        if let Some(v) = o.ema_fast {
            next.ema_fast = v;
        }
        if let Some(v) = o.ema_slow {
            next.ema_slow = v;
        }
        if let Some(v) = o.atr_window {
            next.atr_window = v;
        }
        if let Some(v) = o.min_atr_pct {
            next.min_atr_pct = require_fraction("filters.min_atr_pct", v)?;
        }
        if let Some(v) = o.max_atr_pct {
            next.max_atr_pct = require_fraction("filters.max_atr_pct", v)?;
        }
        if let Some(v) = o.atr_block_consec {
            next.atr_block_consec = v;
        }
        if let Some(v) = o.atr_block_cooldown_s {
            next.atr_block_cooldown_s = require_at_least("filters.atr_block_cooldown_s", v, 0)?;
        }
        if next.trend_filter_enabled() && next.ema_fast >= next.ema_slow {
            return Err(invalid(
                "filters.ema_fast",
                format!("{} must be shorter than ema_slow {}", next.ema_fast, next.ema_slow),
            ));
        }
        if next.max_atr_pct > Decimal::ZERO && next.min_atr_pct > next.max_atr_pct {
            return Err(invalid(
                "filters.min_atr_pct",
                format!("{} exceeds max_atr_pct {}", next.min_atr_pct, next.max_atr_pct),
            ));
        }
        *self = next;
        Ok(())
    }
}

/// Parameter set for one backtest run, as produced by a search driver.
///
/// ```json
/// {"momentum": {"breakout_window": 30}, "risk": {"max_pos_pct": 0.02}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BacktestParams {
    pub momentum: MomentumOverrides,
    #[serde(alias = "mean_reversion")]
    pub meanrev: MeanReversionOverrides,
    pub risk: RiskOverrides,
    pub execution: ExecutionOverrides,
    pub filters: FilterOverrides,
}

impl BacktestParams {
    /// # Errors
    ///
    /// Returns `OverrideError::Parse` for malformed JSON or unknown keys.
    pub fn from_json(json: &str) -> Result<Self, OverrideError> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(json)?)
    }
}

/// Fully resolved configuration for a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedParams {
    pub momentum: MomentumConfig,
    pub meanrev: MeanReversionConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub filters: FilterConfig,
}

impl ResolvedParams {
    /// Applies `params` on top of `risk` and the built-in defaults.
    ///
    /// # Errors
    ///
    /// Returns the first invalid override.
    pub fn resolve(risk: &RiskConfig, params: &BacktestParams) -> Result<Self, OverrideError> {
        let mut resolved = Self {
            risk: risk.clone(),
            ..Self::default()
        };
        resolved.momentum.apply_overrides(&params.momentum)?;
        resolved.meanrev.apply_overrides(&params.meanrev)?;
        resolved.risk.apply_overrides(&params.risk)?;
        resolved.execution.apply_overrides(&params.execution)?;
        resolved.filters.apply_overrides(&params.filters)?;
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_valid_override_applies() {
        let mut cfg = MomentumConfig::default();
        cfg.apply_overrides(&MomentumOverrides {
            breakout_window: Some(30),
            min_range_bps: Some(dec!(8)),
        })
        .unwrap();
        assert_eq!(cfg.breakout_window, 30);
        assert_eq!(cfg.min_range_bps, dec!(8));
    }

    #[test]
    fn test_rejected_override_leaves_config_untouched() {
        let mut cfg = RiskConfig::default();
        let result = cfg.apply_overrides(&RiskOverrides {
            max_pos_pct: Some(dec!(0.05)),
            dd_halt: Some(dec!(1.5)),
            ..RiskOverrides::default()
        });

        assert!(matches!(
            result,
            Err(OverrideError::Invalid { field: "risk.dd_halt", .. })
        ));
        assert_eq!(cfg, RiskConfig::default());
    }

    #[test]
    fn test_execution_requires_one_slice() {
        let mut cfg = ExecutionConfig::default();
        assert!(cfg
            .apply_overrides(&ExecutionOverrides {
                micro_slices: Some(0),
                ..ExecutionOverrides::default()
            })
            .is_err());
        assert_eq!(cfg.micro_slices, 3);
    }

    #[test]
    fn test_filters_reject_inverted_emas() {
        let mut cfg = FilterConfig::default();
        let result = cfg.apply_overrides(&FilterOverrides {
            ema_fast: Some(50),
            ema_slow: Some(20),
            ..FilterOverrides::default()
        });
        assert!(result.is_err());
        assert_eq!(cfg.ema_fast, 0);
    }

    #[test]
    fn test_params_from_json() {
        let params = BacktestParams::from_json(
            r#"{"momentum": {"breakout_window": 20}, "mean_reversion": {"k": 1.5},
                "risk": {"max_pos_pct": 0.02}, "execution": {"micro_slices": 2}}"#,
        )
        .unwrap();
        let resolved = ResolvedParams::resolve(&RiskConfig::default(), &params).unwrap();

        assert_eq!(resolved.momentum.breakout_window, 20);
        assert_eq!(resolved.meanrev.k, dec!(1.5));
        assert_eq!(resolved.risk.max_pos_pct, dec!(0.02));
        assert_eq!(resolved.risk.dd_halt, dec!(0.20));
        assert_eq!(resolved.execution.micro_slices, 2);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(matches!(
            BacktestParams::from_json(r#"{"momentum": {"breakout": 20}}"#),
            Err(OverrideError::Parse(_))
        ));
        assert_eq!(BacktestParams::from_json("  ").unwrap(), BacktestParams::default());
    }
}
