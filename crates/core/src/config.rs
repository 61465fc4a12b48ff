use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::compliance::CompliancePolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Root of the OHLCV CSV cache (`{data_dir}/{exchange}/{BASE-QUOTE}_{tf}.csv`).
    pub data_dir: PathBuf,
    /// Default parent directory for run outputs.
    pub artifacts_dir: PathBuf,
    pub exchange: String,
    pub quote_currency: String,
    pub initial_balance: Decimal,
    /// Synthetic spread applied around bar closes, in basis points.
    pub spread_bps: Decimal,
    /// Generate seeded synthetic bars when a cache file is missing.
    pub synthesize_missing: bool,
    pub compliance: ComplianceConfig,
    pub risk: RiskConfig,
    pub fees: FeesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            artifacts_dir: PathBuf::from("artifacts"),
            exchange: "bitget".to_string(),
            quote_currency: "USDT".to_string(),
            initial_balance: dec!(10000),
            spread_bps: dec!(1.0),
            synthesize_missing: false,
            compliance: ComplianceConfig::default(),
            risk: RiskConfig::default(),
            fees: FeesConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    pub whitelist: Vec<String>,
    pub blocked_tags: Vec<String>,
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        let policy = CompliancePolicy::default();
        Self {
            whitelist: policy.whitelist.into_iter().collect(),
            blocked_tags: policy.blocked_tags.into_iter().collect(),
        }
    }
}

impl ComplianceConfig {
    #[must_use]
    pub fn policy(&self) -> CompliancePolicy {
        CompliancePolicy::new(self.whitelist.iter().cloned(), self.blocked_tags.iter().cloned())
    }
}

/// Fee schedule in basis points of notional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesConfig {
    pub maker_bps: Decimal,
    pub taker_bps: Decimal,
    pub slippage_bps: Decimal,
}

impl Default for FeesConfig {
    fn default() -> Self {
        Self {
            maker_bps: dec!(2),
            taker_bps: dec!(5),
            slippage_bps: dec!(2),
        }
    }
}

/// Thresholds for position sizing, drawdown latches and the trade gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Fraction of equity committed per entry.
    pub max_pos_pct: Decimal,
    pub per_trade_sl_pct: Decimal,
    pub tp_pct: Decimal,
    /// Run drawdown (vs. starting equity) that stops new entries.
    pub dd_soft: Decimal,
    pub dd_hard: Decimal,
    /// Drop from the trailing window reference that pauses trading (strict `>`).
    pub flash_crash_drop_1h: Decimal,
    pub flash_window_secs: i64,
    pub max_concurrent_pos: usize,
    pub kill_switch_breaches: usize,
    /// 30-day drawdown levels checked by the trade gate.
    pub dd_warn: Decimal,
    pub dd_halt: Decimal,
    /// Maximum 1-day historical VaR before orders are stepped down.
    pub var_max: Decimal,
    pub var_confidence: Decimal,
    pub step_down_factor: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_pos_pct: dec!(0.015),
            per_trade_sl_pct: dec!(0.003),
            tp_pct: dec!(0.002),
            dd_soft: dec!(0.03),
            dd_hard: dec!(0.05),
            flash_crash_drop_1h: dec!(0.30),
            flash_window_secs: 3600,
            max_concurrent_pos: 5,
            kill_switch_breaches: 3,
            dd_warn: dec!(0.15),
            dd_halt: dec!(0.20),
            var_max: dec!(0.05),
            var_confidence: dec!(0.95),
            step_down_factor: dec!(0.5),
        }
    }
}
