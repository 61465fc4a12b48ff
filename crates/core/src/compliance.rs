//! Shariah/whitelist compliance policy.
//!
//! Trading is spot-only and long-only: symbols must be whitelisted, tokens
//! carrying a blocked tag are refused, leverage/derivative parameters are
//! rejected and sells are only allowed against existing inventory.

use crate::events::{OrderMeta, Side};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Order parameters that imply margin, derivatives or leverage.
pub const NON_SPOT_PARAMS: [&str; 7] = [
    "leverage",
    "marginMode",
    "reduceOnly",
    "positionSide",
    "contract",
    "swap",
    "futures",
];

/// Compliance violations. Raised before any state mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ComplianceError {
    #[error("symbol {0} not in whitelist; trading blocked")]
    NotWhitelisted(String),

    #[error("symbol {symbol} carries blocked tag '{tag}'")]
    BlockedTag { symbol: String, tag: String },

    #[error("non-spot or leveraged parameter '{0}' detected")]
    NonSpotParameter(String),

    #[error("short selling {0} blocked: no inventory")]
    ShortSelling(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompliancePolicy {
    /// Tradeable symbols. An empty list allows every symbol.
    pub whitelist: BTreeSet<String>,
    pub blocked_tags: BTreeSet<String>,
}

impl Default for CompliancePolicy {
    fn default() -> Self {
        Self {
            whitelist: ["BTC/USDT", "ETH/USDT", "SOL/USDT", "ADA/USDT", "XRP/USDT"]
                .into_iter()
                .map(String::from)
                .collect(),
            blocked_tags: ["gambling", "riba", "porn"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl CompliancePolicy {
    #[must_use]
    pub fn new<W, T>(whitelist: W, blocked_tags: T) -> Self
    where
        W: IntoIterator,
        W::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            whitelist: whitelist.into_iter().map(Into::into).collect(),
            blocked_tags: blocked_tags.into_iter().map(Into::into).collect(),
        }
    }

    /// # Errors
    ///
    /// Returns `ComplianceError::NotWhitelisted` if the whitelist is non-empty
    /// and does not contain `symbol`.
    pub fn assert_whitelisted(&self, symbol: &str) -> Result<(), ComplianceError> {
        if !self.whitelist.is_empty() && !self.whitelist.contains(symbol) {
            return Err(ComplianceError::NotWhitelisted(symbol.to_string()));
        }
        Ok(())
    }

    /// Whitelist plus tag screen.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn check(&self, symbol: &str, meta: &OrderMeta) -> Result<(), ComplianceError> {
        self.assert_whitelisted(symbol)?;
        if let Some(tag) = meta.tags.iter().find(|t| self.blocked_tags.contains(*t)) {
            return Err(ComplianceError::BlockedTag {
                symbol: symbol.to_string(),
                tag: tag.clone(),
            });
        }
        Ok(())
    }
}

/// # Errors
///
/// Returns `ComplianceError::NonSpotParameter` for the first forbidden key.
pub fn enforce_spot_only(params: &BTreeMap<String, String>) -> Result<(), ComplianceError> {
    match NON_SPOT_PARAMS.iter().find(|k| params.contains_key(**k)) {
        Some(key) => Err(ComplianceError::NonSpotParameter((*key).to_string())),
        None => Ok(()),
    }
}

/// Sells are allowed only to reduce existing inventory.
///
/// # Errors
///
/// Returns `ComplianceError::ShortSelling` for a sell with no inventory.
pub fn forbid_shorting(symbol: &str, side: Side, base_inventory: Decimal) -> Result<(), ComplianceError> {
    if side == Side::Sell && base_inventory <= Decimal::ZERO {
        return Err(ComplianceError::ShortSelling(symbol.to_string()));
    }
    Ok(())
}
