use anyhow::Result;
use rust_decimal::{Decimal, RoundingStrategy};

/// Calculate a spot position size as a fixed fraction of equity
///
/// # Arguments
/// * `account_equity` - Current account equity in quote currency
/// * `max_position_pct` - Position notional as a fraction of equity (0.0-1.0)
/// * `entry_price` - Entry price for the asset
///
/// # Returns
/// Base quantity to purchase (never negative)
///
/// # Errors
/// Returns error if parameters are invalid
pub fn calculate_position_size(
    account_equity: Decimal,
    max_position_pct: Decimal,
    entry_price: Decimal,
) -> Result<Decimal> {
    if entry_price <= Decimal::ZERO {
        anyhow::bail!("Entry price must be positive");
    }

    if max_position_pct < Decimal::ZERO || max_position_pct > Decimal::ONE {
        anyhow::bail!("Max position pct must be between 0 and 1");
    }

    let notional = account_equity * max_position_pct;
    Ok((notional / entry_price).max(Decimal::ZERO))
}

/// Stop-loss and take-profit prices for a long entry.
#[must_use]
pub fn stop_and_target(entry_price: Decimal, sl_pct: Decimal, tp_pct: Decimal) -> (Decimal, Decimal) {
    (
        entry_price * (Decimal::ONE - sl_pct),
        entry_price * (Decimal::ONE + tp_pct),
    )
}

const SLICE_DP: u32 = 12;

/// Splits `qty` into `slices` equal parts (at least one). Parts are
/// truncated to 12 decimal places and the last part absorbs the remainder,
/// so the parts always sum exactly to `qty`.
#[must_use]
pub fn micro_slices(qty: Decimal, slices: u32) -> Vec<Decimal> {
    let n = slices.max(1);
    let part = (qty / Decimal::from(n)).round_dp_with_strategy(SLICE_DP, RoundingStrategy::ToZero);
    let mut parts = vec![part; n as usize];
    if let Some(last) = parts.last_mut() {
        *last = qty - part * Decimal::from(n - 1);
    }
    parts
}
