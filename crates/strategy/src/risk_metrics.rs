//! Drawdown and historical VaR over decimal series.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Largest peak-to-trough decline over a time-ordered equity series, as a
/// fraction of the peak. Non-positive peaks are skipped.
#[must_use]
pub fn max_drawdown(series: &[(DateTime<Utc>, Decimal)]) -> Decimal {
    let mut peak: Option<Decimal> = None;
    let mut dd = Decimal::ZERO;
    for &(_, equity) in series {
        let p = peak.map_or(equity, |p| p.max(equity));
        peak = Some(p);
        if p <= Decimal::ZERO {
            continue;
        }
        dd = dd.max((p - equity) / p);
    }
    dd
}

/// Nearest-rank percentile: sort ascending and take index `round(q * (n - 1))`.
///
/// Returns zero for an empty slice.
#[must_use]
pub fn percentile(values: &[Decimal], q: Decimal) -> Decimal {
    if values.is_empty() {
        return Decimal::ZERO;
    }
    let mut sorted = values.to_vec();
    sorted.sort();
    let q = q.clamp(Decimal::ZERO, Decimal::ONE);
    let last = sorted.len() - 1;
    let rank = (q * Decimal::from(last)).round();
    let idx = usize::try_from(rank.mantissa()).unwrap_or(0).min(last);
    sorted[idx]
}

/// Loss magnitude at `1 - confidence`, floored at zero.
#[must_use]
pub fn historical_var(returns: &[Decimal], confidence: Decimal) -> Decimal {
    if returns.is_empty() {
        return Decimal::ZERO;
    }
    (-percentile(returns, Decimal::ONE - confidence)).max(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series(values: &[Decimal]) -> Vec<(DateTime<Utc>, Decimal)> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (DateTime::from_timestamp(i as i64 * 86_400, 0).unwrap(), *v))
            .collect()
    }

    #[test]
    fn test_drawdown_peak_to_trough() {
        let eq = series(&[dec!(100), dec!(120), dec!(90), dec!(110)]);
        assert_eq!(max_drawdown(&eq), dec!(0.25));
    }

    #[test]
    fn test_drawdown_monotonic_rise() {
        let eq = series(&[dec!(100), dec!(101), dec!(102)]);
        assert_eq!(max_drawdown(&eq), Decimal::ZERO);
        assert_eq!(max_drawdown(&[]), Decimal::ZERO);
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values: Vec<Decimal> = (1..=30).map(Decimal::from).collect();
        // round(0.05 * 29) = round(1.45) = 1
        assert_eq!(percentile(&values, dec!(0.05)), dec!(2));
        assert_eq!(percentile(&values, Decimal::ONE), dec!(30));
        assert_eq!(percentile(&[], dec!(0.5)), Decimal::ZERO);
    }

    #[test]
    fn test_var_positive_loss() {
        let mut rets = vec![dec!(0.001); 27];
        rets.extend([dec!(-0.12), dec!(-0.10), dec!(-0.08)]);
        // sorted index 1 -> -0.10
        assert_eq!(historical_var(&rets, dec!(0.95)), dec!(0.10));
    }

    #[test]
    fn test_var_floors_at_zero() {
        let rets = vec![dec!(0.01); 30];
        assert_eq!(historical_var(&rets, dec!(0.95)), Decimal::ZERO);
    }
}
