//! Rolling account history fed to the risk gate.

use chrono::{DateTime, Duration, DurationRound, NaiveDate, Utc};
use rust_decimal::Decimal;
use spotgate_core::traits::RiskView;
use std::collections::VecDeque;

const LOOKBACK_DAYS: i64 = 30;

/// Equity history bounded to the last 30 days.
///
/// The drawdown series keeps the last sample of each hour, so a month of
/// 1-second ticks still yields at most ~720 points. Daily returns are taken
/// between consecutive UTC-day closes.
#[derive(Debug, Clone, Default)]
pub struct EquityTracker {
    hourly: VecDeque<(DateTime<Utc>, DateTime<Utc>, Decimal)>,
    daily: VecDeque<(NaiveDate, Decimal)>,
    latest: Option<(DateTime<Utc>, Decimal)>,
}

impl EquityTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ts: DateTime<Utc>, equity: Decimal) {
        let hour = ts.duration_trunc(Duration::hours(1)).unwrap_or(ts);
        match self.hourly.back_mut() {
            Some((bucket, sample_ts, value)) if *bucket == hour => {
                *sample_ts = ts;
                *value = equity;
            }
            _ => self.hourly.push_back((hour, ts, equity)),
        }

        let day = ts.date_naive();
        match self.daily.back_mut() {
            Some((d, close)) if *d == day => *close = equity,
            _ => self.daily.push_back((day, equity)),
        }

        self.latest = Some((ts, equity));
        self.prune(ts);
    }

    #[must_use]
    pub fn latest(&self) -> Option<(DateTime<Utc>, Decimal)> {
        self.latest
    }

    fn prune(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(LOOKBACK_DAYS);
        while self.hourly.front().is_some_and(|(_, t, _)| *t < cutoff) {
            self.hourly.pop_front();
        }
        // one extra close so the first in-window day still has a return
        let day_cutoff = cutoff.date_naive() - Duration::days(1);
        while self.daily.front().is_some_and(|(d, _)| *d < day_cutoff) {
            self.daily.pop_front();
        }
    }
}

impl RiskView for EquityTracker {
    fn equity_series_30d(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, Decimal)> {
        let cutoff = now - Duration::days(LOOKBACK_DAYS);
        self.hourly
            .iter()
            .filter(|(_, t, _)| *t >= cutoff && *t <= now)
            .map(|(_, t, v)| (*t, *v))
            .collect()
    }

    fn daily_returns_30d(&self, now: DateTime<Utc>) -> Vec<Decimal> {
        let first_day = (now - Duration::days(LOOKBACK_DAYS)).date_naive();
        let today = now.date_naive();
        let closes: Vec<&(NaiveDate, Decimal)> = self
            .daily
            .iter()
            .filter(|(d, _)| *d <= today)
            .collect();

        closes
            .windows(2)
            .filter(|w| w[1].0 >= first_day)
            .filter(|w| w[0].1 > Decimal::ZERO)
            .map(|w| w[1].1 / w[0].1 - Decimal::ONE)
            .collect()
    }
}
