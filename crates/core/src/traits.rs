use crate::events::{EntrySignal, Tick};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Entry-signal generator fed one tick at a time.
///
/// Every strategy sees every tick of every symbol, whether or not its signal
/// is used, so rolling windows stay aligned across strategies.
pub trait Strategy: Send {
    fn on_tick(&mut self, tick: &Tick) -> Option<EntrySignal>;
    fn name(&self) -> &str;
}

/// Read-only account history consumed by the trade gate.
pub trait RiskView {
    /// Equity samples in time order for the 30 days ending at `now`.
    fn equity_series_30d(&self, now: DateTime<Utc>) -> Vec<(DateTime<Utc>, Decimal)>;

    /// Day-over-day equity returns for the 30 days ending at `now`.
    fn daily_returns_30d(&self, now: DateTime<Utc>) -> Vec<Decimal>;
}

/// Fixed history, used where no account exists yet (and in tests).
#[derive(Debug, Clone, Default)]
pub struct StaticRiskView {
    pub equity: Vec<(DateTime<Utc>, Decimal)>,
    pub daily_returns: Vec<Decimal>,
}

impl RiskView for StaticRiskView {
    fn equity_series_30d(&self, _now: DateTime<Utc>) -> Vec<(DateTime<Utc>, Decimal)> {
        self.equity.clone()
    }

    fn daily_returns_30d(&self, _now: DateTime<Utc>) -> Vec<Decimal> {
        self.daily_returns.clone()
    }
}
