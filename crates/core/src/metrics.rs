use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Summary record of one backtest run, as consumed by parameter search.
///
/// Money fields are exact decimals; ratios are `f64`. `profit_factor` is
/// `None` when the run had no losing round trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub run_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Completed round trips (entry to flat).
    pub trades: usize,
    /// Individual executed fills.
    pub fills: usize,
    pub win_rate: f64,
    pub initial_equity: Decimal,
    pub final_equity: Decimal,
    pub net_pnl: Decimal,
    pub fees_paid: Decimal,
    pub max_dd: f64,
    pub sharpe: f64,
    pub sortino: f64,
    pub profit_factor: Option<f64>,
    /// Fraction of ticks with at least one open position.
    pub exposure_time: f64,
}

impl BacktestMetrics {
    #[must_use]
    pub fn total_return(&self) -> Decimal {
        if self.initial_equity > Decimal::ZERO {
            self.net_pnl / self.initial_equity
        } else {
            Decimal::ZERO
        }
    }
}
