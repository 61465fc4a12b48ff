use crate::journal::RoundTrip;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use spotgate_core::metrics::BacktestMetrics;

const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 3600.0;
const STD_FLOOR: f64 = 1e-9;

/// Welford accumulator; `std` is the population standard deviation.
#[derive(Debug, Clone, Copy, Default)]
struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    fn push(&mut self, x: f64) {
        self.count += 1;
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    fn std(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = self.count as f64;
        (self.m2 / n).sqrt()
    }
}

/// Streams the per-tick equity curve and turns it into a
/// [`BacktestMetrics`] record at the end of a run.
pub struct MetricsCalculator {
    initial_equity: Decimal,
    annualization: f64,
    prev_equity: Option<Decimal>,
    peak: Decimal,
    max_drawdown: Decimal,
    returns: RunningStats,
    downside: RunningStats,
    ticks: usize,
    exposed_ticks: usize,
}

impl MetricsCalculator {
    /// Creates a calculator for a run starting at `initial_equity` on bars
    /// of `timeframe_secs`.
    #[must_use]
    pub fn new(initial_equity: Decimal, timeframe_secs: u32) -> Self {
        Self {
            initial_equity,
            annualization: (SECONDS_PER_YEAR / f64::from(timeframe_secs.max(1))).sqrt(),
            prev_equity: None,
            peak: initial_equity,
            max_drawdown: Decimal::ZERO,
            returns: RunningStats::default(),
            downside: RunningStats::default(),
            ticks: 0,
            exposed_ticks: 0,
        }
    }

    /// Adds one equity sample. `exposed` is whether any position was open.
    pub fn record(&mut self, equity: Decimal, exposed: bool) {
        self.ticks += 1;
        if exposed {
            self.exposed_ticks += 1;
        }

        if let Some(prev) = self.prev_equity {
            if prev > Decimal::ZERO {
                let r = to_f64(equity / prev - Decimal::ONE);
                self.returns.push(r);
                if r < 0.0 {
                    self.downside.push(r);
                }
            }
        }
        self.prev_equity = Some(equity);

        if equity > self.peak {
            self.peak = equity;
        }
        if self.peak > Decimal::ZERO {
            let drawdown = (self.peak - equity) / self.peak;
            if drawdown > self.max_drawdown {
                self.max_drawdown = drawdown;
            }
        }
    }

    #[must_use]
    pub const fn ticks(&self) -> usize {
        self.ticks
    }

    #[must_use]
    pub fn sharpe(&self) -> f64 {
        if self.returns.count == 0 {
            return 0.0;
        }
        self.returns.mean / floor_std(self.returns.std()) * self.annualization
    }

    /// Zero when the run never had a losing tick.
    #[must_use]
    pub fn sortino(&self) -> f64 {
        if self.returns.count == 0 || self.downside.count == 0 {
            return 0.0;
        }
        self.returns.mean / floor_std(self.downside.std()) * self.annualization
    }

    #[must_use]
    pub fn max_drawdown(&self) -> f64 {
        to_f64(self.max_drawdown)
    }

    /// Calculates the final metrics record.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn calculate(
        &self,
        run_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        trades: &[RoundTrip],
        fills: usize,
        fees_paid: Decimal,
        final_equity: Decimal,
    ) -> BacktestMetrics {
        let wins = trades.iter().filter(|t| t.is_win()).count();
        #[allow(clippy::cast_precision_loss)]
        let win_rate = if trades.is_empty() {
            0.0
        } else {
            wins as f64 / trades.len() as f64
        };

        #[allow(clippy::cast_precision_loss)]
        let exposure_time = if self.ticks == 0 {
            0.0
        } else {
            self.exposed_ticks as f64 / self.ticks as f64
        };

        BacktestMetrics {
            run_id: run_id.to_string(),
            start_time,
            end_time,
            trades: trades.len(),
            fills,
            win_rate,
            initial_equity: self.initial_equity,
            final_equity,
            net_pnl: final_equity - self.initial_equity,
            fees_paid,
            max_dd: self.max_drawdown(),
            sharpe: self.sharpe(),
            sortino: self.sortino(),
            profit_factor: profit_factor(trades),
            exposure_time,
        }
    }
}

/// Gross profit over absolute gross loss of round trips; `None` without a
/// losing trade.
#[must_use]
pub fn profit_factor(trades: &[RoundTrip]) -> Option<f64> {
    let (profit, loss) = trades.iter().fold((Decimal::ZERO, Decimal::ZERO), |(p, l), t| {
        if t.net_pnl > Decimal::ZERO {
            (p + t.net_pnl, l)
        } else {
            (p, l - t.net_pnl)
        }
    });
    if loss > Decimal::ZERO {
        Some(to_f64(profit / loss))
    } else {
        None
    }
}

fn floor_std(std: f64) -> f64 {
    if std > 0.0 {
        std
    } else {
        STD_FLOOR
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}
