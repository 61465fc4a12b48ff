#![allow(clippy::format_push_string)]
#![allow(clippy::uninlined_format_args)]

use crate::metrics::BacktestMetrics;

pub struct MetricsFormatter;

impl MetricsFormatter {
    #[must_use]
    pub fn format(metrics: &BacktestMetrics) -> String {
        let mut output = String::new();

        output.push('\n');
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push_str("                    BACKTEST RESULTS                           \n");
        output.push_str("═══════════════════════════════════════════════════════════════\n");
        output.push('\n');
        output.push_str(&format!("Run:                   {}\n", metrics.run_id));
        output.push('\n');

        // Time Period
        output.push_str("Time Period\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            "Start:                 {}\n",
            metrics.start_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str(&format!(
            "End:                   {}\n",
            metrics.end_time.format("%Y-%m-%d %H:%M:%S UTC")
        ));

        let duration = metrics.end_time - metrics.start_time;
        let days = duration.num_days();
        let hours = duration.num_hours() % 24;
        let minutes = duration.num_minutes() % 60;
        output.push_str(&format!(
            "Duration:              {} days {} hours {} minutes\n",
            days, hours, minutes
        ));
        output.push('\n');

        // Portfolio Performance
        output.push_str("Portfolio Performance\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!(
            "Initial Equity:        {:.2}\n",
            metrics.initial_equity
        ));
        output.push_str(&format!(
            "Final Equity:          {:.2}\n",
            metrics.final_equity
        ));
        output.push_str(&format!("Net P&L:               {:.2}\n", metrics.net_pnl));
        output.push_str(&format!(
            "Total Return:          {:.2}%\n",
            metrics.total_return() * rust_decimal::Decimal::from(100)
        ));
        output.push_str(&format!("Fees Paid:             {:.2}\n", metrics.fees_paid));
        output.push_str(&format!("Sharpe Ratio:          {:.4}\n", metrics.sharpe));
        output.push_str(&format!("Sortino Ratio:         {:.4}\n", metrics.sortino));
        output.push_str(&format!(
            "Max Drawdown:          {:.2}%\n",
            metrics.max_dd * 100.0
        ));
        output.push_str(&format!(
            "Exposure Time:         {:.2}%\n",
            metrics.exposure_time * 100.0
        ));
        output.push('\n');

        // Trade Statistics
        output.push_str("Trade Statistics\n");
        output.push_str("───────────────────────────────────────────────────────────────\n");
        output.push_str(&format!("Round Trips:           {}\n", metrics.trades));
        output.push_str(&format!("Fills:                 {}\n", metrics.fills));

        if metrics.trades > 0 {
            output.push_str(&format!(
                "Win Rate:              {:.2}%\n",
                metrics.win_rate * 100.0
            ));
            match metrics.profit_factor {
                Some(pf) => output.push_str(&format!("Profit Factor:         {:.3}\n", pf)),
                None => output.push_str("Profit Factor:         N/A (no losing trades)\n"),
            }
        } else {
            output.push_str("Win Rate:              N/A (no trades)\n");
        }

        output.push('\n');
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        if metrics.trades == 0 {
            output.push_str("\n⚠️  No trades were made during this backtest.\n");
            output.push_str("    Consider adjusting strategy parameters or data range.\n\n");
        }

        output
    }
}
