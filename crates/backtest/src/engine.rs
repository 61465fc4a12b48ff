//! Single backtest run: load and merge ticks, drive the router, close out
//! and write the summary.
//!
//! A run is synchronous and owns all of its state, so independent runs can
//! execute in parallel on separate threads.

use crate::data_provider::TickMerger;
use crate::equity::EquityTracker;
use crate::execution::PaperBroker;
use crate::journal::{RoundTrip, TradeJournal};
use crate::manager::{ExecContext, ExecutionManager, OrderTag};
use crate::metrics::MetricsCalculator;
use crate::router::StrategyRouter;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spotgate_core::config::{AppConfig, FeesConfig, RiskConfig};
use spotgate_core::events::Tick;
use spotgate_core::ledger::{DecisionLedger, LedgerError};
use spotgate_core::metrics::BacktestMetrics;
use spotgate_core::position::Portfolio;
use spotgate_data::{DataLoader, LoaderConfig, Timeframe};
use spotgate_strategy::kind::StrategyKind;
use spotgate_strategy::overrides::{BacktestParams, ResolvedParams};
use spotgate_strategy::risk_manager::RiskGate;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

const MS_PER_DAY: i64 = 86_400_000;
/// Pruning is not considered before this fraction of the window has run.
const PRUNE_MIN_ELAPSED: Decimal = dec!(0.1);
const PRUNE_TARGET_RATIO: Decimal = dec!(0.5);

/// Everything that identifies one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub symbols: Vec<String>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub timeframe: Timeframe,
    pub strategy: StrategyKind,
    #[serde(default)]
    pub params: BacktestParams,
    #[serde(default)]
    pub fees: FeesConfig,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Output directory; defaults to `{artifacts_dir}/backtests/{run_id}`.
    #[serde(default)]
    pub out_dir: Option<PathBuf>,
    /// Keep the ledger in memory and write no files.
    #[serde(default)]
    pub fast_mode: bool,
    /// Abandon the run early when fills fall well short of this pace.
    #[serde(default)]
    pub early_target_trades_per_day: Option<Decimal>,
}

const fn default_seed() -> u64 {
    42
}

/// Hashed to derive the run id. Output location and mode are not part of a
/// run's identity.
#[derive(Serialize)]
struct RunKey<'a> {
    symbols: &'a [String],
    start_ms: i64,
    end_ms: i64,
    timeframe: Timeframe,
    strategy: StrategyKind,
    params: &'a BacktestParams,
    fees: &'a FeesConfig,
    seed: u64,
    early_target_trades_per_day: Option<Decimal>,
    initial_balance: Decimal,
    spread_bps: Decimal,
    risk: &'a RiskConfig,
}

impl BacktestRequest {
    #[must_use]
    pub fn new(
        symbols: Vec<String>,
        start_ms: i64,
        end_ms: i64,
        timeframe: Timeframe,
        strategy: StrategyKind,
    ) -> Self {
        Self {
            symbols,
            start_ms,
            end_ms,
            timeframe,
            strategy,
            params: BacktestParams::default(),
            fees: FeesConfig::default(),
            seed: default_seed(),
            out_dir: None,
            fast_mode: false,
            early_target_trades_per_day: None,
        }
    }

    /// `{strategy}-{uuid v5}` over the request and the config values that
    /// change results. Identical inputs always give the same id.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn run_id(&self, config: &AppConfig) -> Result<String> {
        let key = RunKey {
            symbols: &self.symbols,
            start_ms: self.start_ms,
            end_ms: self.end_ms,
            timeframe: self.timeframe,
            strategy: self.strategy,
            params: &self.params,
            fees: &self.fees,
            seed: self.seed,
            early_target_trades_per_day: self.early_target_trades_per_day,
            initial_balance: config.initial_balance,
            spread_bps: config.spread_bps,
            risk: &config.risk,
        };
        let bytes = serde_json::to_vec(&key).context("Failed to serialize run key")?;
        let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, &bytes);
        Ok(format!("{}-{}", self.strategy, id))
    }
}

/// Completed run: metrics, round trips and where outputs were written.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub trades: Vec<RoundTrip>,
    pub out_dir: Option<PathBuf>,
    pub ledger_records: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(BacktestReport),
    /// The run fell too far behind its trade-rate target and was stopped.
    PrunedEarly {
        run_id: String,
        reason: String,
        fills: usize,
    },
}

impl RunOutcome {
    #[must_use]
    pub const fn metrics(&self) -> Option<&BacktestMetrics> {
        match self {
            Self::Completed(report) => Some(&report.metrics),
            Self::PrunedEarly { .. } => None,
        }
    }

    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::Completed(report) => &report.metrics.run_id,
            Self::PrunedEarly { run_id, .. } => run_id,
        }
    }
}

/// Runs one backtest.
///
/// # Errors
///
/// Returns an error for a non-whitelisted symbol, invalid overrides, an
/// empty or inverted window, unreadable data, or a failed ledger/output
/// write. Early pruning is not an error.
pub fn run(request: &BacktestRequest, config: &AppConfig) -> Result<RunOutcome> {
    if request.symbols.is_empty() {
        bail!("No symbols requested");
    }
    if request.end_ms <= request.start_ms {
        bail!(
            "End ({}) must be after start ({})",
            request.end_ms,
            request.start_ms
        );
    }
    let start_time = millis_to_utc(request.start_ms)?;
    let end_time = millis_to_utc(request.end_ms)?;

    let policy = config.compliance.policy();
    for symbol in &request.symbols {
        policy.assert_whitelisted(symbol)?;
    }
    let params = ResolvedParams::resolve(&config.risk, &request.params)
        .context("Invalid parameter overrides")?;
    let run_id = request.run_id(config)?;

    let out_dir = (!request.fast_mode).then(|| {
        request
            .out_dir
            .clone()
            .unwrap_or_else(|| config.artifacts_dir.join("backtests").join(&run_id))
    });
    let ledger = match &out_dir {
        Some(dir) => DecisionLedger::open(dir.join("ledger.jsonl"))
            .with_context(|| format!("Failed to open ledger in {}", dir.display()))?,
        None => DecisionLedger::in_memory(),
    };

    let loader = DataLoader::new(LoaderConfig {
        data_dir: config.data_dir.clone(),
        exchange: config.exchange.clone(),
        synthesize_missing: config.synthesize_missing,
        seed: request.seed,
    });
    let merger = TickMerger::from_loader(
        &loader,
        &request.symbols,
        request.timeframe,
        request.start_ms,
        request.end_ms,
        config.spread_bps,
    )
    .context("Failed to load market data")?;

    let initial_equity = config.initial_balance;
    let mut exec = ExecutionManager::new(ExecContext {
        portfolio: Portfolio::new(
            config.quote_currency.clone(),
            initial_equity,
            request.fees.maker_bps,
            request.fees.taker_bps,
        ),
        broker: PaperBroker::new(request.fees.slippage_bps),
        gate: RiskGate::new(params.risk.clone(), policy),
        ledger,
        journal: TradeJournal::new(),
        fills: 0,
        fees_paid: Decimal::ZERO,
    });
    let mut router = StrategyRouter::new(request.strategy, &params);
    let mut tracker = EquityTracker::new();
    let mut metrics = MetricsCalculator::new(initial_equity, request.timeframe.seconds());
    let mut marks: BTreeMap<String, Decimal> = BTreeMap::new();
    let mut last_ticks: BTreeMap<String, Tick> = BTreeMap::new();

    info!(
        run_id = %run_id,
        symbols = ?request.symbols,
        timeframe = %request.timeframe,
        strategy = %request.strategy,
        ticks = merger.remaining(),
        "backtest started"
    );
    exec.ctx_mut().ledger.append(
        start_time,
        "run_start",
        &json!({
            "run_id": run_id,
            "symbols": request.symbols,
            "timeframe": request.timeframe,
            "strategy": request.strategy,
            "params": request.params,
            "seed": request.seed,
        }),
    )?;

    for (symbol, tick) in merger {
        marks.insert(symbol.clone(), tick.last);
        exec.on_tick(&tick)?;
        router.on_tick(&tick, &mut exec, &marks, &tracker)?;

        let equity = exec.ctx().portfolio.equity(&marks);
        tracker.record(tick.timestamp, equity);
        metrics.record(equity, exec.ctx().portfolio.open_positions() > 0);
        {
            let ctx = exec.ctx_mut();
            ctx.gate
                .update_drawdown(initial_equity, equity, tick.timestamp, &mut ctx.ledger)?;
        }

        let now = tick.timestamp;
        last_ticks.insert(symbol, tick);

        if let Some(reason) = prune_reason(request, now.timestamp_millis(), exec.ctx().fills) {
            let fills = exec.ctx().fills;
            info!(run_id = %run_id, %reason, "run pruned early");
            exec.ctx_mut().ledger.append(
                now,
                "run_pruned",
                &json!({ "run_id": run_id, "reason": reason, "fills": fills }),
            )?;
            return Ok(RunOutcome::PrunedEarly {
                run_id,
                reason,
                fills,
            });
        }
    }

    close_out(&mut exec, &last_ticks, &marks, &mut metrics)?;

    let ctx = exec.into_context();
    let final_equity = ctx.portfolio.equity(&marks);
    let ledger_records = ctx.ledger.len();
    let trades = ctx.journal.into_closed();
    let summary = metrics.calculate(
        &run_id,
        start_time,
        end_time,
        &trades,
        ctx.fills,
        ctx.fees_paid,
        final_equity,
    );

    if let Some(dir) = &out_dir {
        write_outputs(dir, &summary, &trades)?;
    }
    if metrics.ticks() == 0 {
        warn!(run_id = %run_id, "no ticks in window, metrics are empty");
    }

    info!(
        run_id = %run_id,
        trades = summary.trades,
        fills = summary.fills,
        net_pnl = %summary.net_pnl,
        sharpe = summary.sharpe,
        max_dd = summary.max_dd,
        "backtest finished"
    );

    Ok(RunOutcome::Completed(BacktestReport {
        metrics: summary,
        trades,
        out_dir,
        ledger_records,
    }))
}

/// Sells every remaining position at its symbol's last tick. When anything
/// was sold, the post-close equity is recorded so close-out fees and
/// slippage reach the metrics curve.
fn close_out(
    exec: &mut ExecutionManager,
    last_ticks: &BTreeMap<String, Tick>,
    marks: &BTreeMap<String, Decimal>,
    metrics: &mut MetricsCalculator,
) -> Result<(), LedgerError> {
    let no_features = BTreeMap::new();
    let mut closed = false;
    for (symbol, tick) in last_ticks {
        let base = exec.ctx().portfolio.base_qty(symbol);
        if base > Decimal::ZERO {
            let tag = OrderTag {
                reason: "eod",
                features: &no_features,
            };
            closed |= !exec.submit_exit(symbol, base, 1, tick, tag)?.is_empty();
        }
    }
    if closed {
        metrics.record(exec.ctx().portfolio.equity(marks), false);
    }
    Ok(())
}

/// Reason to stop early, if fills are below half the target pace after at
/// least 10% of the window.
fn prune_reason(request: &BacktestRequest, tick_ms: i64, fills: usize) -> Option<String> {
    let target = request.early_target_trades_per_day?;
    let span = request.end_ms - request.start_ms;
    let elapsed = tick_ms - request.start_ms;
    if span <= 0 || elapsed <= 0 {
        return None;
    }
    if Decimal::from(elapsed) / Decimal::from(span) < PRUNE_MIN_ELAPSED {
        return None;
    }

    let elapsed_days = Decimal::from(elapsed) / Decimal::from(MS_PER_DAY);
    let required = PRUNE_TARGET_RATIO * target * elapsed_days;
    let actual = Decimal::from(fills);
    (actual < required).then(|| {
        format!(
            "{} fills after {} days, below {} required",
            actual,
            elapsed_days.round_dp(3),
            required.round_dp(2)
        )
    })
}

fn millis_to_utc(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).with_context(|| format!("Timestamp {ms} out of range"))
}

fn write_outputs(dir: &Path, summary: &BacktestMetrics, trades: &[RoundTrip]) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let summary_path = dir.join("summary.json");
    let json = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    fs::write(&summary_path, json)
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;

    let trades_path = dir.join("trades.jsonl");
    let file = fs::File::create(&trades_path)
        .with_context(|| format!("Failed to create {}", trades_path.display()))?;
    let mut writer = BufWriter::new(file);
    for trade in trades {
        serde_json::to_writer(&mut writer, trade).context("Failed to serialize trade")?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BacktestRequest {
        let tf = Timeframe::parse("1m").unwrap();
        BacktestRequest::new(
            vec!["BTC/USDT".to_string()],
            1_704_067_200_000,
            1_704_067_200_000 + 10 * MS_PER_DAY,
            tf,
            StrategyKind::Momentum,
        )
    }

    #[test]
    fn test_run_id_is_stable_and_sensitive_to_params() {
        let config = AppConfig::default();
        let a = request();
        let mut b = request();
        b.out_dir = Some(PathBuf::from("/tmp/elsewhere"));
        b.fast_mode = true;

        assert_eq!(a.run_id(&config).unwrap(), b.run_id(&config).unwrap());
        assert!(a.run_id(&config).unwrap().starts_with("momentum-"));

        let mut c = request();
        c.seed = 7;
        assert_ne!(a.run_id(&config).unwrap(), c.run_id(&config).unwrap());
    }

    #[test]
    fn test_request_serde_round_trip() {
        let mut req = request();
        req.seed = 7;
        req.early_target_trades_per_day = Some(dec!(12.5));
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"timeframe\":\"1m\""));
        assert_eq!(serde_json::from_str::<BacktestRequest>(&json).unwrap(), req);

        let minimal = r#"{"symbols": ["BTC/USDT"], "start_ms": 0, "end_ms": 60000,
            "timeframe": "15s", "strategy": "meanrev"}"#;
        let parsed: BacktestRequest = serde_json::from_str(minimal).unwrap();
        assert_eq!(parsed.timeframe.seconds(), 15);
        assert_eq!(parsed.seed, 42);
        assert_eq!(parsed.fees, FeesConfig::default());
    }

    #[test]
    fn test_prune_waits_for_ten_percent_of_window() {
        let mut req = request();
        req.early_target_trades_per_day = Some(dec!(10));

        // half a day into a ten-day window
        let early = req.start_ms + MS_PER_DAY / 2;
        assert!(prune_reason(&req, early, 0).is_none());

        let later = req.start_ms + MS_PER_DAY;
        assert!(prune_reason(&req, later, 4).is_some());
        assert!(prune_reason(&req, later, 5).is_none());
    }

    #[test]
    fn test_no_prune_without_target() {
        let req = request();
        assert!(prune_reason(&req, req.end_ms, 0).is_none());
    }

    #[test]
    fn test_rejects_non_whitelisted_symbol() {
        let mut req = request();
        req.symbols = vec!["DOGE/USDT".to_string()];
        req.fast_mode = true;

        let err = run(&req, &AppConfig::default()).unwrap_err();
        assert!(err
            .downcast_ref::<spotgate_core::compliance::ComplianceError>()
            .is_some());
    }

    #[test]
    fn test_close_out_costs_reach_metrics() {
        use spotgate_core::compliance::CompliancePolicy;
        use spotgate_core::config::RiskConfig;

        let mut exec = ExecutionManager::new(ExecContext {
            portfolio: Portfolio::new("USDT", dec!(10000), dec!(2), dec!(5)),
            broker: PaperBroker::new(dec!(10)),
            gate: RiskGate::new(RiskConfig::default(), CompliancePolicy::default()),
            ledger: DecisionLedger::in_memory(),
            journal: TradeJournal::new(),
            fills: 0,
            fees_paid: Decimal::ZERO,
        });
        exec.ctx_mut()
            .portfolio
            .buy("BTC/USDT", dec!(10), dec!(100), false)
            .unwrap();

        let ts = millis_to_utc(1_704_067_200_000).unwrap();
        let tick = Tick::from_bar("BTC/USDT", ts, dec!(100), dec!(100), dec!(100), dec!(100), dec!(1), dec!(2));
        let marks = BTreeMap::from([("BTC/USDT".to_string(), dec!(100))]);
        let last_ticks = BTreeMap::from([("BTC/USDT".to_string(), tick)]);

        let mut metrics = MetricsCalculator::new(dec!(10000), 60);
        metrics.record(exec.ctx().portfolio.equity(&marks), true);
        close_out(&mut exec, &last_ticks, &marks, &mut metrics).unwrap();

        assert_eq!(exec.ctx().portfolio.base_qty("BTC/USDT"), Decimal::ZERO);
        assert_eq!(metrics.ticks(), 2);
        assert!(metrics.max_drawdown() > 0.0);

        // nothing left to sell: no extra sample
        close_out(&mut exec, &last_ticks, &marks, &mut metrics).unwrap();
        assert_eq!(metrics.ticks(), 2);
    }

    #[test]
    fn test_rejects_inverted_window() {
        let mut req = request();
        req.end_ms = req.start_ms;
        assert!(run(&req, &AppConfig::default()).is_err());
    }
}
