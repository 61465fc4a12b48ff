//! Parameter sweep: one backtest per entry of a JSON grid, run in parallel.
//!
//! Each run is synchronous and owns its own state, so runs are handed to the
//! blocking pool with a semaphore capping how many execute at once.

use super::backtest::RunArgs;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use spotgate_backtest::RunOutcome;
use spotgate_core::config::AppConfig;
use spotgate_strategy::overrides::BacktestParams;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// JSON file holding an array of parameter sets
    #[arg(long)]
    pub grid: PathBuf,

    /// Maximum concurrent runs (defaults to available cores)
    #[arg(long)]
    pub jobs: Option<usize>,

    /// Write ledger and summaries for every run instead of fast mode, under
    /// `{artifacts_dir}/backtests/{run_id}-{index}`
    #[arg(long)]
    pub keep_artifacts: bool,

    /// Optional JSON file for the ranked results
    #[arg(long)]
    pub output: Option<PathBuf>,
}

/// One row of the sweep table.
#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub index: usize,
    pub run_id: String,
    pub params: BacktestParams,
    pub pruned: Option<String>,
    pub trades: usize,
    pub net_pnl: String,
    pub sharpe: f64,
    pub max_dd: f64,
}

impl SweepResult {
    fn from_outcome(index: usize, params: BacktestParams, outcome: &RunOutcome) -> Self {
        match outcome {
            RunOutcome::Completed(report) => {
                let m = &report.metrics;
                Self {
                    index,
                    run_id: m.run_id.clone(),
                    params,
                    pruned: None,
                    trades: m.trades,
                    net_pnl: m.net_pnl.round_dp(2).to_string(),
                    sharpe: m.sharpe,
                    max_dd: m.max_dd,
                }
            }
            RunOutcome::PrunedEarly { run_id, reason, .. } => Self {
                index,
                run_id: run_id.clone(),
                params,
                pruned: Some(reason.clone()),
                trades: 0,
                net_pnl: "-".to_string(),
                sharpe: 0.0,
                max_dd: 0.0,
            },
        }
    }
}

/// Reads the grid file.
///
/// # Errors
///
/// Returns an error if the file is unreadable or not an array of parameter
/// sets with known keys.
pub fn load_grid(path: &std::path::Path) -> Result<Vec<BacktestParams>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read grid {}", path.display()))?;
    let grid: Vec<BacktestParams> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid parameter grid in {}", path.display()))?;
    Ok(grid)
}

#[must_use]
pub fn job_dir(config: &AppConfig, run_id: &str, index: usize) -> PathBuf {
    config
        .artifacts_dir
        .join("backtests")
        .join(format!("{run_id}-{index}"))
}

/// Completed runs first by descending sharpe, pruned runs last; ties keep
/// grid order.
pub fn rank(results: &mut [SweepResult]) {
    results.sort_by(|a, b| {
        a.pruned
            .is_some()
            .cmp(&b.pruned.is_some())
            .then_with(|| b.sharpe.partial_cmp(&a.sharpe).unwrap_or(Ordering::Equal))
            .then_with(|| a.index.cmp(&b.index))
    });
}

pub async fn run_sweep(args: SweepArgs) -> Result<()> {
    let config = Arc::new(args.run.load_config()?);
    let grid = load_grid(&args.grid)?;
    if grid.is_empty() {
        println!("Grid {} is empty; nothing to run", args.grid.display());
        return Ok(());
    }

    let jobs = args
        .jobs
        .unwrap_or_else(|| std::thread::available_parallelism().map_or(1, usize::from))
        .max(1);
    tracing::info!(runs = grid.len(), jobs, "starting sweep");

    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut set = JoinSet::new();

    for (index, params) in grid.into_iter().enumerate() {
        let mut request = args.run.request(&config, params.clone())?;
        request.fast_mode = !args.keep_artifacts;
        if args.keep_artifacts {
            // identical grid entries share a run id, so each job gets its own ledger
            request.out_dir = Some(job_dir(&config, &request.run_id(&config)?, index));
        }
        let config = Arc::clone(&config);
        let permit = Arc::clone(&semaphore).acquire_owned().await?;

        set.spawn_blocking(move || {
            let _permit = permit;
            let outcome = spotgate_backtest::run(&request, &config);
            (index, params, outcome)
        });
    }

    let mut results = Vec::new();
    while let Some(joined) = set.join_next().await {
        let (index, params, outcome) = joined?;
        match outcome {
            Ok(outcome) => results.push(SweepResult::from_outcome(index, params, &outcome)),
            Err(e) => {
                // configuration and compliance errors apply to every run
                set.abort_all();
                return Err(e.context(format!("Run {index} failed")));
            }
        }
    }
    rank(&mut results);

    println!(
        "{:>4}  {:<48}  {:>7}  {:>12}  {:>9}  {:>7}",
        "#", "run_id", "trades", "net_pnl", "sharpe", "max_dd"
    );
    for r in &results {
        match &r.pruned {
            None => println!(
                "{:>4}  {:<48}  {:>7}  {:>12}  {:>9.4}  {:>6.2}%",
                r.index,
                r.run_id,
                r.trades,
                r.net_pnl,
                r.sharpe,
                r.max_dd * 100.0
            ),
            Some(reason) => println!("{:>4}  {:<48}  pruned: {}", r.index, r.run_id, reason),
        }
    }

    if let Some(path) = &args.output {
        std::fs::write(path, serde_json::to_string_pretty(&results)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Results written to {}", path.display());
    }

    Ok(())
}
