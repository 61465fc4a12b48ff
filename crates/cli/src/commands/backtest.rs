//! Single backtest run from the command line.
//!
//! Loads configuration, builds a [`BacktestRequest`] from the flags and
//! prints the resulting metrics as text or JSON.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use rust_decimal::Decimal;
use spotgate_backtest::{BacktestRequest, RunOutcome};
use spotgate_core::config::AppConfig;
use spotgate_core::{ConfigLoader, MetricsFormatter};
use spotgate_data::Timeframe;
use spotgate_strategy::kind::StrategyKind;
use spotgate_strategy::overrides::BacktestParams;
use std::path::PathBuf;

/// Run window and execution flags shared by `backtest` and `sweep`.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Comma-separated spot pairs (e.g. BTC/USDT,ETH/USDT)
    #[arg(long, value_delimiter = ',', required = true)]
    pub symbols: Vec<String>,

    /// Start of the window (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub start: String,

    /// End of the window (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub end: String,

    /// Bar timeframe (1s, 5s, 15s, 30s, 1m, 3m, 5m, 15m, 30m, 1h)
    #[arg(long, default_value = "1m")]
    pub timeframe: String,

    /// Strategy stack: momentum, meanrev or ensemble
    #[arg(long, default_value = "momentum")]
    pub strategy: String,

    /// Maker fee in bps (defaults to config)
    #[arg(long)]
    pub fees_maker_bps: Option<Decimal>,

    /// Taker fee in bps (defaults to config)
    #[arg(long)]
    pub fees_taker_bps: Option<Decimal>,

    /// Slippage in bps (defaults to config)
    #[arg(long)]
    pub slippage_bps: Option<Decimal>,

    /// Seed for synthetic data
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Stop early when fills fall well short of this many per day
    #[arg(long)]
    pub early_target: Option<Decimal>,

    /// Configuration directory
    #[arg(long, default_value = "config", env = "SPOTGATE_CONFIG_DIR")]
    pub config: PathBuf,
}

impl RunArgs {
    /// Loads the application config from `--config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be read or parsed.
    pub fn load_config(&self) -> Result<AppConfig> {
        ConfigLoader::load_from(&self.config)
            .with_context(|| format!("Failed to load config from {}", self.config.display()))
    }

    /// Builds a request for `params`, filling fee gaps from `config`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparseable window, timeframe or strategy.
    pub fn request(&self, config: &AppConfig, params: BacktestParams) -> Result<BacktestRequest> {
        let timeframe = Timeframe::parse(&self.timeframe)?;
        let strategy: StrategyKind = self.strategy.parse().map_err(|e: String| anyhow!(e))?;

        let mut request = BacktestRequest::new(
            self.symbols.iter().map(|s| s.trim().to_string()).collect(),
            parse_time(&self.start)?,
            parse_time(&self.end)?,
            timeframe,
            strategy,
        );
        request.params = params;
        request.fees = config.fees;
        if let Some(bps) = self.fees_maker_bps {
            request.fees.maker_bps = bps;
        }
        if let Some(bps) = self.fees_taker_bps {
            request.fees.taker_bps = bps;
        }
        if let Some(bps) = self.slippage_bps {
            request.fees.slippage_bps = bps;
        }
        request.seed = self.seed;
        request.early_target_trades_per_day = self.early_target;
        Ok(request)
    }
}

#[derive(Args, Debug, Clone)]
pub struct BacktestArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Parameter overrides as JSON (e.g. '{"momentum": {"breakout_window": 30}}')
    #[arg(long, default_value = "")]
    pub params: String,

    /// Output directory (defaults to artifacts/backtests/<run_id>)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Keep the ledger in memory and write no files
    #[arg(long)]
    pub fast: bool,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    /// # Errors
    ///
    /// Returns an error for anything other than `text`/`txt`/`json`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(anyhow!(
                "Unknown output format: '{}'. Valid formats: text, json",
                s
            )),
        }
    }
}

/// Accepts a bare date (midnight UTC) or a full RFC 3339 timestamp and
/// returns epoch milliseconds.
///
/// # Errors
///
/// Returns an error if `s` is neither.
pub fn parse_time(s: &str) -> Result<i64> {
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let midnight = date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("Invalid date: {s}"))?;
        return Ok(midnight.and_utc().timestamp_millis());
    }
    let ts: DateTime<Utc> = s.parse().map_err(|_| {
        anyhow!("Invalid time '{s}'. Use YYYY-MM-DD or RFC 3339 (e.g. 2024-01-01T00:00:00Z)")
    })?;
    Ok(ts.timestamp_millis())
}

pub async fn run_backtest(args: BacktestArgs) -> Result<()> {
    let format = OutputFormat::parse(&args.format)?;
    let config = args.run.load_config()?;
    let params = BacktestParams::from_json(&args.params).context("Invalid --params")?;

    let mut request = args.run.request(&config, params)?;
    request.out_dir = args.out_dir;
    request.fast_mode = args.fast;

    tracing::info!(
        symbols = ?request.symbols,
        strategy = %request.strategy,
        timeframe = %request.timeframe,
        "starting backtest"
    );

    let outcome =
        tokio::task::spawn_blocking(move || spotgate_backtest::run(&request, &config)).await??;

    match (&outcome, format) {
        (RunOutcome::Completed(report), OutputFormat::Text) => {
            println!("{}", MetricsFormatter::format(&report.metrics));
            if let Some(dir) = &report.out_dir {
                println!("Outputs written to {}", dir.display());
            }
        }
        (RunOutcome::Completed(report), OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&report.metrics)?);
        }
        (RunOutcome::PrunedEarly { run_id, reason, fills }, OutputFormat::Text) => {
            println!("Run {run_id} pruned early after {fills} fills: {reason}");
        }
        (RunOutcome::PrunedEarly { run_id, reason, fills }, OutputFormat::Json) => {
            let value = serde_json::json!({
                "run_id": run_id,
                "pruned": true,
                "reason": reason,
                "fills": fills,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn run_args() -> RunArgs {
        RunArgs {
            symbols: vec!["BTC/USDT".to_string(), " ETH/USDT".to_string()],
            start: "2024-01-01".to_string(),
            end: "2024-01-02T00:00:00Z".to_string(),
            timeframe: "1m".to_string(),
            strategy: "ensemble".to_string(),
            fees_maker_bps: None,
            fees_taker_bps: Some(dec!(7)),
            slippage_bps: None,
            seed: 9,
            early_target: None,
            config: PathBuf::from("config"),
        }
    }

    #[test]
    fn output_format_parse() {
        assert_eq!(OutputFormat::parse("TEXT").unwrap(), OutputFormat::Text);
        assert_eq!(OutputFormat::parse("json").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::parse("xml").is_err());
    }

    #[test]
    fn parse_time_accepts_date_and_rfc3339() {
        assert_eq!(parse_time("2024-01-01").unwrap(), 1_704_067_200_000);
        assert_eq!(parse_time("2024-01-01T00:01:00Z").unwrap(), 1_704_067_260_000);
        assert!(parse_time("yesterday").is_err());
    }

    #[test]
    fn request_merges_flags_over_config_fees() {
        let config = AppConfig::default();
        let req = run_args().request(&config, BacktestParams::default()).unwrap();

        assert_eq!(req.symbols, vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()]);
        assert_eq!(req.strategy, StrategyKind::Ensemble);
        assert_eq!(req.end_ms - req.start_ms, 86_400_000);
        assert_eq!(req.fees.taker_bps, dec!(7));
        assert_eq!(req.fees.maker_bps, config.fees.maker_bps);
        assert_eq!(req.seed, 9);
    }

    #[test]
    fn request_rejects_unknown_strategy_and_timeframe() {
        let config = AppConfig::default();
        let mut args = run_args();
        args.strategy = "martingale".to_string();
        assert!(args.request(&config, BacktestParams::default()).is_err());

        let mut args = run_args();
        args.timeframe = "4h".to_string();
        assert!(args.request(&config, BacktestParams::default()).is_err());
    }
}
