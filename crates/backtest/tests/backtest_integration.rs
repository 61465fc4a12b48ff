use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use spotgate_backtest::{run, BacktestRequest, RunOutcome, TickMerger};
use spotgate_core::config::AppConfig;
use spotgate_core::ledger::verify_chain;
use spotgate_data::{CsvStorage, DataLoader, LoaderConfig, OhlcvBar, Timeframe};
use spotgate_strategy::kind::StrategyKind;
use spotgate_strategy::overrides::BacktestParams;
use std::path::Path;

const START_MS: i64 = 1_704_067_200_000;
const MINUTE_MS: i64 = 60_000;

/// Oscillating series with periodic breakouts so momentum trades.
fn write_bars(data_dir: &Path, symbol: &str, minutes: i64, base: Decimal) {
    let bars: Vec<OhlcvBar> = (0..minutes)
        .map(|i| {
            let wave = Decimal::from(i % 30) * dec!(0.05);
            let drift = Decimal::from(i / 30) * dec!(0.2);
            let close = base + wave + drift;
            OhlcvBar::new(
                START_MS + i * MINUTE_MS,
                close - dec!(0.02),
                close + dec!(0.05),
                close - dec!(0.05),
                close,
                dec!(10),
            )
        })
        .collect();
    let file = data_dir
        .join("bitget")
        .join(format!("{}_1m.csv", symbol.replace('/', "-")));
    CsvStorage::write_ohlcv(&file, &bars).unwrap();
}

fn config(root: &Path) -> AppConfig {
    AppConfig {
        data_dir: root.join("data"),
        artifacts_dir: root.join("artifacts"),
        ..AppConfig::default()
    }
}

fn request(params: BacktestParams) -> BacktestRequest {
    let mut req = BacktestRequest::new(
        vec!["BTC/USDT".to_string(), "ETH/USDT".to_string()],
        START_MS,
        START_MS + 600 * MINUTE_MS,
        Timeframe::parse("1m").unwrap(),
        StrategyKind::Momentum,
    );
    req.params = params;
    req
}

fn momentum_params() -> BacktestParams {
    BacktestParams::from_json(r#"{"momentum": {"breakout_window": 20, "min_range_bps": 1}}"#)
        .unwrap()
}

#[test]
fn test_identical_runs_write_identical_summaries() {
    let dir = tempfile::tempdir().unwrap();
    write_bars(&dir.path().join("data"), "BTC/USDT", 600, dec!(100));
    write_bars(&dir.path().join("data"), "ETH/USDT", 600, dec!(50));
    let cfg = config(dir.path());

    let mut first = request(momentum_params());
    first.out_dir = Some(dir.path().join("run-a"));
    let mut second = request(momentum_params());
    second.out_dir = Some(dir.path().join("run-b"));

    let a = run(&first, &cfg).unwrap();
    let b = run(&second, &cfg).unwrap();

    let summary_a = std::fs::read(dir.path().join("run-a/summary.json")).unwrap();
    let summary_b = std::fs::read(dir.path().join("run-b/summary.json")).unwrap();
    assert_eq!(summary_a, summary_b);
    assert_eq!(a.run_id(), b.run_id());

    let metrics = a.metrics().unwrap();
    assert!(metrics.fills > 0, "fixture should produce trades");
    assert!(dir.path().join("run-a/trades.jsonl").exists());
}

#[test]
fn test_ledger_chain_verifies_and_books_balance() {
    let dir = tempfile::tempdir().unwrap();
    write_bars(&dir.path().join("data"), "BTC/USDT", 600, dec!(100));
    write_bars(&dir.path().join("data"), "ETH/USDT", 600, dec!(50));
    let cfg = config(dir.path());

    let mut req = request(momentum_params());
    req.out_dir = Some(dir.path().join("run"));

    let RunOutcome::Completed(report) = run(&req, &cfg).unwrap() else {
        panic!("run should complete");
    };

    let records = verify_chain(dir.path().join("run/ledger.jsonl")).unwrap();
    assert_eq!(records, report.ledger_records);
    assert!(records > 1);

    // every position is closed at the end, so equity is all cash
    let m = &report.metrics;
    assert_eq!(m.net_pnl, m.final_equity - m.initial_equity);
    let trade_pnl: Decimal = report.trades.iter().map(|t| t.net_pnl).sum();
    assert!((trade_pnl - m.net_pnl).abs() < dec!(0.000001));
    assert!(m.fees_paid > Decimal::ZERO);
}

#[test]
fn test_fast_mode_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    write_bars(&dir.path().join("data"), "BTC/USDT", 120, dec!(100));
    let cfg = config(dir.path());

    let mut req = request(momentum_params());
    req.symbols = vec!["BTC/USDT".to_string()];
    req.fast_mode = true;

    let outcome = run(&req, &cfg).unwrap();
    assert!(outcome.metrics().is_some());
    assert!(!dir.path().join("artifacts").exists());
}

#[test]
fn test_missing_data_runs_with_zero_trades() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    let mut req = request(BacktestParams::default());
    req.fast_mode = true;

    let outcome = run(&req, &cfg).unwrap();
    let metrics = outcome.metrics().unwrap();
    assert_eq!(metrics.trades, 0);
    assert_eq!(metrics.fills, 0);
    assert_eq!(metrics.final_equity, cfg.initial_balance);
}

#[test]
fn test_unreachable_trade_target_prunes_early() {
    let dir = tempfile::tempdir().unwrap();
    write_bars(&dir.path().join("data"), "BTC/USDT", 600, dec!(100));
    let cfg = config(dir.path());

    let mut req = request(momentum_params());
    req.symbols = vec!["BTC/USDT".to_string()];
    req.fast_mode = true;
    req.early_target_trades_per_day = Some(dec!(1000000));

    match run(&req, &cfg).unwrap() {
        RunOutcome::PrunedEarly { reason, .. } => assert!(reason.contains("below")),
        RunOutcome::Completed(_) => panic!("expected early prune"),
    }
}

#[test]
fn test_synthetic_fallback_is_seeded() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = AppConfig {
        synthesize_missing: true,
        ..config(dir.path())
    };

    let mut req = request(momentum_params());
    req.fast_mode = true;
    let first = run(&req, &cfg).unwrap();
    let again = run(&req, &cfg).unwrap();
    assert_eq!(first.metrics(), again.metrics());

    req.seed = 7;
    let reseeded = run(&req, &cfg).unwrap();
    assert_ne!(first.run_id(), reseeded.run_id());
}

#[test]
fn test_merger_over_cached_data_is_time_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    write_bars(&data_dir, "BTC/USDT", 50, dec!(100));
    write_bars(&data_dir, "ETH/USDT", 50, dec!(50));
    let loader = DataLoader::new(LoaderConfig {
        data_dir,
        ..LoaderConfig::default()
    });

    let symbols = vec!["ETH/USDT".to_string(), "BTC/USDT".to_string()];
    let ticks: Vec<_> = TickMerger::from_loader(
        &loader,
        &symbols,
        Timeframe::parse("1m").unwrap(),
        START_MS,
        START_MS + 49 * MINUTE_MS,
        dec!(1),
    )
    .unwrap()
    .collect();

    assert_eq!(ticks.len(), 100);
    assert!(ticks
        .windows(2)
        .all(|w| (w[0].1.timestamp, &w[0].0) <= (w[1].1.timestamp, &w[1].0)));
    assert_eq!(ticks[0].0, "BTC/USDT");
}
