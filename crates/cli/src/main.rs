use clap::{Parser, Subcommand};

mod commands;

use commands::{BacktestArgs, SweepArgs, VerifyLedgerArgs};

#[derive(Parser)]
#[command(name = "spotgate")]
#[command(about = "Deterministic spot backtester with a compliance and risk gate", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single backtest over cached (or synthetic) bars
    Backtest(BacktestArgs),
    /// Run one backtest per parameter set in a JSON grid
    Sweep(SweepArgs),
    /// Re-hash a decision ledger and check its chain
    VerifyLedger(VerifyLedgerArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdout carries results, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Backtest(args) => commands::run_backtest(args).await?,
        Commands::Sweep(args) => commands::run_sweep(args).await?,
        Commands::VerifyLedger(args) => commands::run_verify_ledger(&args)?,
    }

    Ok(())
}
