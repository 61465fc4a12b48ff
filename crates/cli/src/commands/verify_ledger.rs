use anyhow::{Context, Result};
use clap::Args;
use spotgate_core::ledger::verify_chain;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct VerifyLedgerArgs {
    /// Path to a ledger.jsonl file
    pub path: PathBuf,
}

pub fn run_verify_ledger(args: &VerifyLedgerArgs) -> Result<()> {
    let records = verify_chain(&args.path)
        .with_context(|| format!("Ledger {} failed verification", args.path.display()))?;
    tracing::info!(path = %args.path.display(), records, "ledger chain verified");
    println!("OK: {records} records verified in {}", args.path.display());
    Ok(())
}
