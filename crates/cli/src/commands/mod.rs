pub mod backtest;
pub mod sweep;
pub mod verify_ledger;

pub use backtest::{run_backtest, BacktestArgs};
pub use sweep::{run_sweep, SweepArgs};
pub use verify_ledger::{run_verify_ledger, VerifyLedgerArgs};
