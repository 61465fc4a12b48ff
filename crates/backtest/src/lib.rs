pub mod data_provider;
pub mod engine;
pub mod equity;
pub mod execution;
pub mod journal;
pub mod manager;
pub mod metrics;
pub mod router;

pub use data_provider::TickMerger;
pub use engine::{run, BacktestReport, BacktestRequest, RunOutcome};
pub use equity::EquityTracker;
pub use execution::{OrderStatus, PaperBroker, PaperOrder};
pub use journal::{RoundTrip, TradeJournal};
pub use manager::{EntryOutcome, ExecContext, ExecutionManager, OrderTag};
pub use metrics::MetricsCalculator;
pub use router::{Holding, StrategyRouter};
