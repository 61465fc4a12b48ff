pub mod compliance;
pub mod config;
pub mod config_loader;
pub mod events;
pub mod ledger;
pub mod metrics;
pub mod metrics_formatter;
pub mod position;
pub mod position_sizing;
pub mod traits;

pub use compliance::{ComplianceError, CompliancePolicy};
pub use config::{AppConfig, ComplianceConfig, FeesConfig, RiskConfig};
pub use config_loader::ConfigLoader;
pub use events::{EntrySignal, Fill, OrderMeta, OrderRequest, OrderType, Side, Tick};
pub use ledger::{DecisionLedger, LedgerError};
pub use metrics::BacktestMetrics;
pub use metrics_formatter::MetricsFormatter;
pub use position::{Portfolio, PortfolioError, Position, SellOutcome};
pub use traits::{RiskView, StaticRiskView, Strategy};
