pub mod indicators;
pub mod kind;
pub mod mean_reversion;
pub mod momentum;
pub mod overrides;
pub mod params;
pub mod risk_manager;
pub mod risk_metrics;

pub use indicators::{Atr, Ema};
pub use kind::StrategyKind;
pub use mean_reversion::{MeanReversionConfig, MeanReversionStrategy};
pub use momentum::{MomentumConfig, MomentumStrategy};
pub use overrides::{ApplyOverrides, BacktestParams, OverrideError, ResolvedParams};
pub use params::{ExecutionConfig, FilterConfig};
pub use risk_manager::{GateDecision, GateOutcome, RiskGate, RiskState};
