//! Market data for the spot backtester.
//!
//! This crate provides:
//! - The OHLCV bar model
//! - Timeframe parsing
//! - CSV cache storage
//! - `DataLoader`: cache lookup, sub-minute and synthetic fallbacks,
//!   resampling and bar-to-tick conversion

pub mod csv_storage;
pub mod error;
pub mod loader;
pub mod models;
pub mod timeframe;

pub use csv_storage::CsvStorage;
pub use error::DataError;
pub use loader::{DataLoader, LoaderConfig};
pub use models::OhlcvBar;
pub use timeframe::{timeframe_to_seconds, Timeframe};
