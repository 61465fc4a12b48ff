//! Data models for market history.
//!
//! All prices use `rust_decimal::Decimal` for financial precision.

pub mod ohlcv;

pub use ohlcv::OhlcvBar;
