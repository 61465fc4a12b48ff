use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Synthetic top-of-book quote derived from one OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub last: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    pub volume: Decimal,
}

impl Tick {
    /// Builds a tick from a bar close with a symmetric synthetic spread.
    ///
    /// `bid = close - spread/2`, `ask = close + spread/2` where
    /// `spread = close * spread_bps / 10_000`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn from_bar(
        symbol: &str,
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
        spread_bps: Decimal,
    ) -> Self {
        let half_spread = close * spread_bps / Decimal::from(10_000) / Decimal::TWO;
        Self {
            timestamp,
            symbol: symbol.to_string(),
            open,
            high,
            low,
            last: close,
            bid: close - half_spread,
            ask: close + half_spread,
            volume,
        }
    }

    /// Mid of the synthetic book.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

/// Free-form order annotations inspected by the compliance layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMeta {
    /// Instrument classification tags (e.g. "gambling").
    #[serde(default)]
    pub tags: Vec<String>,
    /// Venue parameters forwarded with the order (e.g. "leverage").
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// Order as requested by a strategy, before the risk gate adjusts it.
///
/// Requests are never mutated in place; `step_down` returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    #[serde(default)]
    pub meta: OrderMeta,
}

impl OrderRequest {
    #[must_use]
    pub fn new(symbol: impl Into<String>, side: Side, qty: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            qty: qty.max(Decimal::ZERO),
            meta: OrderMeta::default(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, meta: OrderMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Returns a copy with `qty` scaled by `factor` (floored at zero).
    #[must_use]
    pub fn step_down(&self, factor: Decimal) -> Self {
        Self {
            qty: (self.qty * factor).max(Decimal::ZERO),
            ..self.clone()
        }
    }
}

/// Executed (simulated) fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub is_maker: bool,
    /// Realized P&L booked by this fill (zero for buys).
    pub realized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Fill {
    #[must_use]
    pub fn notional(&self) -> Decimal {
        self.qty * self.price
    }
}

/// Entry signal emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySignal {
    pub symbol: String,
    pub reason: String,
    /// Indicator values at signal time, recorded in the decision ledger.
    pub features: BTreeMap<String, Decimal>,
    pub timestamp: DateTime<Utc>,
}
