//! Round-trip bookkeeping: groups fills from the first buy on a flat symbol
//! to the sell that brings it back to flat.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spotgate_core::events::{Fill, Side};
use std::collections::BTreeMap;

/// One completed entry-to-flat trade, written to `trades.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub avg_exit_price: Decimal,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    /// Realized P&L net of every fee paid during the trade.
    pub net_pnl: Decimal,
    pub exit_reason: String,
    pub fills: usize,
}

impl RoundTrip {
    #[must_use]
    pub fn is_win(&self) -> bool {
        self.net_pnl > Decimal::ZERO
    }
}

#[derive(Debug, Clone)]
struct OpenTrade {
    entry_time: DateTime<Utc>,
    bought_qty: Decimal,
    bought_notional: Decimal,
    sold_qty: Decimal,
    sold_notional: Decimal,
    gross_pnl: Decimal,
    fees: Decimal,
    fills: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TradeJournal {
    open: BTreeMap<String, OpenTrade>,
    closed: Vec<RoundTrip>,
}

impl TradeJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fill. `remaining_base` is the symbol's inventory after the
    /// fill; reaching zero closes the round trip with `reason`.
    pub fn on_fill(&mut self, fill: &Fill, reason: &str, remaining_base: Decimal) -> Option<&RoundTrip> {
        let trade = self
            .open
            .entry(fill.symbol.clone())
            .or_insert_with(|| OpenTrade {
                entry_time: fill.timestamp,
                bought_qty: Decimal::ZERO,
                bought_notional: Decimal::ZERO,
                sold_qty: Decimal::ZERO,
                sold_notional: Decimal::ZERO,
                gross_pnl: Decimal::ZERO,
                fees: Decimal::ZERO,
                fills: 0,
            });

        trade.fills += 1;
        trade.fees += fill.fee;
        match fill.side {
            Side::Buy => {
                trade.bought_qty += fill.qty;
                trade.bought_notional += fill.notional();
            }
            Side::Sell => {
                trade.sold_qty += fill.qty;
                trade.sold_notional += fill.notional();
                trade.gross_pnl += fill.realized_pnl;
            }
        }

        if fill.side != Side::Sell || remaining_base > Decimal::ZERO {
            return None;
        }

        let trade = self.open.remove(&fill.symbol)?;
        self.closed.push(RoundTrip {
            symbol: fill.symbol.clone(),
            entry_time: trade.entry_time,
            exit_time: fill.timestamp,
            qty: trade.bought_qty,
            avg_entry_price: average(trade.bought_notional, trade.bought_qty),
            avg_exit_price: average(trade.sold_notional, trade.sold_qty),
            gross_pnl: trade.gross_pnl,
            fees: trade.fees,
            net_pnl: trade.gross_pnl - trade.fees,
            exit_reason: reason.to_string(),
            fills: trade.fills,
        });
        self.closed.last()
    }

    #[must_use]
    pub fn closed(&self) -> &[RoundTrip] {
        &self.closed
    }

    #[must_use]
    pub fn open_symbols(&self) -> usize {
        self.open.len()
    }

    #[must_use]
    pub fn into_closed(self) -> Vec<RoundTrip> {
        self.closed
    }
}

fn average(notional: Decimal, qty: Decimal) -> Decimal {
    if qty > Decimal::ZERO {
        notional / qty
    } else {
        Decimal::ZERO
    }
}
