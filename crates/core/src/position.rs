use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

const BPS_DIVISOR: i64 = 10_000;

/// Errors raised by portfolio mutations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortfolioError {
    /// Buy notional plus fee exceeds the quote balance.
    #[error("insufficient quote balance: need {required}, have {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },
    #[error("invalid buy of {qty} at {price}: quantity and price must be positive")]
    InvalidOrder { qty: Decimal, price: Decimal },
}

/// Long-only inventory in a single symbol.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub base_qty: Decimal,
    pub avg_entry_price: Decimal,
    pub realized_pnl: Decimal,
}

impl Position {
    #[allow(clippy::missing_const_for_fn)] // String cannot be used in const fn
    fn new(symbol: String) -> Self {
        Self {
            symbol,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.base_qty > Decimal::ZERO
    }

    fn apply_buy(&mut self, qty: Decimal, price: Decimal) {
        if qty <= Decimal::ZERO {
            return;
        }
        let total_cost = self.avg_entry_price * self.base_qty + price * qty;
        self.base_qty += qty;
        self.avg_entry_price = total_cost / self.base_qty;
    }

    /// Reduces inventory and returns the realized P&L of the closed quantity.
    fn apply_sell(&mut self, qty: Decimal, price: Decimal) -> Decimal {
        if qty <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let close_qty = qty.min(self.base_qty);
        let pnl = (price - self.avg_entry_price) * close_qty;
        self.base_qty -= close_qty;
        if self.base_qty == Decimal::ZERO {
            self.avg_entry_price = Decimal::ZERO;
        }
        self.realized_pnl += pnl;
        pnl
    }
}

/// Result of a sell after inventory clamping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellOutcome {
    pub qty: Decimal,
    pub fee: Decimal,
    pub realized_pnl: Decimal,
}

/// Quote balance plus per-symbol spot inventory with maker/taker fees.
///
/// Positions are kept in a `BTreeMap` so iteration order (and therefore any
/// derived output) is stable across runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    quote_currency: String,
    quote_balance: Decimal,
    positions: BTreeMap<String, Position>,
    maker_fee_bps: Decimal,
    taker_fee_bps: Decimal,
}

impl Portfolio {
    #[must_use]
    pub fn new(
        quote_currency: impl Into<String>,
        initial_balance: Decimal,
        maker_fee_bps: Decimal,
        taker_fee_bps: Decimal,
    ) -> Self {
        Self {
            quote_currency: quote_currency.into(),
            quote_balance: initial_balance,
            positions: BTreeMap::new(),
            maker_fee_bps,
            taker_fee_bps,
        }
    }

    #[must_use]
    pub fn quote_currency(&self) -> &str {
        &self.quote_currency
    }

    #[must_use]
    pub const fn quote_balance(&self) -> Decimal {
        self.quote_balance
    }

    #[must_use]
    pub fn fee_for(&self, notional: Decimal, is_maker: bool) -> Decimal {
        let bps = if is_maker {
            self.maker_fee_bps
        } else {
            self.taker_fee_bps
        };
        notional * bps / Decimal::from(BPS_DIVISOR)
    }

    /// Buys `qty` at `price`, charging the fee from the quote balance.
    ///
    /// Returns the fee paid.
    ///
    /// # Errors
    ///
    /// Returns `PortfolioError::InvalidOrder` for a non-positive quantity or
    /// price and `PortfolioError::InsufficientFunds` when notional plus fee
    /// exceeds the available balance. The portfolio is left untouched.
    pub fn buy(
        &mut self,
        symbol: &str,
        qty: Decimal,
        price: Decimal,
        is_maker: bool,
    ) -> Result<Decimal, PortfolioError> {
        if qty <= Decimal::ZERO || price <= Decimal::ZERO {
            return Err(PortfolioError::InvalidOrder { qty, price });
        }
        let notional = qty * price;
        let fee = self.fee_for(notional, is_maker);
        let required = notional + fee;
        if self.quote_balance < required {
            return Err(PortfolioError::InsufficientFunds {
                required,
                available: self.quote_balance,
            });
        }
        self.quote_balance -= required;
        self.position_mut(symbol).apply_buy(qty, price);
        Ok(fee)
    }

    /// Sells up to `qty` at `price`; quantity is clamped to held inventory.
    pub fn sell(&mut self, symbol: &str, qty: Decimal, price: Decimal, is_maker: bool) -> SellOutcome {
        let position = self.position_mut(symbol);
        let qty = qty.min(position.base_qty).max(Decimal::ZERO);
        let realized_pnl = position.apply_sell(qty, price);
        let notional = qty * price;
        let fee = self.fee_for(notional, is_maker);
        self.quote_balance += notional - fee;
        SellOutcome {
            qty,
            fee,
            realized_pnl,
        }
    }

    /// Quote balance plus inventory valued at `marks`.
    ///
    /// Symbols without a mark are valued at their average entry price.
    #[must_use]
    pub fn equity(&self, marks: &BTreeMap<String, Decimal>) -> Decimal {
        self.positions
            .values()
            .filter(|p| p.is_open())
            .fold(self.quote_balance, |acc, p| {
                let mark = marks.get(&p.symbol).copied().unwrap_or(p.avg_entry_price);
                acc + p.base_qty * mark
            })
    }

    /// Returns the position, creating an empty one on first reference.
    pub fn position_mut(&mut self, symbol: &str) -> &mut Position {
        self.positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol.to_string()))
    }

    #[must_use]
    pub fn position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    #[must_use]
    pub fn base_qty(&self, symbol: &str) -> Decimal {
        self.position(symbol).map_or(Decimal::ZERO, |p| p.base_qty)
    }

    #[must_use]
    pub fn open_positions(&self) -> usize {
        self.positions.values().filter(|p| p.is_open()).count()
    }

    #[must_use]
    pub const fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }
}
