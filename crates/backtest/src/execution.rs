use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spotgate_core::events::{Fill, OrderType, Side, Tick};
use spotgate_core::position::Portfolio;
use tracing::debug;

const BPS_DIVISOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Filled,
    Canceled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperOrder {
    pub id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub status: OrderStatus,
    pub fill: Option<Fill>,
    /// Why the order was rejected, if it was.
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

enum FillAttempt {
    Filled(Fill),
    Rejected(String),
    Pending,
}

/// Top-of-book fill simulator.
///
/// Market orders take the ask (buy) or bid (sell) plus slippage and pay the
/// taker fee. Limit orders fill at their limit once the book crosses and pay
/// the maker fee; until then they rest and are retried by [`Self::on_tick`].
#[derive(Debug, Clone)]
pub struct PaperBroker {
    slippage_bps: Decimal,
    next_id: u64,
    open: Vec<PaperOrder>,
}

impl PaperBroker {
    #[must_use]
    pub const fn new(slippage_bps: Decimal) -> Self {
        Self {
            slippage_bps,
            next_id: 0,
            open: Vec::new(),
        }
    }

    #[must_use]
    pub fn open_orders(&self) -> &[PaperOrder] {
        &self.open
    }

    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("PAPER-{}", self.next_id)
    }

    fn apply_slippage(&self, price: Decimal, side: Side) -> Decimal {
        let slippage = price * self.slippage_bps / Decimal::from(BPS_DIVISOR);
        match side {
            Side::Buy => price + slippage,
            Side::Sell => price - slippage,
        }
    }

    /// Places an order against the current tick and tries to fill it
    /// immediately.
    #[allow(clippy::too_many_arguments)]
    pub fn place_order(
        &mut self,
        portfolio: &mut Portfolio,
        symbol: &str,
        side: Side,
        order_type: OrderType,
        qty: Decimal,
        limit_price: Option<Decimal>,
        tick: &Tick,
    ) -> PaperOrder {
        let mut order = PaperOrder {
            id: self.next_order_id(),
            symbol: symbol.to_string(),
            side,
            order_type,
            qty,
            limit_price,
            status: OrderStatus::Open,
            fill: None,
            reason: None,
            created_at: tick.timestamp,
        };

        if qty <= Decimal::ZERO {
            return reject(order, "non-positive quantity");
        }
        if order_type == OrderType::Limit && limit_price.is_none() {
            return reject(order, "limit order without a price");
        }
        if tick.symbol != symbol {
            return reject(order, "tick belongs to another symbol");
        }

        match self.try_fill(portfolio, &order, tick) {
            FillAttempt::Filled(fill) => {
                order.status = OrderStatus::Filled;
                order.fill = Some(fill);
            }
            FillAttempt::Rejected(reason) => return reject(order, reason),
            FillAttempt::Pending => self.open.push(order.clone()),
        }
        order
    }

    /// Retries resting orders for `tick.symbol` in placement order. Returns
    /// the orders that left the book on this tick.
    pub fn on_tick(&mut self, portfolio: &mut Portfolio, tick: &Tick) -> Vec<PaperOrder> {
        let resting = std::mem::take(&mut self.open);
        let mut done = Vec::new();

        for mut order in resting {
            if order.symbol != tick.symbol {
                self.open.push(order);
                continue;
            }
            match self.try_fill(portfolio, &order, tick) {
                FillAttempt::Filled(fill) => {
                    order.status = OrderStatus::Filled;
                    order.fill = Some(fill);
                    done.push(order);
                }
                FillAttempt::Rejected(reason) => done.push(reject(order, reason)),
                FillAttempt::Pending => self.open.push(order),
            }
        }
        done
    }

    /// Cancels a resting order. Returns `None` if no open order has `id`.
    pub fn cancel(&mut self, id: &str) -> Option<PaperOrder> {
        let idx = self.open.iter().position(|o| o.id == id)?;
        let mut order = self.open.remove(idx);
        order.status = OrderStatus::Canceled;
        Some(order)
    }

    fn try_fill(&self, portfolio: &mut Portfolio, order: &PaperOrder, tick: &Tick) -> FillAttempt {
        let (price, is_maker) = match (order.order_type, order.limit_price) {
            (OrderType::Market, _) => {
                let touch = match order.side {
                    Side::Buy => tick.ask,
                    Side::Sell => tick.bid,
                };
                (self.apply_slippage(touch, order.side), false)
            }
            (OrderType::Limit, Some(limit)) => {
                let crossed = match order.side {
                    Side::Buy => tick.ask <= limit,
                    Side::Sell => tick.bid >= limit,
                };
                if !crossed {
                    return FillAttempt::Pending;
                }
                (limit, true)
            }
            (OrderType::Limit, None) => {
                return FillAttempt::Rejected("limit order without a price".to_string());
            }
        };

        let (qty, fee, realized_pnl) = match order.side {
            Side::Buy => match portfolio.buy(&order.symbol, order.qty, price, is_maker) {
                Ok(fee) => (order.qty, fee, Decimal::ZERO),
                Err(e) => return FillAttempt::Rejected(e.to_string()),
            },
            Side::Sell => {
                if portfolio.base_qty(&order.symbol) <= Decimal::ZERO {
                    return FillAttempt::Rejected("no inventory to sell".to_string());
                }
                let outcome = portfolio.sell(&order.symbol, order.qty, price, is_maker);
                (outcome.qty, outcome.fee, outcome.realized_pnl)
            }
        };

        debug!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %qty,
            price = %price,
            "paper fill"
        );

        FillAttempt::Filled(Fill {
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty,
            price,
            fee,
            is_maker,
            realized_pnl,
            timestamp: tick.timestamp,
        })
    }
}

fn reject(mut order: PaperOrder, reason: impl Into<String>) -> PaperOrder {
    order.status = OrderStatus::Rejected;
    order.reason = Some(reason.into());
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "BTC/USDT";

    fn portfolio() -> Portfolio {
        Portfolio::new("USDT", dec!(10000), dec!(2), dec!(5))
    }

    fn tick(bid: Decimal, ask: Decimal) -> Tick {
        let last = (bid + ask) / dec!(2);
        Tick {
            timestamp: DateTime::from_timestamp(1_704_067_200, 0).unwrap(),
            symbol: SYMBOL.to_string(),
            open: last,
            high: last,
            low: last,
            last,
            bid,
            ask,
            volume: dec!(1),
        }
    }

    #[test]
    fn test_market_buy_pays_ask_plus_slippage_and_taker_fee() {
        let mut broker = PaperBroker::new(dec!(10));
        let mut pf = portfolio();

        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Buy,
            OrderType::Market,
            dec!(1),
            None,
            &tick(dec!(99), dec!(100)),
        );

        assert_eq!(order.id, "PAPER-1");
        assert_eq!(order.status, OrderStatus::Filled);
        let fill = order.fill.unwrap();
        assert_eq!(fill.price, dec!(100.1));
        assert_eq!(fill.fee, dec!(0.05005));
        assert!(!fill.is_maker);
        assert_eq!(pf.base_qty(SYMBOL), dec!(1));
    }

    #[test]
    fn test_market_sell_hits_bid_minus_slippage() {
        let mut broker = PaperBroker::new(dec!(10));
        let mut pf = portfolio();
        pf.buy(SYMBOL, dec!(2), dec!(100), false).unwrap();

        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Sell,
            OrderType::Market,
            dec!(2),
            None,
            &tick(dec!(110), dec!(111)),
        );

        let fill = order.fill.unwrap();
        assert_eq!(fill.price, dec!(109.89));
        assert_eq!(fill.realized_pnl, dec!(19.78));
        assert_eq!(pf.base_qty(SYMBOL), Decimal::ZERO);
    }

    #[test]
    fn test_sell_without_inventory_rejected() {
        let mut broker = PaperBroker::new(dec!(0));
        let mut pf = portfolio();

        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Sell,
            OrderType::Market,
            dec!(1),
            None,
            &tick(dec!(99), dec!(100)),
        );

        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.fill.is_none());
        assert_eq!(pf.quote_balance(), dec!(10000));
    }

    #[test]
    fn test_insufficient_funds_rejected() {
        let mut broker = PaperBroker::new(dec!(0));
        let mut pf = portfolio();

        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Buy,
            OrderType::Market,
            dec!(1000),
            None,
            &tick(dec!(99), dec!(100)),
        );

        assert_eq!(order.status, OrderStatus::Rejected);
        assert!(order.reason.unwrap().contains("insufficient"));
        assert_eq!(pf.quote_balance(), dec!(10000));
    }

    #[test]
    fn test_limit_rests_then_fills_at_limit_as_maker() {
        let mut broker = PaperBroker::new(dec!(50));
        let mut pf = portfolio();

        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(95)),
            &tick(dec!(99), dec!(100)),
        );
        assert_eq!(order.status, OrderStatus::Open);
        assert_eq!(broker.open_orders().len(), 1);

        assert!(broker.on_tick(&mut pf, &tick(dec!(97), dec!(98))).is_empty());

        let done = broker.on_tick(&mut pf, &tick(dec!(94), dec!(95)));
        assert_eq!(done.len(), 1);
        let fill = done[0].fill.clone().unwrap();
        assert_eq!(fill.price, dec!(95));
        assert!(fill.is_maker);
        assert_eq!(fill.fee, dec!(0.019));
        assert!(broker.open_orders().is_empty());
    }

    #[test]
    fn test_cancel_removes_resting_order() {
        let mut broker = PaperBroker::new(dec!(0));
        let mut pf = portfolio();
        let order = broker.place_order(
            &mut pf,
            SYMBOL,
            Side::Buy,
            OrderType::Limit,
            dec!(1),
            Some(dec!(50)),
            &tick(dec!(99), dec!(100)),
        );

        let canceled = broker.cancel(&order.id).unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert!(broker.cancel(&order.id).is_none());
        assert!(broker.on_tick(&mut pf, &tick(dec!(40), dec!(41))).is_empty());
    }

    #[test]
    fn test_order_ids_count_per_broker() {
        let mut pf = portfolio();
        let t = tick(dec!(99), dec!(100));
        let mut a = PaperBroker::new(dec!(0));
        let mut b = PaperBroker::new(dec!(0));

        a.place_order(&mut pf, SYMBOL, Side::Buy, OrderType::Market, dec!(1), None, &t);
        let second = a.place_order(&mut pf, SYMBOL, Side::Buy, OrderType::Market, dec!(1), None, &t);
        let first_of_b = b.place_order(&mut pf, SYMBOL, Side::Buy, OrderType::Market, dec!(1), None, &t);

        assert_eq!(second.id, "PAPER-2");
        assert_eq!(first_of_b.id, "PAPER-1");
    }
}
