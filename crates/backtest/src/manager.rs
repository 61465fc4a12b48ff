//! Order submission: compliance, the risk gate, micro-slicing, paper fills
//! and the `order` ledger records.

use crate::execution::{OrderStatus, PaperBroker, PaperOrder};
use crate::journal::TradeJournal;
use rust_decimal::Decimal;
use serde_json::json;
use spotgate_core::compliance::{enforce_spot_only, forbid_shorting, ComplianceError};
use spotgate_core::events::{Fill, OrderRequest, OrderType, Side, Tick};
use spotgate_core::ledger::{DecisionLedger, LedgerError};
use spotgate_core::position::Portfolio;
use spotgate_core::position_sizing::micro_slices;
use spotgate_core::traits::RiskView;
use spotgate_strategy::risk_manager::{GateOutcome, RiskGate};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Everything one run mutates. Owned by the run; nothing is global.
pub struct ExecContext {
    pub portfolio: Portfolio,
    pub broker: PaperBroker,
    pub gate: RiskGate,
    pub ledger: DecisionLedger,
    pub journal: TradeJournal,
    /// Executed fills across all symbols.
    pub fills: usize,
    pub fees_paid: Decimal,
}

/// Why an order was submitted, carried into its ledger records.
#[derive(Debug, Clone, Copy)]
pub struct OrderTag<'a> {
    pub reason: &'a str,
    pub features: &'a BTreeMap<String, Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Filled(Vec<Fill>),
    /// The gate did not allow the order.
    Gated(GateOutcome),
    Rejected(String),
}

impl EntryOutcome {
    #[must_use]
    pub fn fills(&self) -> &[Fill] {
        match self {
            Self::Filled(fills) => fills,
            Self::Gated(_) | Self::Rejected(_) => &[],
        }
    }
}

pub struct ExecutionManager {
    ctx: ExecContext,
}

impl ExecutionManager {
    #[must_use]
    pub const fn new(ctx: ExecContext) -> Self {
        Self { ctx }
    }

    #[must_use]
    pub const fn ctx(&self) -> &ExecContext {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut ExecContext {
        &mut self.ctx
    }

    #[must_use]
    pub fn into_context(self) -> ExecContext {
        self.ctx
    }

    /// Submits a buy: order-shape checks, then the gate, then `slices`
    /// market orders. Each slice gets one `order` ledger record.
    ///
    /// Whitelist and tag violations go through the gate, so they show up as
    /// a `block` decision with a `guardrail_breach` record. Leverage and
    /// short-sale violations are not gate rules and get `order_rejected`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be written.
    pub fn submit_entry(
        &mut self,
        order: &OrderRequest,
        tick: &Tick,
        slices: u32,
        tag: OrderTag<'_>,
        view: &dyn RiskView,
    ) -> Result<EntryOutcome, LedgerError> {
        let inventory = self.ctx.portfolio.base_qty(&order.symbol);
        if let Err(violation) = self.pre_trade_checks(order, inventory) {
            return self.reject(order, tick, tag, &violation);
        }

        let gated = self
            .ctx
            .gate
            .gate_trade(order, tick.timestamp, view, &mut self.ctx.ledger)?;
        if !gated.is_allowed() {
            warn!(
                symbol = %order.symbol,
                decision = gated.decision.as_str(),
                reasons = ?gated.reasons,
                "entry not allowed by risk gate"
            );
            return Ok(EntryOutcome::Gated(gated));
        }

        let adjusted = &gated.adjusted_order;
        if adjusted.qty <= Decimal::ZERO {
            return Ok(EntryOutcome::Rejected("zero quantity after gate".to_string()));
        }

        let fills = self.execute_slices(
            &adjusted.symbol,
            Side::Buy,
            adjusted.qty,
            slices,
            tick,
            tag,
            &gated.reasons,
        )?;
        Ok(EntryOutcome::Filled(fills))
    }

    /// Sells `qty` in `slices` market orders without consulting the gate, so
    /// a halted run can still go flat.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be written.
    pub fn submit_exit(
        &mut self,
        symbol: &str,
        qty: Decimal,
        slices: u32,
        tick: &Tick,
        tag: OrderTag<'_>,
    ) -> Result<Vec<Fill>, LedgerError> {
        let inventory = self.ctx.portfolio.base_qty(symbol);
        if let Err(violation) = forbid_shorting(symbol, Side::Sell, inventory) {
            warn!(symbol = %symbol, error = %violation, "exit skipped");
            return Ok(Vec::new());
        }
        self.execute_slices(symbol, Side::Sell, qty.min(inventory), slices, tick, tag, &[])
    }

    /// Retries resting limit orders for the tick's symbol and books any
    /// that fill.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be written.
    pub fn on_tick(&mut self, tick: &Tick) -> Result<Vec<Fill>, LedgerError> {
        let done = self.ctx.broker.on_tick(&mut self.ctx.portfolio, tick);
        let no_features = BTreeMap::new();
        let tag = OrderTag {
            reason: "resting",
            features: &no_features,
        };
        let mut fills = Vec::new();
        for order in done {
            self.record_order(&order, tick, tag, &[])?;
            if let Some(fill) = order.fill {
                self.book_fill(&fill, tag.reason);
                fills.push(fill);
            }
        }
        Ok(fills)
    }

    fn pre_trade_checks(&self, order: &OrderRequest, inventory: Decimal) -> Result<(), ComplianceError> {
        enforce_spot_only(&order.meta.params)?;
        forbid_shorting(&order.symbol, order.side, inventory)
    }

    fn reject(
        &mut self,
        order: &OrderRequest,
        tick: &Tick,
        tag: OrderTag<'_>,
        violation: &ComplianceError,
    ) -> Result<EntryOutcome, LedgerError> {
        warn!(symbol = %order.symbol, error = %violation, "order failed compliance");
        self.ctx.ledger.append(
            tick.timestamp,
            "order_rejected",
            &json!({
                "symbol": order.symbol,
                "side": order.side,
                "qty": order.qty,
                "reason": tag.reason,
                "error": violation.to_string(),
            }),
        )?;
        Ok(EntryOutcome::Rejected(violation.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    fn execute_slices(
        &mut self,
        symbol: &str,
        side: Side,
        qty: Decimal,
        slices: u32,
        tick: &Tick,
        tag: OrderTag<'_>,
        gate_reasons: &[String],
    ) -> Result<Vec<Fill>, LedgerError> {
        let mut fills = Vec::new();
        for part in micro_slices(qty, slices) {
            if part <= Decimal::ZERO {
                continue;
            }
            let placed = self.ctx.broker.place_order(
                &mut self.ctx.portfolio,
                symbol,
                side,
                OrderType::Market,
                part,
                None,
                tick,
            );
            self.record_order(&placed, tick, tag, gate_reasons)?;

            match (placed.status, placed.fill) {
                (OrderStatus::Filled, Some(fill)) => {
                    self.book_fill(&fill, tag.reason);
                    fills.push(fill);
                }
                (status, _) => {
                    debug!(symbol = %symbol, ?status, "slice not filled, remaining slices skipped");
                    break;
                }
            }
        }
        Ok(fills)
    }

    fn book_fill(&mut self, fill: &Fill, reason: &str) {
        self.ctx.fills += 1;
        self.ctx.fees_paid += fill.fee;
        let remaining = self.ctx.portfolio.base_qty(&fill.symbol);
        if let Some(trip) = self.ctx.journal.on_fill(fill, reason, remaining) {
            debug!(
                symbol = %trip.symbol,
                net_pnl = %trip.net_pnl,
                reason = %trip.exit_reason,
                "round trip closed"
            );
        }
    }

    fn record_order(
        &mut self,
        order: &PaperOrder,
        tick: &Tick,
        tag: OrderTag<'_>,
        gate_reasons: &[String],
    ) -> Result<(), LedgerError> {
        let (price, fee, realized_pnl, qty) = order.fill.as_ref().map_or(
            (None, None, None, order.qty),
            |f| (Some(f.price), Some(f.fee), Some(f.realized_pnl), f.qty),
        );
        self.ctx.ledger.append(
            tick.timestamp,
            "order",
            &json!({
                "order_id": order.id,
                "symbol": order.symbol,
                "side": order.side,
                "type": order.order_type,
                "qty": qty,
                "price": price,
                "fee": fee,
                "realized_pnl": realized_pnl,
                "status": order.status,
                "error": order.reason,
                "reason": tag.reason,
                "features": tag.features,
                "gate_reasons": gate_reasons,
                "mode": "paper",
            }),
        )?;
        Ok(())
    }
}
