//! Per-symbol position state machine: strategies propose entries, the
//! router filters and sizes them and manages exits while holding.

use crate::manager::{ExecutionManager, OrderTag};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use spotgate_core::events::{EntrySignal, OrderRequest, Side, Tick};
use spotgate_core::ledger::LedgerError;
use spotgate_core::traits::{RiskView, Strategy};
use spotgate_strategy::indicators::{Atr, Ema};
use spotgate_strategy::kind::StrategyKind;
use spotgate_strategy::overrides::ResolvedParams;
use spotgate_strategy::params::{ExecutionConfig, FilterConfig};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Builds the priority-ordered strategy stack for a symbol.
pub type StrategyFactory = Box<dyn Fn(&str) -> Vec<Box<dyn Strategy>> + Send>;

/// Open trade bookkeeping for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub sl: Decimal,
    pub tp: Decimal,
    pub initial_sl: Decimal,
    pub entry_ts: DateTime<Utc>,
    pub entry_price: Decimal,
    pub high: Decimal,
    pub mfe_pct: Decimal,
    pub mae_pct: Decimal,
    /// 0 before any partial take-profit, 1 after R1, 2 after R2.
    pub partial_stage: u8,
    pub pyramids: u32,
}

impl Holding {
    fn new(entry_ts: DateTime<Utc>, entry_price: Decimal, sl: Decimal, tp: Decimal) -> Self {
        Self {
            sl,
            tp,
            initial_sl: sl,
            entry_ts,
            entry_price,
            high: entry_price,
            mfe_pct: Decimal::ZERO,
            mae_pct: Decimal::ZERO,
            partial_stage: 0,
            pyramids: 0,
        }
    }

    fn risk_unit(&self) -> Decimal {
        self.entry_price - self.initial_sl
    }
}

struct SymbolState {
    strategies: Vec<Box<dyn Strategy>>,
    ema_fast: Option<Ema>,
    ema_slow: Option<Ema>,
    atr: Atr,
    holding: Option<Holding>,
    atr_out_streak: u32,
    atr_in_streak: u32,
    atr_block_until: Option<DateTime<Utc>>,
}

impl SymbolState {
    fn new(strategies: Vec<Box<dyn Strategy>>, filters: &FilterConfig) -> Self {
        let trend = filters.trend_filter_enabled();
        Self {
            strategies,
            ema_fast: trend.then(|| Ema::new(filters.ema_fast)),
            ema_slow: trend.then(|| Ema::new(filters.ema_slow)),
            atr: Atr::new(filters.atr_window),
            holding: None,
            atr_out_streak: 0,
            atr_in_streak: 0,
            atr_block_until: None,
        }
    }

    fn update_indicators(&mut self, tick: &Tick) {
        if let Some(ema) = self.ema_fast.as_mut() {
            ema.update(tick.last);
        }
        if let Some(ema) = self.ema_slow.as_mut() {
            ema.update(tick.last);
        }
        self.atr.update(tick.high, tick.low, tick.last);
    }

    /// Feeds every strategy and keeps the first signal in priority order.
    fn collect_signal(&mut self, tick: &Tick) -> Option<(String, EntrySignal)> {
        let mut first = None;
        for strategy in &mut self.strategies {
            if let Some(signal) = strategy.on_tick(tick) {
                if first.is_none() {
                    first = Some((strategy.name().to_string(), signal));
                }
            }
        }
        first
    }

    fn trend_confirmed(&self) -> bool {
        match (&self.ema_fast, &self.ema_slow) {
            (Some(fast), Some(slow)) => match (fast.value(), slow.value()) {
                (Some(f), Some(s)) => f > s,
                _ => false,
            },
            _ => true,
        }
    }

    /// ATR% band check with a cooldown after repeated misses. While blocked,
    /// `max(1, consec / 2)` consecutive in-band ticks lift the block early.
    fn atr_band_allows(&mut self, tick: &Tick, filters: &FilterConfig) -> bool {
        if filters.min_atr_pct <= Decimal::ZERO && filters.max_atr_pct <= Decimal::ZERO {
            return true;
        }
        let atr_pct = match self.atr.value() {
            Some(atr) if tick.last > Decimal::ZERO => atr / tick.last,
            _ => Decimal::ZERO,
        };
        let too_quiet = filters.min_atr_pct > Decimal::ZERO && atr_pct < filters.min_atr_pct;
        let too_wild = filters.max_atr_pct > Decimal::ZERO && atr_pct > filters.max_atr_pct;
        let in_band = !too_quiet && !too_wild;
        let now = tick.timestamp;

        if let Some(until) = self.atr_block_until {
            if now < until {
                if !in_band {
                    self.atr_in_streak = 0;
                    return false;
                }
                self.atr_in_streak += 1;
                if self.atr_in_streak < (filters.atr_block_consec / 2).max(1) {
                    return false;
                }
                debug!(symbol = %tick.symbol, "atr block lifted early");
            }
            self.atr_block_until = None;
            self.atr_in_streak = 0;
        }

        if in_band {
            self.atr_out_streak = 0;
            return true;
        }

        self.atr_out_streak += 1;
        if filters.atr_block_consec > 0
            && filters.atr_block_cooldown_s > 0
            && self.atr_out_streak >= filters.atr_block_consec
        {
            self.atr_block_until = Some(now + Duration::seconds(filters.atr_block_cooldown_s));
            self.atr_out_streak = 0;
            info!(
                symbol = %tick.symbol,
                atr_pct = %atr_pct.round_dp(6),
                cooldown_s = filters.atr_block_cooldown_s,
                "atr band missed repeatedly, symbol blocked"
            );
        }
        false
    }
}

pub struct StrategyRouter {
    execution: ExecutionConfig,
    filters: FilterConfig,
    factory: StrategyFactory,
    symbols: BTreeMap<String, SymbolState>,
}

impl StrategyRouter {
    #[must_use]
    pub fn new(kind: StrategyKind, params: &ResolvedParams) -> Self {
        let build_params = params.clone();
        Self::with_factory(
            params,
            Box::new(move |symbol| kind.build(symbol, &build_params)),
        )
    }

    #[must_use]
    pub fn with_factory(params: &ResolvedParams, factory: StrategyFactory) -> Self {
        Self {
            execution: params.execution.clone(),
            filters: params.filters.clone(),
            factory,
            symbols: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn holding(&self, symbol: &str) -> Option<&Holding> {
        self.symbols.get(symbol).and_then(|s| s.holding.as_ref())
    }

    #[must_use]
    pub fn atr_blocked_until(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.symbols.get(symbol).and_then(|s| s.atr_block_until)
    }

    /// Processes one tick for its symbol.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be written.
    pub fn on_tick(
        &mut self,
        tick: &Tick,
        exec: &mut ExecutionManager,
        marks: &BTreeMap<String, Decimal>,
        view: &dyn RiskView,
    ) -> Result<(), LedgerError> {
        let Self {
            execution,
            filters,
            factory,
            symbols,
        } = self;
        let state = symbols
            .entry(tick.symbol.clone())
            .or_insert_with(|| SymbolState::new((**factory)(&tick.symbol), filters));

        state.update_indicators(tick);
        exec.ctx_mut()
            .gate
            .observe_price(&tick.symbol, tick.timestamp, tick.last);
        let signal = state.collect_signal(tick);

        if exec.ctx().portfolio.base_qty(&tick.symbol) <= Decimal::ZERO {
            state.holding = None;
        }

        if state.holding.is_some() {
            if manage_exits(state, tick, exec, execution)? {
                return Ok(());
            }
            return pyramid(state, tick, exec, execution, marks, view);
        }

        try_entry(state, tick, exec, execution, filters, signal, marks, view)
    }
}

#[allow(clippy::too_many_arguments)]
fn try_entry(
    state: &mut SymbolState,
    tick: &Tick,
    exec: &mut ExecutionManager,
    execution: &ExecutionConfig,
    filters: &FilterConfig,
    signal: Option<(String, EntrySignal)>,
    marks: &BTreeMap<String, Decimal>,
    view: &dyn RiskView,
) -> Result<(), LedgerError> {
    let open = exec.ctx().portfolio.open_positions();
    if !exec.ctx().gate.can_open_new_position(open) {
        return Ok(());
    }
    if !state.atr_band_allows(tick, filters) {
        return Ok(());
    }
    if !state.trend_confirmed() {
        return Ok(());
    }
    let Some((strategy, signal)) = signal else {
        return Ok(());
    };

    let ctx = exec.ctx();
    let equity = ctx.portfolio.equity(marks);
    let qty = ctx.gate.sizer(equity, tick.last);
    if qty <= Decimal::ZERO {
        return Ok(());
    }
    let (sl, tp) = ctx.gate.sl_tp_levels(tick.last);

    let order = OrderRequest::new(tick.symbol.clone(), Side::Buy, qty);
    let reason = format!("{strategy}:{}", signal.reason);
    let tag = OrderTag {
        reason: &reason,
        features: &signal.features,
    };
    let outcome = exec.submit_entry(&order, tick, execution.micro_slices, tag, view)?;

    if !outcome.fills().is_empty() {
        debug!(symbol = %tick.symbol, %reason, sl = %sl, tp = %tp, "entered");
        state.holding = Some(Holding::new(tick.timestamp, tick.last, sl, tp));
    }
    Ok(())
}

/// Returns `true` when the position was fully closed on this tick.
fn manage_exits(
    state: &mut SymbolState,
    tick: &Tick,
    exec: &mut ExecutionManager,
    execution: &ExecutionConfig,
) -> Result<bool, LedgerError> {
    let atr = state.atr.value();
    let Some(holding) = state.holding.as_mut() else {
        return Ok(false);
    };
    let last = tick.last;
    let no_features = BTreeMap::new();

    holding.high = holding.high.max(last);
    if holding.entry_price > Decimal::ZERO {
        let move_pct = last / holding.entry_price - Decimal::ONE;
        holding.mfe_pct = holding.mfe_pct.max(move_pct);
        holding.mae_pct = holding.mae_pct.min(move_pct);
    }

    if execution.trail_atr_k > Decimal::ZERO {
        if let Some(atr) = atr {
            let trail = holding.high - execution.trail_atr_k * atr;
            if trail > holding.sl {
                holding.sl = trail;
            }
        }
    }

    let r = holding.risk_unit();
    if r > Decimal::ZERO {
        let level = match holding.partial_stage {
            0 if execution.partial_r1 > Decimal::ZERO => Some(("partial_r1", execution.partial_r1)),
            1 if execution.partial_r2 > Decimal::ZERO => Some(("partial_r2", execution.partial_r2)),
            _ => None,
        };
        if let Some((reason, multiple)) = level {
            if last >= holding.entry_price + multiple * r {
                let half = exec.ctx().portfolio.base_qty(&tick.symbol) / Decimal::TWO;
                let tag = OrderTag {
                    reason,
                    features: &no_features,
                };
                exec.submit_exit(&tick.symbol, half, 1, tick, tag)?;
                holding.partial_stage += 1;
            }
        }
    }

    let held = tick.timestamp - holding.entry_ts;
    let reason = if last <= holding.sl {
        "sl"
    } else if last >= holding.tp {
        "tp"
    } else if execution.time_stop_s > 0 && held >= Duration::seconds(execution.time_stop_s) {
        "time_stop"
    } else {
        return Ok(false);
    };

    let base = exec.ctx().portfolio.base_qty(&tick.symbol);
    let tag = OrderTag {
        reason,
        features: &no_features,
    };
    exec.submit_exit(&tick.symbol, base, execution.micro_slices, tick, tag)?;
    if exec.ctx().portfolio.base_qty(&tick.symbol) > Decimal::ZERO {
        return Ok(false);
    }

    let (mfe_r, mae_r) = if r > Decimal::ZERO {
        (
            holding.mfe_pct * holding.entry_price / r,
            holding.mae_pct * holding.entry_price / r,
        )
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    };
    exec.ctx_mut().ledger.append(
        tick.timestamp,
        "trade_excursion",
        &json!({
            "symbol": tick.symbol,
            "entry_price": holding.entry_price,
            "exit_price": last,
            "exit_reason": reason,
            "held_s": held.num_seconds(),
            "mfe_pct": holding.mfe_pct.round_dp(6),
            "mae_pct": holding.mae_pct.round_dp(6),
            "mfe_r": mfe_r.round_dp(4),
            "mae_r": mae_r.round_dp(4),
            "pyramids": holding.pyramids,
        }),
    )?;
    debug!(symbol = %tick.symbol, reason, "exited");
    state.holding = None;
    Ok(true)
}

fn pyramid(
    state: &mut SymbolState,
    tick: &Tick,
    exec: &mut ExecutionManager,
    execution: &ExecutionConfig,
    marks: &BTreeMap<String, Decimal>,
    view: &dyn RiskView,
) -> Result<(), LedgerError> {
    let Some(holding) = state.holding.as_mut() else {
        return Ok(());
    };
    if execution.pyramid_max == 0
        || execution.pyramid_step_pct <= Decimal::ZERO
        || holding.pyramids >= execution.pyramid_max
    {
        return Ok(());
    }

    let step = execution.pyramid_step_pct * Decimal::from(holding.pyramids + 1);
    if tick.last < holding.entry_price * (Decimal::ONE + step) {
        return Ok(());
    }

    let ctx = exec.ctx();
    let divisor = Decimal::from(execution.micro_slices.max(2));
    let qty = ctx.gate.sizer(ctx.portfolio.equity(marks), tick.last) / divisor;
    if qty <= Decimal::ZERO {
        return Ok(());
    }

    let mut features = BTreeMap::new();
    features.insert("level".to_string(), Decimal::from(holding.pyramids + 1));
    let tag = OrderTag {
        reason: "pyramid",
        features: &features,
    };
    let order = OrderRequest::new(tick.symbol.clone(), Side::Buy, qty);
    let outcome = exec.submit_entry(&order, tick, 1, tag, view)?;
    if !outcome.fills().is_empty() {
        holding.pyramids += 1;
        debug!(symbol = %tick.symbol, level = holding.pyramids, "pyramided");
    }
    Ok(())
}
