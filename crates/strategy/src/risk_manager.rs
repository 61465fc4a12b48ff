//! Pre-trade risk and compliance gate.
//!
//! `gate_trade` runs a fixed pipeline and returns at the first terminal rule:
//!
//! 1. compliance (whitelist, blocked tags) -> `Block`
//! 2. 30-day drawdown -> `Halt` at `dd_halt`, warning at `dd_warn`
//! 3. flash crash over the trailing window -> `Pause`
//! 4. kill switch (breaches in the last 24h) -> `Halt`
//! 5. historical VaR above `var_max` -> quantity stepped down, still `Allow`
//!
//! Every terminal or warning outcome registers a breach and appends a
//! `guardrail_breach` record to the decision ledger.

use crate::risk_metrics::{historical_var, max_drawdown};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use spotgate_core::compliance::CompliancePolicy;
use spotgate_core::config::RiskConfig;
use spotgate_core::events::OrderRequest;
use spotgate_core::ledger::{DecisionLedger, LedgerError};
use spotgate_core::position_sizing::{calculate_position_size, stop_and_target};
use spotgate_core::traits::RiskView;
use std::collections::{BTreeMap, VecDeque};
use tracing::warn;

const BREACH_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateDecision {
    Allow,
    Block,
    Pause,
    Halt,
}

impl GateDecision {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
            Self::Pause => "pause",
            Self::Halt => "halt",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub decision: GateDecision,
    pub reasons: Vec<String>,
    pub adjusted_order: OrderRequest,
}

impl GateOutcome {
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        self.decision == GateDecision::Allow
    }
}

/// Mutable guardrail state; fresh per run.
#[derive(Debug, Clone, Default)]
pub struct RiskState {
    pub recent_breaches: VecDeque<DateTime<Utc>>,
    pub dd_soft_triggered: bool,
    pub dd_hard_triggered: bool,
    /// Not latched: `update_drawdown` recomputes it from the breaches still
    /// inside the 24h window, so it clears once old breaches age out.
    pub kill_switch_engaged: bool,
    pub price_windows: BTreeMap<String, VecDeque<(DateTime<Utc>, Decimal)>>,
}

pub struct RiskGate {
    config: RiskConfig,
    policy: CompliancePolicy,
    state: RiskState,
}

impl RiskGate {
    #[must_use]
    pub fn new(config: RiskConfig, policy: CompliancePolicy) -> Self {
        Self {
            config,
            policy,
            state: RiskState::default(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &RiskConfig {
        &self.config
    }

    #[must_use]
    pub const fn state(&self) -> &RiskState {
        &self.state
    }

    /// Base quantity for a new entry: `equity * max_pos_pct / price`.
    #[must_use]
    pub fn sizer(&self, equity: Decimal, price: Decimal) -> Decimal {
        calculate_position_size(equity, self.config.max_pos_pct, price).unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn sl_tp_levels(&self, entry_price: Decimal) -> (Decimal, Decimal) {
        stop_and_target(entry_price, self.config.per_trade_sl_pct, self.config.tp_pct)
    }

    /// Records a price in the symbol's trailing flash-crash window.
    pub fn observe_price(&mut self, symbol: &str, ts: DateTime<Utc>, price: Decimal) {
        let cutoff = ts - Duration::seconds(self.config.flash_window_secs);
        let window = self.state.price_windows.entry(symbol.to_string()).or_default();
        window.push_back((ts, price));
        while window.front().is_some_and(|(t, _)| *t < cutoff) {
            window.pop_front();
        }
    }

    /// Pushes a breach timestamp and drops those older than 24h.
    pub fn register_breach(&mut self, now: DateTime<Utc>) {
        self.state.recent_breaches.push_back(now);
        self.prune_breaches(now);
    }

    #[must_use]
    pub fn breaches_in_window(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::hours(BREACH_WINDOW_HOURS);
        self.state
            .recent_breaches
            .iter()
            .filter(|t| **t >= cutoff && **t <= now)
            .count()
    }

    /// Latches the soft/hard drawdown flags against the run's starting
    /// equity and refreshes the kill switch. A breach is recorded once per
    /// flag transition.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger write fails.
    pub fn update_drawdown(
        &mut self,
        start_equity: Decimal,
        equity: Decimal,
        now: DateTime<Utc>,
        ledger: &mut DecisionLedger,
    ) -> Result<(), LedgerError> {
        if start_equity <= Decimal::ZERO {
            return Ok(());
        }
        let dd = Decimal::ONE - equity / start_equity;

        if dd >= self.config.dd_soft && !self.state.dd_soft_triggered {
            self.state.dd_soft_triggered = true;
            warn!(drawdown = %dd.round_dp(6), "soft drawdown limit reached, entries disabled");
            self.breach(now, ledger, "dd_soft", json!({
                "metric": dd.round_dp(6),
                "threshold": self.config.dd_soft,
                "action": "no_new_entries",
            }))?;
        }
        if dd >= self.config.dd_hard && !self.state.dd_hard_triggered {
            self.state.dd_hard_triggered = true;
            warn!(drawdown = %dd.round_dp(6), "hard drawdown limit reached");
            self.breach(now, ledger, "dd_hard", json!({
                "metric": dd.round_dp(6),
                "threshold": self.config.dd_hard,
                "action": "no_new_entries",
            }))?;
        }

        self.prune_breaches(now);
        self.state.kill_switch_engaged =
            self.state.recent_breaches.len() >= self.config.kill_switch_breaches;
        Ok(())
    }

    #[must_use]
    pub fn can_open_new_position(&self, open_positions: usize) -> bool {
        if self.state.kill_switch_engaged
            || self.state.dd_hard_triggered
            || self.state.dd_soft_triggered
        {
            return false;
        }
        open_positions < self.config.max_concurrent_pos
    }

    /// Runs the gate pipeline for `order` at simulation time `now`.
    ///
    /// The input order is never modified; any size reduction is reflected in
    /// `adjusted_order`.
    ///
    /// # Errors
    ///
    /// Returns an error only if a breach record cannot be written.
    pub fn gate_trade(
        &mut self,
        order: &OrderRequest,
        now: DateTime<Utc>,
        view: &dyn RiskView,
        ledger: &mut DecisionLedger,
    ) -> Result<GateOutcome, LedgerError> {
        let mut reasons = Vec::new();

        // 1) whitelist and tags
        if let Err(violation) = self.policy.check(&order.symbol, &order.meta) {
            let reason = violation.to_string();
            self.breach(now, ledger, "compliance", json!({
                "symbol": order.symbol,
                "reason": reason,
                "action": "block",
            }))?;
            return Ok(Self::terminal(GateDecision::Block, reason, order));
        }

        // 2) 30-day drawdown
        let dd = max_drawdown(&view.equity_series_30d(now));
        if dd >= self.config.dd_halt {
            self.breach(now, ledger, "dd_halt", json!({
                "metric": dd.round_dp(6),
                "threshold": self.config.dd_halt,
                "action": "halt",
            }))?;
            let reason = format!(
                "30d drawdown {} >= {}",
                dd.round_dp(3),
                self.config.dd_halt.round_dp(3)
            );
            return Ok(Self::terminal(GateDecision::Halt, reason, order));
        }
        if dd >= self.config.dd_warn {
            self.breach(now, ledger, "dd_warn", json!({
                "metric": dd.round_dp(6),
                "threshold": self.config.dd_warn,
                "action": "warn",
            }))?;
            reasons.push(format!("dd_warn {}", dd.round_dp(3)));
        }

        // 3) flash crash against the oldest price in the trailing window
        if let Some(drop) = self.flash_drop(&order.symbol, now) {
            if drop > self.config.flash_crash_drop_1h {
                self.breach(now, ledger, "flash_crash", json!({
                    "symbol": order.symbol,
                    "metric": drop.round_dp(6),
                    "threshold": self.config.flash_crash_drop_1h,
                    "action": "pause",
                }))?;
                let reason = format!(
                    "flash_crash {} > {}",
                    drop.round_dp(3),
                    self.config.flash_crash_drop_1h.round_dp(3)
                );
                return Ok(Self::terminal(GateDecision::Pause, reason, order));
            }
        }

        // 4) kill switch
        if self.breaches_in_window(now) >= self.config.kill_switch_breaches {
            self.state.kill_switch_engaged = true;
            self.breach(now, ledger, "kill_switch", json!({ "action": "halt" }))?;
            return Ok(Self::terminal(GateDecision::Halt, "kill_switch".to_string(), order));
        }

        // 5) VaR step-down
        let mut adjusted = order.clone();
        let var = historical_var(&view.daily_returns_30d(now), self.config.var_confidence);
        if var > self.config.var_max {
            self.breach(now, ledger, "var_stepdown", json!({
                "metric": var.round_dp(6),
                "threshold": self.config.var_max,
                "action": "stepdown",
            }))?;
            adjusted = order.step_down(self.config.step_down_factor);
            reasons.push(format!(
                "var {} > {}",
                var.round_dp(3),
                self.config.var_max.round_dp(3)
            ));
        }

        Ok(GateOutcome {
            decision: GateDecision::Allow,
            reasons,
            adjusted_order: adjusted,
        })
    }

    /// `(reference - current) / reference` where the reference is the oldest
    /// sample still inside the window and the current price is the newest.
    fn flash_drop(&self, symbol: &str, now: DateTime<Utc>) -> Option<Decimal> {
        let cutoff = now - Duration::seconds(self.config.flash_window_secs);
        let window = self.state.price_windows.get(symbol)?;
        let mut in_window = window.iter().filter(|(t, _)| *t >= cutoff && *t <= now);
        let (_, reference) = *in_window.next()?;
        let current = in_window.last().map_or(reference, |(_, p)| *p);
        if reference <= Decimal::ZERO {
            return None;
        }
        Some((reference - current) / reference)
    }

    fn breach(
        &mut self,
        now: DateTime<Utc>,
        ledger: &mut DecisionLedger,
        kind: &str,
        fields: serde_json::Value,
    ) -> Result<(), LedgerError> {
        self.register_breach(now);
        let mut payload = fields;
        if let Some(map) = payload.as_object_mut() {
            map.insert("type".to_string(), json!(kind));
        }
        warn!(breach = kind, "guardrail breach");
        ledger.append(now, "guardrail_breach", &payload)?;
        Ok(())
    }

    fn prune_breaches(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(BREACH_WINDOW_HOURS);
        while self
            .state
            .recent_breaches
            .front()
            .is_some_and(|t| *t < cutoff)
        {
            self.state.recent_breaches.pop_front();
        }
    }

    fn terminal(decision: GateDecision, reason: String, order: &OrderRequest) -> GateOutcome {
        GateOutcome {
            decision,
            reasons: vec![reason],
            adjusted_order: order.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::Value;
    use spotgate_core::events::{OrderMeta, Side};
    use spotgate_core::traits::StaticRiskView;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn gate() -> RiskGate {
        RiskGate::new(RiskConfig::default(), CompliancePolicy::default())
    }

    fn flat_view() -> StaticRiskView {
        StaticRiskView {
            equity: (0..30)
                .map(|d| (t0() - Duration::days(30 - d), dec!(10000)))
                .collect(),
            daily_returns: vec![Decimal::ZERO; 30],
        }
    }

    fn buy(qty: Decimal) -> OrderRequest {
        OrderRequest::new("BTC/USDT", Side::Buy, qty)
    }

    fn breach_events(ledger: &DecisionLedger) -> Vec<Value> {
        ledger
            .lines()
            .iter()
            .map(|l| serde_json::from_str::<Value>(l).unwrap())
            .filter(|v| v["event"] == "guardrail_breach")
            .collect()
    }

    #[test]
    fn test_allow_when_clean() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let outcome = gate.gate_trade(&buy(dec!(1)), t0(), &flat_view(), &mut ledger).unwrap();

        assert_eq!(outcome.decision, GateDecision::Allow);
        assert!(outcome.reasons.is_empty());
        assert_eq!(outcome.adjusted_order.qty, dec!(1));
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_blocks_non_whitelisted() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let order = OrderRequest::new("DOGE/USDT", Side::Buy, dec!(1));
        let outcome = gate.gate_trade(&order, t0(), &flat_view(), &mut ledger).unwrap();

        assert_eq!(outcome.decision, GateDecision::Block);
        let events = breach_events(&ledger);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "compliance");
        assert_eq!(events[0]["action"], "block");
    }

    #[test]
    fn test_blocks_tagged_token() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let order = buy(dec!(1)).with_meta(OrderMeta {
            tags: vec!["riba".to_string()],
            ..OrderMeta::default()
        });
        let outcome = gate.gate_trade(&order, t0(), &flat_view(), &mut ledger).unwrap();
        assert_eq!(outcome.decision, GateDecision::Block);
    }

    #[test]
    fn test_flash_crash_boundary() {
        let mut ledger = DecisionLedger::in_memory();

        // exactly 30% drop: strict comparison allows it
        let mut gate70 = gate();
        gate70.observe_price("BTC/USDT", t0(), dec!(100));
        gate70.observe_price("BTC/USDT", t0() + Duration::minutes(30), dec!(70));
        let outcome = gate70
            .gate_trade(&buy(dec!(1)), t0() + Duration::minutes(30), &flat_view(), &mut ledger)
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Allow);

        let mut gate69 = gate();
        gate69.observe_price("BTC/USDT", t0(), dec!(100));
        gate69.observe_price("BTC/USDT", t0() + Duration::minutes(30), dec!(69));
        let outcome = gate69
            .gate_trade(&buy(dec!(1)), t0() + Duration::minutes(30), &flat_view(), &mut ledger)
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Pause);
        assert!(outcome.reasons[0].starts_with("flash_crash"));
    }

    #[test]
    fn test_flash_reference_expires_after_window() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        gate.observe_price("BTC/USDT", t0(), dec!(100));
        gate.observe_price("BTC/USDT", t0() + Duration::minutes(90), dec!(60));

        let outcome = gate
            .gate_trade(&buy(dec!(1)), t0() + Duration::minutes(90), &flat_view(), &mut ledger)
            .unwrap();
        assert_eq!(outcome.decision, GateDecision::Allow);
    }

    #[test]
    fn test_kill_switch_threshold() {
        let mut ledger = DecisionLedger::in_memory();
        let now = t0();

        let mut two = gate();
        two.register_breach(now - Duration::hours(2));
        two.register_breach(now - Duration::hours(1));
        let outcome = two.gate_trade(&buy(dec!(1)), now, &flat_view(), &mut ledger).unwrap();
        assert_eq!(outcome.decision, GateDecision::Allow);

        let mut three = gate();
        three.register_breach(now - Duration::hours(3));
        three.register_breach(now - Duration::hours(2));
        three.register_breach(now - Duration::hours(1));
        let outcome = three.gate_trade(&buy(dec!(1)), now, &flat_view(), &mut ledger).unwrap();
        assert_eq!(outcome.decision, GateDecision::Halt);
        assert_eq!(outcome.reasons, vec!["kill_switch".to_string()]);
    }

    #[test]
    fn test_old_breaches_do_not_count() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let now = t0();
        for h in [30, 29, 28] {
            gate.register_breach(now - Duration::hours(h));
        }
        let outcome = gate.gate_trade(&buy(dec!(1)), now, &flat_view(), &mut ledger).unwrap();
        assert_eq!(outcome.decision, GateDecision::Allow);
    }

    #[test]
    fn test_var_step_down() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let mut returns = vec![dec!(0.002); 26];
        returns.extend([dec!(-0.15), dec!(-0.12), dec!(-0.09), dec!(-0.07)]);
        let view = StaticRiskView {
            daily_returns: returns,
            ..flat_view()
        };

        let order = buy(dec!(100));
        let outcome = gate.gate_trade(&order, t0(), &view, &mut ledger).unwrap();

        assert_eq!(outcome.decision, GateDecision::Allow);
        assert!(outcome.adjusted_order.qty < dec!(100));
        assert_eq!(outcome.adjusted_order.qty, dec!(50));
        assert!(outcome.reasons.iter().any(|r| r.contains("var")));
        assert_eq!(order.qty, dec!(100));
        assert_eq!(breach_events(&ledger)[0]["type"], "var_stepdown");
    }

    #[test]
    fn test_drawdown_halt() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let view = StaticRiskView {
            equity: vec![
                (t0() - Duration::days(3), dec!(10000)),
                (t0() - Duration::days(2), dec!(9000)),
                (t0() - Duration::days(1), dec!(8000)),
            ],
            daily_returns: vec![],
        };
        let outcome = gate.gate_trade(&buy(dec!(1)), t0(), &view, &mut ledger).unwrap();

        assert_eq!(outcome.decision, GateDecision::Halt);
        assert!(outcome.reasons[0].contains("drawdown"));
    }

    #[test]
    fn test_drawdown_warning_continues() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let view = StaticRiskView {
            equity: vec![
                (t0() - Duration::days(2), dec!(10000)),
                (t0() - Duration::days(1), dec!(8400)),
            ],
            daily_returns: vec![],
        };
        let outcome = gate.gate_trade(&buy(dec!(1)), t0(), &view, &mut ledger).unwrap();

        assert_eq!(outcome.decision, GateDecision::Allow);
        assert!(outcome.reasons[0].starts_with("dd_warn"));
        assert_eq!(gate.breaches_in_window(t0()), 1);
    }

    #[test]
    fn test_update_drawdown_latches_once() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let now = t0();

        gate.update_drawdown(dec!(10000), dec!(9800), now, &mut ledger).unwrap();
        assert!(gate.can_open_new_position(0));

        gate.update_drawdown(dec!(10000), dec!(9650), now, &mut ledger).unwrap();
        gate.update_drawdown(dec!(10000), dec!(9600), now, &mut ledger).unwrap();
        assert!(gate.state().dd_soft_triggered);
        assert!(!gate.can_open_new_position(0));
        assert_eq!(breach_events(&ledger).len(), 1);

        gate.update_drawdown(dec!(10000), dec!(9400), now, &mut ledger).unwrap();
        assert!(gate.state().dd_hard_triggered);
        assert_eq!(breach_events(&ledger).len(), 2);
        assert!(!gate.state().kill_switch_engaged);
    }

    #[test]
    fn test_kill_switch_clears_when_breaches_age_out() {
        let mut gate = gate();
        let mut ledger = DecisionLedger::in_memory();
        let now = t0();
        for h in [3, 2, 1] {
            gate.register_breach(now - Duration::hours(h));
        }

        gate.update_drawdown(dec!(10000), dec!(10000), now, &mut ledger).unwrap();
        assert!(gate.state().kill_switch_engaged);
        assert!(!gate.can_open_new_position(0));

        let later = now + Duration::hours(23);
        gate.update_drawdown(dec!(10000), dec!(10000), later, &mut ledger).unwrap();
        assert!(!gate.state().kill_switch_engaged);
        assert!(gate.can_open_new_position(0));
    }

    #[test]
    fn test_max_concurrent_positions() {
        let gate = gate();
        assert!(gate.can_open_new_position(4));
        assert!(!gate.can_open_new_position(5));
    }

    #[test]
    fn test_sizer_and_levels() {
        let gate = gate();
        assert_eq!(gate.sizer(dec!(10000), dec!(100)), dec!(1.5));
        assert_eq!(gate.sizer(dec!(10000), Decimal::ZERO), Decimal::ZERO);
        assert_eq!(gate.sl_tp_levels(dec!(1000)), (dec!(997), dec!(1002)));
    }
}
