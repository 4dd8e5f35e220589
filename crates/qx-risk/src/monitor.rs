//! Live risk state, pre-trade checks, and the kill switch.
//!
//! # Evaluation model
//!
//! Pure deterministic logic plus sticky flags.  The monitor never touches
//! a broker or a portfolio itself: the engine feeds it equity and exposure
//! numbers and acts on the verdicts.  Once the kill switch is active every
//! subsequent intent is blocked until an explicit external reset.

use chrono::{DateTime, Utc};

use qx_policy::RiskPolicy;
use qx_schemas::{Micros, RiskState, Side, BPS_SCALE};

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

/// Why an intent was refused pre-trade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreTradeReject {
    /// The kill switch is active; all intents are blocked until reset.
    KillSwitchBlocked,
    /// Projected account leverage would exceed the policy limit.
    LeverageExceeded { projected_bps: i64, max_bps: i64 },
    /// Projected single-position notional would exceed the policy limit.
    PositionNotionalExceeded {
        symbol: String,
        projected: Micros,
        max: Micros,
    },
}

impl PreTradeReject {
    /// Short stable token for artifact payloads.
    pub fn rule(&self) -> &'static str {
        match self {
            PreTradeReject::KillSwitchBlocked => "kill_switch",
            PreTradeReject::LeverageExceeded { .. } => "max_leverage",
            PreTradeReject::PositionNotionalExceeded { .. } => "max_position_notional",
        }
    }
}

impl std::fmt::Display for PreTradeReject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreTradeReject::KillSwitchBlocked => {
                write!(f, "intent blocked: kill switch active")
            }
            PreTradeReject::LeverageExceeded {
                projected_bps,
                max_bps,
            } => write!(
                f,
                "intent rejected: projected leverage {projected_bps} bps exceeds max {max_bps} bps"
            ),
            PreTradeReject::PositionNotionalExceeded {
                symbol,
                projected,
                max,
            } => write!(
                f,
                "intent rejected: projected notional {projected} for {symbol} exceeds max {max}"
            ),
        }
    }
}

impl std::error::Error for PreTradeReject {}

/// Emitted exactly once when drawdown crosses the kill-switch threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillSwitchTrip {
    pub ts: DateTime<Utc>,
    pub threshold_bps: i64,
    pub observed_bps: i64,
}

/// What the engine does with open positions after a trip.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum TripAction {
    /// Cancel all non-terminal orders; keep positions.
    #[default]
    CancelOnly,
    /// Cancel all non-terminal orders and flatten positions.
    CancelAndFlatten,
}

/// One proposed order, priced at its expected fill for projection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedOrder {
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub price: Micros,
}

impl ProposedOrder {
    fn signed_delta(&self) -> i64 {
        match self.side {
            Side::Buy => self.qty,
            Side::Sell => -self.qty,
        }
    }
}

// ---------------------------------------------------------------------------
// RiskMonitor
// ---------------------------------------------------------------------------

/// Maintains [`RiskState`] incrementally and gates submissions.
#[derive(Debug, Clone)]
pub struct RiskMonitor {
    policy: RiskPolicy,
    trip_action: TripAction,
    peak_equity: Micros,
    equity: Micros,
    gross_exposure: Micros,
    current_drawdown_bps: i64,
    kill_switch_active: bool,
    breached_rules: Vec<String>,
}

impl RiskMonitor {
    pub fn new(policy: RiskPolicy, trip_action: TripAction, initial_equity: Micros) -> Self {
        Self {
            policy,
            trip_action,
            peak_equity: initial_equity,
            equity: initial_equity,
            gross_exposure: Micros::ZERO,
            current_drawdown_bps: 0,
            kill_switch_active: false,
            breached_rules: Vec::new(),
        }
    }

    /// Resume from a persisted snapshot (restart safety).  The kill switch
    /// stays in whatever state it was persisted in — a restart is not a
    /// reset.
    pub fn restore(policy: RiskPolicy, trip_action: TripAction, state: &RiskState) -> Self {
        Self {
            policy,
            trip_action,
            peak_equity: state.peak_equity,
            equity: state.peak_equity
                .saturating_sub(state.peak_equity.mul_bps(state.current_drawdown_bps)),
            gross_exposure: Micros::ZERO,
            current_drawdown_bps: state.current_drawdown_bps,
            kill_switch_active: state.kill_switch_active,
            breached_rules: state.breached_rules.clone(),
        }
    }

    pub fn trip_action(&self) -> TripAction {
        self.trip_action
    }

    pub fn kill_switch_active(&self) -> bool {
        self.kill_switch_active
    }

    pub fn current_drawdown_bps(&self) -> i64 {
        self.current_drawdown_bps
    }

    // -- state updates -------------------------------------------------------

    /// Feed the post-fill (or post-mark) equity and exposure.  Updates the
    /// peak, recomputes drawdown, and trips the kill switch on threshold.
    ///
    /// Returns the trip event exactly once, at the crossing.
    pub fn update(
        &mut self,
        ts: DateTime<Utc>,
        equity: Micros,
        gross_exposure: Micros,
    ) -> Option<KillSwitchTrip> {
        self.equity = equity;
        self.gross_exposure = gross_exposure;

        // Peak first, then drawdown against the updated peak.
        if equity > self.peak_equity {
            self.peak_equity = equity;
        }
        self.current_drawdown_bps = self
            .peak_equity
            .saturating_sub(equity)
            .ratio_bps(self.peak_equity);

        if !self.kill_switch_active
            && self.current_drawdown_bps >= self.policy.kill_switch_dd_bps
        {
            self.kill_switch_active = true;
            self.breached_rules.push("kill_switch_dd".to_string());
            return Some(KillSwitchTrip {
                ts,
                threshold_bps: self.policy.kill_switch_dd_bps,
                observed_bps: self.current_drawdown_bps,
            });
        }
        None
    }

    /// Explicit external reset.  Drawdown history (the peak) is preserved.
    pub fn reset_kill_switch(&mut self) {
        self.kill_switch_active = false;
    }

    // -- pre-trade gate ------------------------------------------------------

    /// Evaluate an intent against the merged risk policy.
    ///
    /// `current_qty` / `current_mark` describe the existing position in the
    /// proposed symbol so projections credit risk-reducing trades.
    pub fn pre_trade_check(
        &self,
        proposed: &ProposedOrder,
        current_qty: i64,
        current_mark: Micros,
    ) -> Result<(), PreTradeReject> {
        if self.kill_switch_active {
            return Err(PreTradeReject::KillSwitchBlocked);
        }

        let old_notional = current_mark
            .checked_mul_qty(current_qty.abs())
            .unwrap_or(Micros::MAX);
        let new_qty = current_qty + proposed.signed_delta();
        let new_notional = proposed
            .price
            .checked_mul_qty(new_qty.abs())
            .unwrap_or(Micros::MAX);

        // Projected leverage: gross exposure with this symbol's notional
        // replaced by its post-trade value, over current equity.
        let projected_gross = self
            .gross_exposure
            .saturating_sub(old_notional)
            .saturating_add(new_notional);
        let projected_bps = projected_gross.ratio_bps(self.equity);
        if self.equity.is_zero() || projected_bps > self.policy.max_leverage_bps {
            let projected_bps = if self.equity.is_zero() {
                i64::MAX / BPS_SCALE
            } else {
                projected_bps
            };
            return Err(PreTradeReject::LeverageExceeded {
                projected_bps,
                max_bps: self.policy.max_leverage_bps,
            });
        }

        if new_notional > self.policy.max_position_notional {
            return Err(PreTradeReject::PositionNotionalExceeded {
                symbol: proposed.symbol.clone(),
                projected: new_notional,
                max: self.policy.max_position_notional,
            });
        }

        Ok(())
    }

    // -- snapshot ------------------------------------------------------------

    /// Project the canonical [`RiskState`] for artifact emission.
    pub fn state(&self, ts: DateTime<Utc>) -> RiskState {
        RiskState {
            ts,
            max_leverage_bps: self.policy.max_leverage_bps,
            current_leverage_bps: self.gross_exposure.ratio_bps(self.equity),
            max_position_notional: self.policy.max_position_notional,
            max_drawdown_bps: self.policy.max_drawdown_bps,
            current_drawdown_bps: self.current_drawdown_bps,
            kill_switch_dd_bps: self.policy.kill_switch_dd_bps,
            peak_equity: self.peak_equity,
            breached_rules: self.breached_rules.clone(),
            kill_switch_active: self.kill_switch_active,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
