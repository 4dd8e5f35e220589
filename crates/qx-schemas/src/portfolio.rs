//! Portfolio and risk state snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Micros;

/// Per-symbol position derived from the fill stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Signed quantity: +long, -short, 0 flat.
    pub qty: i64,
    /// Volume-weighted average entry price of the open quantity.
    pub avg_price: Micros,
    /// Latest mark price (bar close).
    pub mark_price: Micros,
    pub unrealized_pnl: Micros,
    pub realized_pnl: Micros,
}

impl Position {
    /// Absolute notional at the current mark, saturating on overflow.
    pub fn notional(&self) -> Micros {
        self.mark_price
            .checked_mul_qty(self.qty.abs())
            .unwrap_or(Micros::MAX)
    }
}

/// Portfolio snapshot.  Derived entirely from initial cash, the ordered
/// fill stream, and the latest mark prices.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub ts: DateTime<Utc>,
    pub cash: Micros,
    /// Invariant: `equity == cash + Σ qty × mark_price` at every emission.
    pub equity: Micros,
    pub positions: BTreeMap<String, Position>,
    pub gross_exposure: Micros,
    pub net_exposure: Micros,
    /// Order ids not yet in a terminal state, sorted for determinism.
    pub pending_orders: Vec<Uuid>,
}

/// Live risk snapshot maintained by the risk monitor.
///
/// Ratio fields are basis points so drawdown and leverage comparisons are
/// exact integer arithmetic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskState {
    pub ts: DateTime<Utc>,
    pub max_leverage_bps: i64,
    pub current_leverage_bps: i64,
    pub max_position_notional: Micros,
    pub max_drawdown_bps: i64,
    pub current_drawdown_bps: i64,
    pub kill_switch_dd_bps: i64,
    pub peak_equity: Micros,
    pub breached_rules: Vec<String>,
    pub kill_switch_active: bool,
}
