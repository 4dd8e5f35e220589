//! Strategy intent types: per-bar signals and rebalance target weights.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a signal asks the engine to do for one symbol.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalAction {
    EnterLong,
    ExitLong,
    EnterShort,
    ExitShort,
    Hold,
}

/// A per-bar trading intent produced by a signal strategy.
///
/// `strength_bps` is conviction in basis points (0..=10_000); the sizer
/// scales position size by it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub signal_id: Uuid,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub action: SignalAction,
    pub strength_bps: i64,
    pub strategy_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl Signal {
    /// A full-strength signal with empty metadata and a deterministic id
    /// derived from `(strategy, symbol, action, ts)`.
    pub fn full(
        ts: DateTime<Utc>,
        symbol: impl Into<String>,
        action: SignalAction,
        strategy_name: impl Into<String>,
    ) -> Self {
        let symbol = symbol.into();
        let strategy_name = strategy_name.into();
        let name = format!(
            "signal:{strategy_name}:{symbol}:{action:?}:{}",
            ts.to_rfc3339()
        );
        Self {
            signal_id: Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()),
            ts,
            symbol,
            action,
            strength_bps: 10_000,
            strategy_name,
            metadata: BTreeMap::new(),
        }
    }
}

/// Target portfolio weights for one rebalance step.
///
/// Weights are basis points of equity per symbol, so the sum constraint
/// (≤ 10_000) is exact integer arithmetic.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetWeights {
    pub ts: DateTime<Utc>,
    pub weights: BTreeMap<String, i64>,
    pub rebalance: bool,
    pub reason: Option<String>,
}

impl TargetWeights {
    /// Sum of all target weights in basis points.
    pub fn total_bps(&self) -> i64 {
        self.weights.values().sum()
    }
}
