//! Strategy traits and metadata.

use chrono::{DateTime, Utc};

use qx_schemas::{Bar, Fill, PortfolioState, Signal, TargetWeights};

/// Lifecycle hooks for a per-bar signal strategy.
///
/// Strategies are pure consumers of bars and fills: no broker, no data
/// source, no clock.  Determinism is the strategy author's obligation —
/// the host guarantees deterministic inputs.
pub trait Strategy {
    /// One closed bar; returns zero or more intents for the engine.
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal>;

    /// A fill against one of this strategy's orders.
    fn on_fill(&mut self, _fill: &Fill) {}

    /// End of run.  After this returns the engine drains open orders.
    fn finalize(&mut self) {}
}

/// Lifecycle hooks for a target-weight rebalancing strategy.
pub trait RebalanceStrategy {
    /// Called on each rebalance trigger.  `None` means "no rebalance now".
    fn target_weights(
        &mut self,
        ts: DateTime<Utc>,
        portfolio: &PortfolioState,
    ) -> Option<TargetWeights>;

    fn on_fill(&mut self, _fill: &Fill) {}

    fn finalize(&mut self) {}
}

/// Static metadata a bundle declares about its strategy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StrategyMeta {
    /// Registry key.  Must match the registered plugin name.
    pub name: String,
    /// Symbols the strategy may trade.  Must be non-empty.
    pub universe: Vec<String>,
    /// Declared bar timeframe.  Only `"1m"` is accepted.
    pub timeframe: String,
    /// Bar fields the strategy reads (e.g. `"close"`).  Must be non-empty.
    pub required_fields: Vec<String>,
    /// Optional trading-session label (informational).
    pub session: Option<String>,
}

impl StrategyMeta {
    pub fn new(name: impl Into<String>, universe: Vec<String>) -> Self {
        Self {
            name: name.into(),
            universe,
            timeframe: "1m".to_string(),
            required_fields: vec!["close".to_string()],
            session: None,
        }
    }
}
