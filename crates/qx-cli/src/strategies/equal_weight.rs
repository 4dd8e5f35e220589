//! Equal-weight rebalancing plugin: holds the universe at equal weights,
//! rebalancing once per bar.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use qx_policy::PolicyOverrides;
use qx_schemas::{PortfolioState, TargetWeights};
use qx_strategy::{RebalanceStrategy, StrategyBuild, StrategyBundle, StrategyMeta};

const UNIVERSE: [&str; 2] = ["BTC-USD", "ETH-USD"];

struct EqualWeight;

impl RebalanceStrategy for EqualWeight {
    fn target_weights(
        &mut self,
        ts: DateTime<Utc>,
        _portfolio: &PortfolioState,
    ) -> Option<TargetWeights> {
        let per_symbol = 10_000 / UNIVERSE.len() as i64;
        let weights: BTreeMap<String, i64> = UNIVERSE
            .iter()
            .map(|s| (s.to_string(), per_symbol))
            .collect();
        Some(TargetWeights {
            ts,
            weights,
            rebalance: true,
            reason: Some("per-bar equal weight".to_string()),
        })
    }
}

/// Bundle factory — the plugin's export surface.
pub fn bundle() -> StrategyBundle {
    StrategyBundle {
        meta: StrategyMeta {
            name: "equal_weight".to_string(),
            universe: UNIVERSE.iter().map(|s| s.to_string()).collect(),
            timeframe: "1m".to_string(),
            required_fields: vec!["close".to_string()],
            session: None,
        },
        build: StrategyBuild::Rebalance(Box::new(|| Box::new(EqualWeight))),
        overrides: PolicyOverrides::default(),
    }
}
