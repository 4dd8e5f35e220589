//! Momentum crossover plugin: enter long when the close rises above the
//! previous close, exit otherwise.

use std::collections::BTreeMap;

use qx_policy::PolicyOverrides;
use qx_schemas::{Bar, Micros, Signal, SignalAction};
use qx_strategy::{Strategy, StrategyBuild, StrategyBundle, StrategyMeta};

struct MaCrossover {
    prev_close: BTreeMap<String, Micros>,
}

impl Strategy for MaCrossover {
    fn on_bar(&mut self, bar: &Bar) -> Vec<Signal> {
        let action = match self.prev_close.get(&bar.symbol) {
            Some(prev) if bar.close > *prev => SignalAction::EnterLong,
            Some(_) => SignalAction::ExitLong,
            None => SignalAction::Hold,
        };
        self.prev_close.insert(bar.symbol.clone(), bar.close);
        vec![Signal::full(
            bar.ts,
            bar.symbol.clone(),
            action,
            "ma_crossover",
        )]
    }
}

/// Bundle factory — the plugin's export surface.
pub fn bundle() -> StrategyBundle {
    StrategyBundle {
        meta: StrategyMeta {
            name: "ma_crossover".to_string(),
            universe: vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            timeframe: "1m".to_string(),
            required_fields: vec!["close".to_string()],
            session: None,
        },
        build: StrategyBuild::Signal(Box::new(|| {
            Box::new(MaCrossover {
                prev_close: BTreeMap::new(),
            })
        })),
        overrides: PolicyOverrides::default(),
    }
}
