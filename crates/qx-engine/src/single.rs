//! Per-bar signal engine over one strategy and its declared universe.

use std::collections::BTreeSet;

use tracing::{debug, info};

use qx_artifacts::ArtifactWriter;
use qx_policy::PolicySet;
use qx_ports::{BarObserver, Broker, Notifier};
use qx_schemas::Bar;
use qx_strategy::{Strategy, StrategyMeta};

use crate::core::{Backoff, EngineConfig, EngineCore, EngineError, RunSummary};
use crate::sizing::size_signal;
use crate::stop::StopToken;

/// Drives one signal strategy bar by bar.
///
/// Per bar, in order: readiness gate → mark portfolio → `on_bar` intents
/// → sizing → risk pre-trade → order state machine → broker port → fill
/// application → risk/kill-switch evaluation → artifact emission.  The
/// engine consumes itself on `run` — one engine, one run, one manifest.
pub struct SingleStrategyEngine<B: Broker + BarObserver> {
    core: EngineCore<B>,
    strategy: Box<dyn Strategy>,
    universe: BTreeSet<String>,
}

impl<B: Broker + BarObserver> SingleStrategyEngine<B> {
    pub fn new(
        config: EngineConfig,
        policies: PolicySet,
        meta: &StrategyMeta,
        strategy: Box<dyn Strategy>,
        broker: B,
        writer: ArtifactWriter,
    ) -> Self {
        Self {
            core: EngineCore::new(config, policies, meta.name.clone(), broker, writer),
            strategy,
            universe: meta.universe.iter().cloned().collect(),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.core.set_notifier(notifier);
        self
    }

    pub fn with_backoff(mut self, backoff: Box<dyn Backoff>) -> Self {
        self.core.set_backoff(backoff);
        self
    }

    /// Attach restart-safety persistence, restoring any prior session.
    pub fn with_state_store(
        mut self,
        store: Box<dyn qx_ports::StateStore>,
    ) -> Result<Self, EngineError> {
        self.core.attach_state_store(store)?;
        Ok(self)
    }

    /// Run to completion (or cooperative stop) over closed bars.
    ///
    /// Bars are processed in `(ts, symbol)` order regardless of input
    /// order; bars outside the strategy's declared universe are skipped.
    pub fn run(mut self, mut bars: Vec<Bar>, stop: &StopToken) -> Result<RunSummary, EngineError> {
        bars.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.symbol.cmp(&b.symbol)));

        let result = self.run_inner(&bars, stop);
        self.strategy.finalize();
        match result {
            Ok(()) => self.core.finalize(None),
            Err(e) => {
                // Seal the manifest with the fatal error recorded, then
                // surface the error to the caller.
                let message = e.to_string();
                let _ = self.core.finalize(Some(message));
                Err(e)
            }
        }
    }

    fn run_inner(&mut self, bars: &[Bar], stop: &StopToken) -> Result<(), EngineError> {
        for bar in bars {
            if stop.is_stopped() {
                info!("stop requested, ending run between bars");
                break;
            }
            if !self.universe.contains(&bar.symbol) {
                debug!(symbol = %bar.symbol, "bar outside declared universe, skipped");
                continue;
            }

            for fill in self.core.begin_bar(bar)? {
                self.strategy.on_fill(&fill);
            }

            let signals = self.strategy.on_bar(bar);
            for signal in signals {
                if !self.universe.contains(&signal.symbol) {
                    debug!(symbol = %signal.symbol, "signal outside universe, dropped");
                    continue;
                }
                let Some(price) = self.core.est_price(&signal.symbol) else {
                    continue;
                };
                let held = self.core.book.qty(&signal.symbol);
                let Some(intent) = size_signal(
                    &signal,
                    self.core.book.equity(),
                    price,
                    &self.core.policies.sizing,
                    held,
                ) else {
                    continue;
                };

                if !self.core.pre_trade(&intent)? {
                    continue;
                }
                let request = self.core.make_request(&intent);
                for fill in self.core.submit(request)? {
                    self.strategy.on_fill(&fill);
                }
            }

            self.core.end_bar()?;
        }
        Ok(())
    }
}
