//! Target-weight rebalancing engine.

use tracing::{debug, info, warn};

use qx_artifacts::ArtifactWriter;
use qx_policy::PolicySet;
use qx_ports::{BarObserver, Broker, Notifier};
use qx_schemas::Bar;
use qx_strategy::{RebalanceStrategy, StrategyMeta};

use crate::core::{Backoff, EngineConfig, EngineCore, EngineError, RunSummary};
use crate::sizing::rebalance_plan;
use crate::stop::StopToken;

/// Drives a rebalancing strategy: on each trigger the strategy returns a
/// target-weight vector, which is reduced to delta orders under the
/// turnover cap and fed through the same risk gate and order state
/// machine as the signal engine.
///
/// Order emission is deterministic: sells precede buys (freeing buying
/// power first), ascending symbol within each side.
pub struct RebalancingEngine<B: Broker + BarObserver> {
    core: EngineCore<B>,
    strategy: Box<dyn RebalanceStrategy>,
}

impl<B: Broker + BarObserver> RebalancingEngine<B> {
    pub fn new(
        config: EngineConfig,
        policies: PolicySet,
        meta: &StrategyMeta,
        strategy: Box<dyn RebalanceStrategy>,
        broker: B,
        writer: ArtifactWriter,
    ) -> Self {
        Self {
            core: EngineCore::new(config, policies, meta.name.clone(), broker, writer),
            strategy,
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

    pub fn run(mut self, mut bars: Vec<Bar>, stop: &StopToken) -> Result<RunSummary, EngineError> {
        bars.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.symbol.cmp(&b.symbol)));

        let result = self.run_inner(&bars, stop);
        self.strategy.finalize();
        match result {
            Ok(()) => self.core.finalize(None),
            Err(e) => {
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

            for fill in self.core.begin_bar(bar)? {
                self.strategy.on_fill(&fill);
            }

            let snapshot = self.core.book.snapshot(bar.ts, Vec::new());
            let weights = self.strategy.target_weights(bar.ts, &snapshot);

            if let Some(weights) = weights.filter(|w| w.rebalance) {
                let held = snapshot
                    .positions
                    .iter()
                    .map(|(sym, pos)| (sym.clone(), pos.qty))
                    .filter(|(_, qty)| *qty != 0)
                    .collect();

                let plan = match rebalance_plan(
                    &weights,
                    self.core.book.equity(),
                    &self.core.last_prices,
                    &held,
                    &self.core.policies.sizing,
                ) {
                    Ok(plan) => plan,
                    Err(e) => {
                        // An unexecutable weight vector skips this
                        // rebalance; the run continues.
                        warn!(error = %e, "rebalance skipped");
                        self.core.emit_limit_hit(
                            bar.ts,
                            "weights_sum",
                            &e.to_string(),
                        )?;
                        self.core.end_bar()?;
                        continue;
                    }
                };

                if let Some(scale_bps) = plan.turnover_scaled_bps {
                    debug!(scale_bps, "turnover cap engaged");
                    self.core.emit_limit_hit(
                        bar.ts,
                        "turnover_cap",
                        &format!("batch scaled to {scale_bps} bps of requested turnover"),
                    )?;
                }

                for intent in plan.orders {
                    if !self.core.pre_trade(&intent)? {
                        continue;
                    }
                    let request = self.core.make_request(&intent);
                    for fill in self.core.submit(request)? {
                        self.strategy.on_fill(&fill);
                    }
                }
            }

            self.core.end_bar()?;
        }
        Ok(())
    }
}
