//! Shared per-bar machinery for both engines.
//!
//! One `EngineCore` owns the portfolio book, the order state machine, the
//! risk monitor, the readiness gate, and the artifact writer.  The engine
//! wrappers own only their strategy and the per-bar intent production;
//! everything downstream of an intent (risk gate, submission, retries,
//! fills, kill switch, artifacts) lives here so the two engines cannot
//! drift apart.
//!
//! # Mutation discipline
//!
//! The order state machine and risk monitor are the only mutators of
//! order and risk state; the core mutates the portfolio book.  Artifacts
//! are emitted at each state change, snapshots at end of bar.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};
use uuid::Uuid;

use qx_artifacts::{ArtifactWriter, ManifestMeta, RunManifest};
use qx_marketdata::{ReadinessError, ReadinessGate};
use qx_oms::{backoff_for_retry, OmsError, OrderStateMachine, MAX_RETRIES, RATE_LIMIT_COOLDOWN_MS};
use qx_policy::{policy_hash, PolicySet};
use qx_portfolio::PortfolioBook;
use qx_ports::{BarObserver, Broker, Notifier, NullNotifier, StateStore};
use qx_risk::{KillSwitchTrip, PreTradeReject, ProposedOrder, RiskMonitor, TripAction};
use qx_schemas::{
    ArtifactEvent, Bar, Fill, Micros, OrderRequest, RiskEventKind, Side,
};

use crate::sizing::SizedIntent;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum EngineError {
    /// A bar failed the readiness gate.  Fatal: the input is bad.
    Readiness(ReadinessError),
    /// Lifecycle or idempotency invariant violation.  Fatal.
    Oms(OmsError),
    /// Artifact IO failure.  Fatal: determinism can no longer be proven.
    Artifact { detail: String },
    /// Persisted state could not be restored.  Fatal: trading on top of
    /// an unreadable prior session is worse than not starting.
    State { detail: String },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Readiness(e) => write!(f, "{e}"),
            EngineError::Oms(e) => write!(f, "{e}"),
            EngineError::Artifact { detail } => write!(f, "artifact write failed: {detail}"),
            EngineError::State { detail } => write!(f, "state restore failed: {detail}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<ReadinessError> for EngineError {
    fn from(e: ReadinessError) -> Self {
        EngineError::Readiness(e)
    }
}

impl From<OmsError> for EngineError {
    fn from(e: OmsError) -> Self {
        EngineError::Oms(e)
    }
}

// ---------------------------------------------------------------------------
// Run mode / config / backoff
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    Backtest,
    Paper,
    Live,
}

impl RunMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            RunMode::Backtest => "backtest",
            RunMode::Paper => "paper",
            RunMode::Live => "live",
        }
    }
}

/// How the engine waits between transient retries.
///
/// Backtests use [`NoopBackoff`]: simulated time does not flow while a
/// venue is down, and the schedule's *count* is what bounds the retry
/// loop.  Paper/live use [`ThreadBackoff`].
pub trait Backoff {
    fn sleep_ms(&mut self, ms: u64);
}

#[derive(Debug, Default)]
pub struct NoopBackoff;

impl Backoff for NoopBackoff {
    fn sleep_ms(&mut self, _ms: u64) {}
}

#[derive(Debug, Default)]
pub struct ThreadBackoff;

impl Backoff for ThreadBackoff {
    fn sleep_ms(&mut self, ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// Per-run engine configuration, bound by the composition root.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub mode: RunMode,
    pub run_id: String,
    pub initial_cash: Micros,
    pub trip_action: TripAction,
    /// Seed for retry jitter.  Injected so runs are reproducible.
    pub seed: u64,
}

/// What a finished run produced.
#[derive(Debug)]
pub struct RunSummary {
    pub manifest: RunManifest,
    pub bars: u64,
    pub orders: u64,
    pub fills: u64,
    pub kill_switch_tripped: bool,
}

// ---------------------------------------------------------------------------
// EngineCore
// ---------------------------------------------------------------------------

pub(crate) struct EngineCore<B: Broker + BarObserver> {
    pub(crate) policies: PolicySet,
    strategy_name: String,
    mode: RunMode,
    run_id: String,
    trip_action: TripAction,

    broker: B,
    pub(crate) book: PortfolioBook,
    osm: OrderStateMachine,
    risk: RiskMonitor,
    gate: ReadinessGate,
    writer: ArtifactWriter,
    notifier: Box<dyn Notifier>,
    backoff: Box<dyn Backoff>,
    state_store: Option<Box<dyn StateStore>>,
    rng: StdRng,

    pub(crate) last_prices: BTreeMap<String, Micros>,
    seen_fills: BTreeSet<Uuid>,
    emitted_orders: BTreeSet<Uuid>,

    now: DateTime<Utc>,
    bar_seq: u64,
    bars_processed: u64,
    fills_applied: u64,
    kill_switch_tripped: bool,
}

impl<B: Broker + BarObserver> EngineCore<B> {
    pub(crate) fn new(
        config: EngineConfig,
        policies: PolicySet,
        strategy_name: String,
        broker: B,
        writer: ArtifactWriter,
    ) -> Self {
        let risk = RiskMonitor::new(
            policies.risk.clone(),
            config.trip_action,
            config.initial_cash,
        );
        let backoff: Box<dyn Backoff> = match config.mode {
            RunMode::Backtest => Box::new(NoopBackoff),
            RunMode::Paper | RunMode::Live => Box::new(ThreadBackoff),
        };
        Self {
            book: PortfolioBook::new(config.initial_cash),
            risk,
            osm: OrderStateMachine::new(),
            gate: ReadinessGate::new(),
            writer,
            notifier: Box::new(NullNotifier),
            backoff,
            state_store: None,
            rng: StdRng::seed_from_u64(config.seed),
            policies,
            strategy_name,
            mode: config.mode,
            run_id: config.run_id,
            trip_action: config.trip_action,
            broker,
            last_prices: BTreeMap::new(),
            seen_fills: BTreeSet::new(),
            emitted_orders: BTreeSet::new(),
            now: DateTime::UNIX_EPOCH,
            bar_seq: 0,
            bars_processed: 0,
            fills_applied: 0,
            kill_switch_tripped: false,
        }
    }

    pub(crate) fn set_notifier(&mut self, notifier: Box<dyn Notifier>) {
        self.notifier = notifier;
    }

    pub(crate) fn set_backoff(&mut self, backoff: Box<dyn Backoff>) {
        self.backoff = backoff;
    }

    /// Attach a state store, restoring any prior session first.
    ///
    /// The kill switch survives a restart (a restart is not a reset).
    /// The idempotency map is persisted for host-side reconciliation;
    /// order records themselves live with the venue and are re-keyed
    /// deterministically on resubmission.
    pub(crate) fn attach_state_store(
        &mut self,
        mut store: Box<dyn StateStore>,
    ) -> Result<(), EngineError> {
        let state_err = |e: qx_ports::StateStoreError| EngineError::State {
            detail: e.to_string(),
        };
        if let Some(portfolio) = store.load_portfolio().map_err(state_err)? {
            for (symbol, pos) in &portfolio.positions {
                self.last_prices.insert(symbol.clone(), pos.mark_price);
            }
            self.book = PortfolioBook::restore(&portfolio);
        }
        if let Some(risk) = store.load_risk().map_err(state_err)? {
            self.risk =
                RiskMonitor::restore(self.policies.risk.clone(), self.trip_action, &risk);
        }
        self.state_store = Some(store);
        Ok(())
    }

    // -- per-bar lifecycle ---------------------------------------------------

    /// Gate the bar, advance venue and engine time, mark the book, and
    /// re-evaluate risk on the new marks.  Returns flatten/cancel fills
    /// if the mark-to-market move tripped the kill switch.
    pub(crate) fn begin_bar(&mut self, bar: &Bar) -> Result<Vec<Fill>, EngineError> {
        let admission = self.gate.admit(bar)?;
        if let Some(gap) = admission.gap {
            self.emit(&ArtifactEvent::LimitHit {
                ts: bar.ts,
                scope: "bar_gap".to_string(),
                detail: format!(
                    "{}: {} -> {} ({} missing)",
                    gap.symbol, gap.prev_ts, gap.next_ts, gap.gap_count
                ),
            })?;
        }

        self.now = bar.ts;
        self.bar_seq = 0;
        self.bars_processed += 1;
        self.broker.observe_bar(bar);
        self.last_prices.insert(bar.symbol.clone(), bar.close);
        self.book.mark_bar(bar);

        self.update_risk()
    }

    /// End-of-bar snapshots and restart-safety persistence.
    pub(crate) fn end_bar(&mut self) -> Result<(), EngineError> {
        let pending: Vec<Uuid> = self.osm.open_orders().iter().map(|r| r.order_id).collect();
        let snapshot = self.book.snapshot(self.now, pending);
        self.emit(&ArtifactEvent::PnlSnapshot {
            ts: self.now,
            cash: snapshot.cash,
            equity: snapshot.equity,
            realized_pnl: self.book.realized_pnl(),
            unrealized_pnl: self.book.unrealized_pnl(),
            drawdown_bps: self.risk.current_drawdown_bps(),
        })?;

        let risk_state = self.risk.state(self.now);
        let idempotency = self.osm.export_idempotency_map();
        if let Some(store) = self.state_store.as_mut() {
            // Persistence failures are logged, not fatal: the run's own
            // state is intact and the next save may succeed.
            if let Err(e) = store.save_portfolio(&snapshot) {
                warn!(error = %e, "portfolio persistence failed");
            }
            if let Err(e) = store.save_risk(&risk_state) {
                warn!(error = %e, "risk persistence failed");
            }
            if let Err(e) = store.save_idempotency_map(&idempotency) {
                warn!(error = %e, "idempotency persistence failed");
            }
        }

        self.emit(&ArtifactEvent::PositionsSnapshot { snapshot })?;
        Ok(())
    }

    // -- intents -------------------------------------------------------------

    /// Build the canonical request for an intent produced this bar.
    pub(crate) fn make_request(&mut self, intent: &SizedIntent) -> OrderRequest {
        let key = OrderRequest::canonical_key(
            &self.strategy_name,
            &intent.symbol,
            intent.side,
            self.now,
            self.bar_seq,
        );
        self.bar_seq += 1;
        OrderRequest::market(
            key,
            self.now,
            intent.symbol.clone(),
            intent.side,
            intent.qty,
            self.strategy_name.clone(),
        )
    }

    /// Estimated fill price for risk projection (latest mark).
    pub(crate) fn est_price(&self, symbol: &str) -> Option<Micros> {
        self.last_prices.get(symbol).copied()
    }

    /// Pre-trade gate.  On rejection the intent is dropped and a risk
    /// event recorded; the run continues.
    pub(crate) fn pre_trade(&mut self, intent: &SizedIntent) -> Result<bool, EngineError> {
        let Some(price) = self.est_price(&intent.symbol) else {
            debug!(symbol = %intent.symbol, "no mark price, dropping intent");
            return Ok(false);
        };
        let proposed = ProposedOrder {
            symbol: intent.symbol.clone(),
            side: intent.side,
            qty: intent.qty,
            price,
        };
        let held = self.book.qty(&intent.symbol);
        let mark = self.book.mark_price(&intent.symbol).unwrap_or(price);

        match self.risk.pre_trade_check(&proposed, held, mark) {
            Ok(()) => Ok(true),
            Err(reject) => {
                let kind = match reject {
                    PreTradeReject::KillSwitchBlocked => RiskEventKind::KillSwitchBlock,
                    _ => RiskEventKind::PreTradeReject,
                };
                let event = ArtifactEvent::RiskEvent {
                    ts: self.now,
                    kind,
                    reason: reject.to_string(),
                    threshold_bps: None,
                    observed_bps: None,
                    symbol: Some(intent.symbol.clone()),
                };
                self.notifier.emit(&event);
                self.emit(&event)?;
                debug!(%reject, "pre-trade reject");
                Ok(false)
            }
        }
    }

    // -- submission ----------------------------------------------------------

    /// Submit with the bounded transient-retry schedule, then reconcile
    /// the order's fills.  Returns the fills applied (for strategy
    /// `on_fill` forwarding).
    pub(crate) fn submit(&mut self, request: OrderRequest) -> Result<Vec<Fill>, EngineError> {
        let key = request.idempotency_key.clone();
        let mut retry = 0u32;

        loop {
            match self.osm.submit(request.clone(), &mut self.broker, self.now) {
                Ok(outcome) => {
                    let order_id = outcome.record().order_id;
                    self.emit_order_if_terminal(order_id)?;
                    let mut fills = self.apply_fills_for(order_id)?;
                    if let Some(trip) = self.check_trip_after_update()? {
                        fills.extend(trip);
                    }
                    return Ok(fills);
                }
                Err(OmsError::Broker(e)) if e.is_transient() => {
                    match backoff_for_retry(retry) {
                        Some(base_ms) if retry < MAX_RETRIES => {
                            // Jitter keeps a fleet of engines from
                            // hammering a venue in lockstep.
                            let jitter = self.rng.random_range(0..=base_ms / 5);
                            warn!(key = %key, retry, "transient submit failure, backing off");
                            self.backoff.sleep_ms(base_ms + jitter);
                            retry += 1;
                        }
                        _ => {
                            // Schedule exhausted: park the order terminally
                            // in local state and move on.
                            warn!(key = %key, "transient retries exhausted, cancelling locally");
                            if let Some(order_id) = self.osm.lookup_key(&key) {
                                self.osm.apply_cancel(
                                    order_id,
                                    self.now,
                                    "transient retries exhausted",
                                )?;
                                self.emit_order_if_terminal(order_id)?;
                            }
                            return Ok(Vec::new());
                        }
                    }
                }
                Err(OmsError::Broker(e)) => {
                    // Semantic: the order is terminally rejected by the OSM.
                    if e.kind.is_rate_limit() {
                        let event = ArtifactEvent::LimitHit {
                            ts: self.now,
                            scope: "venue_rate_limit".to_string(),
                            detail: e.message.clone(),
                        };
                        self.notifier.emit(&event);
                        self.emit(&event)?;
                        self.backoff.sleep_ms(RATE_LIMIT_COOLDOWN_MS);
                    }
                    warn!(key = %key, error = %e, "semantic reject");
                    if let Some(order_id) = self.osm.lookup_key(&key) {
                        self.emit_order_if_terminal(order_id)?;
                    }
                    return Ok(Vec::new());
                }
                Err(fatal) => return Err(EngineError::Oms(fatal)),
            }
        }
    }

    // -- fills and risk ------------------------------------------------------

    /// Pull and apply this order's fills in `(venue_fill_id, fill_id)`
    /// order, updating the book and the artifact streams.
    fn apply_fills_for(&mut self, order_id: Uuid) -> Result<Vec<Fill>, EngineError> {
        let mut venue_fills = match self.broker.get_fills(Some(order_id)) {
            Ok(fills) => fills,
            Err(e) => {
                // Fills not being visible yet is recoverable; the
                // finalize drain reconciles stragglers.
                warn!(error = %e, "get_fills failed, deferring reconciliation");
                return Ok(Vec::new());
            }
        };
        venue_fills.sort_by_key(|f| f.tie_break_key());

        let mut applied = Vec::new();
        for fill in venue_fills {
            if !self.seen_fills.insert(fill.fill_id) {
                continue;
            }
            self.osm.apply_fill(&fill)?;
            self.book.apply_fill(&fill);
            self.fills_applied += 1;
            self.emit(&ArtifactEvent::Fill { fill: fill.clone() })?;
            self.emit_order_if_terminal(fill.order_id)?;
            applied.push(fill);
        }
        Ok(applied)
    }

    /// Re-evaluate risk after equity-changing activity.  On a trip,
    /// cancel everything open and optionally flatten; returns the
    /// flatten fills.
    fn check_trip_after_update(&mut self) -> Result<Option<Vec<Fill>>, EngineError> {
        match self.update_risk()? {
            fills if fills.is_empty() => Ok(None),
            fills => Ok(Some(fills)),
        }
    }

    fn update_risk(&mut self) -> Result<Vec<Fill>, EngineError> {
        let equity = self.book.equity();
        let gross = self.book.gross_exposure();
        if let Some(trip) = self.risk.update(self.now, equity, gross) {
            return self.handle_trip(trip);
        }
        Ok(Vec::new())
    }

    fn handle_trip(&mut self, trip: KillSwitchTrip) -> Result<Vec<Fill>, EngineError> {
        self.kill_switch_tripped = true;
        warn!(
            observed_bps = trip.observed_bps,
            threshold_bps = trip.threshold_bps,
            "kill switch tripped"
        );
        let event = ArtifactEvent::RiskEvent {
            ts: trip.ts,
            kind: RiskEventKind::KillSwitchTripped,
            reason: "drawdown crossed kill-switch threshold".to_string(),
            threshold_bps: Some(trip.threshold_bps),
            observed_bps: Some(trip.observed_bps),
            symbol: None,
        };
        self.notifier.emit(&event);
        self.emit(&event)?;

        self.cancel_open_orders("kill switch cancel")?;

        if self.trip_action == TripAction::CancelAndFlatten {
            return self.flatten_positions();
        }
        Ok(Vec::new())
    }

    /// Cancel every non-terminal order through the broker port.  A venue
    /// that cannot acknowledge in time still gets its local record
    /// cancelled with a timeout reason.
    pub(crate) fn cancel_open_orders(&mut self, reason: &str) -> Result<(), EngineError> {
        let open: Vec<Uuid> = self.osm.open_orders().iter().map(|r| r.order_id).collect();
        for order_id in open {
            // Late fills first: the venue may have filled before the cancel.
            self.apply_fills_for(order_id)?;
            let still_open = self
                .osm
                .get(order_id)
                .map(|r| !r.status.is_terminal())
                .unwrap_or(false);
            if !still_open {
                continue;
            }
            match self.broker.cancel_order(order_id) {
                Ok(_venue_view) => {
                    self.osm.apply_cancel(order_id, self.now, reason)?;
                }
                Err(e) => {
                    warn!(error = %e, %order_id, "venue cancel failed, marking cancelled locally");
                    self.osm
                        .apply_cancel(order_id, self.now, "cancel timeout")?;
                }
            }
            self.emit_order_if_terminal(order_id)?;
        }
        Ok(())
    }

    /// Close every open position at market, bypassing the pre-trade gate
    /// (flattening is always risk-reducing and must work under an active
    /// kill switch).
    fn flatten_positions(&mut self) -> Result<Vec<Fill>, EngineError> {
        let snapshot = self.book.snapshot(self.now, Vec::new());
        let mut fills = Vec::new();
        for (symbol, pos) in snapshot.positions {
            if pos.qty == 0 {
                continue;
            }
            let (side, qty) = if pos.qty > 0 {
                (Side::Sell, pos.qty)
            } else {
                (Side::Buy, -pos.qty)
            };
            let request = self.make_request(&SizedIntent {
                symbol: symbol.clone(),
                side,
                qty,
            });
            match self.osm.submit(request, &mut self.broker, self.now) {
                Ok(outcome) => {
                    let order_id = outcome.record().order_id;
                    self.emit_order_if_terminal(order_id)?;
                    fills.extend(self.apply_fills_for(order_id)?);
                }
                Err(OmsError::Broker(e)) => {
                    // Flatten is best effort; the operator handles leftovers.
                    warn!(error = %e, %symbol, "flatten order failed");
                }
                Err(fatal) => return Err(EngineError::Oms(fatal)),
            }
        }
        Ok(fills)
    }

    // -- artifacts -----------------------------------------------------------

    /// Record a limit-hit event on the risk stream.
    pub(crate) fn emit_limit_hit(
        &mut self,
        ts: DateTime<Utc>,
        scope: &str,
        detail: &str,
    ) -> Result<(), EngineError> {
        let event = ArtifactEvent::LimitHit {
            ts,
            scope: scope.to_string(),
            detail: detail.to_string(),
        };
        self.notifier.emit(&event);
        self.emit(&event)
    }

    fn emit(&mut self, event: &ArtifactEvent) -> Result<(), EngineError> {
        self.writer
            .append(event)
            .map_err(|e| EngineError::Artifact {
                detail: format!("{e:#}"),
            })
    }

    /// Each order appears in the `orders` stream exactly once, with its
    /// terminal record.  Idempotent replays therefore add nothing.
    fn emit_order_if_terminal(&mut self, order_id: Uuid) -> Result<(), EngineError> {
        let Some(record) = self.osm.get(order_id) else {
            return Ok(());
        };
        if !record.status.is_terminal() || self.emitted_orders.contains(&order_id) {
            return Ok(());
        }
        let event = ArtifactEvent::Order {
            record: record.clone(),
        };
        self.emitted_orders.insert(order_id);
        self.emit(&event)
    }

    // -- finalize ------------------------------------------------------------

    /// Drain open orders, emit what never reached a terminal state, and
    /// seal the manifest.  After this returns no order is non-terminal.
    pub(crate) fn finalize(mut self, fatal: Option<String>) -> Result<RunSummary, EngineError> {
        self.cancel_open_orders("run finalize")?;

        // Belt: every order must now be terminal and emitted.
        let leftover: Vec<Uuid> = self
            .osm
            .records()
            .filter(|r| !r.status.is_terminal())
            .map(|r| r.order_id)
            .collect();
        for order_id in leftover {
            self.osm
                .apply_cancel(order_id, self.now, "finalize cancel")?;
            self.emit_order_if_terminal(order_id)?;
        }

        if let Some(message) = fatal {
            self.writer.record_error(message);
        }

        let orders = self.emitted_orders.len() as u64;
        let meta = ManifestMeta {
            run_id: self.run_id.clone(),
            mode: self.mode.as_str().to_string(),
            strategy: self.strategy_name.clone(),
            policy_hash: policy_hash(&self.policies),
        };
        let manifest = self
            .writer
            .finalize(&meta)
            .map_err(|e| EngineError::Artifact {
                detail: format!("{e:#}"),
            })?;

        Ok(RunSummary {
            manifest,
            bars: self.bars_processed,
            orders,
            fills: self.fills_applied,
            kill_switch_tripped: self.kill_switch_tripped,
        })
    }
}
