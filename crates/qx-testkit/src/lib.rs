//! qx-testkit
//!
//! Shared fixtures for cross-crate scenario tests: bar builders, a
//! closed test bundle, a fault-injecting broker wrapper, an in-memory
//! state store, and a collecting notifier.  Production crates must never
//! depend on this one.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, TimeZone, Utc};
use uuid::Uuid;

use qx_policy::PolicyOverrides;
use qx_ports::{
    BarObserver, Broker, BrokerError, IdempotencyMap, Notifier, StateStore, StateStoreError,
};
use qx_schemas::{
    ArtifactEvent, Bar, Fill, Micros, OrderRecord, OrderRequest, PortfolioState, RiskState,
    Signal, SignalAction, Timeframe,
};
use qx_strategy::{Strategy, StrategyBuild, StrategyBundle, StrategyMeta};

// ---------------------------------------------------------------------------
// Bars
// ---------------------------------------------------------------------------

/// First bar close time used by every fixture series.
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
}

/// A flat one-minute bar (`open == high == low == close`).
pub fn minute_bar(symbol: &str, minute: i64, close_units: i64) -> Bar {
    let close = Micros::from_units(close_units);
    Bar {
        ts: t0() + Duration::minutes(minute),
        symbol: symbol.to_string(),
        open: close,
        high: close,
        low: close,
        close,
        volume: 10,
        timeframe: Timeframe::M1,
        is_closed: true,
        source: None,
    }
}

/// A contiguous series of flat bars from [`t0`].
pub fn bar_series(symbol: &str, closes: &[i64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| minute_bar(symbol, i as i64, *close))
        .collect()
}

// ---------------------------------------------------------------------------
// Closed test bundle
// ---------------------------------------------------------------------------

/// The reference test strategy: enter long when the close rises above
/// the previous close, exit long otherwise.
pub struct MaCrossoverToy {
    prev_close: BTreeMap<String, Micros>,
}

impl MaCrossoverToy {
    pub fn new() -> Self {
        Self {
            prev_close: BTreeMap::new(),
        }
    }
}

impl Default for MaCrossoverToy {
    fn default() -> Self {
        Self::new()
    }
}

impl Strategy for MaCrossoverToy {
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

/// Bundle for [`MaCrossoverToy`], optionally with overrides.
pub fn ma_crossover_bundle(overrides: PolicyOverrides) -> StrategyBundle {
    StrategyBundle {
        meta: StrategyMeta::new("ma_crossover", vec!["BTC-USD".to_string()]),
        build: StrategyBuild::Signal(Box::new(|| Box::new(MaCrossoverToy::new()))),
        overrides,
    }
}

// ---------------------------------------------------------------------------
// Fault-injecting broker
// ---------------------------------------------------------------------------

/// Wraps a broker and fails submissions according to a script, counting
/// every call that reaches the inner venue.
pub struct FlakyBroker<B: Broker> {
    inner: B,
    submit_failures: VecDeque<BrokerError>,
    pub submit_attempts: usize,
}

impl<B: Broker> FlakyBroker<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            submit_failures: VecDeque::new(),
            submit_attempts: 0,
        }
    }

    /// Queue a failure for the next submission attempt.
    pub fn push_submit_failure(&mut self, error: BrokerError) {
        self.submit_failures.push_back(error);
    }
}

impl<B: Broker> Broker for FlakyBroker<B> {
    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        self.submit_attempts += 1;
        if let Some(error) = self.submit_failures.pop_front() {
            return Err(error);
        }
        self.inner.submit_order(request)
    }

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.cancel_order(order_id)
    }

    fn get_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.get_order(order_id)
    }

    fn list_open_orders(
        &mut self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderRecord>, BrokerError> {
        self.inner.list_open_orders(symbol)
    }

    fn get_fills(&mut self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError> {
        self.inner.get_fills(order_id)
    }
}

impl<B: Broker + BarObserver> BarObserver for FlakyBroker<B> {
    fn observe_bar(&mut self, bar: &Bar) {
        self.inner.observe_bar(bar);
    }
}

// ---------------------------------------------------------------------------
// In-memory state store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryStateStore {
    pub portfolio: Option<PortfolioState>,
    pub risk: Option<RiskState>,
    pub idempotency: Option<IdempotencyMap>,
}

impl StateStore for MemoryStateStore {
    fn load_portfolio(&mut self) -> Result<Option<PortfolioState>, StateStoreError> {
        Ok(self.portfolio.clone())
    }

    fn save_portfolio(&mut self, state: &PortfolioState) -> Result<(), StateStoreError> {
        self.portfolio = Some(state.clone());
        Ok(())
    }

    fn load_risk(&mut self) -> Result<Option<RiskState>, StateStoreError> {
        Ok(self.risk.clone())
    }

    fn save_risk(&mut self, state: &RiskState) -> Result<(), StateStoreError> {
        self.risk = Some(state.clone());
        Ok(())
    }

    fn load_idempotency_map(&mut self) -> Result<Option<IdempotencyMap>, StateStoreError> {
        Ok(self.idempotency.clone())
    }

    fn save_idempotency_map(&mut self, map: &IdempotencyMap) -> Result<(), StateStoreError> {
        self.idempotency = Some(map.clone());
        Ok(())
    }
}

/// Handle-cloneable wrapper so a test can keep inspecting a
/// [`MemoryStateStore`] after an engine has taken ownership of a boxed
/// handle to it.
#[derive(Clone, Default)]
pub struct SharedStateStore {
    inner: Arc<Mutex<MemoryStateStore>>,
}

impl SharedStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn portfolio(&self) -> Option<PortfolioState> {
        self.inner.lock().expect("store lock").portfolio.clone()
    }

    pub fn risk(&self) -> Option<RiskState> {
        self.inner.lock().expect("store lock").risk.clone()
    }

    pub fn idempotency(&self) -> Option<IdempotencyMap> {
        self.inner.lock().expect("store lock").idempotency.clone()
    }
}

impl StateStore for SharedStateStore {
    fn load_portfolio(&mut self) -> Result<Option<PortfolioState>, StateStoreError> {
        self.inner.lock().expect("store lock").load_portfolio()
    }

    fn save_portfolio(&mut self, state: &PortfolioState) -> Result<(), StateStoreError> {
        self.inner.lock().expect("store lock").save_portfolio(state)
    }

    fn load_risk(&mut self) -> Result<Option<RiskState>, StateStoreError> {
        self.inner.lock().expect("store lock").load_risk()
    }

    fn save_risk(&mut self, state: &RiskState) -> Result<(), StateStoreError> {
        self.inner.lock().expect("store lock").save_risk(state)
    }

    fn load_idempotency_map(&mut self) -> Result<Option<IdempotencyMap>, StateStoreError> {
        self.inner.lock().expect("store lock").load_idempotency_map()
    }

    fn save_idempotency_map(&mut self, map: &IdempotencyMap) -> Result<(), StateStoreError> {
        self.inner.lock().expect("store lock").save_idempotency_map(map)
    }
}

// ---------------------------------------------------------------------------
// Collecting notifier
// ---------------------------------------------------------------------------

/// Notifier that stores everything it sees; clone the handle to inspect
/// after the engine (which owns the notifier) has consumed it.
#[derive(Clone, Default)]
pub struct CollectingNotifier {
    events: Arc<Mutex<Vec<ArtifactEvent>>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ArtifactEvent> {
        self.events.lock().expect("notifier lock").clone()
    }
}

impl Notifier for CollectingNotifier {
    fn emit(&mut self, event: &ArtifactEvent) {
        self.events.lock().expect("notifier lock").push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Artifact helpers
// ---------------------------------------------------------------------------

/// Parse a run-directory JSONL stream into JSON values.
pub fn read_stream(
    run_dir: &std::path::Path,
    stream: qx_schemas::StreamKind,
) -> Vec<serde_json::Value> {
    let path = run_dir.join(format!("{}.jsonl", stream.as_str()));
    let text = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("read {}: {e}", path.display()));
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).expect("stream line is valid JSON"))
        .collect()
}
