//! The shared run pipeline behind `qx backtest | paper | live`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{info, warn};

use qx_artifacts::ArtifactWriter;
use qx_broker_paper::PaperBroker;
use qx_engine::{
    EngineConfig, EngineError, RebalancingEngine, RunMode, RunSummary, SingleStrategyEngine,
    StopToken,
};
use qx_marketdata::{normalize_batch, CsvBarSource, NormalizerConfig};
use qx_policy::{compose, policy_hash, PolicySet};
use qx_ports::{BarObserver, Broker};
use qx_risk::TripAction;
use qx_schemas::{ArtifactEvent, Bar, Micros};
use qx_runtime::{
    derive_run_id, select_broker, BrokerChoice, FileStateStore, GatePolicy, LiveBroker,
    LiveGateEnv,
};
use qx_strategy::{StrategyBuild, StrategyLoader, StrategyMeta};

use crate::strategies::builtin_registry;

// ---------------------------------------------------------------------------
// Failure → exit code
// ---------------------------------------------------------------------------

/// Exit codes: 2 invalid input, 3 strategy load, 4 safety gate, 5 runtime.
pub struct CliFailure {
    pub code: i32,
    pub message: String,
}

impl CliFailure {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

fn engine_failure(e: EngineError) -> CliFailure {
    let code = match &e {
        EngineError::Readiness(_) => 2,
        EngineError::Oms(_) | EngineError::Artifact { .. } | EngineError::State { .. } => 5,
    };
    CliFailure::new(code, e.to_string())
}

// ---------------------------------------------------------------------------
// Arguments
// ---------------------------------------------------------------------------

pub struct RunArgs {
    pub mode: RunMode,
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start: String,
    pub end: String,
    pub data: PathBuf,
    pub out: PathBuf,
    pub strategies_dir: PathBuf,
    pub state_dir: Option<PathBuf>,
    pub seed: u64,
    pub initial_cash_units: i64,
    pub flatten_on_trip: bool,
    pub downgrade_to_paper: bool,
}

fn parse_instant(raw: &str, flag: &str) -> Result<DateTime<Utc>, CliFailure> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(dt) = date.and_hms_opt(0, 0, 0) {
            return Ok(dt.and_utc());
        }
    }
    Err(CliFailure::new(
        2,
        format!("invalid {flag} '{raw}': expected RFC-3339 or YYYY-MM-DD"),
    ))
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub fn execute(args: RunArgs) -> Result<(), CliFailure> {
    // -- input validation (exit 2) -------------------------------------------
    let start = parse_instant(&args.start, "--start")?;
    let end = parse_instant(&args.end, "--end")?;
    if end < start {
        return Err(CliFailure::new(2, "--end must be at or after --start"));
    }
    if args.symbols.is_empty() {
        return Err(CliFailure::new(2, "--symbols must name at least one symbol"));
    }
    if args.initial_cash_units <= 0 {
        return Err(CliFailure::new(2, "--initial-cash must be > 0"));
    }
    if args.state_dir.is_some() && args.mode == RunMode::Backtest {
        // Restored state would leak a prior session into what must be a
        // pure function of its inputs.
        return Err(CliFailure::new(2, "--state is not valid for backtest runs"));
    }

    let source = CsvBarSource::new(&args.data);
    let rows = source
        .load_rows()
        .map_err(|e| CliFailure::new(2, e.to_string()))?;
    let normalized = normalize_batch(&rows, &NormalizerConfig::default())
        .map_err(|e| CliFailure::new(2, e.to_string()))?;
    if !normalized.report.is_clean() {
        info!(
            duplicates = normalized.report.duplicates_dropped,
            open_bars = normalized.report.open_bars_dropped,
            gaps = normalized.report.gaps.len(),
            "bar normalization report"
        );
    }

    let wanted: BTreeSet<&String> = args.symbols.iter().collect();
    let bars: Vec<Bar> = normalized
        .bars
        .into_iter()
        .filter(|b| wanted.contains(&b.symbol) && b.ts >= start && b.ts <= end)
        .collect();
    if bars.is_empty() {
        return Err(CliFailure::new(
            2,
            format!(
                "no bars for {:?} in [{}, {}] within {}",
                args.symbols,
                args.start,
                args.end,
                args.data.display()
            ),
        ));
    }

    // -- strategy load (exit 3) ----------------------------------------------
    let registry = builtin_registry();
    let loader = StrategyLoader::new(&args.strategies_dir);
    let bundle = loader
        .load(&args.strategy, &registry)
        .map_err(|e| CliFailure::new(3, e.to_string()))?;
    let policies = compose(&PolicySet::default(), &bundle.overrides)
        .map_err(|e| CliFailure::new(3, e.to_string()))?;
    let merged_hash = policy_hash(&policies);

    // -- safety gate (exit 4) ------------------------------------------------
    let env = LiveGateEnv::capture();
    let gate_policy = if args.downgrade_to_paper {
        GatePolicy::DowngradeToPaper
    } else {
        GatePolicy::HardFail
    };
    let selection = select_broker(args.mode, gate_policy, &env)
        .map_err(|e| CliFailure::new(4, e.to_string()))?;

    let effective_mode = match (args.mode, selection.choice) {
        (RunMode::Live, BrokerChoice::Paper) => RunMode::Paper,
        (mode, _) => mode,
    };

    // -- run directory and artifacts (exit 5) --------------------------------
    let run_id = derive_run_id(
        effective_mode,
        &args.strategy,
        &args.symbols,
        &args.start,
        &args.end,
        &merged_hash,
    );
    let mut writer = ArtifactWriter::create(args.out.join(&run_id))
        .map_err(|e| CliFailure::new(5, format!("{e:#}")))?;
    if let Some(warning) = &selection.downgrade_warning {
        writer
            .append(&ArtifactEvent::LimitHit {
                ts: start,
                scope: "live_gate_downgrade".to_string(),
                detail: warning.clone(),
            })
            .map_err(|e| CliFailure::new(5, format!("{e:#}")))?;
    }

    let config = EngineConfig {
        mode: effective_mode,
        run_id: run_id.clone(),
        initial_cash: Micros::from_units(args.initial_cash_units),
        trip_action: if args.flatten_on_trip {
            TripAction::CancelAndFlatten
        } else {
            TripAction::CancelOnly
        },
        seed: args.seed,
    };

    // -- engine dispatch -----------------------------------------------------
    let state = match &args.state_dir {
        Some(dir) => Some(
            FileStateStore::new(dir).map_err(|e| CliFailure::new(5, e.to_string()))?,
        ),
        None => None,
    };
    let cost = policies.cost.clone();
    let meta = bundle.meta;
    let summary = match (bundle.build, selection.choice) {
        (StrategyBuild::Signal(factory), BrokerChoice::Paper) => run_signal(
            config,
            policies,
            &meta,
            factory(),
            PaperBroker::new(cost),
            writer,
            bars,
            state,
        )?,
        (StrategyBuild::Signal(factory), BrokerChoice::Live) => {
            let broker = LiveBroker::connect(PaperBroker::new(cost), &env)
                .map_err(|e| CliFailure::new(4, e.to_string()))?;
            warn!("no live venue adapter is linked into this binary; executing against the simulated venue");
            run_signal(config, policies, &meta, factory(), broker, writer, bars, state)?
        }
        (StrategyBuild::Rebalance(factory), BrokerChoice::Paper) => run_rebalance(
            config,
            policies,
            &meta,
            factory(),
            PaperBroker::new(cost),
            writer,
            bars,
            state,
        )?,
        (StrategyBuild::Rebalance(factory), BrokerChoice::Live) => {
            let broker = LiveBroker::connect(PaperBroker::new(cost), &env)
                .map_err(|e| CliFailure::new(4, e.to_string()))?;
            warn!("no live venue adapter is linked into this binary; executing against the simulated venue");
            run_rebalance(config, policies, &meta, factory(), broker, writer, bars, state)?
        }
        (StrategyBuild::Arbitrage(_), _) => {
            // The loader's validation rejects these before we get here.
            return Err(CliFailure::new(3, "arbitrage bundles are not executable"));
        }
    };

    println!(
        "run_ok=true run_id={run_id} mode={} bars={} orders={} fills={} kill_switch={}",
        effective_mode.as_str(),
        summary.bars,
        summary.orders,
        summary.fills,
        summary.kill_switch_tripped
    );
    println!(
        "manifest_path={}",
        args.out.join(&run_id).join("manifest.json").display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_signal<B: Broker + BarObserver>(
    config: EngineConfig,
    policies: PolicySet,
    meta: &StrategyMeta,
    strategy: Box<dyn qx_strategy::Strategy>,
    broker: B,
    writer: ArtifactWriter,
    bars: Vec<Bar>,
    state: Option<FileStateStore>,
) -> Result<RunSummary, CliFailure> {
    let mut engine =
        SingleStrategyEngine::new(config, policies, meta, strategy, broker, writer);
    if let Some(store) = state {
        engine = engine
            .with_state_store(Box::new(store))
            .map_err(engine_failure)?;
    }
    engine.run(bars, &StopToken::new()).map_err(engine_failure)
}

#[allow(clippy::too_many_arguments)]
fn run_rebalance<B: Broker + BarObserver>(
    config: EngineConfig,
    policies: PolicySet,
    meta: &StrategyMeta,
    strategy: Box<dyn qx_strategy::RebalanceStrategy>,
    broker: B,
    writer: ArtifactWriter,
    bars: Vec<Bar>,
    state: Option<FileStateStore>,
) -> Result<RunSummary, CliFailure> {
    let mut engine =
        RebalancingEngine::new(config, policies, meta, strategy, broker, writer);
    if let Some(store) = state {
        engine = engine
            .with_state_store(Box::new(store))
            .map_err(engine_failure)?;
    }
    engine.run(bars, &StopToken::new()).map_err(engine_failure)
}
