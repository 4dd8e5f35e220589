//! Scenario: kill-switch trip.
//!
//! With `kill_switch_dd` at 10%, an all-in long position marked down
//! from 101 to 89 pushes drawdown past the threshold: the switch trips
//! exactly once with threshold and observed values recorded, every
//! subsequent intent is blocked, and (under the flatten action) the
//! position is closed.

use std::path::Path;

use qx_artifacts::ArtifactWriter;
use qx_broker_paper::PaperBroker;
use qx_engine::{EngineConfig, RunMode, RunSummary, SingleStrategyEngine, StopToken};
use qx_policy::{compose, PolicyOverrides, PolicySet, RiskOverrides, SizingOverrides};
use qx_risk::{RiskMonitor, TripAction};
use qx_schemas::{Micros, StreamKind};
use qx_testkit::{bar_series, ma_crossover_bundle, read_stream, CollectingNotifier};

fn overrides() -> PolicyOverrides {
    PolicyOverrides {
        risk: Some(RiskOverrides {
            kill_switch_dd_bps: Some(1_000),
            max_drawdown_bps: Some(2_000),
            ..Default::default()
        }),
        sizing: Some(SizingOverrides {
            per_trade_risk_bps: Some(10_000), // all-in so the drawdown bites
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn run(run_dir: &Path, trip_action: TripAction) -> (RunSummary, CollectingNotifier) {
    let bundle = ma_crossover_bundle(overrides());
    let policies = compose(&PolicySet::default(), &bundle.overrides).unwrap();
    let config = EngineConfig {
        mode: RunMode::Backtest,
        run_id: "kill-switch".to_string(),
        initial_cash: Micros::from_units(10_000),
        trip_action,
        seed: 3,
    };
    let broker = PaperBroker::new(policies.cost.clone());
    let writer = ArtifactWriter::create(run_dir).unwrap();
    let strategy = match bundle.build {
        qx_strategy::StrategyBuild::Signal(factory) => factory(),
        _ => unreachable!(),
    };
    let notifier = CollectingNotifier::new();

    let summary = SingleStrategyEngine::new(
        config,
        policies,
        &bundle.meta,
        strategy,
        broker,
        writer,
    )
    .with_notifier(Box::new(notifier.clone()))
    // Enter long at 101, then the market gaps down to 89.
    .run(bar_series("BTC-USD", &[100, 101, 89]), &StopToken::new())
    .unwrap();

    (summary, notifier)
}

#[test]
fn trip_records_threshold_and_observed_and_blocks_intents() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let (summary, notifier) = run(&run_dir, TripAction::CancelOnly);

    assert!(summary.kill_switch_tripped);

    let risk_events = read_stream(&run_dir, StreamKind::RiskEvents);
    let tripped: Vec<_> = risk_events
        .iter()
        .filter(|e| e["kind"] == "kill_switch_tripped")
        .collect();
    assert_eq!(tripped.len(), 1, "the trip is emitted exactly once");
    assert_eq!(tripped[0]["threshold_bps"], 1_000);
    assert_eq!(tripped[0]["observed_bps"], 1_203);

    // The exit intent on the 89 bar arrives after the trip and is blocked.
    let blocked: Vec<_> = risk_events
        .iter()
        .filter(|e| e["kind"] == "kill_switch_block")
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0]["symbol"], "BTC-USD");

    // The notifier saw both broadcasts.
    let notified = notifier.events();
    assert!(notified.len() >= 2);

    // Cancel-only: the long position survives the trip.
    let positions = read_stream(&run_dir, StreamKind::Positions);
    let last = positions.last().unwrap();
    assert_eq!(last["snapshot"]["positions"]["BTC-USD"]["qty"], 99);
}

#[test]
fn flatten_action_closes_the_position() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let (summary, _) = run(&run_dir, TripAction::CancelAndFlatten);

    assert!(summary.kill_switch_tripped);
    // Entry fill plus the flatten fill.
    assert_eq!(summary.fills, 2);

    let positions = read_stream(&run_dir, StreamKind::Positions);
    let last = positions.last().unwrap();
    assert_eq!(last["snapshot"]["positions"]["BTC-USD"]["qty"], 0);

    let fills = read_stream(&run_dir, StreamKind::Fills);
    assert_eq!(fills.len(), 2);
    assert_eq!(fills[1]["fill"]["side"], "sell");
    assert_eq!(fills[1]["fill"]["qty"], 99);
}

#[test]
fn monitor_reports_the_documented_numbers() {
    // The §-level contract on the raw monitor: 100_000 → 89_500 equity is
    // a 10.5% drawdown against a 10% threshold.
    let policy = compose(&PolicySet::default(), &overrides()).unwrap().risk;
    let mut monitor = RiskMonitor::new(
        policy,
        TripAction::CancelOnly,
        Micros::from_units(100_000),
    );
    let ts = qx_testkit::t0();
    let trip = monitor
        .update(ts, Micros::from_units(89_500), Micros::ZERO)
        .expect("drawdown 10.5% must trip a 10% switch");
    assert_eq!(trip.threshold_bps, 1_000);
    assert_eq!(trip.observed_bps, 1_050);
    assert!(monitor.kill_switch_active());
}
