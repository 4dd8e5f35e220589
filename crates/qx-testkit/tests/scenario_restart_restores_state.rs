//! Scenario: restart safety through the state store.
//!
//! A run persists its portfolio, risk state, and idempotency map at the
//! end of every bar; a fresh engine attached to the same store resumes
//! with the persisted book — including an active kill switch, because a
//! restart is not a reset.

use std::path::Path;

use qx_artifacts::ArtifactWriter;
use qx_broker_paper::PaperBroker;
use qx_engine::{EngineConfig, RunMode, SingleStrategyEngine, StopToken};
use qx_policy::{compose, PolicyOverrides, PolicySet, RiskOverrides, SizingOverrides};
use qx_risk::TripAction;
use qx_schemas::Micros;
use qx_testkit::{bar_series, ma_crossover_bundle, SharedStateStore};

fn engine(
    run_dir: &Path,
    overrides: PolicyOverrides,
    store: SharedStateStore,
) -> SingleStrategyEngine<PaperBroker> {
    let bundle = ma_crossover_bundle(overrides);
    let policies = compose(&PolicySet::default(), &bundle.overrides).unwrap();
    let config = EngineConfig {
        mode: RunMode::Paper,
        run_id: "restart".to_string(),
        initial_cash: Micros::from_units(10_000),
        trip_action: TripAction::CancelOnly,
        seed: 11,
    };
    let broker = PaperBroker::new(policies.cost.clone());
    let writer = ArtifactWriter::create(run_dir).unwrap();
    let strategy = match bundle.build {
        qx_strategy::StrategyBuild::Signal(factory) => factory(),
        _ => unreachable!(),
    };
    SingleStrategyEngine::new(config, policies, &bundle.meta, strategy, broker, writer)
        .with_state_store(Box::new(store))
        .unwrap()
}

#[test]
fn portfolio_and_idempotency_are_persisted_per_bar() {
    let dir = tempfile::tempdir().unwrap();
    let store = SharedStateStore::new();

    // Enter long on the second bar, then stop.
    engine(&dir.path().join("run1"), PolicyOverrides::default(), store.clone())
        .run(bar_series("BTC-USD", &[100, 101]), &StopToken::new())
        .unwrap();

    let portfolio = store.portfolio().expect("portfolio persisted");
    assert_eq!(portfolio.positions["BTC-USD"].qty, 9);
    let idempotency = store.idempotency().expect("idempotency map persisted");
    assert_eq!(idempotency.len(), 1);
    assert!(store.risk().is_some());
}

#[test]
fn second_session_resumes_the_persisted_book() {
    let dir = tempfile::tempdir().unwrap();
    let store = SharedStateStore::new();

    engine(&dir.path().join("run1"), PolicyOverrides::default(), store.clone())
        .run(bar_series("BTC-USD", &[100, 101]), &StopToken::new())
        .unwrap();
    let cash_after_first = store.portfolio().unwrap().cash;

    // The restarted session starts from the persisted position, so the
    // rising bar produces no new entry (already long) and the falling
    // bar exits the restored 9 units.
    let summary = engine(&dir.path().join("run2"), PolicyOverrides::default(), store.clone())
        .run(bar_series("BTC-USD", &[102, 101]), &StopToken::new())
        .unwrap();
    assert_eq!(summary.orders, 1, "only the exit trades");
    assert_eq!(summary.fills, 1);

    let portfolio = store.portfolio().unwrap();
    assert_eq!(portfolio.positions["BTC-USD"].qty, 0);
    assert!(portfolio.cash > cash_after_first, "exit proceeds landed");
}

#[test]
fn kill_switch_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let store = SharedStateStore::new();
    let overrides = PolicyOverrides {
        risk: Some(RiskOverrides {
            kill_switch_dd_bps: Some(1_000),
            max_drawdown_bps: Some(2_000),
            ..Default::default()
        }),
        sizing: Some(SizingOverrides {
            per_trade_risk_bps: Some(10_000),
            ..Default::default()
        }),
        ..Default::default()
    };

    let first = engine(&dir.path().join("run1"), overrides.clone(), store.clone())
        .run(bar_series("BTC-USD", &[100, 101, 89]), &StopToken::new())
        .unwrap();
    assert!(first.kill_switch_tripped);
    assert!(store.risk().unwrap().kill_switch_active);

    // The restarted session inherits the active switch: the falling bar
    // produces an exit intent, and even that is blocked.
    let run2 = dir.path().join("run2");
    let second = engine(&run2, overrides, store.clone())
        .run(bar_series("BTC-USD", &[95, 89]), &StopToken::new())
        .unwrap();
    assert_eq!(second.orders, 0, "intents stay blocked until explicit reset");

    let risk_events = qx_testkit::read_stream(&run2, qx_schemas::StreamKind::RiskEvents);
    assert!(risk_events.iter().any(|e| e["kind"] == "kill_switch_block"));
}
