//! Scenario: rebalancing under the turnover cap.
//!
//! An equal-weight strategy over two symbols converges toward target
//! weights with sells emitted before buys; a tight turnover cap scales
//! the batch and records a limit hit; a weight vector summing above one
//! is refused without emitting orders.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use qx_artifacts::ArtifactWriter;
use qx_broker_paper::PaperBroker;
use qx_engine::{EngineConfig, RebalancingEngine, RunMode, RunSummary, StopToken};
use qx_policy::{compose, PolicyOverrides, PolicySet, SizingOverrides};
use qx_risk::TripAction;
use qx_schemas::{Bar, Micros, PortfolioState, StreamKind, TargetWeights};
use qx_strategy::{RebalanceStrategy, StrategyMeta};
use qx_testkit::{minute_bar, read_stream};

struct FixedWeights {
    weights: Vec<(&'static str, i64)>,
}

impl RebalanceStrategy for FixedWeights {
    fn target_weights(
        &mut self,
        ts: DateTime<Utc>,
        _portfolio: &PortfolioState,
    ) -> Option<TargetWeights> {
        let weights: BTreeMap<String, i64> = self
            .weights
            .iter()
            .map(|(s, w)| (s.to_string(), *w))
            .collect();
        Some(TargetWeights {
            ts,
            weights,
            rebalance: true,
            reason: None,
        })
    }
}

fn two_symbol_bars() -> Vec<Bar> {
    vec![
        minute_bar("AAA", 0, 100),
        minute_bar("BBB", 0, 50),
        minute_bar("AAA", 1, 100),
        minute_bar("BBB", 1, 50),
    ]
}

fn run(
    run_dir: &Path,
    weights: Vec<(&'static str, i64)>,
    overrides: PolicyOverrides,
) -> RunSummary {
    let policies = compose(&PolicySet::default(), &overrides).unwrap();
    let meta = StrategyMeta::new(
        "fixed_weights",
        vec!["AAA".to_string(), "BBB".to_string()],
    );
    let config = EngineConfig {
        mode: RunMode::Backtest,
        run_id: "rebalance".to_string(),
        initial_cash: Micros::from_units(10_000),
        trip_action: TripAction::CancelOnly,
        seed: 5,
    };
    let broker = PaperBroker::new(policies.cost.clone());
    let writer = ArtifactWriter::create(run_dir).unwrap();
    RebalancingEngine::new(
        config,
        policies,
        &meta,
        Box::new(FixedWeights { weights }),
        broker,
        writer,
    )
    .run(two_symbol_bars(), &StopToken::new())
    .unwrap()
}

#[test]
fn converges_toward_equal_weights() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let summary = run(
        &run_dir,
        vec![("AAA", 4_000), ("BBB", 4_000)],
        PolicyOverrides::default(),
    );
    assert!(summary.orders >= 2);

    let positions = read_stream(&run_dir, StreamKind::Positions);
    let last = &positions.last().unwrap()["snapshot"]["positions"];
    let aaa = last["AAA"]["qty"].as_i64().unwrap();
    let bbb = last["BBB"]["qty"].as_i64().unwrap();
    // ~40% of 10_000 at price 100 and 50 respectively.
    assert!((35..=40).contains(&aaa), "AAA qty {aaa}");
    assert!((70..=80).contains(&bbb), "BBB qty {bbb}");
}

#[test]
fn tight_turnover_cap_scales_and_records_limit_hit() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let overrides = PolicyOverrides {
        sizing: Some(SizingOverrides {
            max_gross_exposure_bps: Some(1_000), // 10% of equity per batch
            ..Default::default()
        }),
        ..Default::default()
    };
    run(
        &run_dir,
        vec![("AAA", 5_000), ("BBB", 5_000)],
        overrides,
    );

    let risk_events = read_stream(&run_dir, StreamKind::RiskEvents);
    assert!(
        risk_events
            .iter()
            .any(|e| e["event"] == "limit_hit" && e["scope"] == "turnover_cap"),
        "turnover scaling must record a limit hit"
    );
}

#[test]
fn overweight_vector_is_refused_without_orders() {
    let dir = tempfile::tempdir().unwrap();
    let run_dir = dir.path().join("run");
    let summary = run(
        &run_dir,
        vec![("AAA", 6_000), ("BBB", 6_000)],
        PolicyOverrides::default(),
    );
    assert_eq!(summary.orders, 0);

    let risk_events = read_stream(&run_dir, StreamKind::RiskEvents);
    assert!(risk_events
        .iter()
        .any(|e| e["event"] == "limit_hit" && e["scope"] == "weights_sum"));
}
