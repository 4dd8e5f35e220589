//! Composition helpers: broker selection under the safety gate and
//! deterministic run identity.

use tracing::warn;
use uuid::Uuid;

use qx_engine::RunMode;

use crate::safety::{check_live_gates, GatePolicy, LiveGateEnv, LiveSafetyGateError};

/// Which venue the run executes against.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BrokerChoice {
    Paper,
    Live,
}

/// Outcome of gate-checked broker selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerSelection {
    pub choice: BrokerChoice,
    /// Present when a refused live request was downgraded to paper; the
    /// composition root must record it in the run's artifacts.
    pub downgrade_warning: Option<String>,
}

/// Resolve the venue for a run.  This is the first of the two gate
/// checks; `LiveBroker::connect` repeats it at construction.
pub fn select_broker(
    mode: RunMode,
    policy: GatePolicy,
    env: &LiveGateEnv,
) -> Result<BrokerSelection, LiveSafetyGateError> {
    match mode {
        RunMode::Backtest | RunMode::Paper => Ok(BrokerSelection {
            choice: BrokerChoice::Paper,
            downgrade_warning: None,
        }),
        RunMode::Live => match check_live_gates(env) {
            Ok(()) => Ok(BrokerSelection {
                choice: BrokerChoice::Live,
                downgrade_warning: None,
            }),
            Err(e) => match policy {
                GatePolicy::HardFail => Err(e),
                GatePolicy::DowngradeToPaper => {
                    let warning = format!("live execution downgraded to paper: {e}");
                    warn!("{warning}");
                    Ok(BrokerSelection {
                        choice: BrokerChoice::Paper,
                        downgrade_warning: Some(warning),
                    })
                }
            },
        },
    }
}

/// Deterministic run id: UUID v5 over the run's identifying inputs.
///
/// Two backtests over the same strategy, symbols, window, data, and
/// policies share a run id, which is what lets their manifests be
/// compared byte for byte.
pub fn derive_run_id(
    mode: RunMode,
    strategy: &str,
    symbols: &[String],
    start: &str,
    end: &str,
    policy_hash: &str,
) -> String {
    let name = format!(
        "run:{}:{strategy}:{}:{start}:{end}:{policy_hash}",
        mode.as_str(),
        symbols.join(",")
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}
