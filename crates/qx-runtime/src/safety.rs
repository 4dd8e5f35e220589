//! Dual environment safety gate for live execution.
//!
//! Live trading requires BOTH assertions:
//!
//! - `LIVE_API=1`
//! - `CONFIRM_LIVE=YES`
//!
//! The gate is checked in two places: at the composition root before a
//! live adapter is constructed ([`check_live_gates`]) and again inside
//! the live adapter constructor (`LiveBroker::connect`).  The core never
//! reads the process environment itself — the composition root captures
//! it once into a [`LiveGateEnv`] value and passes that around, which
//! also makes the gate trivially testable.

use std::fmt;

pub const ENV_LIVE_API: &str = "LIVE_API";
pub const ENV_CONFIRM_LIVE: &str = "CONFIRM_LIVE";

/// Captured gate-relevant environment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LiveGateEnv {
    pub live_api: Option<String>,
    pub confirm_live: Option<String>,
}

impl LiveGateEnv {
    /// Capture from the process environment.  Composition root only.
    pub fn capture() -> Self {
        Self {
            live_api: std::env::var(ENV_LIVE_API).ok(),
            confirm_live: std::env::var(ENV_CONFIRM_LIVE).ok(),
        }
    }

    /// Both assertions present and exact.
    pub fn fully_armed(&self) -> bool {
        self.live_api.as_deref() == Some("1") && self.confirm_live.as_deref() == Some("YES")
    }
}

/// A live execution path was requested without both assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSafetyGateError {
    /// The env var names that are missing or carry the wrong value.
    pub missing: Vec<&'static str>,
}

impl fmt::Display for LiveSafetyGateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live safety gate refused: {} must be set ({}=1, {}=YES required for live execution)",
            self.missing.join(", "),
            ENV_LIVE_API,
            ENV_CONFIRM_LIVE
        )
    }
}

impl std::error::Error for LiveSafetyGateError {}

/// What to do when the gate refuses.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum GatePolicy {
    /// Abort with [`LiveSafetyGateError`].
    #[default]
    HardFail,
    /// Run against the paper venue instead, with a recorded warning.
    DowngradeToPaper,
}

/// Evaluate the gate.  Returns the exact missing assertions on refusal.
pub fn check_live_gates(env: &LiveGateEnv) -> Result<(), LiveSafetyGateError> {
    let mut missing = Vec::new();
    if env.live_api.as_deref() != Some("1") {
        missing.push(ENV_LIVE_API);
    }
    if env.confirm_live.as_deref() != Some("YES") {
        missing.push(ENV_CONFIRM_LIVE);
    }
    if missing.is_empty() {
        Ok(())
    } else {
        Err(LiveSafetyGateError { missing })
    }
}
