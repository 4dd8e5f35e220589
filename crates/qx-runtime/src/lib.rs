//! qx-runtime
//!
//! Composition-root helpers: the dual live safety gate, the gate-checked
//! live broker shim, file-backed restart state, and deterministic run
//! identity.  This crate is the only place the process environment is
//! read; everything below it receives explicit values.

mod compose;
mod live;
mod safety;
mod store;

pub use compose::{derive_run_id, select_broker, BrokerChoice, BrokerSelection};
pub use live::LiveBroker;
pub use safety::{
    check_live_gates, GatePolicy, LiveGateEnv, LiveSafetyGateError, ENV_CONFIRM_LIVE,
    ENV_LIVE_API,
};
pub use store::FileStateStore;
