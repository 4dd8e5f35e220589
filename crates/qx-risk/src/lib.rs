//! qx-risk
//!
//! The risk monitor: incremental drawdown tracking, pre-trade limit
//! checks, and the kill switch.  Pure evaluation — the engine owns the
//! consequences (cancelling orders, flattening, emitting artifacts).

mod monitor;

pub use monitor::{
    KillSwitchTrip, PreTradeReject, ProposedOrder, RiskMonitor, TripAction,
};
