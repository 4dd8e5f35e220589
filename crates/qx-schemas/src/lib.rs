//! qx-schemas
//!
//! Immutable value types shared by every crate in the workspace: bars,
//! signals, target weights, orders, fills, portfolio and risk snapshots,
//! and the artifact event union — plus the `Micros` fixed-point money type
//! and the canonical timestamp helpers.
//!
//! This crate holds data and invariant helpers only.  No IO, no clock, no
//! policy decisions.

mod artifact;
mod bar;
mod money;
mod order;
mod portfolio;
mod signal;
mod time;
mod timeframe;

pub use artifact::{ArtifactEvent, RiskEventKind, StreamKind};
pub use bar::Bar;
pub use money::{Micros, ParseMicrosError, BPS_SCALE, MICROS_SCALE};
pub use order::{
    derive_fill_id, derive_order_id, Fill, OrderRecord, OrderRequest, OrderStatus, OrderType,
    Side, Transition,
};
pub use portfolio::{PortfolioState, Position, RiskState};
pub use signal::{Signal, SignalAction, TargetWeights};
pub use time::{to_canonical_rfc3339, truncate_micros};
pub use timeframe::{Timeframe, UnsupportedTimeframe};
