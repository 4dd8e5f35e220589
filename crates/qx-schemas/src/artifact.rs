//! Artifact event union.
//!
//! Every event the runtime emits into the run directory is one of these
//! variants.  The serialized form is part of the determinism contract:
//! stable field order comes from the canonical key-sorted JSON encoding in
//! the artifact writer, and every variant carries only environment-free
//! data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Fill, Micros, OrderRecord, PortfolioState};

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

/// The five append-only artifact streams.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamKind {
    Orders,
    Fills,
    Positions,
    Pnl,
    RiskEvents,
}

impl StreamKind {
    pub const ALL: [StreamKind; 5] = [
        StreamKind::Orders,
        StreamKind::Fills,
        StreamKind::Positions,
        StreamKind::Pnl,
        StreamKind::RiskEvents,
    ];

    /// File-name stem and manifest key for this stream.
    pub const fn as_str(self) -> &'static str {
        match self {
            StreamKind::Orders => "orders",
            StreamKind::Fills => "fills",
            StreamKind::Positions => "positions",
            StreamKind::Pnl => "pnl",
            StreamKind::RiskEvents => "risk_events",
        }
    }
}

// ---------------------------------------------------------------------------
// Risk event kinds
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskEventKind {
    /// An intent was dropped because the kill switch is active.
    KillSwitchBlock,
    /// Drawdown crossed the kill-switch threshold.
    KillSwitchTripped,
    /// A pre-trade limit check rejected the intent.
    PreTradeReject,
}

// ---------------------------------------------------------------------------
// ArtifactEvent
// ---------------------------------------------------------------------------

/// Tagged union of everything the artifact writer records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArtifactEvent {
    Order {
        record: OrderRecord,
    },
    Fill {
        fill: Fill,
    },
    PositionsSnapshot {
        snapshot: PortfolioState,
    },
    PnlSnapshot {
        ts: DateTime<Utc>,
        cash: Micros,
        equity: Micros,
        realized_pnl: Micros,
        unrealized_pnl: Micros,
        drawdown_bps: i64,
    },
    RiskEvent {
        ts: DateTime<Utc>,
        kind: RiskEventKind,
        reason: String,
        threshold_bps: Option<i64>,
        observed_bps: Option<i64>,
        symbol: Option<String>,
    },
    /// Rate-limit cool-downs, dedup drops, turnover-cap reductions.
    LimitHit {
        ts: DateTime<Utc>,
        scope: String,
        detail: String,
    },
}

impl ArtifactEvent {
    /// The stream this event is appended to.  `limit_hit` events ride the
    /// `risk_events` stream.
    pub const fn stream(&self) -> StreamKind {
        match self {
            ArtifactEvent::Order { .. } => StreamKind::Orders,
            ArtifactEvent::Fill { .. } => StreamKind::Fills,
            ArtifactEvent::PositionsSnapshot { .. } => StreamKind::Positions,
            ArtifactEvent::PnlSnapshot { .. } => StreamKind::Pnl,
            ArtifactEvent::RiskEvent { .. } | ArtifactEvent::LimitHit { .. } => {
                StreamKind::RiskEvents
            }
        }
    }
}
