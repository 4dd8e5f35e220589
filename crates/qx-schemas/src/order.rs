//! Order and fill value types.
//!
//! `OrderRequest` is the immutable submission snapshot handed to broker
//! adapters.  `OrderRecord` is the mutable projection owned by the order
//! state machine; everything else holds it only by reference or clone.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Micros;

// ---------------------------------------------------------------------------
// Side / order type
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Canonical lowercase token used in idempotency keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

// ---------------------------------------------------------------------------
// OrderRequest
// ---------------------------------------------------------------------------

/// Immutable order submission snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    /// Stable key under which repeated submissions collapse to one order.
    pub idempotency_key: String,
    pub created_at: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub qty: i64,
    pub limit_price: Option<Micros>,
    pub stop_price: Option<Micros>,
    pub strategy_name: String,
    pub metadata: BTreeMap<String, String>,
}

impl OrderRequest {
    /// The canonical idempotency key:
    /// `"{strategy}:{symbol}:{side}:{bar_ts_rfc3339}:{seq}"`.
    ///
    /// Used unless an external signal UUID is supplied by the caller.
    pub fn canonical_key(
        strategy_name: &str,
        symbol: &str,
        side: Side,
        bar_ts: DateTime<Utc>,
        seq: u64,
    ) -> String {
        format!(
            "{strategy_name}:{symbol}:{}:{}:{seq}",
            side.as_str(),
            bar_ts.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }

    /// A market order with empty metadata.
    pub fn market(
        idempotency_key: impl Into<String>,
        created_at: DateTime<Utc>,
        symbol: impl Into<String>,
        side: Side,
        qty: i64,
        strategy_name: impl Into<String>,
    ) -> Self {
        Self {
            idempotency_key: idempotency_key.into(),
            created_at,
            symbol: symbol.into(),
            side,
            order_type: OrderType::Market,
            qty,
            limit_price: None,
            stop_price: None,
            strategy_name: strategy_name.into(),
            metadata: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Order lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle status of an order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    Submitted,
    Accepted,
    Rejected,
    PartiallyFilled,
    Filled,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Terminal states are absorbing: no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Expired
                | OrderStatus::Rejected
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Created => "created",
            OrderStatus::Submitted => "submitted",
            OrderStatus::Accepted => "accepted",
            OrderStatus::Rejected => "rejected",
            OrderStatus::PartiallyFilled => "partially_filled",
            OrderStatus::Filled => "filled",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// One recorded lifecycle transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub ts: DateTime<Utc>,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub cause: String,
}

/// Mutable order projection owned by the order state machine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: Uuid,
    pub request: OrderRequest,
    pub status: OrderStatus,
    pub filled_qty: i64,
    pub venue_order_id: Option<String>,
    pub reject_reason: Option<String>,
    pub transitions: Vec<Transition>,
}

impl OrderRecord {
    /// A fresh record in `Created` with a deterministic id derived from the
    /// idempotency key.
    pub fn new(request: OrderRequest) -> Self {
        let order_id = derive_order_id(&request.idempotency_key);
        Self {
            order_id,
            request,
            status: OrderStatus::Created,
            filled_qty: 0,
            venue_order_id: None,
            reject_reason: None,
            transitions: Vec::new(),
        }
    }

    pub fn remaining_qty(&self) -> i64 {
        self.request.qty - self.filled_qty
    }
}

/// Deterministic order id: UUID v5 over the idempotency key.
///
/// Replaying the same key always yields the same order id, which keeps
/// backtest artifacts byte-identical across runs.
pub fn derive_order_id(idempotency_key: &str) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("order:{idempotency_key}").as_bytes(),
    )
}

/// Deterministic fill id: UUID v5 over `(order_id, seq)`.
pub fn derive_fill_id(order_id: Uuid, seq: u64) -> Uuid {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("fill:{order_id}:{seq}").as_bytes(),
    )
}

// ---------------------------------------------------------------------------
// Fill
// ---------------------------------------------------------------------------

/// A single execution against an order (the accounting atom).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: Uuid,
    pub order_id: Uuid,
    pub ts: DateTime<Utc>,
    pub symbol: String,
    pub side: Side,
    pub qty: i64,
    pub price: Micros,
    pub commission: Micros,
    pub slippage_bps: i64,
    pub venue_fill_id: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl Fill {
    /// Sort key for deterministic fill application order.
    pub fn tie_break_key(&self) -> (String, Uuid) {
        (
            self.venue_fill_id.clone().unwrap_or_default(),
            self.fill_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
