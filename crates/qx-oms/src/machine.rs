//! The order state machine and idempotency store.
//!
//! # Ownership
//!
//! `OrderStateMachine` is the sole owner and mutator of [`OrderRecord`]s.
//! Broker adapters receive request snapshots and report events; the
//! machine applies them.  Callers get clones.
//!
//! # Idempotency
//!
//! Every submission carries an idempotency key.  The machine keeps
//! `key → (order_id, payload_hash, acked)`:
//!
//! - **Unknown key** — create the record, transition `Created →
//!   Submitted`, hand the snapshot to the broker port.
//! - **Known key, identical payload, acked** — return the existing record
//!   without touching the venue.  This is the replay-safe path: exactly
//!   one `Submitted` transition ever happens per key.
//! - **Known key, identical payload, not acked** — the previous attempt
//!   died in transit, so the venue's state is unknown.  The request is
//!   resubmitted under the same key and the venue's own dedup collapses
//!   it.  This is the transient-retry path driven by the engine.
//! - **Known key, different payload** — [`OmsError::IdempotencyConflict`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use qx_ports::{Broker, BrokerError, IdempotencyMap};
use qx_schemas::{Fill, OrderRecord, OrderRequest, OrderStatus};

use crate::payload::payload_hash;
use crate::transitions::{apply_transition, LifecycleInvariantError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OmsError {
    /// An illegal lifecycle transition.  Halt the run.
    Lifecycle(LifecycleInvariantError),
    /// Same key, different canonical payload.  Halt the run.
    IdempotencyConflict {
        key: String,
        existing_order_id: Uuid,
    },
    /// An event referenced an order this machine does not own.
    UnknownOrder { order_id: Uuid },
    /// Cumulative fills would exceed the requested quantity.
    Overfill {
        order_id: Uuid,
        request_qty: i64,
        attempted: i64,
    },
    /// The broker port failed; the engine classifies and may retry.
    Broker(BrokerError),
}

impl fmt::Display for OmsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OmsError::Lifecycle(e) => write!(f, "{e}"),
            OmsError::IdempotencyConflict {
                key,
                existing_order_id,
            } => write!(
                f,
                "idempotency conflict for key '{key}': a different payload already exists as order {existing_order_id}"
            ),
            OmsError::UnknownOrder { order_id } => {
                write!(f, "unknown order {order_id}")
            }
            OmsError::Overfill {
                order_id,
                request_qty,
                attempted,
            } => write!(
                f,
                "overfill on order {order_id}: cumulative {attempted} exceeds request qty {request_qty}"
            ),
            OmsError::Broker(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OmsError {}

impl From<LifecycleInvariantError> for OmsError {
    fn from(e: LifecycleInvariantError) -> Self {
        OmsError::Lifecycle(e)
    }
}

impl From<BrokerError> for OmsError {
    fn from(e: BrokerError) -> Self {
        OmsError::Broker(e)
    }
}

// ---------------------------------------------------------------------------
// Submission outcome
// ---------------------------------------------------------------------------

/// What a call to [`OrderStateMachine::submit`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The venue was called (first submission or transient-retry resubmit).
    Submitted(OrderRecord),
    /// Known key with an authoritative prior answer; no venue call.
    Replayed(OrderRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> &OrderRecord {
        match self {
            SubmitOutcome::Submitted(r) | SubmitOutcome::Replayed(r) => r,
        }
    }
}

// ---------------------------------------------------------------------------
// OrderStateMachine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct IndexEntry {
    order_id: Uuid,
    payload_hash: String,
    /// `true` once the venue has given an authoritative answer (ack,
    /// reject, or any fill).  Unacked entries are eligible for resubmit.
    acked: bool,
}

/// In-memory order store with lifecycle and idempotency enforcement.
#[derive(Debug, Default)]
pub struct OrderStateMachine {
    orders: BTreeMap<Uuid, OrderRecord>,
    index: BTreeMap<String, IndexEntry>,
    applied_fills: BTreeSet<Uuid>,
}

impl OrderStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    // -- submission ---------------------------------------------------------

    /// Submit a request through the broker port under idempotency control.
    ///
    /// On a transient broker failure the record stays `Submitted` and the
    /// key stays unacked: calling `submit` again with the same request is
    /// the sanctioned retry path and will resubmit to the venue.  On a
    /// semantic failure the order is terminally `Rejected` here.
    pub fn submit(
        &mut self,
        request: OrderRequest,
        broker: &mut dyn Broker,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, OmsError> {
        let key = request.idempotency_key.clone();
        let hash = payload_hash(&request);

        if let Some(entry) = self.index.get(&key) {
            if entry.payload_hash != hash {
                return Err(OmsError::IdempotencyConflict {
                    key,
                    existing_order_id: entry.order_id,
                });
            }
            let order_id = entry.order_id;
            let acked = entry.acked;
            let terminal = self
                .orders
                .get(&order_id)
                .map(|r| r.status.is_terminal())
                .unwrap_or(false);
            if acked || terminal {
                let record = self
                    .orders
                    .get(&order_id)
                    .cloned()
                    .ok_or(OmsError::UnknownOrder { order_id })?;
                return Ok(SubmitOutcome::Replayed(record));
            }
            // Unacked: venue outcome unknown, resubmit under the same key.
            return self.dispatch(order_id, broker, now).map(SubmitOutcome::Submitted);
        }

        // Unknown key: create, transition, dispatch.
        let mut record = OrderRecord::new(request);
        apply_transition(&mut record, OrderStatus::Submitted, now, "submit")?;
        let order_id = record.order_id;
        self.orders.insert(order_id, record);
        self.index.insert(
            key,
            IndexEntry {
                order_id,
                payload_hash: hash,
                acked: false,
            },
        );
        self.dispatch(order_id, broker, now)
            .map(SubmitOutcome::Submitted)
    }

    // Hand the snapshot to the venue and absorb its answer.
    fn dispatch(
        &mut self,
        order_id: Uuid,
        broker: &mut dyn Broker,
        now: DateTime<Utc>,
    ) -> Result<OrderRecord, OmsError> {
        let request = self
            .orders
            .get(&order_id)
            .ok_or(OmsError::UnknownOrder { order_id })?
            .request
            .clone();

        match broker.submit_order(&request) {
            Ok(venue_view) => {
                let record = self
                    .orders
                    .get_mut(&order_id)
                    .ok_or(OmsError::UnknownOrder { order_id })?;
                record.venue_order_id = venue_view.venue_order_id.clone();
                match venue_view.status {
                    OrderStatus::Accepted if record.status == OrderStatus::Submitted => {
                        apply_transition(record, OrderStatus::Accepted, now, "venue ack")?;
                    }
                    OrderStatus::Rejected => {
                        record.reject_reason = venue_view
                            .reject_reason
                            .clone()
                            .or_else(|| Some("venue reject".to_string()));
                        apply_transition(record, OrderStatus::Rejected, now, "venue reject")?;
                    }
                    // Fills are reconciled through `apply_fill`, never from
                    // the submit response.
                    _ => {}
                }
                self.mark_acked(order_id);
                Ok(self.orders[&order_id].clone())
            }
            Err(e) if e.is_transient() => {
                // No authoritative answer: leave Submitted and unacked so a
                // retry with the same key resubmits.
                Err(OmsError::Broker(e))
            }
            Err(e) => {
                // Semantic: the venue answered.  Terminate the order.
                let record = self
                    .orders
                    .get_mut(&order_id)
                    .ok_or(OmsError::UnknownOrder { order_id })?;
                record.reject_reason = Some(e.message.clone());
                apply_transition(record, OrderStatus::Rejected, now, "semantic reject")?;
                self.mark_acked(order_id);
                Err(OmsError::Broker(e))
            }
        }
    }

    fn mark_acked(&mut self, order_id: Uuid) {
        for entry in self.index.values_mut() {
            if entry.order_id == order_id {
                entry.acked = true;
                return;
            }
        }
    }

    // -- event reconciliation -----------------------------------------------

    /// Apply a fill event.  Duplicate `fill_id`s are silently ignored so a
    /// replayed event log converges to the same state.
    pub fn apply_fill(&mut self, fill: &Fill) -> Result<OrderRecord, OmsError> {
        if self.applied_fills.contains(&fill.fill_id) {
            return self
                .orders
                .get(&fill.order_id)
                .cloned()
                .ok_or(OmsError::UnknownOrder {
                    order_id: fill.order_id,
                });
        }

        let record = self
            .orders
            .get_mut(&fill.order_id)
            .ok_or(OmsError::UnknownOrder {
                order_id: fill.order_id,
            })?;

        let attempted = record.filled_qty + fill.qty;
        if attempted > record.request.qty {
            return Err(OmsError::Overfill {
                order_id: fill.order_id,
                request_qty: record.request.qty,
                attempted,
            });
        }

        let target = if attempted < record.request.qty {
            OrderStatus::PartiallyFilled
        } else {
            OrderStatus::Filled
        };
        let cause = if target == OrderStatus::Filled {
            "fill complete"
        } else {
            "partial fill"
        };
        apply_transition(record, target, fill.ts, cause)?;
        record.filled_qty = attempted;

        self.applied_fills.insert(fill.fill_id);
        self.mark_acked(fill.order_id);
        Ok(self.orders[&fill.order_id].clone())
    }

    /// Venue acknowledged the order.  Idempotent when already `Accepted`.
    pub fn apply_accept(
        &mut self,
        order_id: Uuid,
        ts: DateTime<Utc>,
    ) -> Result<OrderRecord, OmsError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(OmsError::UnknownOrder { order_id })?;
        if record.status != OrderStatus::Accepted {
            apply_transition(record, OrderStatus::Accepted, ts, "venue ack")?;
        }
        self.mark_acked(order_id);
        Ok(self.orders[&order_id].clone())
    }

    /// Terminate with `Cancelled`, recording the cause.
    pub fn apply_cancel(
        &mut self,
        order_id: Uuid,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<OrderRecord, OmsError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(OmsError::UnknownOrder { order_id })?;
        apply_transition(record, OrderStatus::Cancelled, ts, reason)?;
        self.mark_acked(order_id);
        Ok(self.orders[&order_id].clone())
    }

    /// Terminate with `Rejected`.  A reject reason is always recorded.
    pub fn apply_reject(
        &mut self,
        order_id: Uuid,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<OrderRecord, OmsError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(OmsError::UnknownOrder { order_id })?;
        record.reject_reason = Some(reason.to_string());
        apply_transition(record, OrderStatus::Rejected, ts, reason)?;
        self.mark_acked(order_id);
        Ok(self.orders[&order_id].clone())
    }

    /// Terminate with `Expired`.
    pub fn apply_expire(
        &mut self,
        order_id: Uuid,
        ts: DateTime<Utc>,
        reason: &str,
    ) -> Result<OrderRecord, OmsError> {
        let record = self
            .orders
            .get_mut(&order_id)
            .ok_or(OmsError::UnknownOrder { order_id })?;
        apply_transition(record, OrderStatus::Expired, ts, reason)?;
        self.mark_acked(order_id);
        Ok(self.orders[&order_id].clone())
    }

    // -- views ---------------------------------------------------------------

    pub fn get(&self, order_id: Uuid) -> Option<&OrderRecord> {
        self.orders.get(&order_id)
    }

    pub fn lookup_key(&self, key: &str) -> Option<Uuid> {
        self.index.get(key).map(|e| e.order_id)
    }

    /// Non-terminal orders, ascending by order id for determinism.
    pub fn open_orders(&self) -> Vec<&OrderRecord> {
        self.orders
            .values()
            .filter(|r| !r.status.is_terminal())
            .collect()
    }

    pub fn records(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }

    /// Export the key index for restart-safety persistence.
    pub fn export_idempotency_map(&self) -> IdempotencyMap {
        self.index
            .iter()
            .map(|(k, e)| (k.clone(), e.order_id))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
