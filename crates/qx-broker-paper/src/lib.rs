//! qx-broker-paper
//!
//! Deterministic simulated broker implementing the [`Broker`] port.
//!
//! Fill model: market orders fill immediately and in full at the current
//! mark (the engine marks each bar's close before submitting), adjusted
//! by the cost policy — slippage against the taker, commission with a
//! minimum fee.  Limit orders fill only if the slipped price satisfies
//! the limit; otherwise they rest `Accepted` until cancelled.  Stop
//! orders always rest.  No randomness, no wall clock, no IO.
//!
//! The venue honors idempotency keys: resubmitting a known key returns
//! the existing order without creating a second one, which is what makes
//! engine-level transient retries safe.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use qx_policy::CostPolicy;
use qx_ports::{BarObserver, Broker, BrokerError, BrokerErrorKind};
use qx_schemas::{
    derive_fill_id, Fill, Micros, OrderRecord, OrderRequest, OrderStatus, OrderType, Side,
    Transition,
};

/// Simulated venue state.
#[derive(Debug)]
pub struct PaperBroker {
    cost: CostPolicy,
    now: DateTime<Utc>,
    marks: BTreeMap<String, Micros>,
    orders: BTreeMap<Uuid, OrderRecord>,
    by_key: BTreeMap<String, Uuid>,
    fills: Vec<Fill>,
    order_seq: u64,
    fill_seq: u64,
}

impl PaperBroker {
    pub fn new(cost: CostPolicy) -> Self {
        Self {
            cost,
            now: DateTime::UNIX_EPOCH,
            marks: BTreeMap::new(),
            orders: BTreeMap::new(),
            by_key: BTreeMap::new(),
            fills: Vec::new(),
            order_seq: 0,
            fill_seq: 0,
        }
    }

    /// Advance venue time (the engine pins this to the bar clock).
    pub fn set_now(&mut self, now: DateTime<Utc>) {
        self.now = now;
    }

    /// Set the executable price for a symbol (bar close).
    pub fn set_mark(&mut self, symbol: impl Into<String>, price: Micros) {
        self.marks.insert(symbol.into(), price);
    }

    /// Total fills the venue has produced (test observability).
    pub fn fill_count(&self) -> usize {
        self.fills.len()
    }

    /// Total distinct orders the venue has accepted.
    pub fn order_count(&self) -> usize {
        self.orders.len()
    }

    // Slipped executable price: worse for the taker on both sides.
    fn execution_price(&self, side: Side, mark: Micros) -> Micros {
        let slip = mark.mul_bps(self.cost.slippage_bps);
        match side {
            Side::Buy => mark.saturating_add(slip),
            Side::Sell => mark.saturating_sub(slip),
        }
    }

    fn commission(&self, notional: Micros) -> Micros {
        let bps_fee = notional.mul_bps(self.cost.commission_bps);
        if bps_fee < self.cost.min_fee {
            self.cost.min_fee
        } else {
            bps_fee
        }
    }

    // Whether a priced order is marketable at the slipped price.
    fn is_marketable(request: &OrderRequest, price: Micros) -> bool {
        match (request.order_type, request.limit_price) {
            (OrderType::Market, _) => true,
            (OrderType::Limit, Some(limit)) => match request.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            },
            // Stop / stop-limit (and a malformed limit without a price)
            // rest until cancelled.
            _ => false,
        }
    }

    fn fill_order(&mut self, order_id: Uuid, price: Micros) {
        let (qty, symbol, side) = match self.orders.get(&order_id) {
            Some(r) => (r.request.qty, r.request.symbol.clone(), r.request.side),
            None => return,
        };
        let notional = price.checked_mul_qty(qty).unwrap_or(Micros::MAX);
        let commission = self.commission(notional);

        let fill = Fill {
            fill_id: derive_fill_id(order_id, self.fill_seq),
            order_id,
            ts: self.now,
            symbol,
            side,
            qty,
            price,
            commission,
            slippage_bps: self.cost.slippage_bps,
            venue_fill_id: Some(format!("PF-{:06}", self.fill_seq)),
            metadata: BTreeMap::new(),
        };
        self.fill_seq += 1;

        if let Some(record) = self.orders.get_mut(&order_id) {
            record.filled_qty = qty;
            record.status = OrderStatus::Filled;
            record.transitions.push(Transition {
                ts: self.now,
                from: OrderStatus::Accepted,
                to: OrderStatus::Filled,
                cause: "paper fill".to_string(),
            });
        }
        self.fills.push(fill);
    }
}

impl BarObserver for PaperBroker {
    fn observe_bar(&mut self, bar: &qx_schemas::Bar) {
        self.set_now(bar.ts);
        self.set_mark(bar.symbol.clone(), bar.close);
    }
}

impl Broker for PaperBroker {
    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        // Venue-side idempotency: a known key returns the existing order.
        if let Some(&order_id) = self.by_key.get(&request.idempotency_key) {
            return Ok(self.orders[&order_id].clone());
        }

        let mark = *self.marks.get(&request.symbol).ok_or_else(|| {
            BrokerError::new(
                BrokerErrorKind::InvalidSymbol,
                format!("no market for symbol '{}'", request.symbol),
            )
        })?;

        if request.qty <= 0 {
            return Err(BrokerError::new(
                BrokerErrorKind::Compliance,
                format!("qty must be > 0, got {}", request.qty),
            ));
        }

        self.order_seq += 1;
        let mut record = OrderRecord::new(request.clone());
        record.venue_order_id = Some(format!("P-{:06}", self.order_seq));
        record.status = OrderStatus::Accepted;
        let order_id = record.order_id;
        self.orders.insert(order_id, record);
        self.by_key
            .insert(request.idempotency_key.clone(), order_id);

        let price = self.execution_price(request.side, mark);
        if Self::is_marketable(request, price) {
            self.fill_order(order_id, price);
        }

        // The submit response is the ack-level view; fills are reported
        // through `get_fills`.
        let mut response = self.orders[&order_id].clone();
        response.status = OrderStatus::Accepted;
        Ok(response)
    }

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        let now = self.now;
        let record = self.orders.get_mut(&order_id).ok_or_else(|| {
            BrokerError::new(
                BrokerErrorKind::UnknownOrder,
                format!("order {order_id} unknown to venue"),
            )
        })?;
        if !record.status.is_terminal() {
            let from = record.status;
            record.status = OrderStatus::Cancelled;
            record.transitions.push(Transition {
                ts: now,
                from,
                to: OrderStatus::Cancelled,
                cause: "venue cancel".to_string(),
            });
        }
        Ok(record.clone())
    }

    fn get_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.orders.get(&order_id).cloned().ok_or_else(|| {
            BrokerError::new(
                BrokerErrorKind::UnknownOrder,
                format!("order {order_id} unknown to venue"),
            )
        })
    }

    fn list_open_orders(
        &mut self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderRecord>, BrokerError> {
        Ok(self
            .orders
            .values()
            .filter(|r| !r.status.is_terminal())
            .filter(|r| symbol.map_or(true, |s| r.request.symbol == s))
            .cloned()
            .collect())
    }

    fn get_fills(&mut self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError> {
        Ok(self
            .fills
            .iter()
            .filter(|f| order_id.map_or(true, |id| f.order_id == id))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
