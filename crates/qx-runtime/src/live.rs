//! Live broker shim: the second half of the dual safety gate.
//!
//! Venue SDKs live outside this workspace; a host injects its transport
//! (anything implementing the [`Broker`] port) and `LiveBroker::connect`
//! re-checks the safety gate before wrapping it.  Even a composition
//! root that forgot to call [`check_live_gates`](crate::check_live_gates)
//! cannot construct a live adapter with the gates down.

use uuid::Uuid;

use qx_ports::{BarObserver, Broker, BrokerError};
use qx_schemas::{Bar, Fill, OrderRecord, OrderRequest};

use crate::safety::{check_live_gates, LiveGateEnv, LiveSafetyGateError};

/// Gate-checked wrapper around a host-supplied live transport.
#[derive(Debug)]
pub struct LiveBroker<T: Broker> {
    inner: T,
}

impl<T: Broker> LiveBroker<T> {
    /// Construct the live adapter.  Refuses unless both environment
    /// assertions are present, guarding against a composition
    /// root that skipped its own check.
    pub fn connect(transport: T, env: &LiveGateEnv) -> Result<Self, LiveSafetyGateError> {
        check_live_gates(env)?;
        Ok(Self { inner: transport })
    }
}

impl<T: Broker> Broker for LiveBroker<T> {
    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError> {
        self.inner.submit_order(request)
    }

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.cancel_order(order_id)
    }

    fn get_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError> {
        self.inner.get_order(order_id)
    }

    fn list_open_orders(
        &mut self,
        symbol: Option<&str>,
    ) -> Result<Vec<OrderRecord>, BrokerError> {
        self.inner.list_open_orders(symbol)
    }

    fn get_fills(&mut self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError> {
        self.inner.get_fills(order_id)
    }
}

// Forwarded so a simulated stand-in transport keeps pricing fills; real
// venue transports carry the default no-op and ignore it.
impl<T: Broker + BarObserver> BarObserver for LiveBroker<T> {
    fn observe_bar(&mut self, bar: &Bar) {
        self.inner.observe_bar(bar);
    }
}
