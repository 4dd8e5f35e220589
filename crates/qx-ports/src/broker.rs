//! Broker port and its error classification.

use std::fmt;

use uuid::Uuid;

use qx_schemas::{Fill, OrderRecord, OrderRequest};

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// What went wrong at the broker boundary.
///
/// The split drives retry behavior: **transient** kinds may be resubmitted
/// by the engine with the same idempotency key; **semantic** kinds
/// terminate the affected order.  The concrete mapping from a venue's
/// responses to these kinds is the adapter's job — the core only consumes
/// the classification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerErrorKind {
    // -- transient --
    /// Network/transport failure before an authoritative answer.
    Network,
    /// The adapter's wall-clock timeout expired.
    Timeout,
    /// The venue answered with a generic server failure (5xx-like).
    ServiceUnavailable,

    // -- semantic --
    InsufficientFunds,
    InvalidSymbol,
    /// Venue rate limit.  Forces an engine cool-down and a `limit_hit`
    /// artifact event; never retried within the same intent.
    RateLimited,
    /// Compliance / account restriction.
    Compliance,
    /// The referenced order is unknown to the venue.
    UnknownOrder,
}

impl BrokerErrorKind {
    /// Transient kinds may be retried with the same idempotency key.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerErrorKind::Network
                | BrokerErrorKind::Timeout
                | BrokerErrorKind::ServiceUnavailable
        )
    }

    pub const fn is_rate_limit(&self) -> bool {
        matches!(self, BrokerErrorKind::RateLimited)
    }
}

/// An error surfaced by a broker adapter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerError {
    pub kind: BrokerErrorKind,
    pub message: String,
}

impl BrokerError {
    pub fn new(kind: BrokerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "broker error ({:?}): {}", self.kind, self.message)
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Broker port
// ---------------------------------------------------------------------------

/// Market-data sink for venues that simulate execution.
///
/// The engine offers every admitted bar to the broker before acting on
/// it.  Simulated venues use this to price fills; adapters for real
/// venues keep the default no-op.
pub trait BarObserver {
    fn observe_bar(&mut self, _bar: &qx_schemas::Bar) {}
}

/// Broker-agnostic order port.
///
/// Implementations MUST honor `request.idempotency_key`: resubmitting a
/// request whose key the venue has already seen returns the existing
/// order rather than creating a second one.  Adapters must not be invoked
/// concurrently for the same order.
pub trait Broker {
    fn submit_order(&mut self, request: &OrderRequest) -> Result<OrderRecord, BrokerError>;

    fn cancel_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError>;

    fn get_order(&mut self, order_id: Uuid) -> Result<OrderRecord, BrokerError>;

    fn list_open_orders(&mut self, symbol: Option<&str>)
        -> Result<Vec<OrderRecord>, BrokerError>;

    /// Fills for one order, or all fills when `order_id` is `None`, in the
    /// order the venue reports them.
    fn get_fills(&mut self, order_id: Option<Uuid>) -> Result<Vec<Fill>, BrokerError>;
}
