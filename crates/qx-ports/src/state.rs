//! State-store and notifier ports (both optional collaborators).

use std::collections::BTreeMap;
use std::fmt;

use uuid::Uuid;

use qx_schemas::{ArtifactEvent, PortfolioState, RiskState};

/// Persisted idempotency index: key → order id.
pub type IdempotencyMap = BTreeMap<String, Uuid>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateStoreError {
    pub detail: String,
}

impl StateStoreError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StateStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "state store error: {}", self.detail)
    }
}

impl std::error::Error for StateStoreError {}

/// Restart-safety persistence.  Loads return `None` when nothing has been
/// saved yet; a fresh run starts from initial state.
pub trait StateStore {
    fn load_portfolio(&mut self) -> Result<Option<PortfolioState>, StateStoreError>;
    fn save_portfolio(&mut self, state: &PortfolioState) -> Result<(), StateStoreError>;

    fn load_risk(&mut self) -> Result<Option<RiskState>, StateStoreError>;
    fn save_risk(&mut self, state: &RiskState) -> Result<(), StateStoreError>;

    fn load_idempotency_map(&mut self) -> Result<Option<IdempotencyMap>, StateStoreError>;
    fn save_idempotency_map(&mut self, map: &IdempotencyMap) -> Result<(), StateStoreError>;
}

/// Out-of-band broadcast for limit-hit and kill-switch events.
///
/// Emission must never affect engine control flow; a notifier that drops
/// events is acceptable, one that blocks is not.
pub trait Notifier {
    fn emit(&mut self, event: &ArtifactEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn emit(&mut self, _event: &ArtifactEvent) {}
}
