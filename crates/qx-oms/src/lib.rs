//! qx-oms
//!
//! The order lifecycle state machine: transition enforcement, the
//! idempotency store, canonical payload hashing, fill reconciliation, and
//! the retry schedule constants the engine executes.
//!
//! The machine never retries and never sleeps; it classifies.  Policy
//! about *when* to resubmit lives in the engine, policy about *whether* a
//! resubmission is the same order lives here.

mod machine;
mod payload;
mod retry;
mod transitions;

pub use machine::{OmsError, OrderStateMachine, SubmitOutcome};
pub use payload::payload_hash;
pub use retry::{backoff_for_retry, MAX_RETRIES, RATE_LIMIT_COOLDOWN_MS, RETRY_BACKOFF_MS};
pub use transitions::{apply_transition, is_allowed, LifecycleInvariantError};
