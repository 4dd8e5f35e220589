//! qx-ports
//!
//! The contracts through which the core talks to external collaborators:
//! market data, broker, clock, state store, and notifier.  Everything
//! behind these traits is an adapter; the core never imports a transport,
//! a database, or an SDK.
//!
//! All port contracts are **synchronous**.  Hosts that wrap asynchronous
//! SDKs are responsible for bridging; adapters must resolve or fail each
//! call before returning, bounded by their own wall-clock timeout
//! (surfaced as [`BrokerErrorKind::Timeout`]).

mod broker;
mod clock;
mod data;
mod state;

pub use broker::{BarObserver, Broker, BrokerError, BrokerErrorKind};
pub use clock::{BarClock, Clock, SystemClock};
pub use data::{BarDataSource, BarStream, DataSourceError};
pub use state::{IdempotencyMap, Notifier, NullNotifier, StateStore, StateStoreError};
