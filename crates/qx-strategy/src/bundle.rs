//! Strategy bundle: metadata + factory + policy overrides.

use std::fmt;

use qx_policy::{compose, PolicyMergeError, PolicyOverrides, PolicySet};
use qx_schemas::Timeframe;

use crate::arbitrage::ArbitrageSpec;
use crate::types::{RebalanceStrategy, Strategy, StrategyMeta};

/// Factory producing a fresh signal strategy.  Called anew per run so
/// strategy state never leaks across runs.
pub type SignalFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Factory producing a fresh rebalancing strategy.
pub type RebalanceFactory = Box<dyn Fn() -> Box<dyn RebalanceStrategy> + Send + Sync>;

/// What kind of strategy the bundle builds.
pub enum StrategyBuild {
    Signal(SignalFactory),
    Rebalance(RebalanceFactory),
    /// Declared but rejected at load time; no runtime exists for it here.
    Arbitrage(ArbitrageSpec),
}

impl fmt::Debug for StrategyBuild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyBuild::Signal(_) => f.write_str("StrategyBuild::Signal(..)"),
            StrategyBuild::Rebalance(_) => f.write_str("StrategyBuild::Rebalance(..)"),
            StrategyBuild::Arbitrage(spec) => {
                write!(f, "StrategyBuild::Arbitrage({spec:?})")
            }
        }
    }
}

/// The declarative record a plugin exports.
#[derive(Debug)]
pub struct StrategyBundle {
    pub meta: StrategyMeta,
    pub build: StrategyBuild,
    pub overrides: PolicyOverrides,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// A bundle's declaration is malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyValidationError {
    EmptyUniverse,
    EmptySymbolInUniverse,
    EmptyRequiredFields,
    UnsupportedTimeframe { got: String },
    NameMismatch { registered: String, declared: String },
    /// Arbitrage bundles are rejected at load time in this runtime.
    ArbitrageUnsupported,
    InvalidOverrides(PolicyMergeError),
}

impl fmt::Display for StrategyValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyUniverse => write!(f, "bundle universe must not be empty"),
            Self::EmptySymbolInUniverse => {
                write!(f, "bundle universe contains an empty symbol")
            }
            Self::EmptyRequiredFields => {
                write!(f, "bundle required_fields must not be empty")
            }
            Self::UnsupportedTimeframe { got } => {
                write!(f, "bundle timeframe must be '1m', got '{got}'")
            }
            Self::NameMismatch {
                registered,
                declared,
            } => write!(
                f,
                "bundle name '{declared}' does not match registration '{registered}'"
            ),
            Self::ArbitrageUnsupported => {
                write!(f, "arbitrage bundles are not executable in this runtime")
            }
            Self::InvalidOverrides(e) => write!(f, "bundle overrides invalid: {e}"),
        }
    }
}

impl std::error::Error for StrategyValidationError {}

impl StrategyBundle {
    /// Validate the declaration against the registration name.
    ///
    /// Overrides are proven mergeable against the stock defaults so a bad
    /// value fails at load time, not mid-run.
    pub fn validate(&self, registered_name: &str) -> Result<(), StrategyValidationError> {
        if self.meta.name != registered_name {
            return Err(StrategyValidationError::NameMismatch {
                registered: registered_name.to_string(),
                declared: self.meta.name.clone(),
            });
        }
        if self.meta.universe.is_empty() {
            return Err(StrategyValidationError::EmptyUniverse);
        }
        if self.meta.universe.iter().any(|s| s.trim().is_empty()) {
            return Err(StrategyValidationError::EmptySymbolInUniverse);
        }
        if self.meta.required_fields.is_empty() {
            return Err(StrategyValidationError::EmptyRequiredFields);
        }
        if Timeframe::parse(&self.meta.timeframe).is_err() {
            return Err(StrategyValidationError::UnsupportedTimeframe {
                got: self.meta.timeframe.clone(),
            });
        }
        if matches!(self.build, StrategyBuild::Arbitrage(_)) {
            return Err(StrategyValidationError::ArbitrageUnsupported);
        }
        compose(&PolicySet::default(), &self.overrides)
            .map_err(StrategyValidationError::InvalidOverrides)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
