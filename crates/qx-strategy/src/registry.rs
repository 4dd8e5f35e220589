//! Plugin registry — the catalogue of available strategy bundles.
//!
//! Rust has no runtime module loading, so "resolving a plugin" is a
//! two-sided contract: the plugin's source file lives in the strategies
//! directory (where the sandbox can scan it), and its bundle factory is
//! registered here under the same name (where the loader can build it).
//! The registry preserves insertion order so enumeration is deterministic.

use std::fmt;

use crate::bundle::StrategyBundle;

/// A thread-safe factory producing the plugin's bundle on demand.
///
/// The factory must be cheap and deterministic; it is invoked only after
/// the plugin's source has passed the sandbox scan.
pub type BundleFactory = Box<dyn Fn() -> StrategyBundle + Send + Sync>;

struct RegistryEntry {
    name: String,
    source_file: String,
    factory: BundleFactory,
}

/// Errors returned by registry operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryError {
    DuplicateName { name: String },
    EmptyName,
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateName { name } => {
                write!(f, "strategy '{name}' is already registered")
            }
            RegistryError::EmptyName => write!(f, "strategy name must not be empty"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Catalogue of registered strategy plugins.
#[derive(Default)]
pub struct StrategyRegistry {
    entries: Vec<RegistryEntry>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin: its name, its source file name within the
    /// strategies directory, and its bundle factory.
    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        source_file: impl Into<String>,
        factory: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn() -> StrategyBundle + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.contains(&name) {
            return Err(RegistryError::DuplicateName { name });
        }
        self.entries.push(RegistryEntry {
            name,
            source_file: source_file.into(),
            factory: Box::new(factory),
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(name, source_file)` pairs in registration order.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|e| (e.name.as_str(), e.source_file.as_str()))
            .collect()
    }

    /// The registered source file name for a plugin.
    pub fn source_file(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.source_file.as_str())
    }

    /// Build the bundle.  Each call produces a fresh bundle so strategy
    /// state never leaks across runs.
    pub fn build_bundle(&self, name: &str) -> Option<StrategyBundle> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| (e.factory)())
    }
}
