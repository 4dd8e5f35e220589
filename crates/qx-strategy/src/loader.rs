//! Strategy loader: resolve → sandbox-scan → extract → validate.
//!
//! The factory registered for a plugin runs only after its source file
//! has cleared the static import sandbox, so a strategy that names a
//! forbidden module is rejected before any of its code executes.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::bundle::{StrategyBundle, StrategyValidationError};
use crate::registry::StrategyRegistry;
use crate::sandbox::{check_source, SandboxPolicy, StrategySandboxError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum StrategyLoadError {
    /// No plugin with this name is registered.
    UnknownStrategy { name: String },
    /// The registered source file could not be read.
    SourceUnreadable { path: PathBuf, detail: String },
    /// The source names a forbidden or unknown import.
    Sandbox(StrategySandboxError),
    /// The extracted bundle's declaration is malformed.
    Validation(StrategyValidationError),
}

impl fmt::Display for StrategyLoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyLoadError::UnknownStrategy { name } => {
                write!(f, "no strategy named '{name}' is registered")
            }
            StrategyLoadError::SourceUnreadable { path, detail } => {
                write!(f, "cannot read strategy source {}: {detail}", path.display())
            }
            StrategyLoadError::Sandbox(e) => write!(f, "{e}"),
            StrategyLoadError::Validation(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for StrategyLoadError {}

impl From<StrategySandboxError> for StrategyLoadError {
    fn from(e: StrategySandboxError) -> Self {
        StrategyLoadError::Sandbox(e)
    }
}

impl From<StrategyValidationError> for StrategyLoadError {
    fn from(e: StrategyValidationError) -> Self {
        StrategyLoadError::Validation(e)
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Loads validated bundles from a fixed strategies directory.
pub struct StrategyLoader {
    strategies_dir: PathBuf,
    policy: SandboxPolicy,
}

impl StrategyLoader {
    pub fn new(strategies_dir: impl AsRef<Path>) -> Self {
        Self::with_policy(strategies_dir, SandboxPolicy::default())
    }

    pub fn with_policy(strategies_dir: impl AsRef<Path>, policy: SandboxPolicy) -> Self {
        Self {
            strategies_dir: strategies_dir.as_ref().to_path_buf(),
            policy,
        }
    }

    /// Run the full pipeline for one plugin name.
    pub fn load(
        &self,
        name: &str,
        registry: &StrategyRegistry,
    ) -> Result<StrategyBundle, StrategyLoadError> {
        // 1. Resolve.
        let source_file =
            registry
                .source_file(name)
                .ok_or_else(|| StrategyLoadError::UnknownStrategy {
                    name: name.to_string(),
                })?;
        let path = self.strategies_dir.join(source_file);

        // 2. Static import sandbox — before anything plugin-authored runs.
        let source =
            fs::read_to_string(&path).map_err(|e| StrategyLoadError::SourceUnreadable {
                path: path.clone(),
                detail: e.to_string(),
            })?;
        check_source(&source, &self.policy)?;

        // 3. Extract.
        let bundle = registry
            .build_bundle(name)
            .ok_or_else(|| StrategyLoadError::UnknownStrategy {
                name: name.to_string(),
            })?;

        // 4. Validate.
        bundle.validate(name)?;
        Ok(bundle)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
