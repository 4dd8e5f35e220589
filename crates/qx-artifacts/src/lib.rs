//! qx-artifacts
//!
//! Deterministic artifact emission: canonical JSONL streams with running
//! SHA-256 digests and a manifest that makes backtest reproducibility
//! checkable with a file diff.

mod canonical;
mod writer;

pub use canonical::canonical_json_line;
pub use writer::{
    ArtifactWriter, ManifestMeta, RunManifest, StreamDigest, MANIFEST_SCHEMA_VERSION,
};
