//! Append-only artifact streams and the run manifest.
//!
//! Five JSONL files per run directory, one per [`StreamKind`], plus
//! `manifest.json`.  The writer keeps a running SHA-256 per stream over
//! the exact bytes written (line + newline), so the manifest proves what
//! a run emitted without re-reading the files.  Two runs over identical
//! inputs, bundle, and policies produce byte-identical manifests.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use qx_schemas::{ArtifactEvent, StreamKind};

use crate::canonical::canonical_json_line;

// ---------------------------------------------------------------------------
// Manifest types
// ---------------------------------------------------------------------------

pub const MANIFEST_SCHEMA_VERSION: i32 = 1;

/// Per-stream digest recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDigest {
    pub sha256: String,
    pub events: u64,
}

/// Identity of a run, supplied by the composition root.
///
/// Everything here must be derivable from the run's inputs (no wall
/// clock, no host names) or backtest determinism is lost.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMeta {
    pub run_id: String,
    pub mode: String,
    pub strategy: String,
    pub policy_hash: String,
}

/// The manifest written at the end of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: i32,
    pub run_id: String,
    pub mode: String,
    pub strategy: String,
    pub policy_hash: String,
    pub streams: BTreeMap<String, StreamDigest>,
    /// Fatal errors recorded before exit, in occurrence order.
    pub errors: Vec<String>,
}

impl RunManifest {
    /// Digest for one stream (all five always exist).
    pub fn stream(&self, kind: StreamKind) -> Option<&StreamDigest> {
        self.streams.get(kind.as_str())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<RunManifest> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("read manifest {}", path.as_ref().display()))?;
        serde_json::from_str(&text).context("parse manifest failed")
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

struct StreamState {
    hasher: Sha256,
    events: u64,
}

/// Materializes artifact events into a run directory.
pub struct ArtifactWriter {
    run_dir: PathBuf,
    streams: BTreeMap<StreamKind, StreamState>,
    errors: Vec<String>,
}

impl ArtifactWriter {
    /// Create the run directory and empty stream files.
    pub fn create(run_dir: impl AsRef<Path>) -> Result<Self> {
        let run_dir = run_dir.as_ref().to_path_buf();
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create run dir {}", run_dir.display()))?;

        let mut streams = BTreeMap::new();
        for kind in StreamKind::ALL {
            let path = stream_path(&run_dir, kind);
            fs::write(&path, "")
                .with_context(|| format!("create stream file {}", path.display()))?;
            streams.insert(
                kind,
                StreamState {
                    hasher: Sha256::new(),
                    events: 0,
                },
            );
        }

        Ok(Self {
            run_dir,
            streams,
            errors: Vec::new(),
        })
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Append one event to its stream.
    pub fn append(&mut self, event: &ArtifactEvent) -> Result<()> {
        let kind = event.stream();
        let line = canonical_json_line(event)?;

        let path = stream_path(&self.run_dir, kind);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .with_context(|| format!("open stream {}", path.display()))?;
        file.write_all(line.as_bytes())
            .context("write artifact line failed")?;
        file.write_all(b"\n").context("write newline failed")?;

        let state = self
            .streams
            .get_mut(&kind)
            .context("stream state missing")?;
        state.hasher.update(line.as_bytes());
        state.hasher.update(b"\n");
        state.events += 1;
        Ok(())
    }

    /// Record a fatal error for the manifest.  Does not abort anything.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Number of events appended to a stream so far.
    pub fn event_count(&self, kind: StreamKind) -> u64 {
        self.streams.get(&kind).map(|s| s.events).unwrap_or(0)
    }

    /// Write `manifest.json` and return the manifest.
    pub fn finalize(self, meta: &ManifestMeta) -> Result<RunManifest> {
        let streams = self
            .streams
            .into_iter()
            .map(|(kind, state)| {
                (
                    kind.as_str().to_string(),
                    StreamDigest {
                        sha256: hex::encode(state.hasher.finalize()),
                        events: state.events,
                    },
                )
            })
            .collect();

        let manifest = RunManifest {
            schema_version: MANIFEST_SCHEMA_VERSION,
            run_id: meta.run_id.clone(),
            mode: meta.mode.clone(),
            strategy: meta.strategy.clone(),
            policy_hash: meta.policy_hash.clone(),
            streams,
            errors: self.errors,
        };

        let path = self.run_dir.join("manifest.json");
        let json = canonical_json_line(&manifest)?;
        fs::write(&path, format!("{json}\n"))
            .with_context(|| format!("write manifest {}", path.display()))?;
        Ok(manifest)
    }
}

fn stream_path(run_dir: &Path, kind: StreamKind) -> PathBuf {
    run_dir.join(format!("{}.jsonl", kind.as_str()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qx_schemas::{Micros, RiskEventKind};

    fn meta() -> ManifestMeta {
        ManifestMeta {
            run_id: "run-1".to_string(),
            mode: "backtest".to_string(),
            strategy: "noop".to_string(),
            policy_hash: "abc".to_string(),
        }
    }

    fn limit_hit(detail: &str) -> ArtifactEvent {
        ArtifactEvent::LimitHit {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap(),
            scope: "test".to_string(),
            detail: detail.to_string(),
        }
    }

    fn pnl() -> ArtifactEvent {
        ArtifactEvent::PnlSnapshot {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap(),
            cash: Micros::from_units(10_000),
            equity: Micros::from_units(10_000),
            realized_pnl: Micros::ZERO,
            unrealized_pnl: Micros::ZERO,
            drawdown_bps: 0,
        }
    }

    #[test]
    fn creates_all_stream_files() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let _w = ArtifactWriter::create(&run_dir).unwrap();
        for kind in StreamKind::ALL {
            assert!(run_dir.join(format!("{}.jsonl", kind.as_str())).exists());
        }
    }

    #[test]
    fn append_routes_to_stream_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ArtifactWriter::create(dir.path().join("run")).unwrap();
        w.append(&pnl()).unwrap();
        w.append(&limit_hit("a")).unwrap();
        w.append(&limit_hit("b")).unwrap();
        assert_eq!(w.event_count(StreamKind::Pnl), 1);
        assert_eq!(w.event_count(StreamKind::RiskEvents), 2);
        assert_eq!(w.event_count(StreamKind::Orders), 0);
    }

    #[test]
    fn manifest_hash_matches_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let mut w = ArtifactWriter::create(&run_dir).unwrap();
        w.append(&pnl()).unwrap();
        let manifest = w.finalize(&meta()).unwrap();

        let bytes = fs::read(run_dir.join("pnl.jsonl")).unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let expected = hex::encode(hasher.finalize());
        assert_eq!(manifest.stream(StreamKind::Pnl).unwrap().sha256, expected);
    }

    #[test]
    fn identical_event_sequences_produce_identical_manifests() {
        let dir = tempfile::tempdir().unwrap();
        let run = |name: &str| {
            let mut w = ArtifactWriter::create(dir.path().join(name)).unwrap();
            w.append(&pnl()).unwrap();
            w.append(&limit_hit("x")).unwrap();
            w.finalize(&meta()).unwrap()
        };
        assert_eq!(run("a"), run("b"));
    }

    #[test]
    fn different_events_produce_different_hashes() {
        let dir = tempfile::tempdir().unwrap();
        let mut a = ArtifactWriter::create(dir.path().join("a")).unwrap();
        a.append(&limit_hit("x")).unwrap();
        let ma = a.finalize(&meta()).unwrap();

        let mut b = ArtifactWriter::create(dir.path().join("b")).unwrap();
        b.append(&limit_hit("y")).unwrap();
        let mb = b.finalize(&meta()).unwrap();

        assert_ne!(
            ma.stream(StreamKind::RiskEvents).unwrap().sha256,
            mb.stream(StreamKind::RiskEvents).unwrap().sha256
        );
    }

    #[test]
    fn errors_are_recorded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ArtifactWriter::create(dir.path().join("run")).unwrap();
        w.record_error("first");
        w.record_error("second");
        let manifest = w.finalize(&meta()).unwrap();
        assert_eq!(manifest.errors, ["first", "second"]);
    }

    #[test]
    fn manifest_round_trips_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");
        let mut w = ArtifactWriter::create(&run_dir).unwrap();
        w.append(&pnl()).unwrap();
        let written = w.finalize(&meta()).unwrap();
        let loaded = RunManifest::load(run_dir.join("manifest.json")).unwrap();
        assert_eq!(written, loaded);
    }
}
