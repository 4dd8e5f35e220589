//! File-backed state store for restart safety.
//!
//! Three JSON files in one directory: `portfolio.json`, `risk.json`,
//! `idempotency.json`.  Writes are whole-file replacements of canonical
//! serde output; loads return `None` when a file does not exist yet.

use std::fs;
use std::path::{Path, PathBuf};

use qx_ports::{IdempotencyMap, StateStore, StateStoreError};
use qx_schemas::{PortfolioState, RiskState};

pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| StateStoreError::new(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    fn load_json<T: serde::de::DeserializeOwned>(
        &self,
        file: &str,
    ) -> Result<Option<T>, StateStoreError> {
        let path = self.dir.join(file);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .map_err(|e| StateStoreError::new(format!("read {}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| StateStoreError::new(format!("parse {}: {e}", path.display())))
    }

    fn save_json<T: serde::Serialize>(&self, file: &str, value: &T) -> Result<(), StateStoreError> {
        let path = self.dir.join(file);
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| StateStoreError::new(format!("serialize {file}: {e}")))?;
        fs::write(&path, format!("{json}\n"))
            .map_err(|e| StateStoreError::new(format!("write {}: {e}", path.display())))
    }
}

impl StateStore for FileStateStore {
    fn load_portfolio(&mut self) -> Result<Option<PortfolioState>, StateStoreError> {
        self.load_json("portfolio.json")
    }

    fn save_portfolio(&mut self, state: &PortfolioState) -> Result<(), StateStoreError> {
        self.save_json("portfolio.json", state)
    }

    fn load_risk(&mut self) -> Result<Option<RiskState>, StateStoreError> {
        self.load_json("risk.json")
    }

    fn save_risk(&mut self, state: &RiskState) -> Result<(), StateStoreError> {
        self.save_json("risk.json", state)
    }

    fn load_idempotency_map(&mut self) -> Result<Option<IdempotencyMap>, StateStoreError> {
        self.load_json("idempotency.json")
    }

    fn save_idempotency_map(&mut self, map: &IdempotencyMap) -> Result<(), StateStoreError> {
        self.save_json("idempotency.json", map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use qx_schemas::Micros;
    use std::collections::BTreeMap;

    #[test]
    fn fresh_store_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::new(dir.path()).unwrap();
        assert!(store.load_portfolio().unwrap().is_none());
        assert!(store.load_risk().unwrap().is_none());
        assert!(store.load_idempotency_map().unwrap().is_none());
    }

    #[test]
    fn portfolio_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::new(dir.path()).unwrap();
        let state = PortfolioState {
            ts: Utc.with_ymd_and_hms(2026, 1, 1, 0, 1, 0).unwrap(),
            cash: Micros::from_units(10_000),
            equity: Micros::from_units(10_000),
            positions: BTreeMap::new(),
            gross_exposure: Micros::ZERO,
            net_exposure: Micros::ZERO,
            pending_orders: Vec::new(),
        };
        store.save_portfolio(&state).unwrap();
        assert_eq!(store.load_portfolio().unwrap(), Some(state));
    }

    #[test]
    fn idempotency_map_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStateStore::new(dir.path()).unwrap();
        let mut map = IdempotencyMap::new();
        map.insert(
            "s:BTC:buy:2026-01-01T00:02:00Z:0".to_string(),
            uuid::Uuid::from_u128(9),
        );
        store.save_idempotency_map(&map).unwrap();
        assert_eq!(store.load_idempotency_map().unwrap(), Some(map));
    }
}
