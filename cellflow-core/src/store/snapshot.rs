//! Persisted engine state.
//!
//! A snapshot records, per cell, the raw input, the cached value and its
//! version. That is enough to rebuild everything else: the dependency graph
//! is recovered by re-parsing the formula cells on load.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::cell::{CellRef, CellValue};
use crate::error::StoreError;

/// One persisted cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedCell {
    pub cell: CellRef,
    pub raw: String,
    pub value: CellValue,
    pub version: u64,
}

/// Persisted engine state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Sheet names, indexed by `SheetId`.
    pub sheets: Vec<String>,

    pub cells: Vec<PersistedCell>,
}

impl Snapshot {
    /// Encode as MessagePack with field names, for compact storage.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, StoreError> {
        rmp_serde::to_vec_named(self).map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Decode from MessagePack and check consistency.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, StoreError> {
        let snapshot: Self =
            rmp_serde::from_slice(bytes).map_err(|e| StoreError::Decode(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Encode as JSON, for inspection and interchange.
    pub fn to_json(&self) -> Result<String, StoreError> {
        serde_json::to_string(self).map_err(|e| StoreError::Encode(e.to_string()))
    }

    /// Decode from JSON and check consistency.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| StoreError::Decode(e.to_string()))?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Reject snapshots that could not have come from a live engine.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.sheets.is_empty() {
            return Err(StoreError::Corrupt("snapshot has no sheets".into()));
        }

        let mut seen = HashSet::with_capacity(self.cells.len());
        for persisted in &self.cells {
            if persisted.cell.sheet.raw() as usize >= self.sheets.len() {
                return Err(StoreError::Corrupt(format!(
                    "cell {} refers to unknown sheet {}",
                    persisted.cell.to_a1(),
                    persisted.cell.sheet.raw()
                )));
            }
            if !seen.insert(persisted.cell) {
                return Err(StoreError::Corrupt(format!(
                    "cell {} stored twice",
                    persisted.cell
                )));
            }
        }
        Ok(())
    }

    /// Highest version recorded in the snapshot.
    pub fn max_version(&self) -> u64 {
        self.cells.iter().map(|c| c.version).max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SheetId;

    fn sample() -> Snapshot {
        Snapshot {
            sheets: vec!["Sheet1".into()],
            cells: vec![
                PersistedCell {
                    cell: CellRef::new(SheetId(0), 0, 0),
                    raw: "5".into(),
                    value: CellValue::Number(5.0),
                    version: 1,
                },
                PersistedCell {
                    cell: CellRef::new(SheetId(0), 0, 1),
                    raw: "=A1*2".into(),
                    value: CellValue::Number(10.0),
                    version: 3,
                },
            ],
        }
    }

    #[test]
    fn msgpack_and_json_decode_to_the_same_state() {
        let snapshot = sample();
        let packed = Snapshot::from_msgpack(&snapshot.to_msgpack().unwrap()).unwrap();
        let json = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(packed, json);
        assert_eq!(packed.max_version(), 3);
    }

    #[test]
    fn duplicate_cells_are_corrupt() {
        let mut snapshot = sample();
        snapshot.cells.push(snapshot.cells[0].clone());
        let json = snapshot.to_json().unwrap();
        assert!(matches!(Snapshot::from_json(&json), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn unknown_sheet_is_corrupt() {
        let mut snapshot = sample();
        snapshot.cells[0].cell.sheet = SheetId(4);
        assert!(matches!(snapshot.validate(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        assert!(matches!(
            Snapshot::from_msgpack(&[0xc1, 0x00, 0xff]),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(Snapshot::from_json("[1,2"), Err(StoreError::Decode(_))));
    }
}
