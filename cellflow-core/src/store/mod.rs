//! Cell Storage
//!
//! The engine treats storage as an opaque key-value store of cell records
//! keyed by `CellRef`, queried by single cell or by range. `MemoryStore` is
//! the built-in sparse implementation; hosts with their own persistence
//! implement `CellStore`.
//!
//! Every method is fallible. A store that cannot be read reports
//! `StoreError`, and the engine passes that to its host instead of
//! guessing at values.

mod memory;
#[cfg(test)]
mod outage;
mod snapshot;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::cell::{CellRef, CellValue, RangeRef};
use crate::error::StoreError;
use crate::formula::Expr;

pub use memory::MemoryStore;
#[cfg(test)]
pub(crate) use outage::OutageStore;
pub use snapshot::{PersistedCell, Snapshot};

/// Validity of a cell's cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CellState {
    /// The cached value is up-to-date.
    #[default]
    Clean,

    /// The input was accepted as text but rejected as a formula (it would
    /// close a cycle). The cell keeps its previous value and is not evaluated.
    Invalid,
}

/// One stored cell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cell {
    /// Input exactly as the user entered it.
    pub raw: String,

    /// Settled value.
    pub value: CellValue,

    /// Epoch of the pass that last changed this cell's input or value.
    pub version: u64,

    pub state: CellState,

    /// Parsed formula, if the input is one. Rebuilt from `raw` on load.
    #[serde(skip)]
    pub formula: Option<Arc<Expr>>,
}

impl Cell {
    /// A constant cell.
    pub fn literal(raw: impl Into<String>, value: CellValue, version: u64) -> Self {
        Self {
            raw: raw.into(),
            value,
            version,
            state: CellState::Clean,
            formula: None,
        }
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }
}

/// Uniform access to sparse cell data.
pub trait CellStore: Send + Sync {
    /// Fetch one cell record.
    fn get(&self, cell: &CellRef) -> Result<Option<Cell>, StoreError>;

    /// Settled value of a cell; `Empty` when the cell does not exist.
    fn value(&self, cell: &CellRef) -> Result<CellValue, StoreError> {
        Ok(self.get(cell)?.map(|c| c.value).unwrap_or_default())
    }

    /// Non-empty values inside `range`, in row-major order.
    fn range(&self, range: &RangeRef) -> Result<Vec<(CellRef, CellValue)>, StoreError>;

    /// Insert or replace a cell record.
    fn put(&mut self, cell: CellRef, record: Cell) -> Result<(), StoreError>;

    /// Delete a cell record, returning it.
    fn remove(&mut self, cell: &CellRef) -> Result<Option<Cell>, StoreError>;

    /// Every stored cell, ordered by address.
    fn cells(&self) -> Result<Vec<(CellRef, Cell)>, StoreError>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
