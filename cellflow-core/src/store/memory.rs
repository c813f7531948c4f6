//! In-memory sparse cell store.

use std::collections::{BTreeMap, HashMap};

use crate::cell::{CellRef, CellValue, RangeRef, SheetId};
use crate::error::StoreError;

use super::{Cell, CellStore};

/// Sparse store: per sheet, an ordered map from `(row, col)` to cell.
///
/// Row-major ordering makes range scans walk only the rows the range
/// covers, so whole-column ranges over sparse data stay cheap.
#[derive(Debug, Default)]
pub struct MemoryStore {
    sheets: HashMap<SheetId, BTreeMap<(u32, u32), Cell>>,
    len: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CellStore for MemoryStore {
    fn get(&self, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        Ok(self
            .sheets
            .get(&cell.sheet)
            .and_then(|sheet| sheet.get(&(cell.row, cell.col)))
            .cloned())
    }

    fn value(&self, cell: &CellRef) -> Result<CellValue, StoreError> {
        Ok(self
            .sheets
            .get(&cell.sheet)
            .and_then(|sheet| sheet.get(&(cell.row, cell.col)))
            .map(|c| c.value.clone())
            .unwrap_or_default())
    }

    fn range(&self, range: &RangeRef) -> Result<Vec<(CellRef, CellValue)>, StoreError> {
        let Some(sheet) = self.sheets.get(&range.sheet) else {
            return Ok(Vec::new());
        };
        let cols = range.start_col..=range.end_col;
        Ok(sheet
            .range((range.start_row, range.start_col)..=(range.end_row, range.end_col))
            .filter(|((_, col), cell)| cols.contains(col) && !cell.value.is_empty())
            .map(|(&(row, col), cell)| (CellRef::new(range.sheet, row, col), cell.value.clone()))
            .collect())
    }

    fn put(&mut self, cell: CellRef, record: Cell) -> Result<(), StoreError> {
        let previous = self
            .sheets
            .entry(cell.sheet)
            .or_default()
            .insert((cell.row, cell.col), record);
        if previous.is_none() {
            self.len += 1;
        }
        Ok(())
    }

    fn remove(&mut self, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        let removed = self
            .sheets
            .get_mut(&cell.sheet)
            .and_then(|sheet| sheet.remove(&(cell.row, cell.col)));
        if removed.is_some() {
            self.len -= 1;
        }
        Ok(removed)
    }

    fn cells(&self) -> Result<Vec<(CellRef, Cell)>, StoreError> {
        let mut out: Vec<_> = self
            .sheets
            .iter()
            .flat_map(|(&sheet, cells)| {
                cells
                    .iter()
                    .map(move |(&(row, col), cell)| (CellRef::new(sheet, row, col), cell.clone()))
            })
            .collect();
        out.sort_by_key(|(cell, _)| *cell);
        Ok(out)
    }

    fn len(&self) -> usize {
        self.len
    }
}
