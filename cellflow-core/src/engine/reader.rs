//! Read-only access to settled values.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::cell::{CellRef, CellValue, SheetId, SheetTable};
use crate::error::{EngineError, EngineResult, ParseError, StoreError};
use crate::store::{Cell, CellStore};

/// A cheap, cloneable view of an engine's settled state.
///
/// Reads take a short read lock on the store. A pass commits under a single
/// write lock, so a reader sees either all of a pass's results or none.
pub struct EngineReader<S: CellStore> {
    pub(crate) store: Arc<RwLock<S>>,
    pub(crate) sheets: Arc<RwLock<SheetTable>>,
}

impl<S: CellStore> Clone for EngineReader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            sheets: Arc::clone(&self.sheets),
        }
    }
}

impl<S: CellStore> EngineReader<S> {
    /// Settled value of a cell; never triggers evaluation.
    pub fn get_cell_value(&self, cell: CellRef) -> Result<CellValue, StoreError> {
        self.store.read().value(&cell)
    }

    pub fn get_cell(&self, cell: CellRef) -> Result<Option<Cell>, StoreError> {
        self.store.read().get(&cell)
    }

    /// Resolve `"B3"` or `"Sheet2!B3"` to a cell.
    pub fn resolve(&self, address: &str) -> EngineResult<CellRef> {
        resolve_address(&self.sheets.read(), address)
    }

    /// Settled value at a textual address.
    pub fn value_at(&self, address: &str) -> EngineResult<CellValue> {
        let cell = self.resolve(address)?;
        Ok(self.get_cell_value(cell)?)
    }
}

/// Parse an address with an optional sheet prefix. Unqualified addresses
/// are on the first sheet.
pub(crate) fn resolve_address(sheets: &SheetTable, address: &str) -> EngineResult<CellRef> {
    let (sheet, a1) = match address.rsplit_once('!') {
        Some((name, a1)) => {
            let name = name.trim().trim_matches('\'');
            let id = sheets
                .id(name)
                .ok_or_else(|| EngineError::UnknownSheet(name.to_string()))?;
            (id, a1)
        }
        None => (SheetId(0), address),
    };
    CellRef::parse_a1(sheet, a1)
        .ok_or_else(|| ParseError::new(0, format!("invalid cell address '{address}'")).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_qualified_addresses() {
        let mut sheets = SheetTable::new();
        sheets.add("Sheet1");
        let data = sheets.add("My Data");

        assert_eq!(resolve_address(&sheets, "B3").unwrap(), CellRef::new(SheetId(0), 2, 1));
        assert_eq!(resolve_address(&sheets, "'my data'!$A$1").unwrap(), CellRef::new(data, 0, 0));
        assert!(matches!(
            resolve_address(&sheets, "Nope!A1"),
            Err(EngineError::UnknownSheet(name)) if name == "Nope"
        ));
        assert!(matches!(resolve_address(&sheets, "1A"), Err(EngineError::Parse(_))));
    }
}
