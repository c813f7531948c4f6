//! A memory store whose reads can be switched off, for failure tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cell::{CellRef, CellValue, RangeRef};
use crate::error::StoreError;

use super::{Cell, CellStore, MemoryStore};

#[derive(Debug, Default)]
pub(crate) struct OutageStore {
    inner: MemoryStore,
    down: Arc<AtomicBool>,
}

impl OutageStore {
    /// The store and the switch that takes it down.
    pub(crate) fn new() -> (Self, Arc<AtomicBool>) {
        let store = Self::default();
        let switch = Arc::clone(&store.down);
        (store, switch)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store is down".into()));
        }
        Ok(())
    }
}

impl CellStore for OutageStore {
    fn get(&self, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        self.check()?;
        self.inner.get(cell)
    }

    fn range(&self, range: &RangeRef) -> Result<Vec<(CellRef, CellValue)>, StoreError> {
        self.check()?;
        self.inner.range(range)
    }

    fn put(&mut self, cell: CellRef, record: Cell) -> Result<(), StoreError> {
        self.check()?;
        self.inner.put(cell, record)
    }

    fn remove(&mut self, cell: &CellRef) -> Result<Option<Cell>, StoreError> {
        self.check()?;
        self.inner.remove(cell)
    }

    fn cells(&self) -> Result<Vec<(CellRef, Cell)>, StoreError> {
        self.check()?;
        self.inner.cells()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}
