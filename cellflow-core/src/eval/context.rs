//! Evaluation Context
//!
//! One context lives for one recalculation pass. It holds the values
//! computed so far in the pass, which take precedence over the store's
//! cached values: a cell evaluated later in the pass sees the fresh result
//! of every cell evaluated before it, never a stale cache entry.
//!
//! The context also carries the per-cell step budget.

use std::collections::BTreeMap;

use crate::cell::{CellRef, CellValue, RangeRef};
use crate::error::StoreError;
use crate::store::CellStore;

static EMPTY: CellValue = CellValue::Empty;

/// Values computed during the current pass, plus the step budget.
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    /// Fresh values, keyed in address order so range reads can scan them.
    overlay: BTreeMap<CellRef, CellValue>,

    max_steps: usize,
    steps: usize,
}

impl EvaluationContext {
    pub fn new(max_steps: usize) -> Self {
        Self {
            overlay: BTreeMap::new(),
            max_steps,
            steps: 0,
        }
    }

    /// Reset the step budget before evaluating the next cell.
    pub fn begin_cell(&mut self) {
        self.steps = 0;
    }

    /// Spend `n` steps. Returns false once the budget is exhausted.
    pub(crate) fn charge(&mut self, n: usize) -> bool {
        self.steps = self.steps.saturating_add(n);
        self.steps <= self.max_steps
    }

    /// Steps spent on the current cell so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Record the fresh value of a cell.
    pub fn record(&mut self, cell: CellRef, value: CellValue) {
        self.overlay.insert(cell, value);
    }

    /// Fresh value of a cell, if it was computed in this pass.
    pub fn fresh(&self, cell: &CellRef) -> Option<&CellValue> {
        self.overlay.get(cell)
    }

    pub fn is_evaluated(&self, cell: &CellRef) -> bool {
        self.overlay.contains_key(cell)
    }

    /// Number of cells with fresh values.
    pub fn evaluated_count(&self) -> usize {
        self.overlay.len()
    }

    /// Fresh values in address order.
    pub fn evaluated(&self) -> impl Iterator<Item = (&CellRef, &CellValue)> {
        self.overlay.iter()
    }

    /// Consume the context, yielding its fresh values.
    pub fn into_values(self) -> BTreeMap<CellRef, CellValue> {
        self.overlay
    }

    /// Read a cell: fresh value first, then the store's settled value.
    pub fn read(&self, store: &dyn CellStore, cell: &CellRef) -> Result<CellValue, StoreError> {
        match self.overlay.get(cell) {
            Some(value) => Ok(value.clone()),
            None => store.value(cell),
        }
    }

    /// Read a range, merging fresh values over the store's contents.
    pub fn read_range(
        &self,
        store: &dyn CellStore,
        range: &RangeRef,
    ) -> Result<RangeView, StoreError> {
        let mut cells: BTreeMap<(u32, u32), CellValue> = store
            .range(range)?
            .into_iter()
            .map(|(cell, value)| ((cell.row, cell.col), value))
            .collect();

        for (cell, value) in self.overlay.range(range.start()..=range.end()) {
            if !range.contains(cell) {
                continue;
            }
            if value.is_empty() {
                cells.remove(&(cell.row, cell.col));
            } else {
                cells.insert((cell.row, cell.col), value.clone());
            }
        }

        Ok(RangeView {
            range: *range,
            cells,
        })
    }
}

/// A consistent read of a range: the non-empty cells, everything else empty.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeView {
    range: RangeRef,
    cells: BTreeMap<(u32, u32), CellValue>,
}

impl RangeView {
    /// Build a view from explicit values, for tests and host-side callers.
    pub fn from_values(range: RangeRef, values: impl IntoIterator<Item = (CellRef, CellValue)>) -> Self {
        let cells = values
            .into_iter()
            .filter(|(cell, value)| range.contains(cell) && !value.is_empty())
            .map(|(cell, value)| ((cell.row, cell.col), value))
            .collect();
        Self { range, cells }
    }

    pub fn range(&self) -> &RangeRef {
        &self.range
    }

    pub fn rows(&self) -> usize {
        self.range.rows() as usize
    }

    pub fn cols(&self) -> usize {
        self.range.cols() as usize
    }

    /// Number of cells covered, empty or not.
    pub fn area(&self) -> u64 {
        self.range.area()
    }

    /// Number of non-empty cells.
    pub fn non_empty(&self) -> usize {
        self.cells.len()
    }

    /// Value at a zero-based row/column offset; out of bounds reads as empty.
    pub fn get(&self, row: usize, col: usize) -> &CellValue {
        let (Ok(row), Ok(col)) = (u32::try_from(row), u32::try_from(col)) else {
            return &EMPTY;
        };
        self.cells
            .get(&(self.range.start_row.saturating_add(row), self.range.start_col.saturating_add(col)))
            .unwrap_or(&EMPTY)
    }

    /// Non-empty values in row-major order.
    pub fn values(&self) -> impl Iterator<Item = &CellValue> {
        self.cells.values()
    }

    /// Non-empty cells as `(row offset, column offset, value)`, row-major.
    pub fn entries(&self) -> impl Iterator<Item = (usize, usize, &CellValue)> {
        let (start_row, start_col) = (self.range.start_row, self.range.start_col);
        self.cells
            .iter()
            .map(move |((r, c), v)| ((r - start_row) as usize, (c - start_col) as usize, v))
    }

    /// Non-empty cells of one column as `(row offset, value)`, top to bottom.
    pub fn column(&self, col: usize) -> impl Iterator<Item = (usize, &CellValue)> {
        let start_row = self.range.start_row;
        let abs_col = self.range.start_col as usize + col;
        self.cells
            .iter()
            .filter(move |((_, c), _)| *c as usize == abs_col)
            .map(move |((r, _), v)| ((r - start_row) as usize, v))
    }

    /// Non-empty cells of one row as `(column offset, value)`, left to right.
    pub fn row(&self, row: usize) -> impl Iterator<Item = (usize, &CellValue)> {
        let start_col = self.range.start_col;
        let abs_row = self.range.start_row as usize + row;
        self.cells
            .range((abs_row as u32, 0)..=(abs_row as u32, u32::MAX))
            .map(move |((_, c), v)| ((c - start_col) as usize, v))
    }
}
