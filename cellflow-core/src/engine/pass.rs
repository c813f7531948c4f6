//! Recalculation pass state.
//!
//! A pass moves `Idle -> Collecting -> Ordering -> Evaluating -> Idle`.
//! Edits are applied to the graph while collecting, but their inputs and
//! every computed value stay staged in the pass until it commits, so readers
//! never observe a half-finished pass.

use std::collections::BTreeMap;
use std::sync::Arc;

use indexmap::IndexSet;
use thiserror::Error;

use crate::cell::{CellRef, CellValue, EvalError};
use crate::error::{CycleError, EngineError, ParseError};
use crate::eval::EvaluationContext;
use crate::formula::Expr;
use crate::graph::{GraphNode, Schedule};
use crate::store::CellState;

use super::subscription::CellUpdate;

/// Where a pass is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    #[default]
    Idle,
    Collecting,
    Ordering,
    Evaluating,
}

/// Why an edit was not accepted as a formula.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EditError {
    /// The input was dropped; the cell keeps its previous state.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The input was stored as raw text, marked invalid and not evaluated.
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

impl From<EditError> for EngineError {
    fn from(e: EditError) -> Self {
        match e {
            EditError::Parse(e) => EngineError::Parse(e),
            EditError::Cycle(e) => EngineError::Cycle(e),
        }
    }
}

/// An edit that was rejected during collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedEdit {
    pub cell: CellRef,
    pub error: EditError,
}

/// Outcome of one committed pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassReport {
    /// Epoch stamped on every cell this pass wrote.
    pub epoch: u64,

    /// Size of the affected set, edited cells included.
    pub affected: usize,

    /// Number of formulas evaluated.
    pub evaluated: usize,

    /// Cells whose settled value changed, in address order.
    pub updates: Vec<CellUpdate>,

    pub rejected: Vec<RejectedEdit>,
}

impl PassReport {
    pub(crate) fn idle(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    /// New value of `cell` if this pass changed it.
    pub fn value_of(&self, cell: &CellRef) -> Option<&CellValue> {
        self.updates.iter().find(|u| u.cell == *cell).map(|u| &u.value)
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.rejected.is_empty()
    }
}

/// Input accepted in this pass, written to the store on commit.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub raw: String,
    pub formula: Option<Arc<Expr>>,
    pub state: CellState,
}

impl Staged {
    /// Blank input removes the cell.
    pub fn is_clear(&self) -> bool {
        self.formula.is_none() && self.raw.trim().is_empty()
    }
}

/// An in-flight pass.
#[derive(Debug)]
pub(crate) struct Pass {
    pub epoch: u64,
    pub phase: PassPhase,

    pub staged: BTreeMap<CellRef, Staged>,

    /// Outgoing edges each edited cell had before this pass, newest last.
    pub undo: Vec<(CellRef, Vec<GraphNode>)>,

    /// Retry-set membership each changed cell had before this pass.
    pub invalid_undo: Vec<(CellRef, bool)>,

    pub affected: IndexSet<CellRef>,
    pub schedule: Schedule,
    pub cursor: usize,
    pub ctx: EvaluationContext,

    pub rejected: Vec<RejectedEdit>,
    pub evaluated: usize,
    cyclic_marked: bool,
}

impl Pass {
    pub fn new(epoch: u64, max_steps: usize) -> Self {
        Self {
            epoch,
            phase: PassPhase::Idle,
            staged: BTreeMap::new(),
            undo: Vec::new(),
            invalid_undo: Vec::new(),
            affected: IndexSet::new(),
            schedule: Schedule::default(),
            cursor: 0,
            ctx: EvaluationContext::new(max_steps),
            rejected: Vec::new(),
            evaluated: 0,
            cyclic_marked: false,
        }
    }

    pub fn transition(&mut self, to: PassPhase) {
        tracing::trace!(epoch = self.epoch, from = ?self.phase, to = ?to, "pass phase");
        self.phase = to;
    }

    pub fn stage(&mut self, cell: CellRef, raw: String, formula: Option<Arc<Expr>>, state: CellState) {
        self.staged.insert(cell, Staged { raw, formula, state });
    }

    pub fn reject(&mut self, cell: CellRef, error: impl Into<EditError>) {
        let error = error.into();
        tracing::warn!(cell = %cell, error = %error, "rejected edit");
        self.rejected.push(RejectedEdit { cell, error });
    }

    /// Next cell to evaluate, advancing the cursor.
    pub fn next_cell(&mut self) -> Option<CellRef> {
        let cell = self.schedule.order.get(self.cursor).copied()?;
        self.cursor += 1;
        Some(cell)
    }

    /// Settle the cells the scheduler could not order.
    pub fn mark_cyclic(&mut self) {
        if self.cyclic_marked {
            return;
        }
        for cell in &self.schedule.cyclic {
            self.ctx.record(*cell, CellValue::Error(EvalError::CircularReference));
        }
        self.cyclic_marked = true;
    }

    pub fn remaining(&self) -> usize {
        self.schedule.order.len().saturating_sub(self.cursor)
    }

    pub fn is_evaluated(&self) -> bool {
        self.remaining() == 0 && self.cyclic_marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SheetId;

    fn at(row: u32, col: u32) -> CellRef {
        CellRef::new(SheetId(0), row, col)
    }

    #[test]
    fn cursor_walks_the_order_then_settles_cyclic_cells() {
        let mut pass = Pass::new(1, 100);
        pass.schedule = Schedule {
            order: vec![at(0, 0), at(1, 0)],
            cyclic: vec![at(5, 5)],
        };

        assert_eq!(pass.next_cell(), Some(at(0, 0)));
        assert_eq!(pass.remaining(), 1);
        assert_eq!(pass.next_cell(), Some(at(1, 0)));
        assert_eq!(pass.next_cell(), None);
        assert!(!pass.is_evaluated());

        pass.mark_cyclic();
        assert!(pass.is_evaluated());
        assert_eq!(
            pass.ctx.fresh(&at(5, 5)),
            Some(&CellValue::Error(EvalError::CircularReference))
        );
    }

    #[test]
    fn report_lookup() {
        let report = PassReport {
            epoch: 3,
            updates: vec![CellUpdate {
                cell: at(0, 1),
                value: CellValue::Number(17.0),
            }],
            ..PassReport::default()
        };
        assert_eq!(report.value_of(&at(0, 1)), Some(&CellValue::Number(17.0)));
        assert_eq!(report.value_of(&at(0, 0)), None);
        assert!(!report.is_empty());
        assert!(PassReport::idle(3).is_empty());
    }

    #[test]
    fn edit_errors_convert_to_engine_errors() {
        let err: EngineError = EditError::from(ParseError::new(1, "unbalanced '('")).into();
        assert!(matches!(err, EngineError::Parse(_)));
    }
}
