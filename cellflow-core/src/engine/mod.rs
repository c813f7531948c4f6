//! Recalculation Engine
//!
//! The engine is an explicitly constructed instance owning one workbook: the
//! cell store, the dependency graph, the sheet table, the function registry
//! and the scheduler state. There is no global state; hosts hold an `Engine`
//! (or a `Worker` wrapping one) and pass it around.
//!
//! # Passes
//!
//! Edits are queued and applied in passes. A pass:
//!
//! 1. **Collecting**: applies every queued input (last writer wins), updates
//!    the graph, retries cells previously rejected for closing a cycle, and
//!    gathers the edited cells plus all their dependents.
//! 2. **Ordering**: sorts that set topologically.
//! 3. **Evaluating**: evaluates formulas in order against the pass context,
//!    in batches if the caller wants to interleave other work.
//! 4. **Commit**: writes every result under one store write lock, stamps the
//!    pass epoch on each written cell, and notifies subscribers of the cells
//!    whose value changed.
//!
//! Only one pass is in flight at a time. Edits submitted meanwhile are
//! queued and form the next pass.

mod pass;
mod reader;
mod subscription;
mod worker;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;

use crate::cell::{CellRef, CellValue, RangeRef, Reference, SheetId, SheetTable};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ParseError, StoreError};
use crate::eval::{evaluate, FunctionRegistry};
use crate::formula::{classify, parse_with, CellInput, Expr, ParseLimits};
use crate::graph::{topological_order, DependencyGraph, GraphNode};
use crate::store::{Cell, CellState, CellStore, MemoryStore, PersistedCell, Snapshot};

pub use pass::{EditError, PassPhase, PassReport, RejectedEdit};
pub use reader::EngineReader;
pub use subscription::{CellUpdate, SubscriptionHandle, SubscriptionId, Subscriptions};
pub use worker::{Worker, WorkerHandle};

use pass::Pass;

/// Direct dependency edges of one cell, for UI highlighting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dependencies {
    /// Cells and ranges the cell's formula reads.
    pub depends_on: Vec<Reference>,

    /// Formula cells reading the cell directly or through a range.
    pub dependents: Vec<CellRef>,
}

/// A workbook recalculation engine.
pub struct Engine<S: CellStore = MemoryStore> {
    config: EngineConfig,
    store: Arc<RwLock<S>>,
    sheets: Arc<RwLock<SheetTable>>,
    graph: DependencyGraph,
    functions: FunctionRegistry,
    subscriptions: Subscriptions,

    /// Epoch of the last pass started.
    epoch: u64,

    /// Cells holding a formula that was rejected for closing a cycle.
    invalid: BTreeSet<CellRef>,

    /// Inputs waiting for the next pass, in first-submitted order.
    pending: IndexMap<CellRef, String>,
    full_recalc: bool,

    pass: Option<Pass>,
}

impl Engine<MemoryStore> {
    /// An empty workbook with one sheet named after `config.default_sheet`.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        Self::with_store(config, MemoryStore::new())
    }

    /// Rebuild an engine from a snapshot.
    ///
    /// Values and versions are taken as persisted; the graph is rebuilt by
    /// re-parsing every formula. Formulas that no longer parse or that close
    /// a cycle keep their raw input and are marked invalid.
    pub fn restore(config: EngineConfig, snapshot: &Snapshot) -> EngineResult<Self> {
        snapshot.validate()?;

        let mut sheets = SheetTable::new();
        for name in &snapshot.sheets {
            sheets.add(name);
        }
        if sheets.len() != snapshot.sheets.len() {
            return Err(StoreError::Corrupt("snapshot repeats a sheet name".into()).into());
        }

        let mut store = MemoryStore::new();
        for persisted in &snapshot.cells {
            store.put(
                persisted.cell,
                Cell::literal(persisted.raw.clone(), persisted.value.clone(), persisted.version),
            )?;
        }

        let engine = Self::from_parts(config, store, sheets)?;
        tracing::debug!(
            cells = snapshot.cells.len(),
            formulas = engine.graph.formula_count(),
            epoch = engine.epoch,
            "restored engine from snapshot"
        );
        Ok(engine)
    }
}

impl<S: CellStore> Engine<S> {
    /// An engine over a host-provided store.
    ///
    /// Cells already in the store are loaded like a snapshot.
    pub fn with_store(config: EngineConfig, store: S) -> EngineResult<Self> {
        let mut sheets = SheetTable::new();
        sheets.add(&config.default_sheet);
        Self::from_parts(config, store, sheets)
    }

    fn from_parts(config: EngineConfig, store: S, mut sheets: SheetTable) -> EngineResult<Self> {
        config.validate()?;
        if sheets.is_empty() {
            sheets.add(&config.default_sheet);
        }

        let mut engine = Self {
            config,
            store: Arc::new(RwLock::new(store)),
            sheets: Arc::new(RwLock::new(sheets)),
            graph: DependencyGraph::new(),
            functions: FunctionRegistry::builtin(),
            subscriptions: Subscriptions::new(),
            epoch: 0,
            invalid: BTreeSet::new(),
            pending: IndexMap::new(),
            full_recalc: false,
            pass: None,
        };
        engine.rebuild()?;
        Ok(engine)
    }

    /// Re-parse every stored formula and rebuild the graph from scratch.
    fn rebuild(&mut self) -> EngineResult<()> {
        let cells = self.store.read().cells()?;

        let mut epoch = 0;
        let mut repaired = Vec::new();
        for (cell, mut record) in cells {
            epoch = epoch.max(record.version);
            let CellInput::Formula(text) = classify(&record.raw) else {
                continue;
            };

            record.state = CellState::Clean;
            match self.parse_formula(cell, &text) {
                Ok(expr) => {
                    let refs = expr.references();
                    record.formula = Some(Arc::new(expr));
                    if let Err(e) = self.graph.set_dependencies(cell, &refs.cells, &refs.ranges) {
                        tracing::warn!(cell = %cell, error = %e, "stored formula closes a cycle");
                        record.state = CellState::Invalid;
                        self.invalid.insert(cell);
                    }
                }
                Err(e) => {
                    tracing::warn!(cell = %cell, error = %e, "stored formula no longer parses");
                    record.formula = None;
                    record.state = CellState::Invalid;
                }
            }
            repaired.push((cell, record));
        }

        let mut store = self.store.write();
        for (cell, record) in repaired {
            store.put(cell, record)?;
        }
        self.epoch = epoch;
        Ok(())
    }

    // === Accessors ===

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The function registry, for registering host functions.
    pub fn functions_mut(&mut self) -> &mut FunctionRegistry {
        &mut self.functions
    }

    pub fn functions(&self) -> &FunctionRegistry {
        &self.functions
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// A read handle that stays valid while the engine is used elsewhere.
    pub fn reader(&self) -> EngineReader<S> {
        EngineReader {
            store: Arc::clone(&self.store),
            sheets: Arc::clone(&self.sheets),
        }
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Epoch of the most recent pass.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn phase(&self) -> PassPhase {
        self.pass.as_ref().map_or(PassPhase::Idle, |p| p.phase)
    }

    pub fn is_idle(&self) -> bool {
        self.pass.is_none()
    }

    /// Whether queued work is waiting for a pass.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || self.full_recalc
    }

    // === Sheets ===

    /// Add a sheet, or return the id of an existing sheet with that name.
    ///
    /// Formulas are resolved when entered; formulas that named this sheet
    /// before it existed keep their `#REF!` until re-entered.
    pub fn add_sheet(&mut self, name: &str) -> SheetId {
        let id = self.sheets.write().add(name);
        tracing::debug!(sheet = name, id = id.raw(), "added sheet");
        id
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.sheets.read().id(name)
    }

    pub fn sheet_name(&self, id: SheetId) -> Option<String> {
        self.sheets.read().name(id).map(str::to_string)
    }

    /// Resolve `"B3"` or `"Sheet2!B3"` to a cell.
    pub fn resolve(&self, address: &str) -> EngineResult<CellRef> {
        reader::resolve_address(&self.sheets.read(), address)
    }

    // === Reads ===

    /// Settled value of a cell. Never triggers evaluation.
    pub fn get_cell_value(&self, cell: CellRef) -> EngineResult<CellValue> {
        Ok(self.store.read().value(&cell)?)
    }

    /// The stored record of a cell.
    pub fn get_cell(&self, cell: CellRef) -> EngineResult<Option<Cell>> {
        Ok(self.store.read().get(&cell)?)
    }

    /// Raw input of a cell as last committed.
    pub fn cell_input(&self, cell: CellRef) -> EngineResult<Option<String>> {
        Ok(self.get_cell(cell)?.map(|c| c.raw))
    }

    /// Direct edges of `cell` in both directions.
    pub fn dependencies(&self, cell: CellRef) -> Dependencies {
        Dependencies {
            depends_on: self.graph.precedents(cell).into_iter().map(Reference::from).collect(),
            dependents: self.graph.direct_dependents(cell),
        }
    }

    /// Every direct and transitive dependent of `cell`, breadth-first.
    pub fn dependents(&self, cell: CellRef) -> Vec<CellRef> {
        self.graph.dependents(cell)
    }

    /// Whether the cached value of `cell` may be out of date.
    ///
    /// True while the cell is queued or part of an in-flight pass, when its
    /// formula was rejected, or when any direct dependency carries a newer
    /// version than the cell itself.
    pub fn is_stale(&self, cell: CellRef) -> EngineResult<bool> {
        if self.pending.contains_key(&cell) {
            return Ok(true);
        }
        if let Some(pass) = &self.pass {
            if pass.affected.contains(&cell) || pass.staged.contains_key(&cell) {
                return Ok(true);
            }
        }

        let store = self.store.read();
        let Some(record) = store.get(&cell)? else {
            return Ok(false);
        };
        if record.state == CellState::Invalid {
            return Ok(true);
        }

        let newer = |dep: &CellRef| -> Result<bool, StoreError> {
            Ok(store.get(dep)?.is_some_and(|d| d.version > record.version))
        };
        for node in self.graph.precedents(cell) {
            match node {
                GraphNode::Cell(dep) => {
                    if newer(&dep)? {
                        return Ok(true);
                    }
                }
                GraphNode::Range(range) => {
                    for (dep, _) in store.range(&range)? {
                        if newer(&dep)? {
                            return Ok(true);
                        }
                    }
                }
            }
        }
        Ok(false)
    }

    /// Subscribe to committed changes of a cell or range.
    pub fn subscribe<F>(&self, watch: Reference, callback: F) -> SubscriptionHandle
    where
        F: Fn(&[CellUpdate]) + Send + Sync + 'static,
    {
        self.subscriptions.subscribe(watch, callback)
    }

    // === Edits ===

    /// Set one cell's raw input and run the resulting pass to completion.
    ///
    /// Returns the pass report, or the edit's `ParseError`/`CycleError`. A
    /// parse error leaves the cell as it was; a cycle error still stores
    /// the input as raw text and marks the cell invalid.
    pub fn set_cell_input(&mut self, cell: CellRef, raw: impl Into<String>) -> EngineResult<PassReport> {
        self.finish_pass()?;
        self.enqueue(cell, raw)?;
        let report = self.run_pass()?;
        if let Some(rejected) = report.rejected.iter().find(|r| r.cell == cell) {
            return Err(rejected.error.clone().into());
        }
        Ok(report)
    }

    /// Apply several inputs as one pass, e.g. a paste.
    ///
    /// Rejected edits do not fail the batch; they are listed in the report.
    pub fn set_cell_inputs<I, T>(&mut self, edits: I) -> EngineResult<PassReport>
    where
        I: IntoIterator<Item = (CellRef, T)>,
        T: Into<String>,
    {
        self.finish_pass()?;
        for (cell, raw) in edits {
            self.enqueue(cell, raw)?;
        }
        self.run_pass()
    }

    /// Delete a cell and recalculate its dependents.
    pub fn clear_cell(&mut self, cell: CellRef) -> EngineResult<PassReport> {
        self.set_cell_input(cell, String::new())
    }

    /// Re-evaluate every formula in the workbook.
    pub fn recalculate_all(&mut self) -> EngineResult<PassReport> {
        self.finish_pass()?;
        self.full_recalc = true;
        self.run_pass()
    }

    /// Queue an input for the next pass without running it.
    pub fn enqueue(&mut self, cell: CellRef, raw: impl Into<String>) -> EngineResult<()> {
        if !self.sheets.read().contains(cell.sheet) {
            return Err(EngineError::UnknownSheet(format!("#{}", cell.sheet.raw())));
        }
        self.pending.insert(cell, raw.into());
        Ok(())
    }

    /// Finish the in-flight pass, if any.
    fn finish_pass(&mut self) -> EngineResult<()> {
        if self.pass.is_some() {
            self.commit()?;
        }
        Ok(())
    }

    fn run_pass(&mut self) -> EngineResult<PassReport> {
        if !self.begin_pass()? {
            return Ok(PassReport::idle(self.epoch));
        }
        self.commit()
    }

    // === Pass steps ===

    /// Start a pass over all queued work: collect and order.
    ///
    /// Returns false when a pass is already in flight or nothing is queued.
    /// A store failure drops the queued edits.
    pub fn begin_pass(&mut self) -> EngineResult<bool> {
        if self.pass.is_some() || !self.has_pending() {
            return Ok(false);
        }

        // Store reads come first so a failure leaves the graph untouched.
        let (retry, everything) = match self.pass_inputs() {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::error!(error = %e, dropped = self.pending.len(), "pass could not start");
                self.pending.clear();
                self.full_recalc = false;
                return Err(e.into());
            }
        };

        let edits: Vec<(CellRef, String)> = self.pending.drain(..).collect();
        self.full_recalc = false;
        self.epoch += 1;

        let mut pass = Pass::new(self.epoch, self.config.max_eval_steps);
        tracing::debug!(epoch = pass.epoch, edits = edits.len(), "pass started");

        pass.transition(PassPhase::Collecting);
        let mut changed = Vec::with_capacity(edits.len());
        for (cell, raw) in edits {
            self.apply_edit(&mut pass, cell, raw, &mut changed);
        }
        for (cell, raw) in retry {
            if !pass.staged.contains_key(&cell) {
                self.retry_invalid(&mut pass, cell, raw, &mut changed);
            }
        }

        let mut affected: IndexSet<CellRef> = IndexSet::new();
        for cell in changed {
            affected.insert(cell);
            affected.extend(self.graph.dependents(cell));
        }
        affected.extend(everything);

        pass.transition(PassPhase::Ordering);
        pass.schedule = topological_order(&self.graph, &affected);
        if !pass.schedule.cyclic.is_empty() {
            tracing::warn!(
                epoch = pass.epoch,
                cells = pass.schedule.cyclic.len(),
                "affected cells could not be ordered"
            );
        }
        pass.affected = affected;

        pass.transition(PassPhase::Evaluating);
        self.pass = Some(pass);
        Ok(true)
    }

    fn apply_edit(&mut self, pass: &mut Pass, cell: CellRef, raw: String, changed: &mut Vec<CellRef>) {
        let value = match classify(&raw) {
            CellInput::Formula(text) => {
                let expr = match self.parse_formula(cell, &text) {
                    Ok(expr) => expr,
                    Err(e) => return pass.reject(cell, e),
                };
                let refs = expr.references();
                let previous = self.graph.precedents(cell);
                match self.graph.set_dependencies(cell, &refs.cells, &refs.ranges) {
                    Ok(()) => {
                        pass.undo.push((cell, previous));
                        pass.stage(cell, raw, Some(Arc::new(expr)), CellState::Clean);
                        self.set_invalid(pass, cell, false);
                        changed.push(cell);
                    }
                    Err(e) => {
                        pass.stage(cell, raw, Some(Arc::new(expr)), CellState::Invalid);
                        self.set_invalid(pass, cell, true);
                        pass.reject(cell, e);
                    }
                }
                return;
            }
            CellInput::Literal(value) => value,
            CellInput::Empty => CellValue::Empty,
        };

        let previous = self.graph.precedents(cell);
        self.graph.remove_cell(cell);
        pass.undo.push((cell, previous));
        pass.ctx.record(cell, value);
        pass.stage(cell, raw, None, CellState::Clean);
        self.set_invalid(pass, cell, false);
        changed.push(cell);
    }

    /// Add or remove `cell` from the retry set, logging the change for undo.
    fn set_invalid(&mut self, pass: &mut Pass, cell: CellRef, invalid: bool) {
        let was = if invalid {
            !self.invalid.insert(cell)
        } else {
            self.invalid.remove(&cell)
        };
        if was != invalid {
            pass.invalid_undo.push((cell, was));
        }
    }

    /// Try again to accept a formula that previously closed a cycle.
    fn retry_invalid(&mut self, pass: &mut Pass, cell: CellRef, raw: String, changed: &mut Vec<CellRef>) {
        let CellInput::Formula(text) = classify(&raw) else {
            self.set_invalid(pass, cell, false);
            return;
        };
        let Ok(expr) = self.parse_formula(cell, &text) else {
            self.set_invalid(pass, cell, false);
            return;
        };

        let refs = expr.references();
        let previous = self.graph.precedents(cell);
        if self.graph.set_dependencies(cell, &refs.cells, &refs.ranges).is_ok() {
            tracing::debug!(cell = %cell, "previously cyclic formula accepted");
            pass.undo.push((cell, previous));
            pass.stage(cell, raw, Some(Arc::new(expr)), CellState::Clean);
            self.set_invalid(pass, cell, false);
            changed.push(cell);
        }
    }

    /// Invalid cells to retry and, on a full recalculation, every formula.
    fn pass_inputs(&self) -> Result<(Vec<(CellRef, String)>, Vec<CellRef>), StoreError> {
        let retry = self.invalid_inputs()?;
        let everything = if self.full_recalc {
            self.formula_cells()?
        } else {
            Vec::new()
        };
        Ok((retry, everything))
    }

    /// Raw inputs of invalid cells not edited in the coming pass.
    fn invalid_inputs(&self) -> Result<Vec<(CellRef, String)>, StoreError> {
        let store = self.store.read();
        let mut out = Vec::new();
        for cell in &self.invalid {
            if self.pending.contains_key(cell) {
                continue;
            }
            if let Some(record) = store.get(cell)? {
                out.push((*cell, record.raw));
            }
        }
        Ok(out)
    }

    /// Every stored cell holding an accepted formula.
    fn formula_cells(&self) -> Result<Vec<CellRef>, StoreError> {
        Ok(self
            .store
            .read()
            .cells()?
            .into_iter()
            .filter(|(_, c)| c.state != CellState::Invalid && classify(&c.raw).is_formula())
            .map(|(cell, _)| cell)
            .collect())
    }

    /// Evaluate up to `limit` cells of the in-flight pass.
    ///
    /// Returns true once every cell of the pass has been evaluated. A store
    /// failure aborts the pass.
    pub fn evaluate_batch(&mut self, limit: usize) -> EngineResult<bool> {
        let Some(mut pass) = self.pass.take() else {
            return Ok(true);
        };
        match self.evaluate_some(&mut pass, limit) {
            Ok(done) => {
                self.pass = Some(pass);
                Ok(done)
            }
            Err(e) => {
                self.undo(pass);
                Err(e.into())
            }
        }
    }

    fn evaluate_some(&self, pass: &mut Pass, limit: usize) -> Result<bool, StoreError> {
        let _span = tracing::debug_span!("pass", epoch = pass.epoch).entered();
        let store = self.store.read();
        for _ in 0..limit {
            let Some(cell) = pass.next_cell() else {
                break;
            };
            let Some(expr) = self.formula_for(pass, &*store, cell)? else {
                continue;
            };
            let value = evaluate(&expr, &mut pass.ctx, &*store, &self.functions)?;
            tracing::trace!(cell = %cell, value = %value, steps = pass.ctx.steps(), "evaluated");
            pass.ctx.record(cell, value);
            pass.evaluated += 1;
        }
        if pass.remaining() == 0 {
            pass.mark_cyclic();
        }
        Ok(pass.is_evaluated())
    }

    /// The formula to evaluate for `cell` in this pass, if any.
    fn formula_for(&self, pass: &Pass, store: &S, cell: CellRef) -> Result<Option<Arc<Expr>>, StoreError> {
        if let Some(staged) = pass.staged.get(&cell) {
            return Ok(match staged.state {
                CellState::Invalid => None,
                CellState::Clean => staged.formula.clone(),
            });
        }

        let Some(record) = store.get(&cell)? else {
            return Ok(None);
        };
        if record.state == CellState::Invalid {
            return Ok(None);
        }
        if record.formula.is_some() {
            return Ok(record.formula);
        }
        // Host stores may not keep parsed trees.
        match classify(&record.raw) {
            CellInput::Formula(text) => Ok(self.parse_formula(cell, &text).ok().map(Arc::new)),
            _ => Ok(None),
        }
    }

    /// Finish evaluating the in-flight pass and publish its results.
    pub fn commit(&mut self) -> EngineResult<PassReport> {
        if self.pass.is_none() {
            return Ok(PassReport::idle(self.epoch));
        }
        while !self.evaluate_batch(usize::MAX)? {}
        let Some(pass) = self.pass.take() else {
            return Ok(PassReport::idle(self.epoch));
        };

        let writes = match self.plan_writes(&pass) {
            Ok(writes) => writes,
            Err(e) => {
                self.undo(pass);
                return Err(e.into());
            }
        };

        let mut updates = Vec::new();
        {
            let mut store = self.store.write();
            for write in writes {
                match write {
                    PlannedWrite::Put { cell, record, changed } => {
                        if changed {
                            updates.push(CellUpdate {
                                cell,
                                value: record.value.clone(),
                            });
                        }
                        store.put(cell, record)?;
                    }
                    PlannedWrite::Remove { cell, changed } => {
                        if changed {
                            updates.push(CellUpdate {
                                cell,
                                value: CellValue::Empty,
                            });
                        }
                        store.remove(&cell)?;
                    }
                }
            }
        }

        let report = PassReport {
            epoch: pass.epoch,
            affected: pass.affected.len(),
            evaluated: pass.evaluated,
            updates,
            rejected: pass.rejected,
        };
        tracing::debug!(
            epoch = report.epoch,
            affected = report.affected,
            evaluated = report.evaluated,
            changed = report.updates.len(),
            rejected = report.rejected.len(),
            "pass committed"
        );

        self.subscriptions.publish(&report.updates);
        Ok(report)
    }

    /// Work out every store write of a finished pass, in address order.
    fn plan_writes(&self, pass: &Pass) -> Result<Vec<PlannedWrite>, StoreError> {
        let store = self.store.read();
        let mut touched: BTreeSet<CellRef> = pass.staged.keys().copied().collect();
        touched.extend(pass.ctx.evaluated().map(|(cell, _)| *cell));

        let mut writes = Vec::with_capacity(touched.len());
        for cell in touched {
            let old = store.get(&cell)?;
            let old_value = old.as_ref().map(|c| c.value.clone()).unwrap_or_default();
            let fresh = pass.ctx.fresh(&cell).cloned().unwrap_or_default();

            let Some(staged) = pass.staged.get(&cell) else {
                // A dependent re-evaluated in this pass.
                let Some(mut record) = old else {
                    continue;
                };
                let changed = record.value != fresh;
                record.value = fresh;
                record.version = pass.epoch;
                record.state = CellState::Clean;
                writes.push(PlannedWrite::Put { cell, record, changed });
                continue;
            };

            if staged.is_clear() {
                if old.is_some() {
                    writes.push(PlannedWrite::Remove {
                        cell,
                        changed: !old_value.is_empty(),
                    });
                }
                continue;
            }

            let record = match staged.state {
                // Rejected formula: new raw text, previous value and edges.
                CellState::Invalid => Cell {
                    raw: staged.raw.clone(),
                    value: old_value.clone(),
                    version: old.as_ref().map_or(0, |c| c.version),
                    state: CellState::Invalid,
                    formula: staged.formula.clone(),
                },
                CellState::Clean => Cell {
                    raw: staged.raw.clone(),
                    value: fresh,
                    version: pass.epoch,
                    state: CellState::Clean,
                    formula: staged.formula.clone(),
                },
            };
            let changed = record.value != old_value;
            writes.push(PlannedWrite::Put { cell, record, changed });
        }
        Ok(writes)
    }

    /// Abandon the in-flight pass, restoring the graph edges it replaced
    /// and the set of invalid cells awaiting a retry.
    ///
    /// Staged inputs are discarded; nothing was written to the store.
    pub fn abort_pass(&mut self) {
        if let Some(pass) = self.pass.take() {
            self.undo(pass);
        }
    }

    fn undo(&mut self, pass: Pass) {
        tracing::warn!(epoch = pass.epoch, edits = pass.staged.len(), "pass aborted");
        for (cell, was) in pass.invalid_undo.into_iter().rev() {
            if was {
                self.invalid.insert(cell);
            } else {
                self.invalid.remove(&cell);
            }
        }
        for (cell, nodes) in pass.undo.into_iter().rev() {
            let mut cells = HashSet::new();
            let mut ranges: HashSet<RangeRef> = HashSet::new();
            for node in nodes {
                match node {
                    GraphNode::Cell(c) => {
                        cells.insert(c);
                    }
                    GraphNode::Range(r) => {
                        ranges.insert(r);
                    }
                }
            }
            if let Err(e) = self.graph.set_dependencies(cell, &cells, &ranges) {
                tracing::error!(cell = %cell, error = %e, "could not restore dependencies");
            }
        }
    }

    // === Persistence ===

    /// Capture the settled state for persistence.
    pub fn snapshot(&self) -> EngineResult<Snapshot> {
        let sheets = self.sheets.read().names().map(str::to_string).collect();
        let cells = self
            .store
            .read()
            .cells()?
            .into_iter()
            .map(|(cell, record)| PersistedCell {
                cell,
                raw: record.raw,
                value: record.value,
                version: record.version,
            })
            .collect();
        Ok(Snapshot { sheets, cells })
    }

    fn parse_formula(&self, cell: CellRef, text: &str) -> Result<Expr, ParseError> {
        let limits = ParseLimits {
            max_len: self.config.max_formula_len,
            max_nesting: self.config.max_nesting,
        };
        parse_with(text, cell, &*self.sheets.read(), limits)
    }
}

enum PlannedWrite {
    Put { cell: CellRef, record: Cell, changed: bool },
    Remove { cell: CellRef, changed: bool },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::EvalError;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn at(a1: &str) -> CellRef {
        CellRef::parse_a1(SheetId(0), a1).unwrap()
    }

    #[test]
    fn literal_and_formula_inputs() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "5").unwrap();
        let report = engine.set_cell_input(at("B1"), "=A1*2").unwrap();

        assert_eq!(report.value_of(&at("B1")), Some(&CellValue::Number(10.0)));
        assert_eq!(engine.get_cell_value(at("B1")).unwrap(), CellValue::Number(10.0));
        assert_eq!(engine.cell_input(at("B1")).unwrap().as_deref(), Some("=A1*2"));
    }

    #[test]
    fn parse_error_keeps_previous_state() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "=1+1").unwrap();
        let err = engine.set_cell_input(at("A1"), "=(1+").unwrap_err();

        assert!(matches!(err, EngineError::Parse(_)));
        assert_eq!(engine.cell_input(at("A1")).unwrap().as_deref(), Some("=1+1"));
        assert_eq!(engine.get_cell_value(at("A1")).unwrap(), CellValue::Number(2.0));
    }

    #[test]
    fn cycle_rejected_cell_is_retried_once_broken() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "=B1").unwrap();
        let err = engine.set_cell_input(at("B1"), "=A1+1").unwrap_err();
        assert!(matches!(err, EngineError::Cycle(_)));

        let record = engine.get_cell(at("B1")).unwrap().unwrap();
        assert_eq!(record.state, CellState::Invalid);
        assert_eq!(record.raw, "=A1+1");
        assert!(engine.is_stale(at("B1")).unwrap());

        // Breaking the cycle lets B1's formula in on the next pass.
        let report = engine.set_cell_input(at("A1"), "3").unwrap();
        assert!(report.rejected.is_empty());
        assert_eq!(engine.get_cell_value(at("B1")).unwrap(), CellValue::Number(4.0));
        assert_eq!(engine.get_cell(at("B1")).unwrap().unwrap().state, CellState::Clean);
    }

    #[test]
    fn clear_cell_removes_record_and_recalculates() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "4").unwrap();
        engine.set_cell_input(at("B1"), "=A1+1").unwrap();

        let report = engine.clear_cell(at("A1")).unwrap();
        assert_eq!(report.value_of(&at("A1")), Some(&CellValue::Empty));
        assert_eq!(report.value_of(&at("B1")), Some(&CellValue::Number(1.0)));
        assert!(engine.get_cell(at("A1")).unwrap().is_none());
    }

    #[test]
    fn stepwise_pass_hides_results_until_commit() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "1").unwrap();
        engine.set_cell_input(at("B1"), "=A1+1").unwrap();
        let reader = engine.reader();

        engine.enqueue(at("A1"), "10").unwrap();
        assert!(engine.begin_pass().unwrap());
        assert_eq!(engine.phase(), PassPhase::Evaluating);
        assert!(engine.is_stale(at("B1")).unwrap());

        assert!(!engine.evaluate_batch(1).unwrap());
        assert_eq!(reader.get_cell_value(at("B1")).unwrap(), CellValue::Number(2.0));

        // Edits during the pass queue for the next one.
        engine.enqueue(at("A1"), "20").unwrap();
        assert!(!engine.begin_pass().unwrap());

        let report = engine.commit().unwrap();
        assert_eq!(report.value_of(&at("B1")), Some(&CellValue::Number(11.0)));
        assert!(engine.is_idle());
        assert!(engine.has_pending());

        engine.begin_pass().unwrap();
        engine.commit().unwrap();
        assert_eq!(reader.get_cell_value(at("B1")).unwrap(), CellValue::Number(21.0));
    }

    #[test]
    fn aborted_pass_restores_edges() {
        let mut engine = engine();
        engine.set_cell_input(at("B1"), "=A1").unwrap();
        let before = engine.graph().clone();

        engine.enqueue(at("B1"), "=C1+D1").unwrap();
        engine.begin_pass().unwrap();
        assert_ne!(engine.graph(), &before);
        engine.abort_pass();

        assert_eq!(engine.graph(), &before);
        assert_eq!(engine.cell_input(at("B1")).unwrap().as_deref(), Some("=A1"));
    }

    #[test]
    fn aborted_pass_keeps_invalid_cells_queued_for_retry() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "=B1").unwrap();
        engine.set_cell_input(at("B1"), "=A1+1").unwrap_err();

        engine.enqueue(at("B1"), "5").unwrap();
        engine.begin_pass().unwrap();
        engine.abort_pass();
        assert_eq!(engine.get_cell(at("B1")).unwrap().unwrap().state, CellState::Invalid);

        engine.set_cell_input(at("A1"), "3").unwrap();
        assert_eq!(engine.get_cell(at("B1")).unwrap().unwrap().state, CellState::Clean);
        assert_eq!(engine.get_cell_value(at("B1")).unwrap(), CellValue::Number(4.0));
    }

    #[test]
    fn store_failure_at_pass_start_drops_the_queue() {
        use std::sync::atomic::Ordering;

        let (store, down) = crate::store::OutageStore::new();
        let mut engine = Engine::with_store(EngineConfig::default(), store).unwrap();
        engine.set_cell_input(at("A1"), "=B1").unwrap();
        engine.set_cell_input(at("B1"), "=A1").unwrap_err();

        down.store(true, Ordering::SeqCst);
        let err = engine.set_cell_input(at("C1"), "1").unwrap_err();
        assert!(matches!(err, EngineError::Store(_)));
        assert!(!engine.has_pending());
        assert!(engine.is_idle());

        down.store(false, Ordering::SeqCst);
        engine.set_cell_input(at("C1"), "2").unwrap();
        assert_eq!(engine.get_cell_value(at("C1")).unwrap(), CellValue::Number(2.0));
    }

    #[test]
    fn staleness_follows_versions() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "1").unwrap();
        engine.set_cell_input(at("B1"), "=A1").unwrap();
        assert!(!engine.is_stale(at("B1")).unwrap());

        // Simulate a dependency written behind the engine's back.
        let reader = engine.reader();
        let mut record = reader.get_cell(at("A1")).unwrap().unwrap();
        record.version += 10;
        engine.store.write().put(at("A1"), record).unwrap();
        assert!(engine.is_stale(at("B1")).unwrap());
    }

    #[test]
    fn sheets_and_qualified_references() {
        let mut engine = engine();
        let data = engine.add_sheet("Data");
        engine.set_cell_input(CellRef::new(data, 0, 0), "7").unwrap();
        engine.set_cell_input(at("A1"), "=Data!A1*2").unwrap();
        engine.set_cell_input(at("A2"), "=Missing!A1").unwrap();

        assert_eq!(engine.get_cell_value(at("A1")).unwrap(), CellValue::Number(14.0));
        assert_eq!(
            engine.get_cell_value(at("A2")).unwrap(),
            CellValue::Error(EvalError::Reference)
        );
        assert_eq!(engine.resolve("data!A1").unwrap(), CellRef::new(data, 0, 0));

        let bad = CellRef::new(SheetId(9), 0, 0);
        assert!(matches!(engine.set_cell_input(bad, "1"), Err(EngineError::UnknownSheet(_))));
    }

    #[test]
    fn custom_functions() {
        let mut engine = engine();
        engine.functions_mut().register("TWICE", 1, Some(1), |args| {
            let n = crate::eval::to_number(&args[0].scalar())?;
            Ok(CellValue::number(n * 2.0))
        });
        engine.set_cell_input(at("A1"), "=twice(21)").unwrap();
        assert_eq!(engine.get_cell_value(at("A1")).unwrap(), CellValue::Number(42.0));
    }

    #[test]
    fn snapshot_restore_rebuilds_graph() {
        let mut engine = engine();
        engine.set_cell_input(at("A1"), "5").unwrap();
        engine.set_cell_input(at("B1"), "=A1*3").unwrap();
        let snapshot = engine.snapshot().unwrap();

        let mut restored = Engine::restore(EngineConfig::default(), &snapshot).unwrap();
        assert_eq!(restored.get_cell_value(at("B1")).unwrap(), CellValue::Number(15.0));
        assert_eq!(restored.epoch(), engine.epoch());
        assert_eq!(restored.dependencies(at("A1")).dependents, vec![at("B1")]);

        restored.set_cell_input(at("A1"), "6").unwrap();
        assert_eq!(restored.get_cell_value(at("B1")).unwrap(), CellValue::Number(18.0));
    }

    #[test]
    fn restore_marks_cyclic_formulas_invalid() {
        let snapshot = Snapshot {
            sheets: vec!["Sheet1".into()],
            cells: vec![
                PersistedCell {
                    cell: at("A1"),
                    raw: "=B1".into(),
                    value: CellValue::Empty,
                    version: 1,
                },
                PersistedCell {
                    cell: at("B1"),
                    raw: "=A1".into(),
                    value: CellValue::Empty,
                    version: 1,
                },
            ],
        };
        let engine = Engine::restore(EngineConfig::default(), &snapshot).unwrap();
        let states: Vec<CellState> = [at("A1"), at("B1")]
            .iter()
            .map(|c| engine.get_cell(*c).unwrap().unwrap().state)
            .collect();
        assert_eq!(states, vec![CellState::Clean, CellState::Invalid]);
        assert!(engine.graph().is_consistent());
    }
}
