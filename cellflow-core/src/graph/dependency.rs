//! Cell Dependency Graph
//!
//! # Edge Direction
//!
//! ```text
//! B1 = A1 + SUM(C1:C9)
//!
//! forward[B1]         = { Cell(A1), Range(C1:C9) }
//! reverse[Cell(A1)]   = { B1 }
//! reverse[Range(C1:C9)] = { B1 }
//! ```
//!
//! Forward edges answer "what does this formula read?", reverse edges answer
//! "what must be recomputed when this changes?". A write to a cell affects the
//! dependents of its own cell-node plus the dependents of every range-node
//! covering it.
//!
//! # Invariants
//!
//! 1. `forward` and `reverse` are mutual inverses.
//! 2. No empty sets are stored.
//! 3. No edge set ever closes a cycle: `set_dependencies` checks before it
//!    commits, and a rejected update leaves the graph untouched.

use std::collections::hash_map::Entry;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::cell::{CellRef, RangeRef, SheetId};
use crate::error::CycleError;

use super::node::GraphNode;

/// Dependency graph over cells and range-nodes.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DependencyGraph {
    /// Formula cell -> the nodes it reads.
    forward: HashMap<CellRef, HashSet<GraphNode>>,

    /// Node -> the formula cells reading it.
    reverse: HashMap<GraphNode, HashSet<CellRef>>,

    /// Range-nodes that have at least one dependent, per sheet.
    ranges: HashMap<SheetId, HashSet<RangeRef>>,

    /// Cells with outgoing edges, per sheet, keyed `(row, col)`.
    formula_cells: HashMap<SheetId, BTreeSet<(u32, u32)>>,
}

impl DependencyGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all outgoing edges of `cell`.
    ///
    /// The new edge set is checked for cycles first. On `CycleError` the
    /// previous edges of `cell` are kept exactly as they were.
    pub fn set_dependencies(
        &mut self,
        cell: CellRef,
        cells: &HashSet<CellRef>,
        ranges: &HashSet<RangeRef>,
    ) -> Result<(), CycleError> {
        let targets: HashSet<GraphNode> = cells
            .iter()
            .map(|c| GraphNode::Cell(*c))
            .chain(ranges.iter().map(|r| GraphNode::Range(*r)))
            .collect();

        if let Some(path) = self.find_cycle(cell, &targets) {
            tracing::debug!(cell = %cell, len = path.len(), "rejected dependency update closing a cycle");
            return Err(CycleError { path });
        }

        self.clear_outgoing(cell);
        if targets.is_empty() {
            return Ok(());
        }

        for node in &targets {
            self.reverse.entry(*node).or_default().insert(cell);
            if let GraphNode::Range(range) = node {
                self.ranges.entry(range.sheet).or_default().insert(*range);
            }
        }
        self.formula_cells
            .entry(cell.sheet)
            .or_default()
            .insert((cell.row, cell.col));
        self.forward.insert(cell, targets);
        Ok(())
    }

    /// Drop every edge originating at `cell`, from both indexes.
    ///
    /// Edges from other formulas that read `cell` stay: those formulas still
    /// name the address and must recompute when it is written again.
    pub fn remove_cell(&mut self, cell: CellRef) {
        self.clear_outgoing(cell);
    }

    fn clear_outgoing(&mut self, cell: CellRef) {
        let Some(old) = self.forward.remove(&cell) else {
            return;
        };

        if let Some(cells) = self.formula_cells.get_mut(&cell.sheet) {
            cells.remove(&(cell.row, cell.col));
            if cells.is_empty() {
                self.formula_cells.remove(&cell.sheet);
            }
        }

        for node in old {
            let Some(dependents) = self.reverse.get_mut(&node) else {
                continue;
            };
            dependents.remove(&cell);
            if !dependents.is_empty() {
                continue;
            }
            self.reverse.remove(&node);
            if let GraphNode::Range(range) = node {
                if let Some(ranges) = self.ranges.get_mut(&range.sheet) {
                    ranges.remove(&range);
                    if ranges.is_empty() {
                        self.ranges.remove(&range.sheet);
                    }
                }
            }
        }
    }

    /// Search for a path from any of `targets` back to `cell`.
    ///
    /// Returns the cycle as a list of cells starting and ending at `cell`.
    fn find_cycle(&self, cell: CellRef, targets: &HashSet<GraphNode>) -> Option<Vec<CellRef>> {
        let mut came_from: HashMap<GraphNode, Option<GraphNode>> = HashMap::new();
        let mut stack = Vec::new();

        let mut starts: Vec<GraphNode> = targets.iter().copied().collect();
        starts.sort();
        for start in starts.into_iter().rev() {
            came_from.insert(start, None);
            stack.push(start);
        }

        while let Some(node) = stack.pop() {
            if node.covers(&cell) {
                return Some(Self::cycle_path(cell, node, &came_from));
            }
            for next in self.successors(node) {
                if let Entry::Vacant(slot) = came_from.entry(next) {
                    slot.insert(Some(node));
                    stack.push(next);
                }
            }
        }
        None
    }

    fn cycle_path(
        cell: CellRef,
        hit: GraphNode,
        came_from: &HashMap<GraphNode, Option<GraphNode>>,
    ) -> Vec<CellRef> {
        let mut chain = Vec::new();
        let mut cursor = Some(hit);
        while let Some(node) = cursor {
            if let GraphNode::Cell(c) = node {
                chain.push(c);
            }
            cursor = came_from.get(&node).copied().flatten();
        }
        chain.reverse();
        if chain.last() == Some(&cell) {
            chain.pop();
        }

        let mut path = Vec::with_capacity(chain.len() + 2);
        path.push(cell);
        path.extend(chain);
        path.push(cell);
        path
    }

    /// Nodes that `node` reads from, in a stable order.
    fn successors(&self, node: GraphNode) -> Vec<GraphNode> {
        match node {
            GraphNode::Cell(c) => {
                let mut next: Vec<GraphNode> = self
                    .forward
                    .get(&c)
                    .map(|deps| deps.iter().copied().collect())
                    .unwrap_or_default();
                next.sort();
                next
            }
            // A range reads through to every formula cell inside it.
            GraphNode::Range(r) => self
                .formula_cells_in(&r)
                .into_iter()
                .map(GraphNode::Cell)
                .collect(),
        }
    }

    /// Formula cells located inside `range`, row-major.
    pub fn formula_cells_in(&self, range: &RangeRef) -> Vec<CellRef> {
        let Some(cells) = self.formula_cells.get(&range.sheet) else {
            return Vec::new();
        };
        let cols = range.start_col..=range.end_col;
        cells
            .range((range.start_row, range.start_col)..=(range.end_row, range.end_col))
            .filter(|(_, col)| cols.contains(col))
            .map(|&(row, col)| CellRef::new(range.sheet, row, col))
            .collect()
    }

    /// Cells that read `cell` directly, either by address or through a
    /// range covering it. Sorted, without duplicates.
    pub fn direct_dependents(&self, cell: CellRef) -> Vec<CellRef> {
        let mut out: Vec<CellRef> = self
            .reverse
            .get(&GraphNode::Cell(cell))
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default();

        if let Some(ranges) = self.ranges.get(&cell.sheet) {
            for range in ranges.iter().filter(|r| r.contains(&cell)) {
                if let Some(deps) = self.reverse.get(&GraphNode::Range(*range)) {
                    out.extend(deps.iter().copied());
                }
            }
        }

        out.sort();
        out.dedup();
        out
    }

    /// All direct and transitive dependents of `cell`, breadth-first.
    ///
    /// Each cell appears once even when reachable along several paths.
    pub fn dependents(&self, cell: CellRef) -> Vec<CellRef> {
        let mut visited = HashSet::from([cell]);
        let mut queue = VecDeque::from([cell]);
        let mut out = Vec::new();

        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(current) {
                if visited.insert(dependent) {
                    out.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        out
    }

    /// The nodes `cell` reads, sorted.
    pub fn precedents(&self, cell: CellRef) -> Vec<GraphNode> {
        let mut out: Vec<GraphNode> = self
            .forward
            .get(&cell)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Whether `cell` has outgoing edges.
    pub fn has_dependencies(&self, cell: CellRef) -> bool {
        self.forward.contains_key(&cell)
    }

    /// Number of cells with outgoing edges.
    pub fn formula_count(&self) -> usize {
        self.forward.len()
    }

    /// Number of range-nodes currently depended on.
    pub fn range_node_count(&self) -> usize {
        self.ranges.values().map(HashSet::len).sum()
    }

    /// Total number of edges.
    pub fn edge_count(&self) -> usize {
        self.forward.values().map(HashSet::len).sum()
    }

    /// Check that the forward and reverse indexes are mutual inverses.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.forward.iter().all(|(cell, nodes)| {
            !nodes.is_empty()
                && nodes
                    .iter()
                    .all(|n| self.reverse.get(n).is_some_and(|d| d.contains(cell)))
        });
        let reverse_ok = self.reverse.iter().all(|(node, cells)| {
            !cells.is_empty()
                && cells
                    .iter()
                    .all(|c| self.forward.get(c).is_some_and(|n| n.contains(node)))
        });
        forward_ok && reverse_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(a1: &str) -> CellRef {
        CellRef::parse_a1(SheetId(0), a1).unwrap()
    }

    fn r(a: &str, b: &str) -> RangeRef {
        RangeRef::from_corners(c(a), c(b)).unwrap()
    }

    fn cells(list: &[&str]) -> HashSet<CellRef> {
        list.iter().map(|a| c(a)).collect()
    }

    fn none() -> HashSet<RangeRef> {
        HashSet::new()
    }

    #[test]
    fn set_dependencies_maintains_both_indexes() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(c("B1"), &cells(&["A1", "A2"]), &none()).unwrap();

        assert_eq!(graph.direct_dependents(c("A1")), vec![c("B1")]);
        assert_eq!(
            graph.precedents(c("B1")),
            vec![GraphNode::Cell(c("A1")), GraphNode::Cell(c("A2"))]
        );
        assert!(graph.is_consistent());

        // Replacing drops the old edges.
        graph.set_dependencies(c("B1"), &cells(&["A3"]), &none()).unwrap();
        assert!(graph.direct_dependents(c("A1")).is_empty());
        assert_eq!(graph.direct_dependents(c("A3")), vec![c("B1")]);
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.is_consistent());
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .set_dependencies(c("A1"), &cells(&["A1"]), &none())
            .unwrap_err();
        assert_eq!(err.path, vec![c("A1"), c("A1")]);
        assert_eq!(graph, DependencyGraph::new());
    }

    #[test]
    fn rejected_cycle_leaves_graph_unchanged() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(c("A1"), &cells(&["B1"]), &none()).unwrap();
        graph.set_dependencies(c("B1"), &cells(&["C1"]), &none()).unwrap();
        let before = graph.clone();

        let err = graph
            .set_dependencies(c("C1"), &cells(&["A1", "D1"]), &none())
            .unwrap_err();
        assert_eq!(err.path, vec![c("C1"), c("A1"), c("B1"), c("C1")]);
        assert_eq!(graph, before);
    }

    #[test]
    fn range_containing_the_formula_cell_is_a_cycle() {
        let mut graph = DependencyGraph::new();
        let err = graph
            .set_dependencies(c("A10"), &HashSet::new(), &HashSet::from([r("A1", "A10")]))
            .unwrap_err();
        assert_eq!(err.path.first(), Some(&c("A10")));
        assert_eq!(graph.formula_count(), 0);
    }

    #[test]
    fn cycle_through_range_node_is_detected() {
        let mut graph = DependencyGraph::new();
        // A5 reads B1; B1 would read A1:A10, which contains A5.
        graph.set_dependencies(c("A5"), &cells(&["B1"]), &none()).unwrap();
        let err = graph
            .set_dependencies(c("B1"), &HashSet::new(), &HashSet::from([r("A1", "A10")]))
            .unwrap_err();
        assert_eq!(err.path, vec![c("B1"), c("A5"), c("B1")]);
    }

    #[test]
    fn dependents_visit_diamonds_once() {
        // A -> B, A -> C, B -> D, C -> D
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(c("B1"), &cells(&["A1"]), &none()).unwrap();
        graph.set_dependencies(c("C1"), &cells(&["A1"]), &none()).unwrap();
        graph.set_dependencies(c("D1"), &cells(&["B1", "C1"]), &none()).unwrap();

        let deps = graph.dependents(c("A1"));
        assert_eq!(deps, vec![c("B1"), c("C1"), c("D1")]);
    }

    #[test]
    fn range_membership_reaches_dependents() {
        let mut graph = DependencyGraph::new();
        graph
            .set_dependencies(c("B1"), &HashSet::new(), &HashSet::from([r("A1", "A10")]))
            .unwrap();

        assert_eq!(graph.dependents(c("A5")), vec![c("B1")]);
        assert!(graph.dependents(c("A11")).is_empty());
        assert!(graph.dependents(c("B5")).is_empty());
        assert_eq!(graph.range_node_count(), 1);
    }

    #[test]
    fn remove_cell_clears_outgoing_edges_and_empty_range_nodes() {
        let mut graph = DependencyGraph::new();
        graph
            .set_dependencies(c("B1"), &cells(&["C1"]), &HashSet::from([r("A1", "A10")]))
            .unwrap();
        graph.set_dependencies(c("D1"), &cells(&["B1"]), &none()).unwrap();

        graph.remove_cell(c("B1"));
        assert!(!graph.has_dependencies(c("B1")));
        assert_eq!(graph.range_node_count(), 0);
        assert!(graph.dependents(c("A1")).is_empty());
        // D1 still names B1.
        assert_eq!(graph.direct_dependents(c("B1")), vec![c("D1")]);
        assert!(graph.is_consistent());
    }

    #[test]
    fn formula_cells_in_range_are_found_sparsely() {
        let mut graph = DependencyGraph::new();
        graph.set_dependencies(c("A3"), &cells(&["Z1"]), &none()).unwrap();
        graph.set_dependencies(c("C3"), &cells(&["Z1"]), &none()).unwrap();
        assert_eq!(graph.formula_cells_in(&r("A1", "B100")), vec![c("A3")]);
    }
}
