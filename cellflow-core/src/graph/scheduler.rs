//! Recalculation Ordering
//!
//! Given the set of cells affected by an edit, produce an evaluation order in
//! which every cell comes after all of its own affected dependencies.
//!
//! # Algorithm
//!
//! Kahn's algorithm run layer by layer:
//!
//! 1. Restrict the graph to the affected set. A cell's in-set precedents are
//!    the affected cells it names directly plus the affected cells inside the
//!    ranges it reads.
//! 2. Layer 0 is every cell with no in-set precedent. Removing a whole layer
//!    lowers the in-degree of its dependents; those reaching zero form the
//!    next layer.
//! 3. Within a layer, cells keep the order in which they entered the
//!    affected set, so the result is stable for a given input.
//!
//! Cells left over when no layer can be formed sit on a cycle. The graph
//! rejects cycles up front, so this should never happen; they are reported
//! separately rather than looped over.

use std::collections::{BTreeSet, HashMap};

use indexmap::IndexSet;

use crate::cell::{CellRef, SheetId};

use super::dependency::DependencyGraph;
use super::node::GraphNode;

/// Evaluation order for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    /// Cells in dependency order.
    pub order: Vec<CellRef>,

    /// Cells that could not be ordered because they depend on each other.
    pub cyclic: Vec<CellRef>,
}

/// Topologically order `affected`, breaking ties by insertion order.
pub fn topological_order(graph: &DependencyGraph, affected: &IndexSet<CellRef>) -> Schedule {
    let index_of: HashMap<CellRef, usize> =
        affected.iter().enumerate().map(|(i, c)| (*c, i)).collect();

    // Affected cells per sheet, for range membership scans.
    let mut by_sheet: HashMap<SheetId, BTreeSet<(u32, u32, usize)>> = HashMap::new();
    for (i, cell) in affected.iter().enumerate() {
        by_sheet
            .entry(cell.sheet)
            .or_default()
            .insert((cell.row, cell.col, i));
    }

    let n = affected.len();
    let mut in_degree = vec![0usize; n];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); n];

    for (i, cell) in affected.iter().enumerate() {
        let mut precedents: BTreeSet<usize> = BTreeSet::new();
        for node in graph.precedents(*cell) {
            match node {
                GraphNode::Cell(dep) => {
                    if let Some(&j) = index_of.get(&dep) {
                        precedents.insert(j);
                    }
                }
                GraphNode::Range(range) => {
                    let Some(members) = by_sheet.get(&range.sheet) else {
                        continue;
                    };
                    let lo = (range.start_row, range.start_col, 0);
                    let hi = (range.end_row, range.end_col, usize::MAX);
                    for &(_, col, j) in members.range(lo..=hi) {
                        if (range.start_col..=range.end_col).contains(&col) {
                            precedents.insert(j);
                        }
                    }
                }
            }
        }
        precedents.remove(&i);
        in_degree[i] = precedents.len();
        for j in precedents {
            successors[j].push(i);
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut layer: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();

    while !layer.is_empty() {
        let mut next = Vec::new();
        for &i in &layer {
            order.push(affected[i]);
            for &s in &successors[i] {
                in_degree[s] -= 1;
                if in_degree[s] == 0 {
                    next.push(s);
                }
            }
        }
        next.sort_unstable();
        layer = next;
    }

    let cyclic = if order.len() < n {
        (0..n)
            .filter(|&i| in_degree[i] > 0)
            .map(|i| affected[i])
            .collect()
    } else {
        Vec::new()
    };

    Schedule { order, cyclic }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::RangeRef;
    use std::collections::HashSet;

    fn c(a1: &str) -> CellRef {
        CellRef::parse_a1(SheetId(0), a1).unwrap()
    }

    fn set(list: &[&str]) -> IndexSet<CellRef> {
        list.iter().map(|a| c(a)).collect()
    }

    fn link(graph: &mut DependencyGraph, cell: &str, deps: &[&str]) {
        let deps: HashSet<CellRef> = deps.iter().map(|a| c(a)).collect();
        graph.set_dependencies(c(cell), &deps, &HashSet::new()).unwrap();
    }

    #[test]
    fn chain_is_ordered_dependencies_first() {
        let mut graph = DependencyGraph::new();
        link(&mut graph, "B1", &["A1"]);
        link(&mut graph, "C1", &["B1"]);

        // Deliberately scrambled input order.
        let schedule = topological_order(&graph, &set(&["C1", "A1", "B1"]));
        assert_eq!(schedule.order, vec![c("A1"), c("B1"), c("C1")]);
        assert!(schedule.cyclic.is_empty());
    }

    #[test]
    fn ties_keep_input_order() {
        let mut graph = DependencyGraph::new();
        link(&mut graph, "D1", &["A1"]);
        link(&mut graph, "B1", &["A1"]);

        let schedule = topological_order(&graph, &set(&["A1", "D1", "B1"]));
        assert_eq!(schedule.order, vec![c("A1"), c("D1"), c("B1")]);
    }

    #[test]
    fn cells_are_layered_by_depth() {
        // E1 <- A1, B1 <- A1, C1 <- B1. E1 and B1 share depth 1.
        let mut graph = DependencyGraph::new();
        link(&mut graph, "B1", &["A1"]);
        link(&mut graph, "C1", &["B1"]);
        link(&mut graph, "E1", &["A1"]);

        let schedule = topological_order(&graph, &set(&["A1", "C1", "B1", "E1"]));
        assert_eq!(schedule.order, vec![c("A1"), c("B1"), c("E1"), c("C1")]);
    }

    #[test]
    fn range_members_are_ordered_before_the_reader() {
        let mut graph = DependencyGraph::new();
        link(&mut graph, "A2", &["Z1"]);
        let range = RangeRef::from_corners(c("A1"), c("A3")).unwrap();
        graph
            .set_dependencies(c("B1"), &HashSet::new(), &HashSet::from([range]))
            .unwrap();

        let schedule = topological_order(&graph, &set(&["B1", "Z1", "A2"]));
        assert_eq!(schedule.order, vec![c("Z1"), c("A2"), c("B1")]);
    }
}
