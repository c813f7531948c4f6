//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.

use std::fmt;

use crate::cell::{CellRef, RangeRef, Reference};

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A real cell. Formula cells have outgoing edges; any cell can be
    /// depended on.
    Cell,

    /// A synthetic node standing for every cell inside a range. Formulas
    /// that read a range depend on this one node instead of on each member,
    /// so a range over a million mostly-empty rows is still one edge.
    Range,
}

/// A dependency target: a cell or a range-node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GraphNode {
    Cell(CellRef),
    Range(RangeRef),
}

impl GraphNode {
    pub fn kind(&self) -> NodeKind {
        match self {
            GraphNode::Cell(_) => NodeKind::Cell,
            GraphNode::Range(_) => NodeKind::Range,
        }
    }

    /// Whether a write to `cell` changes what this node stands for.
    pub fn covers(&self, cell: &CellRef) -> bool {
        match self {
            GraphNode::Cell(c) => c == cell,
            GraphNode::Range(r) => r.contains(cell),
        }
    }
}

impl From<GraphNode> for Reference {
    fn from(node: GraphNode) -> Self {
        match node {
            GraphNode::Cell(c) => Reference::Cell(c),
            GraphNode::Range(r) => Reference::Range(r),
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphNode::Cell(c) => c.fmt(f),
            GraphNode::Range(r) => r.fmt(f),
        }
    }
}
