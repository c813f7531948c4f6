//! Dependency Graph
//!
//! This module tracks which cells read which, and orders recalculation.
//!
//! # Overview
//!
//! - Nodes are cells, plus one synthetic node per distinct range a formula
//!   reads.
//! - Edges point from a formula cell to the nodes it reads. The reverse index
//!   answers which formulas must recompute after a write.
//!
//! When a cell changes, we walk the reverse index breadth-first to collect
//! everything downstream, then order that set topologically so each cell is
//! evaluated after its inputs.
//!
//! # Design Decisions
//!
//! 1. A centralized graph rather than per-cell lists, so cycle checks and
//!    batch ordering can see the whole structure.
//!
//! 2. Ranges are single nodes. Membership is resolved when a cell is written
//!    (which range-nodes cover it?) instead of expanding every range into
//!    per-cell edges, which would be prohibitive for whole-column references.
//!
//! 3. Both forward and reverse indexes are kept so traversal is cheap in
//!    either direction.

mod dependency;
mod node;
mod scheduler;

pub use dependency::DependencyGraph;
pub use node::{GraphNode, NodeKind};
pub use scheduler::{topological_order, Schedule};
