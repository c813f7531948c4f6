//! Formula expression trees.

use std::collections::HashSet;

use crate::cell::{CellRef, CellValue, RangeRef};

/// A parsed formula.
///
/// References are resolved to concrete sheets at parse time. Trees are
/// immutable once built; a formula edit replaces the whole tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number, text, boolean or error constant.
    Literal(CellValue),

    /// Single cell reference.
    Cell(CellRef),

    /// Rectangular range reference.
    Range(RangeRef),

    /// Function call. `name` is upper-cased.
    Call { name: String, args: Vec<Expr> },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Unary { op: UnaryOp, operand: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Pow => "^",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Percent,
}

/// The cells and ranges a formula reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    pub cells: HashSet<CellRef>,
    pub ranges: HashSet<RangeRef>,
}

impl References {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.ranges.is_empty()
    }
}

impl Expr {
    /// Collect every cell and range this expression reads.
    pub fn references(&self) -> References {
        let mut refs = References::default();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references(&self, refs: &mut References) {
        match self {
            Expr::Literal(_) => {}
            Expr::Cell(cell) => {
                refs.cells.insert(*cell);
            }
            Expr::Range(range) => {
                // A one-cell range is just a cell dependency.
                if range.area() == 1 {
                    refs.cells.insert(range.start());
                } else {
                    refs.ranges.insert(*range);
                }
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.collect_references(refs);
                }
            }
            Expr::Binary { left, right, .. } => {
                left.collect_references(refs);
                right.collect_references(refs);
            }
            Expr::Unary { operand, .. } => operand.collect_references(refs),
        }
    }

    /// Number of nodes in the tree.
    pub fn node_count(&self) -> usize {
        match self {
            Expr::Literal(_) | Expr::Cell(_) | Expr::Range(_) => 1,
            Expr::Call { args, .. } => 1 + args.iter().map(Expr::node_count).sum::<usize>(),
            Expr::Binary { left, right, .. } => 1 + left.node_count() + right.node_count(),
            Expr::Unary { operand, .. } => 1 + operand.node_count(),
        }
    }
}
