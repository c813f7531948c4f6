//! Formula Parsing
//!
//! Turns raw cell input into either a literal value or an expression tree.
//!
//! - `input::classify` decides whether input is a formula or a literal.
//! - `parser::parse` builds an `Expr` from formula text with references
//!   resolved against the cell the formula lives in.
//!
//! Parsing is purely functional; nothing here reads or writes engine state.

mod ast;
mod input;
mod lexer;
mod parser;

pub use ast::{BinaryOp, Expr, References, UnaryOp};
pub use input::{classify, CellInput};
pub use parser::{parse, parse_with, ParseLimits};

pub(crate) use input::parse_number;
