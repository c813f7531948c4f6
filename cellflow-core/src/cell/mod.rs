//! Cell Addressing and Values
//!
//! This module defines the data model shared by every other part of the
//! engine: where a cell lives and what a cell can hold.
//!
//! - `SheetId`, `CellRef` and `RangeRef` identify cells and rectangular spans
//!   of cells. Rows and columns are zero-indexed internally and rendered in
//!   A1 notation at the edges.
//! - `SheetTable` maps sheet names used in formulas to `SheetId`s.
//! - `CellValue` is the closed set of values a cell can settle to, including
//!   first-class errors (`EvalError`).

mod reference;
mod sheets;
mod value;

pub use reference::{
    col_to_letters, letters_to_col, CellRef, RangeRef, Reference, SheetId, MAX_COLS, MAX_ROWS,
};
pub use sheets::{NoSheets, SheetResolver, SheetTable};
pub use value::{CellValue, EvalError};

pub(crate) use value::format_number;
