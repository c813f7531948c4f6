//! Cellflow Core
//!
//! This crate provides the recalculation engine behind a spreadsheet. It
//! implements:
//!
//! - A1 addressing, cell values and spreadsheet error values
//! - A formula parser producing an expression tree
//! - A dependency graph with range nodes and cycle rejection
//! - Incremental recalculation in topological order
//! - A background worker that batches edits and yields between batches
//!
//! The crate is designed to be used both as a native Rust library and, with
//! the `python` feature, as a Python extension module via PyO3.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `cell`: addresses, ranges, sheets and values
//! - `formula`: lexer, parser and expression tree
//! - `graph`: dependency tracking and recalculation ordering
//! - `eval`: coercions, the evaluator and the built-in function library
//! - `store`: the cell store trait, its in-memory implementation and snapshots
//! - `engine`: recalculation passes, subscriptions and the background worker
//!
//! # Example
//!
//! ```rust
//! use cellflow_core::{CellValue, Engine, EngineConfig};
//!
//! let mut engine = Engine::new(EngineConfig::default()).unwrap();
//! let a1 = engine.resolve("A1").unwrap();
//! let b1 = engine.resolve("B1").unwrap();
//!
//! engine.set_cell_input(a1, "5").unwrap();
//! engine.set_cell_input(b1, "=A1*2").unwrap();
//! assert_eq!(engine.get_cell_value(b1).unwrap(), CellValue::Number(10.0));
//!
//! // Only B1 is recomputed.
//! let report = engine.set_cell_input(a1, "7").unwrap();
//! assert_eq!(report.value_of(&b1), Some(&CellValue::Number(14.0)));
//! ```

pub mod cell;
pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod formula;
pub mod graph;
pub mod store;

#[cfg(feature = "python")]
mod python;

pub use cell::{CellRef, CellValue, EvalError, RangeRef, Reference, SheetId};
pub use config::EngineConfig;
pub use engine::{Engine, EngineReader, PassReport, Worker, WorkerHandle};
pub use error::{CycleError, EngineError, EngineResult, ParseError, StoreError};
pub use store::{CellStore, MemoryStore, Snapshot};
