//! Engine error types.
//!
//! Value-level spreadsheet errors (`#DIV/0!` and friends) live in
//! `cell::EvalError`; the types here describe edits and operations the engine
//! refused or could not carry out.

use thiserror::Error;

use crate::cell::CellRef;

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Malformed formula text.
///
/// `position` is a byte offset into the text following the leading `=`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("parse error at {position}: {message}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// A dependency update that would have closed a cycle.
///
/// `path` starts and ends at the cell whose edges were being replaced.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("circular reference: {}", format_path(.path))]
pub struct CycleError {
    pub path: Vec<CellRef>,
}

fn format_path(path: &[CellRef]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Failures of the underlying cell store or of persisted state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be read or written.
    #[error("cell store unavailable: {0}")]
    Unavailable(String),

    /// Persisted state is internally inconsistent.
    #[error("corrupt persisted state: {0}")]
    Corrupt(String),

    /// Persisted bytes could not be decoded.
    #[error("failed to decode persisted state: {0}")]
    Decode(String),

    /// State could not be encoded for persistence.
    #[error("failed to encode state: {0}")]
    Encode(String),
}

/// Errors surfaced by the engine to its host.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Cycle(#[from] CycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown sheet: {0}")]
    UnknownSheet(String),

    #[error("recalculation worker is no longer running")]
    WorkerClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}
