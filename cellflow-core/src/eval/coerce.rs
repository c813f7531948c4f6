//! Explicit coercions between cell value types.
//!
//! Each consuming operation picks the coercion it needs; errors in the
//! input come back as `Err` so callers can propagate them with `?`.

use std::cmp::Ordering;

use crate::cell::{format_number, CellValue, EvalError};
use crate::formula::parse_number;

/// Numeric context: arithmetic operators and scalar function arguments.
///
/// Empty is 0, booleans are 0/1, numeric text is parsed, other text is
/// `#VALUE!`.
pub fn to_number(value: &CellValue) -> Result<f64, EvalError> {
    match value {
        CellValue::Number(n) => Ok(*n),
        CellValue::Bool(b) => Ok(if *b { 1.0 } else { 0.0 }),
        CellValue::Empty => Ok(0.0),
        CellValue::Text(s) => parse_number(s).ok_or(EvalError::ValueType),
        CellValue::Error(e) => Err(*e),
    }
}

/// Text context: concatenation and text functions. Empty is "".
pub fn to_text(value: &CellValue) -> Result<String, EvalError> {
    match value {
        CellValue::Error(e) => Err(*e),
        CellValue::Number(n) => Ok(format_number(*n)),
        other => Ok(other.to_string()),
    }
}

/// Logical context: conditions of IF, AND, OR, NOT.
pub fn to_bool(value: &CellValue) -> Result<bool, EvalError> {
    match value {
        CellValue::Bool(b) => Ok(*b),
        CellValue::Number(n) => Ok(*n != 0.0),
        CellValue::Empty => Ok(false),
        CellValue::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(true),
        CellValue::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(false),
        CellValue::Text(_) => Err(EvalError::ValueType),
        CellValue::Error(e) => Err(*e),
    }
}

/// Non-negative integer argument (counts, indexes), truncated toward zero.
pub fn to_index(value: &CellValue) -> Result<usize, EvalError> {
    let n = to_number(value)?.trunc();
    if n < 0.0 || n > usize::MAX as f64 {
        return Err(EvalError::ValueType);
    }
    Ok(n as usize)
}

/// Comparison order used by `=`, `<` and friends.
///
/// Values of different types order numbers < text < booleans. Text compares
/// case-insensitively. Empty takes the type of the other side (0, "" or
/// FALSE). Errors must be handled by the caller first.
pub fn compare(a: &CellValue, b: &CellValue) -> Ordering {
    use CellValue::*;

    match (a, b) {
        (Empty, Empty) => Ordering::Equal,
        (Empty, Number(_)) => compare(&Number(0.0), b),
        (Number(_), Empty) => compare(a, &Number(0.0)),
        (Empty, Text(_)) => compare(&Text(String::new()), b),
        (Text(_), Empty) => compare(a, &Text(String::new())),
        (Empty, Bool(_)) => compare(&Bool(false), b),
        (Bool(_), Empty) => compare(a, &Bool(false)),
        (Number(x), Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (Text(x), Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (Bool(x), Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &CellValue) -> u8 {
    match value {
        CellValue::Empty | CellValue::Number(_) => 0,
        CellValue::Text(_) => 1,
        CellValue::Bool(_) => 2,
        CellValue::Error(_) => 3,
    }
}
