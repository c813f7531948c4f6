//! Classification of raw cell input.
//!
//! Text beginning with `=` is a formula and goes to the parser; everything
//! else is classified directly into a literal value.

use crate::cell::{CellValue, EvalError};

/// What a cell's raw input means.
#[derive(Debug, Clone, PartialEq)]
pub enum CellInput {
    /// Blank input; the cell is cleared.
    Empty,

    /// A constant value.
    Literal(CellValue),

    /// Formula text including the leading `=`.
    Formula(String),
}

impl CellInput {
    pub fn is_formula(&self) -> bool {
        matches!(self, CellInput::Formula(_))
    }
}

/// Classify raw input text.
///
/// - blank text is `Empty`
/// - a leading `'` forces the rest to be text
/// - `=` starts a formula
/// - `TRUE`/`FALSE` (any case) are booleans
/// - error codes such as `#N/A` are error values
/// - decimal numbers, optionally signed, with exponent or trailing `%`
/// - anything else is text
pub fn classify(raw: &str) -> CellInput {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return CellInput::Empty;
    }
    if let Some(text) = raw.strip_prefix('\'') {
        return CellInput::Literal(CellValue::Text(text.to_string()));
    }
    if trimmed.starts_with('=') {
        return CellInput::Formula(trimmed.to_string());
    }
    if trimmed.eq_ignore_ascii_case("TRUE") {
        return CellInput::Literal(CellValue::Bool(true));
    }
    if trimmed.eq_ignore_ascii_case("FALSE") {
        return CellInput::Literal(CellValue::Bool(false));
    }
    if let Some(kind) = EvalError::from_code(trimmed) {
        return CellInput::Literal(CellValue::Error(kind));
    }
    if let Some(n) = parse_number(trimmed) {
        return CellInput::Literal(CellValue::Number(n));
    }
    CellInput::Literal(CellValue::Text(raw.to_string()))
}

/// Parse a plain decimal number, rejecting the `inf`/`nan` spellings that
/// `f64::from_str` accepts.
pub(crate) fn parse_number(text: &str) -> Option<f64> {
    let text = text.trim();
    let (body, scale) = match text.strip_suffix('%') {
        Some(body) => (body.trim_end(), 0.01),
        None => (text, 1.0),
    };
    let digits = body.strip_prefix(['+', '-']).unwrap_or(body);
    if !digits.bytes().any(|b| b.is_ascii_digit())
        || !digits
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'))
    {
        return None;
    }
    let n: f64 = body.parse().ok()?;
    let n = n * scale;
    n.is_finite().then_some(n)
}
