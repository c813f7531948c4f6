//! Cell values.
//!
//! `CellValue` is a closed tagged union. Loose spreadsheet typing is handled
//! by explicit coercion functions in `eval::coerce`, never by inspecting
//! values ad hoc at the call site.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Spreadsheet error values.
///
/// These are ordinary results, not failures: a cell whose formula divides by
/// zero settles to `DivideByZero`, and anything reading it settles to the
/// same error until the input is fixed.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvalError {
    #[error("#DIV/0!")]
    DivideByZero,

    #[error("#VALUE!")]
    ValueType,

    #[error("#REF!")]
    Reference,

    #[error("#NAME?")]
    NameUnknown,

    #[error("#N/A")]
    NotAvailable,

    #[error("#NUM!")]
    Number,

    #[error("#CIRC!")]
    CircularReference,

    #[error("#TIMEOUT!")]
    Timeout,
}

impl EvalError {
    /// Look up an error by its displayed code, case-insensitively.
    pub fn from_code(code: &str) -> Option<Self> {
        let upper = code.to_ascii_uppercase();
        let kind = match upper.as_str() {
            "#DIV/0!" => Self::DivideByZero,
            "#VALUE!" => Self::ValueType,
            "#REF!" => Self::Reference,
            "#NAME?" => Self::NameUnknown,
            "#N/A" => Self::NotAvailable,
            "#NUM!" => Self::Number,
            "#CIRC!" => Self::CircularReference,
            "#TIMEOUT!" => Self::Timeout,
            _ => return None,
        };
        Some(kind)
    }

    /// All codes, longest first so prefix matching is unambiguous.
    pub(crate) const CODES: [&'static str; 8] = [
        "#TIMEOUT!", "#DIV/0!", "#VALUE!", "#NAME?", "#CIRC!", "#NUM!", "#REF!", "#N/A",
    ];
}

/// The settled value of a cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum CellValue {
    #[default]
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
    Error(EvalError),
}

impl CellValue {
    /// Wrap a numeric result, turning NaN and infinities into `#NUM!`.
    pub fn number(n: f64) -> Self {
        if n.is_finite() {
            CellValue::Number(n)
        } else {
            CellValue::Error(EvalError::Number)
        }
    }

    pub fn text(s: impl Into<String>) -> Self {
        CellValue::Text(s.into())
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    /// Get the error if this value is one.
    pub fn error(&self) -> Option<EvalError> {
        match self {
            CellValue::Error(e) => Some(*e),
            _ => None,
        }
    }

    /// Get the number if this value is one, without coercion.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Short name of the variant, for logs and bindings.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Empty => "empty",
            CellValue::Number(_) => "number",
            CellValue::Text(_) => "text",
            CellValue::Bool(_) => "bool",
            CellValue::Error(_) => "error",
        }
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::number(n)
    }
}

impl From<bool> for CellValue {
    fn from(b: bool) -> Self {
        CellValue::Bool(b)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<EvalError> for CellValue {
    fn from(e: EvalError) -> Self {
        CellValue::Error(e)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Number(n) => write!(f, "{}", format_number(*n)),
            CellValue::Text(s) => f.write_str(s),
            CellValue::Bool(true) => f.write_str("TRUE"),
            CellValue::Bool(false) => f.write_str("FALSE"),
            CellValue::Error(e) => e.fmt(f),
        }
    }
}

/// Format a number the way a general-format cell shows it: integers without
/// a fractional part, everything else with the shortest round-trip digits.
pub(crate) fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_round_trip() {
        for code in EvalError::CODES {
            let kind = EvalError::from_code(code).unwrap();
            assert_eq!(kind.to_string(), code);
        }
        assert_eq!(EvalError::from_code("#n/a"), Some(EvalError::NotAvailable));
        assert_eq!(EvalError::from_code("#NOPE"), None);
    }

    #[test]
    fn non_finite_numbers_become_num_errors() {
        assert_eq!(CellValue::number(f64::NAN), CellValue::Error(EvalError::Number));
        assert_eq!(CellValue::number(f64::INFINITY), CellValue::Error(EvalError::Number));
        assert_eq!(CellValue::number(1.5), CellValue::Number(1.5));
    }

    #[test]
    fn display_matches_general_format() {
        assert_eq!(CellValue::Number(15.0).to_string(), "15");
        assert_eq!(CellValue::Number(0.25).to_string(), "0.25");
        assert_eq!(CellValue::Bool(true).to_string(), "TRUE");
        assert_eq!(CellValue::Empty.to_string(), "");
        assert_eq!(CellValue::Error(EvalError::DivideByZero).to_string(), "#DIV/0!");
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_string(&CellValue::Number(2.0)).unwrap();
        assert_eq!(json, r#"{"type":"number","value":2.0}"#);
        let back: CellValue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CellValue::Number(2.0));
    }
}
