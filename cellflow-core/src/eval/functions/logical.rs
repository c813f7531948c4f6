//! Boolean functions. IF lives in the evaluator.

use crate::cell::{CellValue, EvalError};
use crate::eval::coerce::to_bool;

use super::{Arg, FunctionRegistry};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("AND", 1, None, |args| {
        Ok(truths(args)?.map_or(CellValue::Error(EvalError::ValueType), |t| {
            CellValue::Bool(t.iter().all(|b| *b))
        }))
    });
    registry.register("OR", 1, None, |args| {
        Ok(truths(args)?.map_or(CellValue::Error(EvalError::ValueType), |t| {
            CellValue::Bool(t.iter().any(|b| *b))
        }))
    });
    registry.register("NOT", 1, Some(1), |args| Ok(CellValue::Bool(!to_bool(&args[0].scalar())?)));
    registry.register("TRUE", 0, Some(0), |_| Ok(CellValue::Bool(true)));
    registry.register("FALSE", 0, Some(0), |_| Ok(CellValue::Bool(false)));
}

/// Logical values of all arguments. Referenced text and blanks are skipped;
/// `None` when nothing logical was found.
fn truths(args: &[Arg]) -> Result<Option<Vec<bool>>, EvalError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Value(v) => out.push(to_bool(v)?),
            Arg::Range(view) => {
                for value in view.values() {
                    match value {
                        CellValue::Bool(b) => out.push(*b),
                        CellValue::Number(n) => out.push(*n != 0.0),
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok((!out.is_empty()).then_some(out))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn and_or_over_ranges() {
        let range = column(&[CellValue::Bool(true), CellValue::text("skip"), CellValue::Number(0.0)]);
        assert_eq!(call("AND", &[range.clone()]), CellValue::Bool(false));
        assert_eq!(call("OR", &[range]), CellValue::Bool(true));
    }

    #[test]
    fn and_without_logicals_is_value_error() {
        let range = column(&[CellValue::text("a")]);
        assert_eq!(call("AND", &[range]), CellValue::Error(EvalError::ValueType));
    }

    #[test]
    fn not_coerces() {
        assert_eq!(call("NOT", &[num(0.0)]), CellValue::Bool(true));
        assert_eq!(call("NOT", &[text("true")]), CellValue::Bool(false));
        assert_eq!(call("NOT", &[text("maybe")]), CellValue::Error(EvalError::ValueType));
    }
}
