//! Type predicates and `NA()`.
//!
//! Predicates see errors as values, so they are registered with
//! `accepts_errors`.

use crate::cell::{CellValue, EvalError};

use super::FunctionRegistry;

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("NA", 0, Some(0), |_| Err(EvalError::NotAvailable));

    registry.insert("ISBLANK", 1, Some(1), true, |args| {
        Ok(CellValue::Bool(args[0].scalar().is_empty()))
    });
    registry.insert("ISERROR", 1, Some(1), true, |args| {
        Ok(CellValue::Bool(args[0].scalar().is_error()))
    });
    registry.insert("ISNA", 1, Some(1), true, |args| {
        Ok(CellValue::Bool(args[0].scalar().error() == Some(EvalError::NotAvailable)))
    });
    registry.insert("ISNUMBER", 1, Some(1), true, |args| {
        Ok(CellValue::Bool(matches!(args[0].scalar(), CellValue::Number(_))))
    });
    registry.insert("ISTEXT", 1, Some(1), true, |args| {
        Ok(CellValue::Bool(matches!(args[0].scalar(), CellValue::Text(_))))
    });
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Arg;
    use super::*;

    #[test]
    fn predicates_see_errors() {
        let na = Arg::Value(CellValue::Error(EvalError::NotAvailable));
        assert_eq!(call("ISNA", &[na.clone()]), CellValue::Bool(true));
        assert_eq!(call("ISERROR", &[na]), CellValue::Bool(true));
        assert_eq!(call("NA", &[]), CellValue::Error(EvalError::NotAvailable));
    }

    #[test]
    fn type_checks() {
        assert_eq!(call("ISNUMBER", &[num(1.0)]), CellValue::Bool(true));
        assert_eq!(call("ISNUMBER", &[text("1")]), CellValue::Bool(false));
        assert_eq!(call("ISTEXT", &[text("1")]), CellValue::Bool(true));
        assert_eq!(call("ISBLANK", &[column(&[CellValue::Empty])]), CellValue::Bool(true));
    }
}
