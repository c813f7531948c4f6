//! Text functions. Positions and lengths count characters, not bytes.

use crate::cell::{CellValue, EvalError};
use crate::eval::coerce::{to_index, to_text};

use super::{Arg, FunctionRegistry};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("CONCATENATE", 1, None, |args| {
        let mut out = String::new();
        for arg in args {
            out.push_str(&to_text(&arg.scalar())?);
        }
        Ok(CellValue::Text(out))
    });
    // CONCAT also flattens ranges.
    registry.register("CONCAT", 1, None, |args| {
        let mut out = String::new();
        for arg in args {
            match arg {
                Arg::Value(v) => out.push_str(&to_text(v)?),
                Arg::Range(view) => {
                    for value in view.values() {
                        out.push_str(&to_text(value)?);
                    }
                }
            }
        }
        Ok(CellValue::Text(out))
    });
    registry.register("LEN", 1, Some(1), |args| {
        Ok(CellValue::Number(text_arg(args, 0)?.chars().count() as f64))
    });
    registry.register("UPPER", 1, Some(1), |args| Ok(CellValue::Text(text_arg(args, 0)?.to_uppercase())));
    registry.register("LOWER", 1, Some(1), |args| Ok(CellValue::Text(text_arg(args, 0)?.to_lowercase())));
    registry.register("TRIM", 1, Some(1), |args| {
        let text = text_arg(args, 0)?;
        Ok(CellValue::Text(text.split(' ').filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ")))
    });
    registry.register("LEFT", 1, Some(2), |args| {
        let text = text_arg(args, 0)?;
        let n = count_arg(args, 1)?;
        Ok(CellValue::Text(text.chars().take(n).collect()))
    });
    registry.register("RIGHT", 1, Some(2), |args| {
        let text = text_arg(args, 0)?;
        let n = count_arg(args, 1)?;
        let len = text.chars().count();
        Ok(CellValue::Text(text.chars().skip(len.saturating_sub(n)).collect()))
    });
    registry.register("MID", 3, Some(3), |args| {
        let text = text_arg(args, 0)?;
        let start = to_index(&args[1].scalar())?;
        let n = to_index(&args[2].scalar())?;
        if start < 1 {
            return Err(EvalError::ValueType);
        }
        Ok(CellValue::Text(text.chars().skip(start - 1).take(n).collect()))
    });
}

fn text_arg(args: &[Arg], i: usize) -> Result<String, EvalError> {
    to_text(&args[i].scalar())
}

/// Optional character count, default 1.
fn count_arg(args: &[Arg], i: usize) -> Result<usize, EvalError> {
    match args.get(i) {
        Some(arg) => to_index(&arg.scalar()),
        None => Ok(1),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn concatenation_formats_numbers() {
        assert_eq!(call("CONCATENATE", &[text("x="), num(1.5)]), CellValue::text("x=1.5"));
        let range = column(&[CellValue::text("a"), CellValue::Empty, CellValue::Number(2.0)]);
        assert_eq!(call("CONCAT", &[range, text("!")]), CellValue::text("a2!"));
    }

    #[test]
    fn slicing_counts_chars() {
        assert_eq!(call("LEFT", &[text("héllo"), num(2.0)]), CellValue::text("hé"));
        assert_eq!(call("RIGHT", &[text("héllo")]), CellValue::text("o"));
        assert_eq!(call("MID", &[text("héllo"), num(2.0), num(3.0)]), CellValue::text("éll"));
        assert_eq!(call("MID", &[text("abc"), num(0.0), num(1.0)]), CellValue::Error(EvalError::ValueType));
        assert_eq!(call("LEN", &[text("héllo")]), CellValue::Number(5.0));
        assert_eq!(call("LEFT", &[text("abc"), num(-1.0)]), CellValue::Error(EvalError::ValueType));
    }

    #[test]
    fn trim_collapses_inner_spaces() {
        assert_eq!(call("TRIM", &[text("  a   b ")]), CellValue::text("a b"));
        assert_eq!(call("UPPER", &[text("abc")]), CellValue::text("ABC"));
    }
}
