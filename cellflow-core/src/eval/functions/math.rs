//! Arithmetic and aggregate functions.

use crate::cell::{CellValue, EvalError};
use crate::eval::coerce::to_number;

use super::{number_arg, numbers, Arg, FunctionRegistry};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("SUM", 1, None, |args| Ok(CellValue::number(numbers(args)?.iter().sum())));
    registry.register("PRODUCT", 1, None, |args| {
        Ok(CellValue::number(numbers(args)?.iter().product()))
    });
    registry.register("AVERAGE", 1, None, |args| {
        let values = numbers(args)?;
        if values.is_empty() {
            return Err(EvalError::DivideByZero);
        }
        Ok(CellValue::number(values.iter().sum::<f64>() / values.len() as f64))
    });
    registry.register("MIN", 1, None, |args| {
        let values = numbers(args)?;
        Ok(CellValue::number(values.into_iter().reduce(f64::min).unwrap_or(0.0)))
    });
    registry.register("MAX", 1, None, |args| {
        let values = numbers(args)?;
        Ok(CellValue::number(values.into_iter().reduce(f64::max).unwrap_or(0.0)))
    });

    // Counting functions never fail on bad inputs; they only count.
    registry.insert("COUNT", 1, None, true, |args| Ok(count_numbers(args)));
    registry.insert("COUNTA", 1, None, true, |args| Ok(count_non_empty(args)));
    registry.insert("COUNTBLANK", 1, Some(1), true, |args| match &args[0] {
        Arg::Range(view) => {
            let blank = view.area() - view.values().filter(|v| !is_blank(v)).count() as u64;
            Ok(CellValue::Number(blank as f64))
        }
        Arg::Value(_) => Err(EvalError::ValueType),
    });

    registry.register("ABS", 1, Some(1), |args| Ok(CellValue::number(number_arg(args, 0, 0.0)?.abs())));
    registry.register("INT", 1, Some(1), |args| {
        Ok(CellValue::number(number_arg(args, 0, 0.0)?.floor()))
    });
    registry.register("SQRT", 1, Some(1), |args| {
        let n = number_arg(args, 0, 0.0)?;
        if n < 0.0 {
            return Err(EvalError::Number);
        }
        Ok(CellValue::number(n.sqrt()))
    });
    registry.register("POWER", 2, Some(2), |args| {
        power(number_arg(args, 0, 0.0)?, number_arg(args, 1, 0.0)?)
    });
    registry.register("MOD", 2, Some(2), |args| {
        let n = number_arg(args, 0, 0.0)?;
        let d = number_arg(args, 1, 0.0)?;
        if d == 0.0 {
            return Err(EvalError::DivideByZero);
        }
        // Result takes the sign of the divisor.
        Ok(CellValue::number(n - d * (n / d).floor()))
    });
    registry.register("ROUND", 1, Some(2), |args| round_with(args, round_half_away));
    registry.register("ROUNDUP", 1, Some(2), |args| {
        round_with(args, |x| x.signum() * x.abs().ceil())
    });
    registry.register("ROUNDDOWN", 1, Some(2), |args| round_with(args, f64::trunc));
}

/// `x ^ y`, shared with the `^` operator.
pub(crate) fn power(x: f64, y: f64) -> Result<CellValue, EvalError> {
    if x == 0.0 && y < 0.0 {
        return Err(EvalError::DivideByZero);
    }
    if x == 0.0 && y == 0.0 {
        return Err(EvalError::Number);
    }
    Ok(CellValue::number(x.powf(y)))
}

fn round_with(args: &[Arg], f: impl Fn(f64) -> f64) -> Result<CellValue, EvalError> {
    let value = number_arg(args, 0, 0.0)?;
    let digits = number_arg(args, 1, 0.0)?.trunc();
    if digits.abs() > 15.0 {
        return Ok(CellValue::number(value));
    }
    let scale = 10f64.powi(digits.abs() as i32);
    let rounded = if digits >= 0.0 {
        f(value * scale) / scale
    } else {
        f(value / scale) * scale
    };
    Ok(CellValue::number(rounded))
}

/// Round half away from zero, treating values within a few ulps of the
/// midpoint as the midpoint, so 2.675 rounds like its decimal form.
fn round_half_away(x: f64) -> f64 {
    let nudged = x + x.signum() * x.abs() * 4.0 * f64::EPSILON;
    nudged.round()
}

fn count_numbers(args: &[Arg]) -> CellValue {
    let n: usize = args
        .iter()
        .map(|arg| match arg {
            // Typed constants count when they coerce; referenced cells only
            // when they hold numbers.
            Arg::Value(v) => usize::from(to_number(v).is_ok() && !v.is_empty()),
            Arg::Range(view) => view.values().filter(|v| matches!(v, CellValue::Number(_))).count(),
        })
        .sum();
    CellValue::Number(n as f64)
}

fn count_non_empty(args: &[Arg]) -> CellValue {
    let n: usize = args
        .iter()
        .map(|arg| match arg {
            Arg::Value(v) => usize::from(!v.is_empty()),
            Arg::Range(view) => view.non_empty(),
        })
        .sum();
    CellValue::Number(n as f64)
}

fn is_blank(value: &CellValue) -> bool {
    match value {
        CellValue::Empty => true,
        CellValue::Text(s) => s.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;

    #[test]
    fn sum_ignores_text_in_ranges() {
        let range = column(&[CellValue::Number(5.0), CellValue::text("n/a"), CellValue::Number(10.0)]);
        assert_eq!(call("SUM", &[range, num(1.0)]), CellValue::Number(16.0));
    }

    #[test]
    fn average_of_nothing_divides_by_zero() {
        let range = column(&[CellValue::text("a")]);
        assert_eq!(call("AVERAGE", &[range]), CellValue::Error(EvalError::DivideByZero));
        assert_eq!(call("AVERAGE", &[num(2.0), num(4.0)]), CellValue::Number(3.0));
    }

    #[test]
    fn min_max_of_empty_range_is_zero() {
        let range = column(&[CellValue::Empty]);
        assert_eq!(call("MIN", &[range.clone()]), CellValue::Number(0.0));
        assert_eq!(call("MAX", &[range, num(-3.0), num(7.0)]), CellValue::Number(7.0));
    }

    #[test]
    fn counting() {
        let range = column(&[
            CellValue::Number(1.0),
            CellValue::text("x"),
            CellValue::Empty,
            CellValue::Error(EvalError::NotAvailable),
        ]);
        assert_eq!(call("COUNT", &[range.clone()]), CellValue::Number(1.0));
        assert_eq!(call("COUNTA", &[range.clone()]), CellValue::Number(3.0));
        assert_eq!(call("COUNTBLANK", &[range]), CellValue::Number(1.0));
        assert_eq!(call("COUNT", &[text("12"), text("x")]), CellValue::Number(1.0));
    }

    #[test]
    fn rounding() {
        assert_eq!(call("ROUND", &[num(2.675), num(2.0)]), CellValue::Number(2.68));
        assert_eq!(call("ROUND", &[num(-2.5)]), CellValue::Number(-3.0));
        assert_eq!(call("ROUNDUP", &[num(1.21), num(1.0)]), CellValue::Number(1.3));
        assert_eq!(call("ROUNDDOWN", &[num(-1.29), num(1.0)]), CellValue::Number(-1.2));
        assert_eq!(call("ROUND", &[num(1234.0), num(-2.0)]), CellValue::Number(1200.0));
    }

    #[test]
    fn mod_follows_divisor_sign() {
        assert_eq!(call("MOD", &[num(-3.0), num(2.0)]), CellValue::Number(1.0));
        assert_eq!(call("MOD", &[num(3.0), num(0.0)]), CellValue::Error(EvalError::DivideByZero));
    }

    #[test]
    fn domain_errors() {
        assert_eq!(call("SQRT", &[num(-1.0)]), CellValue::Error(EvalError::Number));
        assert_eq!(call("POWER", &[num(0.0), num(-1.0)]), CellValue::Error(EvalError::DivideByZero));
        assert_eq!(call("INT", &[num(-1.5)]), CellValue::Number(-2.0));
    }
}
