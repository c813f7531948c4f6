//! Conditional aggregates and the criteria language they share.
//!
//! A criterion is either a plain value (match by equality) or text with an
//! optional comparison prefix: `">5"`, `"<>done"`, `"=a*"`. Text matching is
//! case-insensitive and understands `*`, `?` and `~` escapes.

use std::cmp::Ordering;

use crate::cell::{CellValue, EvalError};
use crate::formula::parse_number;

use super::{range_arg, Arg, FunctionRegistry};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("COUNTIF", 2, Some(2), |args| {
        let range = range_arg(args, 0)?;
        let matcher = CriteriaMatcher::new(&args[1].scalar());
        let mut n = range.entries().filter(|(_, _, v)| matcher.matches(v)).count() as u64;
        if matcher.matches(&CellValue::Empty) {
            n += range.area() - range.non_empty() as u64;
        }
        Ok(CellValue::Number(n as f64))
    });
    registry.register("SUMIF", 2, Some(3), |args| {
        let (sum, _) = conditional_sum(args)?;
        Ok(CellValue::number(sum))
    });
    registry.register("AVERAGEIF", 2, Some(3), |args| {
        let (sum, count) = conditional_sum(args)?;
        if count == 0 {
            return Err(EvalError::DivideByZero);
        }
        Ok(CellValue::number(sum / count as f64))
    });
}

/// Sum and count of the numbers selected by `SUMIF`-style arguments:
/// `(criteria range, criterion, [sum range])`.
fn conditional_sum(args: &[Arg]) -> Result<(f64, usize), EvalError> {
    let range = range_arg(args, 0)?;
    let matcher = CriteriaMatcher::new(&args[1].scalar());
    let target = match args.get(2) {
        Some(_) => range_arg(args, 2)?,
        None => range,
    };

    let mut sum = 0.0;
    let mut count = 0;
    let mut add = |value: &CellValue| -> Result<(), EvalError> {
        match value {
            CellValue::Number(n) => {
                sum += n;
                count += 1;
            }
            CellValue::Error(e) => return Err(*e),
            _ => {}
        }
        Ok(())
    };

    if matcher.matches(&CellValue::Empty) {
        // Blank criteria cells can select values, so walk the values instead.
        for (row, col, value) in target.entries() {
            if row < range.rows() && col < range.cols() && matcher.matches(range.get(row, col)) {
                add(value)?;
            }
        }
    } else {
        for (row, col, value) in range.entries() {
            if matcher.matches(value) {
                add(target.get(row, col))?;
            }
        }
    }
    Ok((sum, count))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Op {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Op::Eq => ord == Ordering::Equal,
            Op::Ne => ord != Ordering::Equal,
            Op::Lt => ord == Ordering::Less,
            Op::Le => ord != Ordering::Greater,
            Op::Gt => ord == Ordering::Greater,
            Op::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Bool(bool),
    Error(EvalError),
    /// Lower-cased text, possibly with wildcards.
    Text(String),
    Blank,
}

/// A compiled `*IF` criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct CriteriaMatcher {
    op: Op,
    operand: Operand,
}

impl CriteriaMatcher {
    pub fn new(criterion: &CellValue) -> Self {
        let operand = match criterion {
            CellValue::Number(n) => Operand::Number(*n),
            CellValue::Bool(b) => Operand::Bool(*b),
            CellValue::Error(e) => Operand::Error(*e),
            CellValue::Empty => Operand::Blank,
            CellValue::Text(s) => return Self::parse(s),
        };
        Self { op: Op::Eq, operand }
    }

    fn parse(text: &str) -> Self {
        let (op, rest) = [
            ("<>", Op::Ne),
            (">=", Op::Ge),
            ("<=", Op::Le),
            ("=", Op::Eq),
            (">", Op::Gt),
            ("<", Op::Lt),
        ]
        .iter()
        .find_map(|(prefix, op)| text.strip_prefix(*prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, text));

        let operand = if rest.is_empty() {
            Operand::Blank
        } else if let Some(n) = parse_number(rest) {
            Operand::Number(n)
        } else if rest.eq_ignore_ascii_case("TRUE") {
            Operand::Bool(true)
        } else if rest.eq_ignore_ascii_case("FALSE") {
            Operand::Bool(false)
        } else if let Some(e) = EvalError::from_code(rest) {
            Operand::Error(e)
        } else {
            Operand::Text(rest.to_lowercase())
        };
        Self { op, operand }
    }

    /// Whether a cell value satisfies the criterion.
    pub fn matches(&self, value: &CellValue) -> bool {
        match (&self.operand, value) {
            (Operand::Blank, v) => {
                let blank = matches!(v, CellValue::Empty) || matches!(v, CellValue::Text(s) if s.is_empty());
                match self.op {
                    Op::Ne => !blank,
                    _ => blank,
                }
            }
            (Operand::Number(n), CellValue::Number(x)) => {
                x.partial_cmp(n).map_or(false, |ord| self.op.accepts(ord))
            }
            // Numeric text in the range matches numeric criteria for equality.
            (Operand::Number(n), CellValue::Text(s)) if self.op == Op::Eq => {
                parse_number(s).map_or(false, |x| x == *n)
            }
            (Operand::Bool(b), CellValue::Bool(x)) => self.op.accepts(x.cmp(b)),
            (Operand::Error(e), CellValue::Error(x)) => self.op.accepts(if e == x {
                Ordering::Equal
            } else {
                Ordering::Less
            }),
            (Operand::Text(pattern), CellValue::Text(s)) => match self.op {
                Op::Eq => wildcard_match(pattern, &s.to_lowercase()),
                Op::Ne => !wildcard_match(pattern, &s.to_lowercase()),
                op => op.accepts(s.to_lowercase().as_str().cmp(pattern.as_str())),
            },
            // Values of another type only satisfy `<>`.
            _ => self.op == Op::Ne,
        }
    }
}

/// Glob match with `*` (any run), `?` (any one char) and `~` escaping the
/// next character. Both sides are expected lower-cased.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    #[derive(Clone, Copy)]
    enum Tok {
        Any,
        One,
        Lit(char),
    }

    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        toks.push(match c {
            '*' => Tok::Any,
            '?' => Tok::One,
            '~' => Tok::Lit(chars.next().unwrap_or('~')),
            c => Tok::Lit(c),
        });
    }
    let text: Vec<char> = text.chars().collect();

    // Greedy match with single-star backtracking.
    let (mut t, mut p) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match toks.get(p) {
            Some(Tok::One) => {
                t += 1;
                p += 1;
            }
            Some(Tok::Lit(c)) if *c == text[t] => {
                t += 1;
                p += 1;
            }
            Some(Tok::Any) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    toks[p..].iter().all(|tok| matches!(tok, Tok::Any))
}
