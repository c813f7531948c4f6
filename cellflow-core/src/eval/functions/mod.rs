//! Built-in spreadsheet functions
//!
//! Functions live in a registry keyed by upper-cased name, so hosts can add
//! their own next to the built-ins. Every function is pure: it receives its
//! evaluated arguments and returns a value or an `EvalError`.
//!
//! IF, IFERROR and IFNA are not here; they must not evaluate the branch they
//! do not take, so the evaluator handles them directly.

mod criteria;
mod info;
mod logical;
mod lookup;
mod math;
mod text;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::cell::{CellValue, EvalError};

use super::coerce::to_number;
use super::context::RangeView;

pub use criteria::CriteriaMatcher;

pub(crate) use math::power;

/// An evaluated function argument.
///
/// Cell and range references arrive as `Range` so functions can tell a
/// referenced value from a typed constant: `SUM(A1)` skips text in A1, while
/// `SUM("5")` coerces the literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Value(CellValue),
    Range(RangeView),
}

impl Arg {
    /// The argument as a single value. A one-cell range yields its value;
    /// larger ranges are `#VALUE!` in scalar position.
    pub fn scalar(&self) -> CellValue {
        match self {
            Arg::Value(v) => v.clone(),
            Arg::Range(view) if view.area() == 1 => view.get(0, 0).clone(),
            Arg::Range(_) => CellValue::Error(EvalError::ValueType),
        }
    }

    /// Whether this is a reference rather than a constant.
    pub fn is_reference(&self) -> bool {
        matches!(self, Arg::Range(_))
    }
}

/// Signature of a function implementation.
pub type FunctionImpl = Arc<dyn Fn(&[Arg]) -> Result<CellValue, EvalError> + Send + Sync>;

/// A registered function.
#[derive(Clone)]
pub struct FunctionDef {
    /// Upper-cased name.
    pub name: String,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    /// When false, an error constant among the arguments is returned as the
    /// result without calling the implementation.
    pub accepts_errors: bool,
    pub implementation: FunctionImpl,
}

impl FunctionDef {
    pub fn accepts_arg_count(&self, n: usize) -> bool {
        n >= self.min_args && self.max_args.map_or(true, |max| n <= max)
    }
}

impl fmt::Debug for FunctionDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDef")
            .field("name", &self.name)
            .field("min_args", &self.min_args)
            .field("max_args", &self.max_args)
            .field("accepts_errors", &self.accepts_errors)
            .finish()
    }
}

/// Function registry.
#[derive(Debug, Clone)]
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDef>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl FunctionRegistry {
    /// A registry with no functions at all.
    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry with every built-in function.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        math::register(&mut registry);
        logical::register(&mut registry);
        info::register(&mut registry);
        lookup::register(&mut registry);
        criteria::register(&mut registry);
        text::register(&mut registry);
        registry
    }

    /// Register (or replace) a function.
    pub fn register<F>(&mut self, name: &str, min_args: usize, max_args: Option<usize>, f: F)
    where
        F: Fn(&[Arg]) -> Result<CellValue, EvalError> + Send + Sync + 'static,
    {
        self.insert(name, min_args, max_args, false, f);
    }

    pub(crate) fn insert<F>(
        &mut self,
        name: &str,
        min_args: usize,
        max_args: Option<usize>,
        accepts_errors: bool,
        f: F,
    ) where
        F: Fn(&[Arg]) -> Result<CellValue, EvalError> + Send + Sync + 'static,
    {
        let name = name.to_uppercase();
        self.functions.insert(
            name.clone(),
            FunctionDef {
                name,
                min_args,
                max_args,
                accepts_errors,
                implementation: Arc::new(f),
            },
        );
    }

    /// Look up a function by name, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&FunctionDef> {
        match self.functions.get(name) {
            Some(def) => Some(def),
            None => self.functions.get(&name.to_uppercase()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

// === Shared argument helpers ===

/// Numbers from aggregate arguments, spreadsheet style: constants are
/// coerced (bad text is `#VALUE!`), referenced cells count only when they
/// hold numbers, and errors anywhere propagate.
pub(crate) fn numbers(args: &[Arg]) -> Result<Vec<f64>, EvalError> {
    let mut out = Vec::new();
    for arg in args {
        match arg {
            Arg::Value(v) => out.push(to_number(v)?),
            Arg::Range(view) => {
                for value in view.values() {
                    match value {
                        CellValue::Number(n) => out.push(*n),
                        CellValue::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
        }
    }
    Ok(out)
}

/// Scalar argument `i` as a number; missing arguments use `default`.
pub(crate) fn number_arg(args: &[Arg], i: usize, default: f64) -> Result<f64, EvalError> {
    match args.get(i) {
        Some(arg) => to_number(&arg.scalar()),
        None => Ok(default),
    }
}

/// Range argument `i`; constants are not ranges.
pub(crate) fn range_arg(args: &[Arg], i: usize) -> Result<&RangeView, EvalError> {
    match args.get(i) {
        Some(Arg::Range(view)) => Ok(view),
        Some(Arg::Value(CellValue::Error(e))) => Err(*e),
        _ => Err(EvalError::ValueType),
    }
}
