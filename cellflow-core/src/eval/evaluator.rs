//! Expression evaluation.
//!
//! Walks an `Expr` against the pass context and the store. Spreadsheet
//! errors are values and flow through operators like any other result; the
//! only ways out of a walk are an exhausted step budget (the cell becomes
//! `#TIMEOUT!`) and a store failure (reported to the caller).

use smallvec::SmallVec;

use crate::cell::{CellRef, CellValue, EvalError, RangeRef};
use crate::error::StoreError;
use crate::formula::{BinaryOp, Expr, UnaryOp};
use crate::store::CellStore;

use super::coerce::{compare, to_bool, to_number, to_text};
use super::context::{EvaluationContext, RangeView};
use super::functions::{power, Arg, FunctionRegistry};

/// Why a walk stopped early.
enum Halt {
    Timeout,
    Store(StoreError),
}

impl From<StoreError> for Halt {
    fn from(e: StoreError) -> Self {
        Halt::Store(e)
    }
}

type Flow<T> = Result<T, Halt>;

/// Return early with the value if it is an error.
macro_rules! propagate {
    ($value:expr) => {
        match $value {
            CellValue::Error(e) => return Ok(CellValue::Error(e)),
            other => other,
        }
    };
}

/// Evaluate one formula with a fresh step budget.
///
/// Returns the cell's new value. `Err` only when the store itself fails.
pub fn evaluate(
    expr: &Expr,
    ctx: &mut EvaluationContext,
    store: &dyn CellStore,
    functions: &FunctionRegistry,
) -> Result<CellValue, StoreError> {
    ctx.begin_cell();
    let mut evaluator = Evaluator {
        ctx,
        store,
        functions,
    };
    match evaluator.eval(expr) {
        // A formula showing a blank cell shows 0.
        Ok(CellValue::Empty) => Ok(CellValue::Number(0.0)),
        Ok(value) => Ok(value),
        Err(Halt::Timeout) => Ok(CellValue::Error(EvalError::Timeout)),
        Err(Halt::Store(e)) => Err(e),
    }
}

struct Evaluator<'a> {
    ctx: &'a mut EvaluationContext,
    store: &'a dyn CellStore,
    functions: &'a FunctionRegistry,
}

impl Evaluator<'_> {
    fn charge(&mut self, n: usize) -> Flow<()> {
        if self.ctx.charge(n) {
            Ok(())
        } else {
            Err(Halt::Timeout)
        }
    }

    fn eval(&mut self, expr: &Expr) -> Flow<CellValue> {
        self.charge(1)?;
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Cell(cell) => Ok(self.ctx.read(self.store, cell)?),
            // A multi-cell range has no single value.
            Expr::Range(range) if range.area() == 1 => Ok(self.ctx.read(self.store, &range.start())?),
            Expr::Range(_) => Ok(CellValue::Error(EvalError::ValueType)),
            Expr::Unary { op, operand } => {
                let value = propagate!(self.eval(operand)?);
                Ok(unary(*op, &value))
            }
            Expr::Binary { op, left, right } => {
                let left = propagate!(self.eval(left)?);
                let right = propagate!(self.eval(right)?);
                Ok(binary(*op, &left, &right))
            }
            Expr::Call { name, args } => self.call(name, args),
        }
    }

    fn call(&mut self, name: &str, args: &[Expr]) -> Flow<CellValue> {
        match name {
            "IF" => return self.eval_if(args),
            "IFERROR" => return self.eval_if_error(args, |_| true),
            "IFNA" => return self.eval_if_error(args, |e| e == EvalError::NotAvailable),
            _ => {}
        }

        let functions = self.functions;
        let Some(def) = functions.get(name) else {
            return Ok(CellValue::Error(EvalError::NameUnknown));
        };
        if !def.accepts_arg_count(args.len()) {
            return Ok(CellValue::Error(EvalError::ValueType));
        }

        let mut values: SmallVec<[Arg; 4]> = SmallVec::with_capacity(args.len());
        for arg in args {
            let arg = self.argument(arg)?;
            if !def.accepts_errors {
                if let Arg::Value(CellValue::Error(e)) = arg {
                    return Ok(CellValue::Error(e));
                }
            }
            values.push(arg);
        }

        let result = match (def.implementation)(&values) {
            Ok(CellValue::Number(n)) => CellValue::number(n),
            Ok(value) => value,
            Err(e) => CellValue::Error(e),
        };
        Ok(result)
    }

    /// Evaluate a function argument. References stay references so that
    /// functions can treat referenced cells differently from constants.
    fn argument(&mut self, expr: &Expr) -> Flow<Arg> {
        match expr {
            Expr::Range(range) => Ok(Arg::Range(self.range(range)?)),
            Expr::Cell(cell) => {
                self.charge(1)?;
                let value = self.ctx.read(self.store, cell)?;
                Ok(Arg::Range(RangeView::from_values(single_cell(cell), [(*cell, value)])))
            }
            other => Ok(Arg::Value(self.eval(other)?)),
        }
    }

    fn range(&mut self, range: &RangeRef) -> Flow<RangeView> {
        self.charge(1)?;
        let view = self.ctx.read_range(self.store, range)?;
        // Work scales with the cells that are actually there.
        self.charge(view.non_empty())?;
        Ok(view)
    }

    /// `IF(condition, then, [else])`; only the chosen branch is evaluated.
    fn eval_if(&mut self, args: &[Expr]) -> Flow<CellValue> {
        if !(2..=3).contains(&args.len()) {
            return Ok(CellValue::Error(EvalError::ValueType));
        }
        let condition = propagate!(self.eval(&args[0])?);
        let condition = match to_bool(&condition) {
            Ok(b) => b,
            Err(e) => return Ok(CellValue::Error(e)),
        };
        match (condition, args.get(2)) {
            (true, _) => self.eval(&args[1]),
            (false, Some(otherwise)) => self.eval(otherwise),
            (false, None) => Ok(CellValue::Bool(false)),
        }
    }

    /// `IFERROR(value, fallback)` and `IFNA`; the fallback is evaluated only
    /// when the value is an error `catches` accepts.
    fn eval_if_error(&mut self, args: &[Expr], catches: impl Fn(EvalError) -> bool) -> Flow<CellValue> {
        if args.len() != 2 {
            return Ok(CellValue::Error(EvalError::ValueType));
        }
        match self.eval(&args[0])? {
            CellValue::Error(e) if catches(e) => self.eval(&args[1]),
            value => Ok(value),
        }
    }
}

fn single_cell(cell: &CellRef) -> RangeRef {
    RangeRef {
        sheet: cell.sheet,
        start_row: cell.row,
        start_col: cell.col,
        end_row: cell.row,
        end_col: cell.col,
    }
}

fn unary(op: UnaryOp, value: &CellValue) -> CellValue {
    match op {
        UnaryOp::Plus => value.clone(),
        UnaryOp::Neg => numeric(value, |n| CellValue::number(-n)),
        UnaryOp::Percent => numeric(value, |n| CellValue::number(n / 100.0)),
    }
}

fn numeric(value: &CellValue, f: impl FnOnce(f64) -> CellValue) -> CellValue {
    match to_number(value) {
        Ok(n) => f(n),
        Err(e) => CellValue::Error(e),
    }
}

/// Apply a binary operator to two non-error operands.
fn binary(op: BinaryOp, left: &CellValue, right: &CellValue) -> CellValue {
    if op.is_comparison() {
        let ord = compare(left, right);
        let result = match op {
            BinaryOp::Eq => ord.is_eq(),
            BinaryOp::Ne => ord.is_ne(),
            BinaryOp::Lt => ord.is_lt(),
            BinaryOp::Le => ord.is_le(),
            BinaryOp::Gt => ord.is_gt(),
            _ => ord.is_ge(),
        };
        return CellValue::Bool(result);
    }

    if op == BinaryOp::Concat {
        return match (to_text(left), to_text(right)) {
            (Ok(a), Ok(b)) => CellValue::Text(a + &b),
            (Err(e), _) | (_, Err(e)) => CellValue::Error(e),
        };
    }

    let (x, y) = match (to_number(left), to_number(right)) {
        (Ok(x), Ok(y)) => (x, y),
        (Err(e), _) | (_, Err(e)) => return CellValue::Error(e),
    };
    let result = match op {
        BinaryOp::Add => Ok(CellValue::number(x + y)),
        BinaryOp::Sub => Ok(CellValue::number(x - y)),
        BinaryOp::Mul => Ok(CellValue::number(x * y)),
        BinaryOp::Div if y == 0.0 => Err(EvalError::DivideByZero),
        BinaryOp::Div => Ok(CellValue::number(x / y)),
        _ => power(x, y),
    };
    result.unwrap_or_else(CellValue::Error)
}
