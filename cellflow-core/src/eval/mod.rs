//! Formula Evaluation
//!
//! - `context`: per-pass overlay of fresh values and the step budget
//! - `coerce`: explicit type coercions
//! - `functions`: the function registry and built-ins
//! - `evaluator`: the tree walk
//!
//! Evaluation never mutates the store. The engine records each result in
//! the pass context and commits them all at the end of the pass.

mod coerce;
mod context;
mod evaluator;
mod functions;

pub use coerce::{compare, to_bool, to_index, to_number, to_text};
pub use context::{EvaluationContext, RangeView};
pub use evaluator::evaluate;
pub use functions::{Arg, CriteriaMatcher, FunctionDef, FunctionImpl, FunctionRegistry};
