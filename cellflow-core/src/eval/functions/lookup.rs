//! Lookup functions: VLOOKUP, HLOOKUP, INDEX, MATCH.
//!
//! A miss is `#N/A`; an index outside the table is `#REF!`.

use std::cmp::Ordering;

use crate::cell::{CellValue, EvalError};
use crate::eval::coerce::{compare, to_bool, to_index, to_number};
use crate::eval::context::RangeView;

use super::{range_arg, Arg, FunctionRegistry};

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("VLOOKUP", 3, Some(4), |args| table_lookup(args, Axis::Vertical));
    registry.register("HLOOKUP", 3, Some(4), |args| table_lookup(args, Axis::Horizontal));
    registry.register("INDEX", 2, Some(3), index);
    registry.register("MATCH", 2, Some(3), match_position);
}

#[derive(Clone, Copy)]
enum Axis {
    Vertical,
    Horizontal,
}

/// A one-dimensional slice of a range: its length and its non-empty cells
/// by position, in order.
struct Slice<'a> {
    len: usize,
    cells: Vec<(usize, &'a CellValue)>,
}

impl<'a> Slice<'a> {
    fn of(view: &'a RangeView, axis: Axis, at: usize) -> Self {
        match axis {
            Axis::Vertical => Self { len: view.rows(), cells: view.column(at).collect() },
            Axis::Horizontal => Self { len: view.cols(), cells: view.row(at).collect() },
        }
    }

    /// First position holding no value.
    fn first_blank(&self) -> Option<usize> {
        let gap = self
            .cells
            .iter()
            .enumerate()
            .find(|(i, (pos, _))| pos != i)
            .map_or(self.cells.len(), |(i, _)| i);
        (gap < self.len).then_some(gap)
    }

    /// First position equal to `needle`, text compared case-insensitively.
    fn exact(&self, needle: &CellValue) -> Option<usize> {
        if needle.is_empty() {
            return self.first_blank();
        }
        self.cells
            .iter()
            .find(|(_, v)| same_type(v, needle) && compare(v, needle) == Ordering::Equal)
            .map(|(pos, _)| *pos)
    }

    /// Position of the last value not past `needle` in a sorted slice.
    ///
    /// With `Ordering::Less` the slice is ascending and the result is the
    /// largest value `<= needle`; with `Ordering::Greater` it is descending
    /// and the result is the smallest value `>= needle`. Values of another
    /// type are skipped.
    fn approximate(&self, needle: &CellValue, direction: Ordering) -> Option<usize> {
        if needle.is_empty() {
            return self.first_blank();
        }
        let mut best = None;
        for (pos, value) in &self.cells {
            if !same_type(value, needle) {
                continue;
            }
            match compare(value, needle) {
                Ordering::Equal => return Some(*pos),
                ord if ord == direction => best = Some(*pos),
                _ => break,
            }
        }
        best
    }
}

fn table_lookup(args: &[Arg], axis: Axis) -> Result<CellValue, EvalError> {
    let needle = args[0].scalar();
    if let CellValue::Error(e) = needle {
        return Err(e);
    }
    let table = range_arg(args, 1)?;
    let offset = to_index(&args[2].scalar())?;
    let approximate = match args.get(3) {
        Some(arg) => to_bool(&arg.scalar())?,
        None => true,
    };

    let width = match axis {
        Axis::Vertical => table.cols(),
        Axis::Horizontal => table.rows(),
    };
    if offset < 1 {
        return Err(EvalError::ValueType);
    }
    if offset > width {
        return Err(EvalError::Reference);
    }

    let keys = Slice::of(table, axis, 0);
    let hit = if approximate {
        keys.approximate(&needle, Ordering::Less)
    } else {
        keys.exact(&needle)
    }
    .ok_or(EvalError::NotAvailable)?;

    let value = match axis {
        Axis::Vertical => table.get(hit, offset - 1),
        Axis::Horizontal => table.get(offset - 1, hit),
    };
    Ok(value.clone())
}

fn index(args: &[Arg]) -> Result<CellValue, EvalError> {
    let table = range_arg(args, 0)?;
    let first = to_index(&args[1].scalar())?;
    let (row, col) = match args.get(2) {
        Some(arg) => (first, to_index(&arg.scalar())?),
        // One index into a vector follows the vector's direction.
        None if table.cols() == 1 => (first, 1),
        None if table.rows() == 1 => (1, first),
        // Selecting a whole row is not a single value.
        None => return Err(EvalError::ValueType),
    };
    if row == 0 || col == 0 {
        return Err(EvalError::ValueType);
    }
    if row > table.rows() || col > table.cols() {
        return Err(EvalError::Reference);
    }
    Ok(table.get(row - 1, col - 1).clone())
}

fn match_position(args: &[Arg]) -> Result<CellValue, EvalError> {
    let needle = args[0].scalar();
    if let CellValue::Error(e) = needle {
        return Err(e);
    }
    let haystack = range_arg(args, 1)?;
    let kind = match args.get(2) {
        Some(arg) => to_number(&arg.scalar())?,
        None => 1.0,
    };

    let values = if haystack.cols() == 1 {
        Slice::of(haystack, Axis::Vertical, 0)
    } else if haystack.rows() == 1 {
        Slice::of(haystack, Axis::Horizontal, 0)
    } else {
        return Err(EvalError::NotAvailable);
    };

    let hit = if kind == 0.0 {
        values.exact(&needle)
    } else if kind > 0.0 {
        values.approximate(&needle, Ordering::Less)
    } else {
        values.approximate(&needle, Ordering::Greater)
    }
    .ok_or(EvalError::NotAvailable)?;
    Ok(CellValue::Number((hit + 1) as f64))
}

fn same_type(a: &CellValue, b: &CellValue) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}
