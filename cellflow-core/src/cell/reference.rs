//! Cell and range references.
//!
//! Provides conversion between A1 notation (e.g. "B3", "AA100") and
//! zero-indexed coordinates, plus the rectangular `RangeRef` used for range
//! dependencies.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of rows in a sheet (Excel's limit).
pub const MAX_ROWS: u32 = 1_048_576;

/// Number of columns in a sheet (Excel's limit, column `XFD`).
pub const MAX_COLS: u32 = 16_384;

/// Identifier of a sheet within one engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SheetId(pub u32);

impl SheetId {
    /// Get the raw sheet index.
    pub fn raw(&self) -> u32 {
        self.0
    }
}

/// A single cell address, zero-indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub sheet: SheetId,
    pub row: u32,
    pub col: u32,
}

impl CellRef {
    pub fn new(sheet: SheetId, row: u32, col: u32) -> Self {
        Self { sheet, row, col }
    }

    /// Parse an A1-style address ("B3", "$AA$10") on the given sheet.
    ///
    /// Returns `None` for malformed text or coordinates outside the sheet.
    pub fn parse_a1(sheet: SheetId, text: &str) -> Option<Self> {
        let text = text.trim();
        let bytes = text.as_bytes();
        let mut i = 0;

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let letters_start = i;
        while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
            i += 1;
        }
        let letters = &text[letters_start..i];

        if bytes.get(i) == Some(&b'$') {
            i += 1;
        }
        let digits = &text[i..];
        if letters.is_empty() || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let col = letters_to_col(letters)?;
        let row = digits.parse::<u32>().ok()?.checked_sub(1)?;
        if row >= MAX_ROWS {
            return None;
        }
        Some(Self::new(sheet, row, col))
    }

    /// Render the address in A1 notation, without the sheet.
    pub fn to_a1(&self) -> String {
        format!("{}{}", col_to_letters(self.col), self.row + 1)
    }

    /// Move the address by a row/column offset, staying inside the sheet.
    pub fn offset(&self, rows: u32, cols: u32) -> Option<Self> {
        let row = self.row.checked_add(rows)?;
        let col = self.col.checked_add(cols)?;
        (row < MAX_ROWS && col < MAX_COLS).then(|| Self::new(self.sheet, row, col))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet.0 == 0 {
            write!(f, "{}", self.to_a1())
        } else {
            write!(f, "#{}!{}", self.sheet.0, self.to_a1())
        }
    }
}

/// A rectangular, inclusive span of cells on one sheet.
///
/// Always normalized so that `start` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RangeRef {
    pub sheet: SheetId,
    pub start_row: u32,
    pub start_col: u32,
    pub end_row: u32,
    pub end_col: u32,
}

impl RangeRef {
    /// Build a range from two corner cells, in any order.
    ///
    /// Returns `None` when the corners are on different sheets.
    pub fn from_corners(a: CellRef, b: CellRef) -> Option<Self> {
        if a.sheet != b.sheet {
            return None;
        }
        Some(Self {
            sheet: a.sheet,
            start_row: a.row.min(b.row),
            start_col: a.col.min(b.col),
            end_row: a.row.max(b.row),
            end_col: a.col.max(b.col),
        })
    }

    /// Top-left cell.
    pub fn start(&self) -> CellRef {
        CellRef::new(self.sheet, self.start_row, self.start_col)
    }

    /// Bottom-right cell.
    pub fn end(&self) -> CellRef {
        CellRef::new(self.sheet, self.end_row, self.end_col)
    }

    pub fn rows(&self) -> u32 {
        self.end_row - self.start_row + 1
    }

    pub fn cols(&self) -> u32 {
        self.end_col - self.start_col + 1
    }

    /// Number of cells covered, saturating for whole-sheet spans.
    pub fn area(&self) -> u64 {
        u64::from(self.rows()) * u64::from(self.cols())
    }

    /// Whether `cell` lies inside this range.
    pub fn contains(&self, cell: &CellRef) -> bool {
        cell.sheet == self.sheet
            && (self.start_row..=self.end_row).contains(&cell.row)
            && (self.start_col..=self.end_col).contains(&cell.col)
    }

    /// The cell at a row/column offset from the top-left corner.
    pub fn cell_at(&self, row_offset: u32, col_offset: u32) -> Option<CellRef> {
        if row_offset < self.rows() && col_offset < self.cols() {
            Some(CellRef::new(
                self.sheet,
                self.start_row + row_offset,
                self.start_col + col_offset,
            ))
        } else {
            None
        }
    }
}

impl fmt::Display for RangeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sheet.0 == 0 {
            write!(f, "{}:{}", self.start().to_a1(), self.end().to_a1())
        } else {
            write!(f, "#{}!{}:{}", self.sheet.0, self.start().to_a1(), self.end().to_a1())
        }
    }
}

/// Either a single cell or a range; what a formula can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reference {
    Cell(CellRef),
    Range(RangeRef),
}

impl Reference {
    /// Whether a write to `cell` affects anything reading this reference.
    pub fn covers(&self, cell: &CellRef) -> bool {
        match self {
            Reference::Cell(c) => c == cell,
            Reference::Range(r) => r.contains(cell),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Cell(c) => c.fmt(f),
            Reference::Range(r) => r.fmt(f),
        }
    }
}

/// Convert a zero-indexed column to letters (0 -> A, 25 -> Z, 26 -> AA).
pub fn col_to_letters(col: u32) -> String {
    let mut result = Vec::new();
    let mut n = u64::from(col) + 1;
    while n > 0 {
        n -= 1;
        result.push(b'A' + (n % 26) as u8);
        n /= 26;
    }
    result.reverse();
    String::from_utf8(result).unwrap_or_default()
}

/// Convert column letters to a zero-indexed column, case-insensitively.
///
/// Returns `None` for non-letters or columns past `XFD`.
pub fn letters_to_col(letters: &str) -> Option<u32> {
    if letters.is_empty() || letters.len() > 3 {
        return None;
    }
    let mut acc = 0u32;
    for c in letters.bytes() {
        if !c.is_ascii_alphabetic() {
            return None;
        }
        acc = acc * 26 + u32::from(c.to_ascii_uppercase() - b'A') + 1;
    }
    let col = acc - 1;
    (col < MAX_COLS).then_some(col)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S: SheetId = SheetId(0);

    #[test]
    fn parses_and_formats_a1() {
        let cell = CellRef::parse_a1(S, "B3").unwrap();
        assert_eq!((cell.row, cell.col), (2, 1));
        assert_eq!(cell.to_a1(), "B3");

        let wide = CellRef::parse_a1(S, "aa100").unwrap();
        assert_eq!((wide.row, wide.col), (99, 26));
        assert_eq!(wide.to_string(), "AA100");
    }

    #[test]
    fn absolute_markers_are_ignored() {
        assert_eq!(CellRef::parse_a1(S, "$C$7"), CellRef::parse_a1(S, "C7"));
        assert_eq!(CellRef::parse_a1(S, "C$7"), CellRef::parse_a1(S, "C7"));
    }

    #[test]
    fn rejects_out_of_bounds_and_garbage() {
        assert!(CellRef::parse_a1(S, "A0").is_none());
        assert!(CellRef::parse_a1(S, "XFE1").is_none());
        assert!(CellRef::parse_a1(S, "A1048577").is_none());
        assert!(CellRef::parse_a1(S, "1A").is_none());
        assert!(CellRef::parse_a1(S, "A").is_none());
    }

    #[test]
    fn column_letters_round_trip_at_boundaries() {
        assert_eq!(col_to_letters(0), "A");
        assert_eq!(col_to_letters(25), "Z");
        assert_eq!(col_to_letters(26), "AA");
        assert_eq!(col_to_letters(MAX_COLS - 1), "XFD");
        assert_eq!(letters_to_col("XFD"), Some(MAX_COLS - 1));
    }

    #[test]
    fn range_is_normalized_and_contains() {
        let a = CellRef::parse_a1(S, "B10").unwrap();
        let b = CellRef::parse_a1(S, "A1").unwrap();
        let range = RangeRef::from_corners(a, b).unwrap();

        assert_eq!(range.to_string(), "A1:B10");
        assert_eq!(range.area(), 20);
        assert!(range.contains(&CellRef::parse_a1(S, "A5").unwrap()));
        assert!(!range.contains(&CellRef::parse_a1(S, "C5").unwrap()));
        assert!(!range.contains(&CellRef::new(SheetId(1), 0, 0)));
    }

    #[test]
    fn ranges_across_sheets_are_rejected() {
        let a = CellRef::new(SheetId(0), 0, 0);
        let b = CellRef::new(SheetId(1), 1, 1);
        assert!(RangeRef::from_corners(a, b).is_none());
    }
}
