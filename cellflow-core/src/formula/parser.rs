//! Formula parser
//!
//! A recursive descent parser with Excel's operator precedence, lowest first:
//!
//! 1. comparison (`=`, `<>`, `<`, `<=`, `>`, `>=`)
//! 2. concatenation (`&`)
//! 3. addition and subtraction
//! 4. multiplication and division
//! 5. exponentiation (`^`, left-associative)
//! 6. prefix `-`/`+`
//! 7. postfix `%`
//!
//! Prefix negation binds tighter than `^`, so `-2^2` is 4, as in Excel.
//!
//! The parser is a pure function of its input: it never touches engine
//! state, and sheet names are resolved through a `SheetResolver`.

use crate::cell::{
    letters_to_col, CellRef, CellValue, EvalError, NoSheets, RangeRef, SheetId, SheetResolver,
    MAX_ROWS,
};
use crate::error::ParseError;

use super::ast::{BinaryOp, Expr, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};

/// Limits applied while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseLimits {
    pub max_len: usize,
    pub max_nesting: usize,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_len: 8_192,
            max_nesting: 64,
        }
    }
}

/// Parse a formula (`=...`) entered in `current`.
///
/// Unqualified references resolve to `current`'s sheet. Sheet-qualified
/// references cannot be resolved without a sheet table and become `#REF!`;
/// use [`parse_with`] to supply one.
pub fn parse(text: &str, current: CellRef) -> Result<Expr, ParseError> {
    parse_with(text, current, &NoSheets, ParseLimits::default())
}

/// Parse a formula with an explicit sheet resolver and limits.
pub fn parse_with(
    text: &str,
    current: CellRef,
    sheets: &dyn SheetResolver,
    limits: ParseLimits,
) -> Result<Expr, ParseError> {
    let body = text
        .trim_start()
        .strip_prefix('=')
        .ok_or_else(|| ParseError::new(0, "formula must start with '='"))?;

    if body.len() > limits.max_len {
        return Err(ParseError::new(
            limits.max_len,
            format!("formula longer than {} bytes", limits.max_len),
        ));
    }
    if body.trim().is_empty() {
        return Err(ParseError::new(0, "empty formula"));
    }

    let tokens = tokenize(body)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        sheet: current.sheet,
        sheets,
        depth: 0,
        max_depth: limits.max_nesting,
    };
    let expr = parser.expression()?;

    let trailing = parser.peek();
    if trailing.token != Token::Eof {
        let message = match trailing.token {
            Token::RightParen => "unbalanced ')'".to_string(),
            ref other => format!("unexpected {} after expression", other.describe()),
        };
        return Err(ParseError::new(trailing.pos, message));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    index: usize,
    sheet: SheetId,
    sheets: &'a dyn SheetResolver,
    depth: usize,
    max_depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> &Spanned {
        // The token stream always ends with Eof, and we never advance past it.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, n: usize) -> &Token {
        &self.tokens[(self.index + n).min(self.tokens.len() - 1)].token
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.peek().clone();
        if tok.token != Token::Eof {
            self.index += 1;
        }
        tok
    }

    fn eat(&mut self, token: &Token) -> bool {
        if &self.peek().token == token {
            self.advance();
            true
        } else {
            false
        }
    }

    fn unexpected<T>(&self, expected: &str) -> Result<T, ParseError> {
        let tok = self.peek();
        Err(ParseError::new(
            tok.pos,
            format!("expected {expected}, found {}", tok.token.describe()),
        ))
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(ParseError::new(
                self.peek().pos,
                format!("formula nested deeper than {} levels", self.max_depth),
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    // === Precedence levels ===

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.concat()?;
        loop {
            let op = match self.peek().token {
                Token::Equal => BinaryOp::Eq,
                Token::NotEqual => BinaryOp::Ne,
                Token::Less => BinaryOp::Lt,
                Token::LessEqual => BinaryOp::Le,
                Token::Greater => BinaryOp::Gt,
                Token::GreaterEqual => BinaryOp::Ge,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.concat()?;
            left = binary(op, left, right);
        }
    }

    fn concat(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.additive()?;
        while self.eat(&Token::Ampersand) {
            let right = self.additive()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek().token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek().token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.power()?;
            left = binary(op, left, right);
        }
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.unary()?;
        while self.eat(&Token::Caret) {
            let right = self.unary()?;
            left = binary(BinaryOp::Pow, left, right);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        let op = match self.peek().token {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            _ => return self.postfix(),
        };
        self.advance();
        self.enter()?;
        let operand = self.unary()?;
        self.leave();
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary()?;
        while self.eat(&Token::Percent) {
            expr = Expr::Unary {
                op: UnaryOp::Percent,
                operand: Box::new(expr),
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        let tok = self.peek().clone();
        match tok.token {
            Token::Number(n) => {
                self.advance();
                Ok(Expr::Literal(CellValue::Number(n)))
            }
            Token::Text(s) => {
                self.advance();
                Ok(Expr::Literal(CellValue::Text(s)))
            }
            Token::Error(e) => {
                self.advance();
                Ok(Expr::Literal(CellValue::Error(e)))
            }
            Token::LeftParen => {
                self.advance();
                self.enter()?;
                let inner = self.expression()?;
                self.leave();
                if !self.eat(&Token::RightParen) {
                    return Err(ParseError::new(tok.pos, "unbalanced '('"));
                }
                Ok(inner)
            }
            Token::Sheet(name) => {
                self.advance();
                let sheet = self.sheets.resolve_sheet(&name);
                let expr = self.reference(sheet.unwrap_or(self.sheet))?;
                match sheet {
                    Some(_) => Ok(expr),
                    None => Ok(Expr::Literal(CellValue::Error(EvalError::Reference))),
                }
            }
            Token::Ident(ref name) => {
                if *self.peek_at(1) == Token::LeftParen {
                    let name = name.to_uppercase();
                    self.advance();
                    self.call(name)
                } else if name.eq_ignore_ascii_case("TRUE") && *self.peek_at(1) != Token::Colon {
                    self.advance();
                    Ok(Expr::Literal(CellValue::Bool(true)))
                } else if name.eq_ignore_ascii_case("FALSE") && *self.peek_at(1) != Token::Colon {
                    self.advance();
                    Ok(Expr::Literal(CellValue::Bool(false)))
                } else if is_cell_like(name)
                    || (*self.peek_at(1) == Token::Colon && whole_column(name).is_some())
                {
                    self.reference(self.sheet)
                } else {
                    // Unknown names (defined names are not supported).
                    self.advance();
                    Ok(Expr::Literal(CellValue::Error(EvalError::NameUnknown)))
                }
            }
            Token::Eof => self.unexpected("an expression"),
            Token::RightParen => Err(ParseError::new(tok.pos, "unbalanced ')'")),
            _ => self.unexpected("an expression"),
        }
    }

    /// Cell (`A1`), range (`A1:B2`) or whole-column range (`A:C`) on `sheet`.
    fn reference(&mut self, sheet: SheetId) -> Result<Expr, ParseError> {
        let start = self.advance();
        let Token::Ident(first) = start.token else {
            return Err(ParseError::new(start.pos, "expected a cell reference after sheet name"));
        };

        if !self.eat(&Token::Colon) {
            return match CellRef::parse_a1(sheet, &first) {
                Some(cell) => Ok(Expr::Cell(cell)),
                None => Err(ParseError::new(start.pos, format!("invalid cell reference '{first}'"))),
            };
        }

        // The end of a range may repeat the sheet qualifier.
        if let Token::Sheet(_) = self.peek().token {
            self.advance();
        }
        let end = self.advance();
        let Token::Ident(second) = end.token else {
            return Err(ParseError::new(end.pos, "empty range: expected a reference after ':'"));
        };

        if let (Some(a), Some(b)) = (whole_column(&first), whole_column(&second)) {
            let range = RangeRef::from_corners(
                CellRef::new(sheet, 0, a.min(b)),
                CellRef::new(sheet, MAX_ROWS - 1, a.max(b)),
            );
            return range
                .map(Expr::Range)
                .ok_or_else(|| ParseError::new(start.pos, "invalid column range"));
        }

        let (Some(a), Some(b)) = (
            CellRef::parse_a1(sheet, &first),
            CellRef::parse_a1(sheet, &second),
        ) else {
            return Err(ParseError::new(
                start.pos,
                format!("invalid range '{first}:{second}'"),
            ));
        };
        RangeRef::from_corners(a, b)
            .map(Expr::Range)
            .ok_or_else(|| ParseError::new(start.pos, "range corners on different sheets"))
    }

    fn call(&mut self, name: String) -> Result<Expr, ParseError> {
        let open = self.advance();
        debug_assert_eq!(open.token, Token::LeftParen);
        self.enter()?;

        let mut args = Vec::new();
        if !self.eat(&Token::RightParen) {
            loop {
                // Omitted arguments, as in IF(A1,,0), are empty values.
                let arg = match self.peek().token {
                    Token::Comma | Token::RightParen => Expr::Literal(CellValue::Empty),
                    _ => self.expression()?,
                };
                args.push(arg);

                if self.eat(&Token::Comma) {
                    continue;
                }
                if self.eat(&Token::RightParen) {
                    break;
                }
                if self.peek().token == Token::Eof {
                    return Err(ParseError::new(open.pos, format!("unbalanced '(' in call to {name}")));
                }
                return self.unexpected("',' or ')'");
            }
        }

        self.leave();
        Ok(Expr::Call { name, args })
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Letters followed by digits, with optional `$` markers.
fn is_cell_like(name: &str) -> bool {
    let trimmed = name.replace('$', "");
    let letters = trimmed.bytes().take_while(u8::is_ascii_alphabetic).count();
    letters > 0
        && letters < trimmed.len()
        && trimmed[letters..].bytes().all(|b| b.is_ascii_digit())
}

/// Column letters alone (`A`, `$C`), as used in `A:C`.
fn whole_column(name: &str) -> Option<u32> {
    let letters = name.strip_prefix('$').unwrap_or(name);
    if letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        letters_to_col(letters)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::SheetTable;

    fn here() -> CellRef {
        CellRef::new(SheetId(0), 0, 0)
    }

    fn cell(a1: &str) -> CellRef {
        CellRef::parse_a1(SheetId(0), a1).unwrap()
    }

    fn num(n: f64) -> Expr {
        Expr::Literal(CellValue::Number(n))
    }

    #[test]
    fn parses_arithmetic_with_precedence() {
        let expr = parse("=1+2*3", here()).unwrap();
        assert_eq!(
            expr,
            binary(BinaryOp::Add, num(1.0), binary(BinaryOp::Mul, num(2.0), num(3.0)))
        );
    }

    #[test]
    fn negation_binds_tighter_than_power() {
        let expr = parse("=-2^2", here()).unwrap();
        let neg = Expr::Unary {
            op: UnaryOp::Neg,
            operand: Box::new(num(2.0)),
        };
        assert_eq!(expr, binary(BinaryOp::Pow, neg, num(2.0)));
    }

    #[test]
    fn comparison_is_lowest_precedence() {
        let expr = parse("=A1&\"x\"=\"5x\"", here()).unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Eq, left, .. } => {
                assert!(matches!(*left, Expr::Binary { op: BinaryOp::Concat, .. }));
            }
            other => panic!("unexpected tree: {other:?}"),
        }
    }

    #[test]
    fn parses_ranges_and_calls_case_insensitively() {
        let expr = parse("=sum(A1:B10, c3)", here()).unwrap();
        let range = RangeRef::from_corners(cell("A1"), cell("B10")).unwrap();
        assert_eq!(
            expr,
            Expr::Call {
                name: "SUM".into(),
                args: vec![Expr::Range(range), Expr::Cell(cell("C3"))],
            }
        );
    }

    #[test]
    fn whole_column_ranges_span_every_row() {
        let Expr::Range(range) = parse("=A:B", here()).unwrap() else {
            panic!("expected a range");
        };
        assert_eq!(range.start_row, 0);
        assert_eq!(range.end_row, MAX_ROWS - 1);
        assert_eq!((range.start_col, range.end_col), (0, 1));
    }

    #[test]
    fn omitted_arguments_are_empty() {
        let expr = parse("=IF(A1,,2)", here()).unwrap();
        let Expr::Call { args, .. } = expr else {
            panic!("expected a call");
        };
        assert_eq!(args[1], Expr::Literal(CellValue::Empty));
    }

    #[test]
    fn sheet_qualified_references_resolve_through_table() {
        let mut sheets = SheetTable::new();
        sheets.add("Sheet1");
        let data = sheets.add("Data");

        let expr = parse_with("='data'!B2+Data!$C$3", here(), &sheets, ParseLimits::default())
            .unwrap();
        let Expr::Binary { left, right, .. } = expr else {
            panic!("expected a binary expression");
        };
        assert_eq!(*left, Expr::Cell(CellRef::new(data, 1, 1)));
        assert_eq!(*right, Expr::Cell(CellRef::new(data, 2, 2)));
    }

    #[test]
    fn unknown_sheets_and_names_become_error_literals() {
        assert_eq!(
            parse("=Nowhere!A1", here()).unwrap(),
            Expr::Literal(CellValue::Error(EvalError::Reference))
        );
        assert_eq!(
            parse("=foo", here()).unwrap(),
            Expr::Literal(CellValue::Error(EvalError::NameUnknown))
        );
    }

    #[test]
    fn reports_malformed_syntax_with_position() {
        let err = parse("=(1+2", here()).unwrap_err();
        assert_eq!(err.position, 0);
        assert!(err.message.contains("unbalanced"));

        let err = parse("=1+2)", here()).unwrap_err();
        assert_eq!(err.position, 3);

        let err = parse("=SUM(A1:)", here()).unwrap_err();
        assert!(err.message.contains("empty range"));

        assert!(parse("=1+", here()).is_err());
        assert!(parse("=", here()).is_err());
        assert!(parse("1+1", here()).is_err());
        assert!(parse("=SUM(1 2)", here()).is_err());
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let deep = format!("={}1{}", "(".repeat(10), ")".repeat(10));
        let limits = ParseLimits {
            max_len: 1_000,
            max_nesting: 5,
        };
        assert!(parse_with(&deep, here(), &NoSheets, limits).is_err());
        assert!(parse(&deep, here()).is_ok());
    }

    #[test]
    fn error_marker_before_non_ascii_text_is_rejected() {
        assert!(parse("=#abé", here()).is_err());
        assert!(parse("=1+#N/é", here()).is_err());
    }
}
