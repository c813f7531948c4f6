//! Formula tokenizer.
//!
//! Splits formula text (without the leading `=`) into tokens, each tagged
//! with its byte offset for error reporting.

use crate::cell::EvalError;
use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Number(f64),
    Text(String),
    Error(EvalError),

    /// Function name, cell address, column letters or boolean keyword.
    Ident(String),

    /// Sheet qualifier, e.g. `Sheet2!` or `'My Sheet'!`, without the `!`.
    Sheet(String),

    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Percent,
    Ampersand,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Colon,
    Comma,
    LeftParen,
    RightParen,

    Eof,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Number(n) => format!("number {n}"),
            Token::Text(s) => format!("string \"{s}\""),
            Token::Error(e) => format!("error {e}"),
            Token::Ident(s) => format!("'{s}'"),
            Token::Sheet(s) => format!("sheet '{s}'"),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Star => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Caret => "'^'".into(),
            Token::Percent => "'%'".into(),
            Token::Ampersand => "'&'".into(),
            Token::Equal => "'='".into(),
            Token::NotEqual => "'<>'".into(),
            Token::Less => "'<'".into(),
            Token::LessEqual => "'<='".into(),
            Token::Greater => "'>'".into(),
            Token::GreaterEqual => "'>='".into(),
            Token::Colon => "':'".into(),
            Token::Comma => "','".into(),
            Token::LeftParen => "'('".into(),
            Token::RightParen => "')'".into(),
            Token::Eof => "end of formula".into(),
        }
    }
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, ParseError> {
    Lexer { input, pos: 0 }.run()
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn run(mut self) -> Result<Vec<Spanned>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let pos = self.pos;
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(Spanned { token, pos });
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Ok(Token::Eof);
        };

        let token = match c {
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '^' => Token::Caret,
            '%' => Token::Percent,
            '&' => Token::Ampersand,
            '=' => Token::Equal,
            ':' => Token::Colon,
            ',' => Token::Comma,
            '(' => Token::LeftParen,
            ')' => Token::RightParen,
            '<' => match self.peek() {
                Some('=') => {
                    self.bump();
                    Token::LessEqual
                }
                Some('>') => {
                    self.bump();
                    Token::NotEqual
                }
                _ => Token::Less,
            },
            '>' => {
                if self.peek() == Some('=') {
                    self.bump();
                    Token::GreaterEqual
                } else {
                    Token::Greater
                }
            }
            '"' => Token::Text(self.string_literal(start)?),
            '\'' => {
                let name = self.quoted_sheet(start)?;
                Token::Sheet(name)
            }
            '#' => self.error_literal(start)?,
            c if c.is_ascii_digit() || (c == '.' && self.peek().is_some_and(|d| d.is_ascii_digit())) => {
                self.number(start)?
            }
            c if is_ident_start(c) => {
                while self.peek().is_some_and(is_ident_char) {
                    self.bump();
                }
                let ident = self.input[start..self.pos].to_string();
                if self.peek() == Some('!') {
                    self.bump();
                    Token::Sheet(ident)
                } else {
                    Token::Ident(ident)
                }
            }
            other => {
                return Err(ParseError::new(start, format!("unexpected character '{other}'")));
            }
        };
        Ok(token)
    }

    /// Double-quoted string; `""` inside is an escaped quote.
    fn string_literal(&mut self, start: usize) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    out.push('"');
                }
                Some('"') => return Ok(out),
                Some(c) => out.push(c),
                None => return Err(ParseError::new(start, "unterminated string literal")),
            }
        }
    }

    /// Single-quoted sheet name followed by `!`; `''` is an escaped quote.
    fn quoted_sheet(&mut self, start: usize) -> Result<String, ParseError> {
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('\'') if self.peek() == Some('\'') => {
                    self.bump();
                    out.push('\'');
                }
                Some('\'') => break,
                Some(c) => out.push(c),
                None => return Err(ParseError::new(start, "unterminated sheet name")),
            }
        }
        if self.bump() != Some('!') {
            return Err(ParseError::new(self.pos, "expected '!' after quoted sheet name"));
        }
        if out.is_empty() {
            return Err(ParseError::new(start, "empty sheet name"));
        }
        Ok(out)
    }

    fn error_literal(&mut self, start: usize) -> Result<Token, ParseError> {
        let rest = &self.input[start..];
        for code in EvalError::CODES {
            if rest.get(..code.len()).is_some_and(|s| s.eq_ignore_ascii_case(code)) {
                self.pos = start + code.len();
                if let Some(kind) = EvalError::from_code(code) {
                    return Ok(Token::Error(kind));
                }
            }
        }
        Err(ParseError::new(start, "unknown error literal"))
    }

    fn number(&mut self, start: usize) -> Result<Token, ParseError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.bump();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let signed = matches!(self.peek_at(1), Some('+' | '-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..digit_at {
                    self.bump();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.bump();
                }
            }
        }
        let text = &self.input[start..self.pos];
        text.parse::<f64>()
            .map(Token::Number)
            .map_err(|_| ParseError::new(start, format!("invalid number '{text}'")))
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '$'
}
