use std::sync::Arc;

use crate::{
    ast::Location,
    error::{ParseError, ParseErrorKind},
    expr::token::{Sym, Tok},
    value::Value,
};

type LexResult<T> = Result<T, ParseError>;

/// Scans the parameter text of a single directive into expression tokens.
pub(crate) struct ExprLexer {
    chars: Vec<char>,
    pos: usize,
    row: usize,
    file_name: Option<Arc<str>>,
}

impl ExprLexer {
    pub(crate) fn new(input: &str, file_name: Option<Arc<str>>, row: usize) -> Self {
        Self {
            chars: input.chars().collect(),
            pos: 0,
            row,
            file_name,
        }
    }

    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(Location::new(self.file_name.clone(), self.row), kind)
    }

    fn peek_char(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_char_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos.saturating_add(offset)).copied()
    }

    fn advance(&mut self, len: usize) {
        self.pos = self.pos.saturating_add(len);
    }

    fn next_row(&mut self) {
        self.row = self.row.saturating_add(1);
    }

    fn slice(&self, start: usize, end: usize) -> String {
        self.chars.get(start..end).unwrap_or_default().iter().collect()
    }

    /// Tokenizes the whole input. The result always ends with an `Eof` token.
    pub(crate) fn scan(mut self) -> LexResult<Vec<Tok>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek_char() else {
                tokens.push(Tok::new(Sym::Eof, String::new(), self.row));
                return Ok(tokens);
            };
            let tok = if c.is_alphabetic() || c == '_' || c == '$' {
                self.scan_identifier()
            } else if c.is_ascii_digit() {
                self.scan_number()?
            } else if c == '"' || c == '\'' {
                self.scan_string(c)?
            } else {
                self.scan_operator(c)?
            };
            tokens.push(tok);
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            if c == '\n' {
                self.next_row();
            }
            self.advance(1);
        }
    }

    fn scan_identifier(&mut self) -> Tok {
        let start = self.pos;
        while let Some(c) = self.peek_char() {
            if c.is_alphanumeric() || c == '_' || c == '$' {
                self.advance(1);
            } else {
                break;
            }
        }
        let text = self.slice(start, self.pos);
        let sym = match text.as_str() {
            "true" => Sym::True,
            "false" => Sym::False,
            "null" => Sym::Null,
            _ => Sym::Id,
        };
        Tok::new(sym, text, self.row)
    }

    fn scan_operator(&mut self, c: char) -> LexResult<Tok> {
        let next = self.peek_char_at(1);
        let (sym, len) = match (c, next) {
            ('+', Some('+')) => (Sym::Inc, 2),
            ('+', _) => (Sym::Add, 1),
            ('-', Some('-')) => (Sym::Dec, 2),
            ('-', _) => (Sym::Sub, 1),
            ('*', _) => (Sym::Mul, 1),
            ('/', _) => (Sym::Div, 1),
            ('%', _) => (Sym::Mod, 1),
            ('=', Some('=')) => (Sym::Eq, 2),
            ('=', _) => (Sym::Assign, 1),
            ('!', Some('=')) => (Sym::Ne, 2),
            ('!', _) => (Sym::Not, 1),
            ('<', Some('=')) => (Sym::Le, 2),
            ('<', _) => (Sym::Lt, 1),
            ('>', Some('=')) => (Sym::Ge, 2),
            ('>', _) => (Sym::Gt, 1),
            ('&', Some('&')) => (Sym::And, 2),
            ('|', Some('|')) => (Sym::Or, 2),
            ('?', Some('?')) => (Sym::NullSafe, 2),
            ('?', _) => (Sym::Question, 1),
            (':', Some(':')) => (Sym::StaticMember, 2),
            (':', _) => (Sym::Colon, 1),
            ('.', Some('.')) => (Sym::Range, 2),
            ('.', _) => (Sym::Dot, 1),
            (',', _) => (Sym::Comma, 1),
            (';', _) => (Sym::Semicolon, 1),
            ('(', _) => (Sym::LParen, 1),
            (')', _) => (Sym::RParen, 1),
            ('[', _) => (Sym::LBrack, 1),
            (']', _) => (Sym::RBrack, 1),
            ('{', _) => (Sym::LBrace, 1),
            ('}', _) => (Sym::RBrace, 1),
            (other, _) => {
                return Err(self.make_error(ParseErrorKind::InvalidCharacter { at_char: other }));
            }
        };
        let text = self.slice(self.pos, self.pos.saturating_add(len));
        self.advance(len);
        Ok(Tok::new(sym, text, self.row))
    }

    fn scan_string(&mut self, quote: char) -> LexResult<Tok> {
        let row = self.row;
        self.advance(1);
        let mut text = String::new();
        loop {
            let Some(c) = self.peek_char() else {
                return Err(self.make_error(ParseErrorKind::unterminated("string literal")));
            };
            self.advance(1);
            match c {
                c if c == quote => break,
                '\\' => {
                    let Some(escaped) = self.peek_char() else {
                        return Err(self.make_error(ParseErrorKind::unterminated("string literal")));
                    };
                    self.advance(1);
                    text.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'b' => '\u{8}',
                        'f' => '\u{c}',
                        '0' => '\0',
                        '\\' | '"' | '\'' => escaped,
                        other => {
                            return Err(self.make_error(ParseErrorKind::Message(format!(
                                "Illegal escape sequence '\\{other}' in string literal"
                            ))));
                        }
                    });
                }
                '\n' => {
                    self.next_row();
                    text.push(c);
                }
                _ => text.push(c),
            }
        }
        Ok(Tok::new(Sym::Str, text, row))
    }

    fn scan_digits(&mut self, radix: u32) {
        while self.peek_char().is_some_and(|c| c.is_digit(radix)) {
            self.advance(1);
        }
    }

    fn invalid_number(&self, literal: &str, reason: &str) -> ParseError {
        self.make_error(ParseErrorKind::InvalidNumber {
            literal: literal.to_owned(),
            reason: reason.to_owned(),
        })
    }

    fn scan_number(&mut self) -> LexResult<Tok> {
        let start = self.pos;

        if self.peek_char() == Some('0') && matches!(self.peek_char_at(1), Some('x' | 'X')) {
            return self.scan_hex(start);
        }

        self.scan_digits(10);
        let mut fraction = false;
        let mut exponent = false;

        // "3.toString()" and "1..5" keep the '.' for the parser.
        if self.peek_char() == Some('.') && self.peek_char_at(1).is_some_and(|c| c.is_ascii_digit()) {
            fraction = true;
            self.advance(1);
            self.scan_digits(10);
        }

        if matches!(self.peek_char(), Some('e' | 'E')) {
            let digit_at = if matches!(self.peek_char_at(1), Some('+' | '-')) { 2 } else { 1 };
            if self.peek_char_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                exponent = true;
                self.advance(digit_at);
                self.scan_digits(10);
            }
        }

        let body = self.slice(start, self.pos);
        let suffix = self.peek_char().filter(|c| matches!(c, 'L' | 'l' | 'F' | 'f' | 'D' | 'd'));
        if suffix.is_some() {
            self.advance(1);
        }
        let literal = self.slice(start, self.pos);
        if self
            .peek_char()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '$')
        {
            return Err(self.invalid_number(&format!("{literal}{}", self.slice(self.pos, self.pos.saturating_add(1))), "unexpected character after number"));
        }

        let number = match suffix {
            Some('L' | 'l') => {
                if exponent {
                    return Err(self.invalid_number(&literal, "scientific notation cannot be a long"));
                }
                if fraction {
                    return Err(self.invalid_number(&literal, "a number with a fraction cannot be a long"));
                }
                Value::Long(self.parse_integral::<i64>(&body, &literal)?)
            }
            Some('F' | 'f') => {
                if exponent {
                    return Err(self.invalid_number(&literal, "scientific notation cannot be a float"));
                }
                Value::Float(
                    body.parse::<f32>()
                        .map_err(|e| self.invalid_number(&literal, &e.to_string()))?,
                )
            }
            Some(_) => Value::Double(
                body.parse::<f64>()
                    .map_err(|e| self.invalid_number(&literal, &e.to_string()))?,
            ),
            None if fraction || exponent => Value::Double(
                body.parse::<f64>()
                    .map_err(|e| self.invalid_number(&literal, &e.to_string()))?,
            ),
            None => Value::Int(self.parse_integral::<i32>(&body, &literal)?),
        };

        Ok(Tok {
            sym: Sym::Number,
            text: literal,
            number: Some(number),
            row: self.row,
        })
    }

    /// Parses decimal digits, or octal ones when there is a leading zero.
    fn parse_integral<T>(&self, digits: &str, literal: &str) -> LexResult<T>
    where
        T: TryFrom<i128>,
    {
        let (radix, digits) = match digits.strip_prefix('0') {
            Some(rest) if !rest.is_empty() => (8, rest),
            _ => (10, digits),
        };
        let wide = i128::from_str_radix(digits, radix).map_err(|_| {
            if radix == 8 {
                self.invalid_number(literal, "invalid octal digit")
            } else {
                self.invalid_number(literal, "invalid digits")
            }
        })?;
        T::try_from(wide).map_err(|_| {
            self.invalid_number(
                literal,
                if std::mem::size_of::<T>() == 4 {
                    "out of int range, use the L suffix for a long"
                } else {
                    "out of long range"
                },
            )
        })
    }

    fn scan_hex(&mut self, start: usize) -> LexResult<Tok> {
        self.advance(2);
        let digits_start = self.pos;
        self.scan_digits(16);
        let digits = self.slice(digits_start, self.pos);
        let long = matches!(self.peek_char(), Some('L' | 'l'));
        if long {
            self.advance(1);
        }
        let literal = self.slice(start, self.pos);
        if digits.is_empty() {
            return Err(self.invalid_number(&literal, "missing hex digits"));
        }
        if self
            .peek_char()
            .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.')
        {
            return Err(self.invalid_number(&literal, "unexpected character after hex number"));
        }
        let wide = u64::from_str_radix(&digits, 16)
            .map_err(|_| self.invalid_number(&literal, "out of long range"))?;
        // Hex literals may spell out the sign bit, 0xFFFFFFFF is -1.
        #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, reason = "two's complement hex literals")]
        let number = if long {
            Value::Long(wide as i64)
        } else if let Ok(narrow) = u32::try_from(wide) {
            Value::Int(narrow as i32)
        } else {
            return Err(self.invalid_number(&literal, "out of int range, use the L suffix for a long"));
        };
        Ok(Tok {
            sym: Sym::Number,
            text: literal,
            number: Some(number),
            row: self.row,
        })
    }
}
