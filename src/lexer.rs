use std::{collections::HashSet, sync::Arc};

use crate::{
    ast::Location,
    error::{ParseError, ParseErrorKind},
};

type LexResult<T> = Result<T, ParseError>;

/// Directive names that never take a parameter list.
const NO_PARAM_DIRECTIVES: [&str; 6] = ["else", "end", "break", "continue", "return", "default"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token {
    /// Literal text. Consecutive text, comments and no-parse blocks are merged
    /// into one token.
    Text { text: String, row: usize },
    /// `#id(params)` or a parameterless `#id`. `#(expr)` has the id `output`.
    Directive {
        id: String,
        params: Option<String>,
        row: usize,
    },
    /// `#@name(params)` or `#@name?(params)`
    Call {
        name: String,
        if_defined: bool,
        params: String,
        row: usize,
    },
    /// `#define name(params)`
    Define {
        name: String,
        params: String,
        row: usize,
    },
}

/// What the scanner is looking at after a `#`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Text,
    LineComment,
    BlockComment,
    NoParse,
    Output,
    Call,
    Directive,
}

pub(crate) struct Lexer<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Current row (1-indexed)
    row: usize,
    file_name: Option<Arc<str>>,
    keep_blank_lines: &'a HashSet<String>,
    tokens: Vec<Token>,
    text: String,
    text_row: usize,
    /// True while everything on the current line so far is blanks or
    /// directives that produce no output of their own.
    line_clean: bool,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(
        input: &'a str,
        file_name: Option<Arc<str>>,
        keep_blank_lines: &'a HashSet<String>,
    ) -> Self {
        Lexer {
            input,
            bytes: input.as_bytes(),
            pos: 0,
            row: 1,
            file_name,
            keep_blank_lines,
            tokens: Vec::new(),
            text: String::new(),
            text_row: 1,
            line_clean: true,
        }
    }

    fn make_error(&self, row: usize, kind: ParseErrorKind) -> ParseError {
        ParseError::new(Location::new(self.file_name.clone(), row), kind)
    }

    fn eof(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn byte_at(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    /// The byte `offset` positions past the cursor.
    fn byte_ahead(&self, offset: usize) -> Option<u8> {
        self.byte_at(self.pos.saturating_add(offset))
    }

    fn advance(&mut self, len: usize) {
        self.pos = self.pos.saturating_add(len);
    }

    fn next_row(&mut self, rows: usize) {
        self.row = self.row.saturating_add(rows);
    }

    pub(crate) fn scan(mut self) -> LexResult<Vec<Token>> {
        while !self.eof() {
            let state = self.next_state();
            match state {
                State::Text => self.scan_text(),
                State::LineComment => self.scan_line_comment(),
                State::BlockComment => self.scan_block_comment()?,
                State::NoParse => self.scan_no_parse()?,
                State::Output => self.scan_output()?,
                State::Call => self.scan_call()?,
                State::Directive => {
                    if !self.scan_directive()? {
                        // Not a directive after all, the '#' is plain text.
                        self.push_text("#");
                        self.advance(1);
                    }
                }
            }
        }
        self.flush_text();
        Ok(self.tokens)
    }

    fn next_state(&self) -> State {
        if self.byte_at(self.pos) != Some(b'#') {
            return State::Text;
        }
        match self.byte_ahead(1) {
            Some(b'#') => State::LineComment,
            Some(b'-') if self.byte_ahead(2) == Some(b'-') => State::BlockComment,
            Some(b'[') if self.byte_ahead(2) == Some(b'[') => State::NoParse,
            Some(b'(') => State::Output,
            Some(b'@') => State::Call,
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => State::Directive,
            _ => State::Text,
        }
    }

    /// Literal text up to the next '#'. A '#' at the cursor is taken literally.
    fn scan_text(&mut self) {
        let start = self.pos;
        let from = if self.byte_at(start) == Some(b'#') {
            start.saturating_add(1)
        } else {
            start
        };
        let end = self
            .bytes
            .get(from..)
            .and_then(|rest| rest.iter().position(|&b| b == b'#'))
            .map_or(self.bytes.len(), |offset| from.saturating_add(offset));
        let chunk = self.input.get(start..end).unwrap_or_default();
        self.push_text(chunk);
        self.pos = end;
    }

    fn push_text(&mut self, chunk: &str) {
        if self.text.is_empty() {
            self.text_row = self.row;
        }
        for c in chunk.chars() {
            match c {
                '\n' => {
                    self.next_row(1);
                    self.line_clean = true;
                }
                ' ' | '\t' | '\r' => {}
                _ => self.line_clean = false,
            }
        }
        self.text.push_str(chunk);
    }

    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            let text = std::mem::take(&mut self.text);
            self.tokens.push(Token::Text {
                text,
                row: self.text_row,
            });
        }
    }

    /// Advances over `len` bytes of directive syntax, counting line breaks.
    fn skip(&mut self, len: usize) {
        let end = self.pos.saturating_add(len).min(self.bytes.len());
        let newlines = self
            .bytes
            .get(self.pos..end)
            .map_or(0, |s| s.iter().filter(|&&b| b == b'\n').count());
        self.next_row(newlines);
        self.pos = end;
    }

    /// If the rest of the current line holds only blanks, returns the position
    /// just past its line break (or the end of input).
    fn rest_of_line_blank(&self) -> Option<usize> {
        let mut i = self.pos;
        loop {
            match self.byte_at(i) {
                Some(b' ' | b'\t') => i = i.saturating_add(1),
                Some(b'\n') => return Some(i.saturating_add(1)),
                Some(b'\r') if self.byte_at(i.saturating_add(1)) == Some(b'\n') => {
                    return Some(i.saturating_add(2));
                }
                None => return Some(i),
                Some(_) => return None,
            }
        }
    }

    /// Removes the current line from the output when it held nothing but the
    /// construct just scanned: the blanks before it are dropped from the
    /// pending text and the blanks and line break after it are consumed.
    fn trim_line(&mut self, line_was_clean: bool) {
        if !line_was_clean {
            return;
        }
        let Some(line_end) = self.rest_of_line_blank() else {
            return;
        };
        self.delete_line_leading_blanks();
        let consumed_newline = self.byte_at(line_end.wrapping_sub(1)) == Some(b'\n');
        self.pos = line_end;
        if consumed_newline {
            self.next_row(1);
        }
        self.line_clean = true;
    }

    fn delete_line_leading_blanks(&mut self) {
        if let Some(i) = self.text.rfind('\n') {
            self.text.truncate(i.saturating_add(1));
            return;
        }
        self.text.clear();
        for token in self.tokens.iter_mut().rev() {
            if let Token::Text { text, .. } = token {
                if let Some(i) = text.rfind('\n') {
                    text.truncate(i.saturating_add(1));
                    return;
                }
                text.clear();
            }
        }
    }

    fn scan_line_comment(&mut self) {
        let line_was_clean = self.line_clean;
        let end = self
            .bytes
            .get(self.pos..)
            .and_then(|rest| rest.iter().position(|&b| b == b'\n'))
            .map_or(self.bytes.len(), |offset| self.pos.saturating_add(offset));
        // Stop before a "\r\n" so the line break stays intact for trimming.
        let end = if end > self.pos && self.byte_at(end.wrapping_sub(1)) == Some(b'\r') {
            end.saturating_sub(1)
        } else {
            end
        };
        self.pos = end;
        self.trim_line(line_was_clean);
    }

    fn scan_block_comment(&mut self) -> LexResult<()> {
        let line_was_clean = self.line_clean;
        let start_row = self.row;
        self.skip(3);
        let Some(offset) = self.find("--#") else {
            return Err(self.make_error(start_row, ParseErrorKind::unterminated("comment, expected '--#'")));
        };
        self.skip(offset.saturating_add(3));
        self.trim_line(line_was_clean);
        Ok(())
    }

    fn scan_no_parse(&mut self) -> LexResult<()> {
        let line_was_clean = self.line_clean;
        let start_row = self.row;
        let content_start = self.pos.saturating_add(3);
        let Some(offset) = self.find_from(content_start, "]]#") else {
            return Err(self.make_error(
                start_row,
                ParseErrorKind::unterminated("no-parse block, expected ']]#'"),
            ));
        };
        let content_end = content_start.saturating_add(offset);
        let content = self.input.get(content_start..content_end).unwrap_or_default();

        // Only the line holding the closing marker can be trimmed, and only
        // when the opening marker also started a clean line.
        self.pos = content_end.saturating_add(3);
        let trailing = if line_was_clean {
            self.rest_of_line_blank()
        } else {
            None
        };
        if trailing.is_some() {
            self.delete_line_leading_blanks();
        }
        self.push_text(content);
        if let Some(line_end) = trailing {
            if self.byte_at(line_end.wrapping_sub(1)) == Some(b'\n') {
                self.next_row(1);
            }
            self.pos = line_end;
            self.line_clean = true;
        }
        Ok(())
    }

    fn find(&self, needle: &str) -> Option<usize> {
        self.find_from(self.pos, needle)
    }

    fn find_from(&self, from: usize, needle: &str) -> Option<usize> {
        self.input.get(from..).and_then(|rest| rest.find(needle))
    }

    fn scan_output(&mut self) -> LexResult<()> {
        let row = self.row;
        self.advance(1);
        let params = self.scan_params(row)?;
        self.emit_directive(
            Token::Directive {
                id: "output".to_owned(),
                params: Some(params),
                row,
            },
            "output",
        );
        Ok(())
    }

    fn scan_call(&mut self) -> LexResult<()> {
        let row = self.row;
        self.advance(2);
        let name = self.scan_identifier();
        if name.is_empty() {
            return Err(self.make_error(
                row,
                ParseErrorKind::Expected {
                    description: "function name after '#@'".to_owned(),
                },
            ));
        }
        let if_defined = if self.byte_at(self.pos) == Some(b'?') {
            self.advance(1);
            true
        } else {
            false
        };
        self.skip_blanks();
        if self.byte_at(self.pos) != Some(b'(') {
            return Err(self.make_error(
                row,
                ParseErrorKind::Expected {
                    description: format!("'(' after '#@{name}'"),
                },
            ));
        }
        let params = self.scan_params(row)?;
        self.emit_directive(
            Token::Call {
                name,
                if_defined,
                params,
                row,
            },
            "call",
        );
        Ok(())
    }

    /// Scans `#id`, `#id(params)` and `#define name(params)`. Returns false,
    /// consuming nothing, when the text after '#' is not a directive.
    fn scan_directive(&mut self) -> LexResult<bool> {
        let row = self.row;
        let start = self.pos;
        self.advance(1);
        let id = self.scan_identifier();

        if NO_PARAM_DIRECTIVES.contains(&id.as_str()) {
            self.emit_directive(
                Token::Directive {
                    id: id.clone(),
                    params: None,
                    row,
                },
                &id,
            );
            return Ok(true);
        }

        if id == "define" {
            self.skip_blanks();
            let name = self.scan_identifier();
            if name.is_empty() {
                return Err(self.make_error(
                    row,
                    ParseErrorKind::Expected {
                        description: "function name after '#define'".to_owned(),
                    },
                ));
            }
            self.skip_blanks();
            if self.byte_at(self.pos) != Some(b'(') {
                return Err(self.make_error(
                    row,
                    ParseErrorKind::Expected {
                        description: format!("'(' after '#define {name}'"),
                    },
                ));
            }
            let params = self.scan_params(row)?;
            self.emit_directive(Token::Define { name, params, row }, "define");
            return Ok(true);
        }

        // `#call?(..)` only calls when the function exists.
        let mut id = id;
        if id == "call" && self.byte_at(self.pos) == Some(b'?') {
            self.advance(1);
            id.push('?');
        }

        self.skip_blanks();
        if self.byte_at(self.pos) != Some(b'(') {
            self.pos = start;
            return Ok(false);
        }
        let params = self.scan_params(row)?;
        self.emit_directive(
            Token::Directive {
                id: id.clone(),
                params: Some(params),
                row,
            },
            &id,
        );
        Ok(true)
    }

    fn emit_directive(&mut self, token: Token, id: &str) {
        tracing::trace!(?token, "directive token");
        let line_was_clean = self.line_clean;
        self.flush_text();
        self.tokens.push(token);
        if self.keep_blank_lines.contains(id) {
            self.line_clean = false;
        } else {
            self.trim_line(line_was_clean);
        }
    }

    fn scan_identifier(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.byte_at(self.pos) {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'$' {
                self.advance(1);
            } else {
                break;
            }
        }
        self.input.get(start..self.pos).unwrap_or_default().to_owned()
    }

    fn skip_blanks(&mut self) {
        while matches!(self.byte_at(self.pos), Some(b' ' | b'\t')) {
            self.advance(1);
        }
    }

    /// Scans a parenthesised parameter list starting at the '(' under the
    /// cursor and returns the text between the parentheses. Parentheses inside
    /// string literals do not count.
    fn scan_params(&mut self, row: usize) -> LexResult<String> {
        let start = self.pos.saturating_add(1);
        let mut i = start;
        let mut depth = 1usize;
        let mut rows = 0usize;
        while let Some(b) = self.byte_at(i) {
            match b {
                b'(' => depth = depth.saturating_add(1),
                b')' => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 {
                        let params = self.input.get(start..i).unwrap_or_default().to_owned();
                        self.pos = i.saturating_add(1);
                        self.next_row(rows);
                        return Ok(params);
                    }
                }
                b'"' | b'\'' => {
                    let quote = b;
                    i = i.saturating_add(1);
                    loop {
                        match self.byte_at(i) {
                            None => {
                                return Err(self.make_error(
                                    row.saturating_add(rows),
                                    ParseErrorKind::unterminated("string literal in directive parameters"),
                                ));
                            }
                            Some(b'\\') => i = i.saturating_add(1),
                            Some(b'\n') => rows = rows.saturating_add(1),
                            Some(c) if c == quote => break,
                            Some(_) => {}
                        }
                        i = i.saturating_add(1);
                    }
                }
                b'\n' => rows = rows.saturating_add(1),
                _ => {}
            }
            i = i.saturating_add(1);
        }
        Err(self.make_error(
            row,
            ParseErrorKind::unterminated("directive parameters, expected ')'"),
        ))
    }
}
