use std::sync::Arc;

use crate::{
    ast::{ForCtrl, Location},
    error::{ParseError, ParseErrorKind},
    expr::{
        ArithOp, CompareOp, Expr, Logic, UnaryOp,
        lexer::ExprLexer,
        token::{Sym, Tok},
    },
    value::Value,
};

type ParseResult<T> = Result<T, ParseError>;

/// Recursive descent parser over the tokens of one directive's parameters.
///
/// Precedence, loosest first: assignment, ternary, `||`, `&&`, equality,
/// relational, additive, multiplicative, `??`, unary, postfix `++`/`--`,
/// static members, shared method calls, then member/index chains on a
/// primary.
pub(crate) struct ExprParser {
    tokens: Vec<Tok>,
    pos: usize,
    eof: Tok,
    file_name: Option<Arc<str>>,
}

impl ExprParser {
    pub(crate) fn new(input: &str, file_name: Option<Arc<str>>, row: usize) -> ParseResult<Self> {
        let tokens = ExprLexer::new(input, file_name.clone(), row).scan()?;
        let last_row = tokens.last().map_or(row, |t| t.row);
        Ok(Self {
            tokens,
            pos: 0,
            eof: Tok::new(Sym::Eof, String::new(), last_row),
            file_name,
        })
    }

    // ---- token helpers ----

    fn peek(&self) -> &Tok {
        self.tokens.get(self.pos).unwrap_or(&self.eof)
    }

    fn peek_sym(&self) -> Sym {
        self.peek().sym
    }

    fn peek_sym_at(&self, offset: usize) -> Sym {
        self.tokens.get(self.pos.saturating_add(offset)).map_or(Sym::Eof, |t| t.sym)
    }

    fn advance(&mut self) -> Tok {
        let tok = self.peek().clone();
        if tok.sym != Sym::Eof {
            self.pos = self.pos.saturating_add(1);
        }
        tok
    }

    fn consume(&mut self, sym: Sym) -> bool {
        if self.peek_sym() == sym {
            self.advance();
            true
        } else {
            false
        }
    }

    fn location(&self) -> Location {
        Location::new(self.file_name.clone(), self.peek().row)
    }

    fn make_error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.location(), kind)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        let found = self.peek();
        if found.sym == Sym::Eof {
            self.make_error(ParseErrorKind::unexpected_eof(Some(expected)))
        } else {
            self.make_error(ParseErrorKind::UnexpectedToken {
                expected: expected.to_owned(),
                found: found.describe(),
            })
        }
    }

    fn expect(&mut self, sym: Sym) -> ParseResult<Tok> {
        if self.peek_sym() == sym {
            Ok(self.advance())
        } else {
            Err(self.unexpected(sym.describe()))
        }
    }

    fn expect_id(&mut self) -> ParseResult<Arc<str>> {
        Ok(Arc::from(self.expect(Sym::Id)?.text))
    }

    fn expect_end(&self) -> ParseResult<()> {
        if self.peek_sym() == Sym::Eof {
            Ok(())
        } else {
            Err(self.unexpected(Sym::Eof.describe()))
        }
    }

    // ---- entry points ----

    /// Parses a comma separated list of expressions spanning the whole input.
    /// Empty input yields an empty list.
    pub(crate) fn parse_expr_list(mut self) -> ParseResult<Vec<Expr>> {
        let exprs = self.exprs_until(Sym::Eof)?;
        self.expect_end()?;
        Ok(exprs)
    }

    /// Parses the parameters of `#for`: either `item : expr` or
    /// `init; cond; update` with every clause optional.
    pub(crate) fn parse_for_ctrl(mut self) -> ParseResult<ForCtrl> {
        if self.peek_sym() == Sym::Id && self.peek_sym_at(1) == Sym::Colon {
            let item = self.expect_id()?;
            self.advance();
            let expr = self.expr()?;
            self.expect_end()?;
            return Ok(ForCtrl::Iter { item, expr });
        }

        let init = self.exprs_until(Sym::Semicolon)?;
        self.expect(Sym::Semicolon)?;
        let cond = if self.peek_sym() == Sym::Semicolon {
            None
        } else {
            Some(self.expr()?)
        };
        self.expect(Sym::Semicolon)?;
        let update = self.exprs_until(Sym::Eof)?;
        self.expect_end()?;
        Ok(ForCtrl::Numeric { init, cond, update })
    }

    /// Parses the parameter names of `#define name(a, b)`.
    pub(crate) fn parse_param_names(mut self) -> ParseResult<Vec<Arc<str>>> {
        let mut names: Vec<Arc<str>> = Vec::new();
        if self.peek_sym() == Sym::Eof {
            return Ok(names);
        }
        loop {
            let name = self.expect_id()?;
            if names.contains(&name) {
                return Err(self.make_error(ParseErrorKind::Message(format!(
                    "Duplicate parameter name '{name}'"
                ))));
            }
            names.push(name);
            if !self.consume(Sym::Comma) {
                break;
            }
        }
        self.expect_end()?;
        Ok(names)
    }

    fn exprs_until(&mut self, terminator: Sym) -> ParseResult<Vec<Expr>> {
        let mut exprs = Vec::new();
        if self.peek_sym() == terminator {
            return Ok(exprs);
        }
        loop {
            exprs.push(self.expr()?);
            if !self.consume(Sym::Comma) {
                return Ok(exprs);
            }
        }
    }

    // ---- precedence chain ----

    fn expr(&mut self) -> ParseResult<Expr> {
        self.assign()
    }

    fn assign(&mut self) -> ParseResult<Expr> {
        if self.peek_sym() == Sym::Id {
            let next = self.peek_sym_at(1);
            if next == Sym::Assign {
                let location = self.location();
                let name = self.expect_id()?;
                self.advance();
                let value = self.assign()?;
                return Ok(Expr::Assign {
                    name,
                    index: None,
                    value: Box::new(value),
                    location,
                });
            } else if next == Sym::LBrack {
                // `name[i] = v` shares its prefix with a plain index read.
                let start = self.pos;
                let location = self.location();
                let name = self.expect_id()?;
                self.advance();
                let index = self.expr()?;
                self.expect(Sym::RBrack)?;
                if self.consume(Sym::Assign) {
                    let value = self.assign()?;
                    return Ok(Expr::Assign {
                        name,
                        index: Some(Box::new(index)),
                        value: Box::new(value),
                        location,
                    });
                }
                self.pos = start;
            }
        }
        self.ternary()
    }

    fn ternary(&mut self) -> ParseResult<Expr> {
        let cond = self.or()?;
        if !self.consume(Sym::Question) {
            return Ok(cond);
        }
        let then = self.assign()?;
        self.expect(Sym::Colon)?;
        let otherwise = self.assign()?;
        Ok(Expr::Ternary {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> ParseResult<Expr> {
        let mut left = self.and()?;
        while self.consume(Sym::Or) {
            let right = self.and()?;
            left = Expr::Logic(Logic::Or(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn and(&mut self) -> ParseResult<Expr> {
        let mut left = self.equality()?;
        while self.consume(Sym::And) {
            let right = self.equality()?;
            left = Expr::Logic(Logic::And(Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn compare_level(
        &mut self,
        ops: &[(Sym, CompareOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        while let Some(&(_, op)) = ops.iter().find(|(sym, _)| *sym == self.peek_sym()) {
            let location = self.location();
            self.advance();
            let right = next(self)?;
            left = Expr::Compare {
                op,
                left: Box::new(left),
                right: Box::new(right),
                location,
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> ParseResult<Expr> {
        self.compare_level(
            &[(Sym::Eq, CompareOp::Eq), (Sym::Ne, CompareOp::Ne)],
            Self::relational,
        )
    }

    fn relational(&mut self) -> ParseResult<Expr> {
        self.compare_level(
            &[
                (Sym::Lt, CompareOp::Lt),
                (Sym::Le, CompareOp::Le),
                (Sym::Gt, CompareOp::Gt),
                (Sym::Ge, CompareOp::Ge),
            ],
            Self::additive,
        )
    }

    fn arith_level(
        &mut self,
        ops: &[(Sym, ArithOp)],
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let mut left = next(self)?;
        while let Some(&(_, op)) = ops.iter().find(|(sym, _)| *sym == self.peek_sym()) {
            let location = self.location();
            self.advance();
            let right = next(self)?;
            left = Expr::Arith {
                op,
                left: Box::new(left),
                right: Box::new(right),
                location,
            };
        }
        Ok(left)
    }

    fn additive(&mut self) -> ParseResult<Expr> {
        self.arith_level(
            &[(Sym::Add, ArithOp::Add), (Sym::Sub, ArithOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> ParseResult<Expr> {
        self.arith_level(
            &[
                (Sym::Mul, ArithOp::Mul),
                (Sym::Div, ArithOp::Div),
                (Sym::Mod, ArithOp::Mod),
            ],
            Self::null_safe,
        )
    }

    fn null_safe(&mut self) -> ParseResult<Expr> {
        let mut left = self.unary()?;
        while self.consume(Sym::NullSafe) {
            let right = if starts_operand(self.peek_sym()) {
                Some(Box::new(self.unary()?))
            } else {
                None
            };
            left = Expr::NullSafe {
                left: Box::new(left),
                right,
            };
        }
        Ok(left)
    }

    fn unary(&mut self) -> ParseResult<Expr> {
        let location = self.location();
        let sym = self.peek_sym();
        if sym == Sym::Not {
            self.advance();
            let operand = self.unary()?;
            return Ok(Expr::Logic(Logic::Not(Box::new(operand))));
        }
        if matches!(sym, Sym::Sub | Sym::Add) {
            self.advance();
            let operand = self.unary()?;
            let op = if sym == Sym::Sub {
                UnaryOp::Neg
            } else {
                UnaryOp::Plus
            };
            return Ok(fold_unary(op, operand, location));
        }
        if matches!(sym, Sym::Inc | Sym::Dec) {
            self.advance();
            let name = self
                .expect_id()
                .map_err(|_| self.make_error(ParseErrorKind::Expected {
                    description: format!("a variable after {}", sym.describe()),
                }))?;
            return Ok(Expr::IncDec {
                name,
                increment: sym == Sym::Inc,
                prefix: true,
                location,
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> ParseResult<Expr> {
        let location = self.location();
        let expr = self.static_member()?;
        let sym = self.peek_sym();
        if !matches!(sym, Sym::Inc | Sym::Dec) {
            return Ok(expr);
        }
        let Expr::Id(name) = expr else {
            return Err(self.make_error(ParseErrorKind::Expected {
                description: format!("a variable before {}", sym.describe()),
            }));
        };
        self.advance();
        Ok(Expr::IncDec {
            name,
            increment: sym == Sym::Inc,
            prefix: false,
            location,
        })
    }

    /// `A.B::field` and `A.B::method(args)`, falling through to shared
    /// method calls and primaries.
    fn static_member(&mut self) -> ParseResult<Expr> {
        if let Some(len) = self.static_prefix_len() {
            let location = self.location();
            let mut namespace = String::new();
            let end = self.pos.saturating_add(len);
            for tok in self.tokens.get(self.pos..end).unwrap_or_default() {
                namespace.push_str(&tok.text);
            }
            self.pos = end;
            self.expect(Sym::StaticMember)?;
            let member = self.expect_id()?;
            let namespace: Arc<str> = Arc::from(namespace);
            let base = if self.peek_sym() == Sym::LParen {
                let args = self.args()?;
                Expr::StaticMethod {
                    namespace,
                    method: member,
                    args,
                    location,
                }
            } else {
                Expr::StaticField {
                    namespace,
                    field: member,
                    location,
                }
            };
            return self.chain(base);
        }

        if self.peek_sym() == Sym::Id && self.peek_sym_at(1) == Sym::LParen {
            let location = self.location();
            let name = self.expect_id()?;
            let args = self.args()?;
            return self.chain(Expr::SharedMethod {
                name,
                args,
                location,
            });
        }

        let primary = self.primary()?;
        self.chain(primary)
    }

    /// Length of a dotted `Id (. Id)*` run that is directly followed by `::`.
    fn static_prefix_len(&self) -> Option<usize> {
        let mut offset: usize = 0;
        loop {
            if self.peek_sym_at(offset) != Sym::Id {
                return None;
            }
            offset = offset.saturating_add(1);
            let next = self.peek_sym_at(offset);
            if next == Sym::StaticMember {
                return Some(offset);
            }
            if next != Sym::Dot {
                return None;
            }
            offset = offset.saturating_add(1);
        }
    }

    fn args(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(Sym::LParen)?;
        let args = self.exprs_until(Sym::RParen)?;
        self.expect(Sym::RParen)?;
        Ok(args)
    }

    fn chain(&mut self, mut target: Expr) -> ParseResult<Expr> {
        loop {
            let location = self.location();
            if self.consume(Sym::Dot) {
                let name = self.expect_id()?;
                target = if self.peek_sym() == Sym::LParen {
                    let args = self.args()?;
                    Expr::Method {
                        target: Box::new(target),
                        name,
                        args,
                        location,
                    }
                } else {
                    Expr::Field {
                        target: Box::new(target),
                        name,
                        location,
                    }
                };
            } else if self.consume(Sym::LBrack) {
                let index = self.expr()?;
                self.expect(Sym::RBrack)?;
                target = Expr::Index {
                    target: Box::new(target),
                    index: Box::new(index),
                    location,
                };
            } else {
                return Ok(target);
            }
        }
    }

    fn primary(&mut self) -> ParseResult<Expr> {
        let location = self.location();
        match self.peek_sym() {
            Sym::Number => {
                let tok = self.advance();
                Ok(Expr::Const(tok.number.unwrap_or_default()))
            }
            Sym::Str => Ok(Expr::Const(Value::from(self.advance().text))),
            Sym::True => {
                self.advance();
                Ok(Expr::Const(Value::Bool(true)))
            }
            Sym::False => {
                self.advance();
                Ok(Expr::Const(Value::Bool(false)))
            }
            Sym::Null => {
                self.advance();
                Ok(Expr::Const(Value::Null))
            }
            Sym::Id => Ok(Expr::Id(self.expect_id()?)),
            Sym::LParen => {
                self.advance();
                let inner = self.expr()?;
                self.expect(Sym::RParen)?;
                Ok(inner)
            }
            Sym::LBrace => self.map_literal(),
            Sym::LBrack => {
                self.advance();
                if self.consume(Sym::RBrack) {
                    return Ok(Expr::Array(Vec::new()));
                }
                let first = self.expr()?;
                if self.consume(Sym::Range) {
                    let end = self.expr()?;
                    self.expect(Sym::RBrack)?;
                    return Ok(Expr::Range {
                        start: Box::new(first),
                        end: Box::new(end),
                        location,
                    });
                }
                let mut items = vec![first];
                while self.consume(Sym::Comma) {
                    items.push(self.expr()?);
                }
                self.expect(Sym::RBrack)?;
                Ok(Expr::Array(items))
            }
            Sym::Add
            | Sym::Sub
            | Sym::Mul
            | Sym::Div
            | Sym::Mod
            | Sym::Inc
            | Sym::Dec
            | Sym::Assign
            | Sym::Eq
            | Sym::Ne
            | Sym::Lt
            | Sym::Le
            | Sym::Gt
            | Sym::Ge
            | Sym::Not
            | Sym::And
            | Sym::Or
            | Sym::Question
            | Sym::NullSafe
            | Sym::Colon
            | Sym::StaticMember
            | Sym::Dot
            | Sym::Range
            | Sym::Comma
            | Sym::Semicolon
            | Sym::RParen
            | Sym::RBrack
            | Sym::RBrace
            | Sym::Eof => Err(self.unexpected("expression")),
        }
    }

    fn map_literal(&mut self) -> ParseResult<Expr> {
        self.expect(Sym::LBrace)?;
        let mut entries = Vec::new();
        if self.consume(Sym::RBrace) {
            return Ok(Expr::Map(entries));
        }
        loop {
            let tok = self.advance();
            if tok.sym == Sym::Eof {
                return Err(self.make_error(ParseErrorKind::unexpected_eof(Some("}"))));
            }
            let key: Arc<str> = if tok.sym == Sym::Number {
                Arc::from(tok.number.as_ref().map(Value::to_key).unwrap_or_default())
            } else if matches!(tok.sym, Sym::Id | Sym::Str | Sym::True | Sym::False | Sym::Null) {
                Arc::from(tok.text.as_str())
            } else {
                return Err(self.make_error(ParseErrorKind::IllegalMapKey {
                    key: tok.describe(),
                }));
            };
            // `{1 + 1: v}` is an expression key, not a constant followed by junk.
            if continues_operand(self.peek_sym()) {
                return Err(self.make_error(ParseErrorKind::IllegalMapKey {
                    key: format!("{} {} ...", tok.text, self.peek().text),
                }));
            }
            self.expect(Sym::Colon)?;
            let value = self.expr()?;
            entries.push((key, value));
            if !self.consume(Sym::Comma) {
                break;
            }
        }
        self.expect(Sym::RBrace)?;
        Ok(Expr::Map(entries))
    }
}

/// Whether a token after a complete operand extends it into a larger
/// expression.
const fn continues_operand(sym: Sym) -> bool {
    matches!(
        sym,
        Sym::Add
            | Sym::Sub
            | Sym::Mul
            | Sym::Div
            | Sym::Mod
            | Sym::Inc
            | Sym::Dec
            | Sym::Assign
            | Sym::Eq
            | Sym::Ne
            | Sym::Lt
            | Sym::Le
            | Sym::Gt
            | Sym::Ge
            | Sym::And
            | Sym::Or
            | Sym::Question
            | Sym::NullSafe
            | Sym::StaticMember
            | Sym::Dot
            | Sym::Range
            | Sym::LParen
            | Sym::LBrack
    )
}

/// Whether a token can begin the right side of `??`.
const fn starts_operand(sym: Sym) -> bool {
    matches!(
        sym,
        Sym::Id
            | Sym::Str
            | Sym::Number
            | Sym::True
            | Sym::False
            | Sym::Null
            | Sym::LParen
            | Sym::LBrack
            | Sym::LBrace
            | Sym::Not
            | Sym::Inc
            | Sym::Dec
    )
}

fn fold_unary(op: UnaryOp, operand: Expr, location: Location) -> Expr {
    let folded = match (op, operand.as_const()) {
        (UnaryOp::Neg, Some(Value::Int(i))) => Some(Value::Int(i.wrapping_neg())),
        (UnaryOp::Neg, Some(Value::Long(l))) => Some(Value::Long(l.wrapping_neg())),
        (UnaryOp::Neg, Some(Value::Float(f))) => Some(Value::Float(-f)),
        (UnaryOp::Neg, Some(Value::Double(d))) => Some(Value::Double(-d)),
        (UnaryOp::Plus, Some(value)) if value.is_number() => Some(value.clone()),
        _ => None,
    };
    match folded {
        Some(value) => Expr::Const(value),
        None => Expr::Unary {
            op,
            operand: Box::new(operand),
            location,
        },
    }
}
