//! The expression sub-language used inside directive parameters.

mod eval;
mod lexer;
mod parser;
mod token;

use std::sync::Arc;

pub(crate) use eval::eval_all;
pub(crate) use parser::ExprParser;

use crate::{ast::Location, value::Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl ArithOp {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub(crate) const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug)]
pub(crate) enum Logic {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
}

#[derive(Debug)]
pub(crate) enum Expr {
    Const(Value),
    Id(Arc<str>),
    /// `name = value` or `name[index] = value`
    Assign {
        name: Arc<str>,
        index: Option<Box<Expr>>,
        value: Box<Expr>,
        location: Location,
    },
    Ternary {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Logic(Logic),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
        location: Location,
    },
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
        location: Location,
    },
    /// `left ?? right`, the right side may be omitted.
    NullSafe {
        left: Box<Expr>,
        right: Option<Box<Expr>>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        location: Location,
    },
    IncDec {
        name: Arc<str>,
        increment: bool,
        prefix: bool,
        location: Location,
    },
    StaticField {
        namespace: Arc<str>,
        field: Arc<str>,
        location: Location,
    },
    StaticMethod {
        namespace: Arc<str>,
        method: Arc<str>,
        args: Vec<Expr>,
        location: Location,
    },
    /// A bare call `name(args)` resolved against the engine's shared methods.
    SharedMethod {
        name: Arc<str>,
        args: Vec<Expr>,
        location: Location,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        location: Location,
    },
    Field {
        target: Box<Expr>,
        name: Arc<str>,
        location: Location,
    },
    Method {
        target: Box<Expr>,
        name: Arc<str>,
        args: Vec<Expr>,
        location: Location,
    },
    Map(Vec<(Arc<str>, Expr)>),
    Array(Vec<Expr>),
    /// `[start..end]`, inclusive, counting down when `start > end`.
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        location: Location,
    },
}

impl Expr {
    pub(crate) const fn as_const(&self) -> Option<&Value> {
        if let Self::Const(value) = self { Some(value) } else { None }
    }

    pub(crate) const fn is_assign(&self) -> bool {
        matches!(self, Self::Assign { .. })
    }
}
