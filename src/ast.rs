use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::Mutex;

use crate::{directive::Directive, expr::Expr, scope::AssignPolicy, template::Env};

/// Where a node came from. Attached to every node that can fail at runtime.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Location {
    file_name: Option<Arc<str>>,
    row: usize,
}

impl Location {
    pub(crate) const fn new(file_name: Option<Arc<str>>, row: usize) -> Self {
        Self { file_name, row }
    }

    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub const fn row(&self) -> usize {
        self.row
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.file_name {
            Some(file_name) => write!(f, "in \"{}\" at row {}", file_name, self.row),
            None => write!(f, "at row {}", self.row),
        }
    }
}

pub(crate) enum Stat {
    /// Does nothing. Empty blocks and `#define` sites collapse to this.
    Nop,
    /// Literal text, already in its final UTF-8 form.
    Text(Arc<str>),
    Output(Expr),
    If {
        cond: Expr,
        body: Box<Stat>,
        /// Either the `#else` body or a nested `If` for `#elseif`.
        else_branch: Option<Box<Stat>>,
    },
    For {
        ctrl: ForCtrl,
        body: Box<Stat>,
        else_body: Option<Box<Stat>>,
    },
    Switch {
        expr: Expr,
        cases: Vec<Case>,
        default: Option<Box<Stat>>,
    },
    /// Definition site of a template function. Functions are hoisted into the
    /// `Env` while parsing, so executing this is a no-op.
    Define(Arc<Function>),
    Call {
        target: CallTarget,
        args: Vec<Expr>,
        if_defined: bool,
        location: Location,
    },
    Include {
        assigns: Vec<Expr>,
        body: Box<Stat>,
    },
    Render {
        file_name: String,
        assigns: Vec<Expr>,
        cache: RenderCache,
        location: Location,
    },
    Set {
        policy: AssignPolicy,
        exprs: Vec<Expr>,
    },
    Break,
    Continue,
    Return,
    Custom {
        name: Arc<str>,
        directive: Arc<dyn Directive>,
        args: Vec<Expr>,
        body: Option<Box<Stat>>,
        location: Location,
    },
    List(Vec<Stat>),
}

impl Stat {
    /// Builds a statement list, collapsing zero children to [`Stat::Nop`] and a
    /// single child to that child.
    pub(crate) fn list(mut stats: Vec<Self>) -> Self {
        match stats.len() {
            0 => Self::Nop,
            1 => stats.pop().unwrap_or(Self::Nop),
            _ => Self::List(stats),
        }
    }
}

impl fmt::Debug for Stat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nop => f.write_str("Nop"),
            Self::Text(text) => f.debug_tuple("Text").field(text).finish(),
            Self::Output(expr) => f.debug_tuple("Output").field(expr).finish(),
            Self::If {
                cond,
                body,
                else_branch,
            } => f
                .debug_struct("If")
                .field("cond", cond)
                .field("body", body)
                .field("else_branch", else_branch)
                .finish(),
            Self::For {
                ctrl,
                body,
                else_body,
            } => f
                .debug_struct("For")
                .field("ctrl", ctrl)
                .field("body", body)
                .field("else_body", else_body)
                .finish(),
            Self::Switch {
                expr,
                cases,
                default,
            } => f
                .debug_struct("Switch")
                .field("expr", expr)
                .field("cases", cases)
                .field("default", default)
                .finish(),
            Self::Define(function) => f.debug_tuple("Define").field(&function.name).finish(),
            Self::Call {
                target,
                args,
                if_defined,
                ..
            } => f
                .debug_struct("Call")
                .field("target", target)
                .field("args", args)
                .field("if_defined", if_defined)
                .finish(),
            Self::Include { assigns, body } => f
                .debug_struct("Include")
                .field("assigns", assigns)
                .field("body", body)
                .finish(),
            Self::Render {
                file_name, assigns, ..
            } => f
                .debug_struct("Render")
                .field("file_name", file_name)
                .field("assigns", assigns)
                .finish(),
            Self::Set { policy, exprs } => f
                .debug_struct("Set")
                .field("policy", policy)
                .field("exprs", exprs)
                .finish(),
            Self::Break => f.write_str("Break"),
            Self::Continue => f.write_str("Continue"),
            Self::Return => f.write_str("Return"),
            Self::Custom {
                name, args, body, ..
            } => f
                .debug_struct("Custom")
                .field("name", name)
                .field("args", args)
                .field("body", body)
                .finish(),
            Self::List(stats) => f.debug_tuple("List").field(stats).finish(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum ForCtrl {
    /// `#for(item : expr)`
    Iter { item: Arc<str>, expr: Expr },
    /// `#for(init; cond; update)`, every clause optional.
    Numeric {
        init: Vec<Expr>,
        cond: Option<Expr>,
        update: Vec<Expr>,
    },
}

#[derive(Debug)]
pub(crate) struct Case {
    pub(crate) values: Vec<Expr>,
    pub(crate) body: Stat,
}

#[derive(Debug)]
pub(crate) enum CallTarget {
    /// `#@name(..)` and `#call(name(..))`
    Named(Arc<str>),
    /// `#call(expr, ..)`, the expression yields the function name.
    Dynamic(Expr),
}

/// A template function created by `#define`.
#[derive(Debug)]
pub struct Function {
    pub(crate) name: Arc<str>,
    pub(crate) params: Vec<Arc<str>>,
    pub(crate) body: Stat,
    pub(crate) location: Location,
}

/// Sub-templates compiled on first use by a `#render` site.
#[derive(Default)]
pub(crate) struct RenderCache {
    entries: Mutex<HashMap<String, Arc<RenderedTemplate>>>,
}

pub(crate) struct RenderedTemplate {
    pub(crate) env: Env,
    pub(crate) body: Stat,
}

impl RenderCache {
    pub(crate) fn get(&self, key: &str) -> Option<Arc<RenderedTemplate>> {
        self.entries.lock().get(key).cloned()
    }

    pub(crate) fn insert(&self, key: String, template: Arc<RenderedTemplate>) {
        self.entries.lock().insert(key, template);
    }
}
