use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    ast::{Case, CallTarget, Function, Location, RenderCache, Stat},
    config::EngineConfig,
    error::{HashlateError, HashlateResult, ParseError, ParseErrorKind},
    expr::{Expr, ExprParser},
    lexer::{Lexer, Token},
    scope::AssignPolicy,
    source::{Source, resolve_path},
    value::Value,
};

/// The result of compiling one template source together with everything it
/// includes.
#[derive(Debug)]
pub(crate) struct Unit {
    pub(crate) body: Stat,
    pub(crate) functions: HashMap<String, Arc<Function>>,
    pub(crate) sources: Vec<Arc<dyn Source>>,
}

#[derive(Default)]
struct UnitBuilder {
    functions: HashMap<String, Arc<Function>>,
    sources: Vec<Arc<dyn Source>>,
    include_stack: Vec<String>,
}

/// A directive that closes or splits the block being parsed.
#[derive(Debug)]
enum Terminator {
    End(usize),
    Else(usize),
    ElseIf { params: String, row: usize },
    Case { params: String, row: usize },
    Default(usize),
    Eof,
}

impl Terminator {
    const fn describe(&self) -> &'static str {
        match self {
            Self::End(_) => "#end",
            Self::Else(_) => "#else",
            Self::ElseIf { .. } => "#elseif",
            Self::Case { .. } => "#case",
            Self::Default(_) => "#default",
            Self::Eof => "end of template",
        }
    }

    const fn row(&self) -> Option<usize> {
        match self {
            Self::End(row) | Self::Else(row) | Self::Default(row) => Some(*row),
            Self::ElseIf { row, .. } | Self::Case { row, .. } => Some(*row),
            Self::Eof => None,
        }
    }
}

/// Compiles `source` and every file it includes.
pub(crate) fn parse_source(config: &EngineConfig, source: Arc<dyn Source>) -> HashlateResult<Unit> {
    let file_name = source.file_name().map(str::to_owned);
    let mut unit = UnitBuilder::default();
    let body = parse_file(config, &mut unit, source)?;
    debug!(
        ?file_name,
        functions = unit.functions.len(),
        sources = unit.sources.len(),
        "compiled template"
    );
    Ok(Unit {
        body,
        functions: unit.functions,
        sources: unit.sources,
    })
}

fn parse_file(config: &EngineConfig, unit: &mut UnitBuilder, source: Arc<dyn Source>) -> HashlateResult<Stat> {
    let file_name: Option<Arc<str>> = source.file_name().map(Arc::from);
    let content = source.content()?;
    unit.sources.push(source);
    let tokens = Lexer::new(&content, file_name.clone(), config.keep_blank_lines()).scan()?;

    let pushed = file_name.as_deref().map(str::to_owned);
    if let Some(name) = &pushed {
        unit.include_stack.push(name.clone());
    }
    let mut parser = Parser {
        config,
        unit,
        tokens: tokens.into_iter(),
        file_name,
        for_depth: 0,
        block_depth: 0,
    };
    let body = parser.parse_root();
    if pushed.is_some() {
        parser.unit.include_stack.pop();
    }
    body
}

struct Parser<'c, 'u> {
    config: &'c EngineConfig,
    unit: &'u mut UnitBuilder,
    tokens: std::vec::IntoIter<Token>,
    file_name: Option<Arc<str>>,
    /// Number of enclosing `#for` bodies, `#break`/`#continue` need one.
    for_depth: usize,
    /// Number of enclosing blocks of any kind, `#define` needs none.
    block_depth: usize,
}

impl Parser<'_, '_> {
    fn location(&self, row: usize) -> Location {
        Location::new(self.file_name.clone(), row)
    }

    fn make_error(&self, row: usize, kind: ParseErrorKind) -> HashlateError {
        ParseError::new(self.location(row), kind).into()
    }

    fn message(&self, row: usize, message: String) -> HashlateError {
        self.make_error(row, ParseErrorKind::Message(message))
    }

    fn exprs(&self, params: &str, row: usize) -> HashlateResult<Vec<Expr>> {
        Ok(ExprParser::new(params, self.file_name.clone(), row)?.parse_expr_list()?)
    }

    fn single_expr(&self, params: &str, row: usize, directive: &str) -> HashlateResult<Expr> {
        let mut exprs = self.exprs(params, row)?;
        match exprs.len() {
            1 => exprs
                .pop()
                .ok_or_else(|| self.message(row, format!("{directive} requires an expression"))),
            0 => Err(self.message(row, format!("{directive} requires an expression"))),
            n => Err(self.message(
                row,
                format!("{directive} takes exactly one expression, found {n}"),
            )),
        }
    }

    /// Fails unless `term` is the `#end` that closes the block opened at `row`.
    fn expect_end(&self, term: Terminator, opener: &str, row: usize) -> HashlateResult<()> {
        match term {
            Terminator::End(_) => Ok(()),
            Terminator::Eof => Err(self.make_error(row, ParseErrorKind::unexpected_eof(Some("#end")))),
            other @ (Terminator::Else(_)
            | Terminator::ElseIf { .. }
            | Terminator::Case { .. }
            | Terminator::Default(_)) => Err(self.make_error(
                other.row().unwrap_or(row),
                ParseErrorKind::UnexpectedToken {
                    expected: format!("#end closing {opener}"),
                    found: other.describe().to_owned(),
                },
            )),
        }
    }

    fn parse_root(&mut self) -> HashlateResult<Stat> {
        let (body, term) = self.parse_block()?;
        match term {
            Terminator::Eof => Ok(body),
            other @ (Terminator::End(_)
            | Terminator::Else(_)
            | Terminator::ElseIf { .. }
            | Terminator::Case { .. }
            | Terminator::Default(_)) => Err(self.message(
                other.row().unwrap_or_default(),
                format!("Unexpected {} without a matching opening directive", other.describe()),
            )),
        }
    }

    /// Parses statements until a terminator or the end of input.
    fn parse_block(&mut self) -> HashlateResult<(Stat, Terminator)> {
        let mut stats = Vec::new();
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text { text, .. } => {
                    if let Some(stat) = self.text(text) {
                        stats.push(stat);
                    }
                }
                Token::Directive { id, params, row } => {
                    let term = match (id.as_str(), params) {
                        ("end", _) => Terminator::End(row),
                        ("else", _) => Terminator::Else(row),
                        ("default", _) => Terminator::Default(row),
                        ("elseif", Some(params)) => Terminator::ElseIf { params, row },
                        ("case", Some(params)) => Terminator::Case { params, row },
                        (_, params) => {
                            stats.push(self.directive(&id, params.unwrap_or_default(), row)?);
                            continue;
                        }
                    };
                    return Ok((Stat::list(stats), term));
                }
                Token::Call {
                    name,
                    if_defined,
                    params,
                    row,
                } => {
                    let args = self.exprs(&params, row)?;
                    stats.push(Stat::Call {
                        target: CallTarget::Named(Arc::from(name)),
                        args,
                        if_defined,
                        location: self.location(row),
                    });
                }
                Token::Define { name, params, row } => {
                    let stat = self.define(name, &params, row)?;
                    stats.push(stat);
                }
            }
        }
        Ok((Stat::list(stats), Terminator::Eof))
    }

    fn text(&self, text: String) -> Option<Stat> {
        let text = match self.config.compressor() {
            Some(compressor) => compressor.compress(&text),
            None => text,
        };
        (!text.is_empty()).then(|| Stat::Text(Arc::from(text)))
    }

    fn directive(&mut self, id: &str, params: String, row: usize) -> HashlateResult<Stat> {
        match id {
            "if" => self.if_stat(&params, row),
            "for" => self.for_stat(&params, row),
            "switch" => self.switch_stat(&params, row),
            "output" => Ok(Stat::Output(self.single_expr(&params, row, "#()")?)),
            "set" => self.set_stat(&params, row, AssignPolicy::Wisdom, "#set"),
            "setLocal" => self.set_stat(&params, row, AssignPolicy::Local, "#setLocal"),
            "setGlobal" => self.set_stat(&params, row, AssignPolicy::Global, "#setGlobal"),
            "include" => self.include_stat(&params, row),
            "render" => self.render_stat(&params, row),
            "call" | "call?" => self.call_stat(&params, row, id == "call?"),
            "break" | "continue" => {
                if self.for_depth == 0 {
                    return Err(self.message(row, format!("#{id} must be inside a #for loop")));
                }
                Ok(if id == "break" {
                    Stat::Break
                } else {
                    Stat::Continue
                })
            }
            "return" => Ok(Stat::Return),
            _ => self.custom_stat(id, &params, row),
        }
    }

    // --- Control flow ---

    fn if_stat(&mut self, params: &str, row: usize) -> HashlateResult<Stat> {
        let cond = self.single_expr(params, row, "#if")?;
        self.block_depth = self.block_depth.saturating_add(1);
        let (body, term) = self.parse_block()?;
        let else_branch = self.else_chain(term, row)?;
        self.block_depth = self.block_depth.saturating_sub(1);
        Ok(Stat::If {
            cond,
            body: Box::new(body),
            else_branch,
        })
    }

    /// Whatever follows the body of an `#if` or `#elseif`. An `#elseif` chain
    /// becomes nested `If` statements sharing the single closing `#end`.
    fn else_chain(&mut self, term: Terminator, row: usize) -> HashlateResult<Option<Box<Stat>>> {
        match term {
            Terminator::End(_) => Ok(None),
            Terminator::Else(else_row) => {
                let (body, term) = self.parse_block()?;
                self.expect_end(term, "#else", else_row)?;
                Ok(Some(Box::new(body)))
            }
            Terminator::ElseIf {
                params,
                row: elseif_row,
            } => {
                let cond = self.single_expr(&params, elseif_row, "#elseif")?;
                let (body, term) = self.parse_block()?;
                let else_branch = self.else_chain(term, elseif_row)?;
                Ok(Some(Box::new(Stat::If {
                    cond,
                    body: Box::new(body),
                    else_branch,
                })))
            }
            other @ (Terminator::Case { .. } | Terminator::Default(_) | Terminator::Eof) => {
                self.expect_end(other, "#if", row).map(|()| None)
            }
        }
    }

    fn for_stat(&mut self, params: &str, row: usize) -> HashlateResult<Stat> {
        let ctrl = ExprParser::new(params, self.file_name.clone(), row)?.parse_for_ctrl()?;
        self.block_depth = self.block_depth.saturating_add(1);
        self.for_depth = self.for_depth.saturating_add(1);
        let (body, term) = self.parse_block()?;
        self.for_depth = self.for_depth.saturating_sub(1);
        let else_body = match term {
            Terminator::Else(else_row) => {
                let (else_body, term) = self.parse_block()?;
                self.expect_end(term, "#else", else_row)?;
                Some(Box::new(else_body))
            }
            other @ (Terminator::End(_)
            | Terminator::ElseIf { .. }
            | Terminator::Case { .. }
            | Terminator::Default(_)
            | Terminator::Eof) => {
                self.expect_end(other, "#for", row)?;
                None
            }
        };
        self.block_depth = self.block_depth.saturating_sub(1);
        Ok(Stat::For {
            ctrl,
            body: Box::new(body),
            else_body,
        })
    }

    fn switch_stat(&mut self, params: &str, row: usize) -> HashlateResult<Stat> {
        let expr = self.single_expr(params, row, "#switch")?;
        self.block_depth = self.block_depth.saturating_add(1);
        let mut cases = Vec::new();
        let mut default = None;
        let mut term = self.switch_head(row)?;
        loop {
            term = match term {
                Terminator::Case { params, row } => {
                    let values = self.exprs(&params, row)?;
                    if values.is_empty() {
                        return Err(self.message(row, "#case requires at least one value".to_owned()));
                    }
                    let (body, next) = self.parse_block()?;
                    cases.push(Case { values, body });
                    next
                }
                Terminator::Default(row) => {
                    if default.is_some() {
                        return Err(self.message(row, "#switch has more than one #default".to_owned()));
                    }
                    let (body, next) = self.parse_block()?;
                    default = Some(Box::new(body));
                    next
                }
                other @ (Terminator::End(_)
                | Terminator::Else(_)
                | Terminator::ElseIf { .. }
                | Terminator::Eof) => {
                    self.expect_end(other, "#switch", row)?;
                    break;
                }
            };
        }
        self.block_depth = self.block_depth.saturating_sub(1);
        Ok(Stat::Switch {
            expr,
            cases,
            default,
        })
    }

    /// Skips the blank text between `#switch` and its first `#case`.
    fn switch_head(&mut self, row: usize) -> HashlateResult<Terminator> {
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Text { text, .. } if text.trim().is_empty() => {}
                Token::Directive {
                    id,
                    params: Some(params),
                    row,
                } if id == "case" => return Ok(Terminator::Case { params, row }),
                Token::Directive { id, row, .. } if id == "default" => return Ok(Terminator::Default(row)),
                Token::Directive { id, row, .. } if id == "end" => return Ok(Terminator::End(row)),
                Token::Text { row, .. }
                | Token::Directive { row, .. }
                | Token::Call { row, .. }
                | Token::Define { row, .. } => {
                    return Err(self.message(
                        row,
                        "Only #case and #default may appear directly inside #switch".to_owned(),
                    ));
                }
            }
        }
        Err(self.make_error(row, ParseErrorKind::unexpected_eof(Some("#end"))))
    }

    // --- Functions ---

    fn define(&mut self, name: String, params: &str, row: usize) -> HashlateResult<Stat> {
        if self.block_depth > 0 {
            return Err(self.message(row, format!("#define {name} must be at the top level")));
        }
        if self.unit.functions.contains_key(&name) {
            return Err(self.message(row, format!("Template function already defined: {name}")));
        }
        let params = ExprParser::new(params, self.file_name.clone(), row)?.parse_param_names()?;
        self.block_depth = self.block_depth.saturating_add(1);
        let (body, term) = self.parse_block()?;
        self.block_depth = self.block_depth.saturating_sub(1);
        self.expect_end(term, "#define", row)?;

        let function = Arc::new(Function {
            name: Arc::from(name.as_str()),
            params,
            body,
            location: self.location(row),
        });
        self.unit.functions.insert(name, function.clone());
        Ok(Stat::Define(function))
    }

    fn call_stat(&self, params: &str, row: usize, if_defined: bool) -> HashlateResult<Stat> {
        let mut exprs = self.exprs(params, row)?.into_iter();
        let Some(first) = exprs.next() else {
            return Err(self.message(row, "#call requires a function name".to_owned()));
        };
        let rest: Vec<Expr> = exprs.collect();
        // `#call(name(a, b))` names the function directly.
        if rest.is_empty() {
            if let Expr::SharedMethod { name, args, .. } = first {
                return Ok(Stat::Call {
                    target: CallTarget::Named(name),
                    args,
                    if_defined,
                    location: self.location(row),
                });
            }
        }
        Ok(Stat::Call {
            target: CallTarget::Dynamic(first),
            args: rest,
            if_defined,
            location: self.location(row),
        })
    }

    // --- Assignment ---

    fn set_stat(&self, params: &str, row: usize, policy: AssignPolicy, directive: &str) -> HashlateResult<Stat> {
        let exprs = self.exprs(params, row)?;
        if exprs.is_empty() || !exprs.iter().all(Expr::is_assign) {
            return Err(self.message(row, format!("{directive} only accepts assignment expressions")));
        }
        Ok(Stat::Set { policy, exprs })
    }

    // --- Sub-templates ---

    /// Splits `"file", a = 1, b = 2` into the file name resolved against the
    /// current file and the assignments.
    fn sub_template_params(&self, params: &str, row: usize, directive: &str) -> HashlateResult<(String, Vec<Expr>)> {
        let mut exprs = self.exprs(params, row)?.into_iter();
        let target = match exprs.next() {
            Some(Expr::Const(Value::Str(target))) => target,
            _ => {
                return Err(self.message(
                    row,
                    format!("The first parameter of {directive} must be a string constant"),
                ));
            }
        };
        let assigns: Vec<Expr> = exprs.collect();
        if !assigns.iter().all(Expr::is_assign) {
            return Err(self.message(
                row,
                format!("{directive} only accepts assignments after the file name"),
            ));
        }
        Ok((resolve_path(self.file_name.as_deref(), &target), assigns))
    }

    fn include_stat(&mut self, params: &str, row: usize) -> HashlateResult<Stat> {
        let (file_name, assigns) = self.sub_template_params(params, row, "#include")?;
        let source = self
            .config
            .source_factory()
            .get_source(self.config.base_template_path(), &file_name)?;
        if let Some(name) = source.file_name() {
            if self.unit.include_stack.iter().any(|open| open == name) {
                return Err(self.message(row, format!("Circular #include of {name}")));
            }
        }
        let body = parse_file(self.config, self.unit, source)?;
        Ok(Stat::Include {
            assigns,
            body: Box::new(body),
        })
    }

    fn render_stat(&self, params: &str, row: usize) -> HashlateResult<Stat> {
        let (file_name, assigns) = self.sub_template_params(params, row, "#render")?;
        Ok(Stat::Render {
            file_name,
            assigns,
            cache: RenderCache::default(),
            location: self.location(row),
        })
    }

    // --- Extension ---

    fn custom_stat(&mut self, id: &str, params: &str, row: usize) -> HashlateResult<Stat> {
        let Some(directive) = self.config.directive(id) else {
            return Err(self.make_error(
                row,
                ParseErrorKind::UnknownDirective {
                    name: id.to_owned(),
                },
            ));
        };
        let args = self.exprs(params, row)?;
        let body = if directive.has_end() {
            self.block_depth = self.block_depth.saturating_add(1);
            let (body, term) = self.parse_block()?;
            self.block_depth = self.block_depth.saturating_sub(1);
            self.expect_end(term, &format!("#{id}"), row)?;
            Some(Box::new(body))
        } else {
            None
        };
        Ok(Stat::Custom {
            name: Arc::from(id),
            directive,
            args,
            body,
            location: self.location(row),
        })
    }
}
