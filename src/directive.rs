//! The extension point for custom `#name(args) ... #end` directives.

use crate::{
    ast::{Location, Stat},
    error::{HashlateError, HashlateResult},
    interpreter::Runtime,
    scope::ScopeId,
    template::Env,
    value::Value,
    writer::{CharWriter, Writer},
};

/// A custom directive registered with
/// [`EngineConfig::add_directive`](crate::EngineConfig::add_directive).
///
/// Arguments are the evaluated parameter expressions of the directive.
pub trait Directive: Send + Sync {
    /// Whether the directive encloses a body terminated by `#end`.
    fn has_end(&self) -> bool {
        false
    }

    fn exec(&self, ctx: &mut DirectiveContext<'_, '_>, args: &[Value]) -> HashlateResult<()>;
}

/// What a [`Directive`] can see and do while it runs.
pub struct DirectiveContext<'a, 's> {
    pub(crate) env: &'a Env,
    pub(crate) rt: &'a mut Runtime<'s>,
    pub(crate) scope: ScopeId,
    pub(crate) writer: &'a mut dyn Writer,
    pub(crate) body: Option<&'a Stat>,
    pub(crate) location: &'a Location,
}

impl DirectiveContext<'_, '_> {
    pub fn write_str(&mut self, s: &str) -> HashlateResult<()> {
        self.writer.write_str(s)
    }

    pub fn write_value(&mut self, value: &Value) -> HashlateResult<()> {
        self.writer.write_value(value)
    }

    /// Renders the body straight into the output.
    pub fn render_body(&mut self) -> HashlateResult<()> {
        match self.body {
            Some(body) => body.exec(self.env, self.rt, self.scope, self.writer),
            None => Ok(()),
        }
    }

    /// Renders the body into a string instead of the output.
    pub fn render_body_to_string(&mut self) -> HashlateResult<String> {
        let mut buffer = CharWriter::new(String::new());
        if let Some(body) = self.body {
            body.exec(self.env, self.rt, self.scope, &mut buffer)?;
        }
        Ok(buffer.into_inner())
    }

    /// Looks a variable up the same way an expression would.
    pub fn get(&self, name: &str) -> Value {
        self.rt.scopes.get(self.scope, name)
    }

    /// Binds a variable in the scope the directive runs in.
    pub fn set_local<V: Into<Value>>(&mut self, name: &str, value: V) {
        self.rt.scopes.set_local(self.scope, name, value.into());
    }

    pub const fn location(&self) -> &Location {
        self.location
    }

    /// Builds a template error pointing at the directive.
    pub fn error<M: Into<String>>(&self, message: M) -> HashlateError {
        HashlateError::template(message, self.location)
    }
}

/// `#escape ... #end` writes its rendered body HTML-escaped.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscapeDirective;

impl Directive for EscapeDirective {
    fn has_end(&self) -> bool {
        true
    }

    fn exec(&self, ctx: &mut DirectiveContext<'_, '_>, args: &[Value]) -> HashlateResult<()> {
        if !args.is_empty() {
            return Err(ctx.error("#escape takes no arguments"));
        }
        let body = ctx.render_body_to_string()?;
        ctx.write_str(&escape_html(&body))
    }
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
