use std::{collections::HashMap, sync::Arc};

use tracing::debug;

use crate::{
    ast::{CallTarget, ForCtrl, Function, Location, RenderCache, RenderedTemplate, Stat},
    directive::DirectiveContext,
    error::{HashlateError, HashlateResult},
    expr::{Expr, eval_all},
    parser,
    scope::{AssignPolicy, Ctrl, Jump, ScopeId, Scopes},
    template::Env,
    value::{IntRange, LoopStatus, Value, ValueIter},
    writer::Writer,
};

/// Mutable state of one render call: the scope frames and the control state
/// shared by all of them.
pub(crate) struct Runtime<'s> {
    pub(crate) scopes: Scopes<'s>,
    pub(crate) ctrl: Ctrl,
}

impl<'s> Runtime<'s> {
    pub(crate) fn new(data: HashMap<String, Value>, shared: &'s HashMap<String, Value>) -> Self {
        Self {
            scopes: Scopes::new(data, shared),
            ctrl: Ctrl::default(),
        }
    }

    /// Runs `f` with `policy` installed, restoring the previous policy even
    /// when `f` fails.
    fn with_policy<T>(
        &mut self,
        policy: AssignPolicy,
        f: impl FnOnce(&mut Self) -> HashlateResult<T>,
    ) -> HashlateResult<T> {
        let previous = self.ctrl.replace_policy(policy);
        let result = f(self);
        self.ctrl.replace_policy(previous);
        result
    }

    /// Runs `f` in a fresh child frame of `parent`.
    fn in_frame<T>(
        &mut self,
        parent: ScopeId,
        f: impl FnOnce(&mut Self, ScopeId) -> HashlateResult<T>,
    ) -> HashlateResult<T> {
        let frame = self.scopes.push(parent);
        let result = f(self, frame);
        self.scopes.pop(frame);
        result
    }

    /// The status of the loop enclosing `scope`, if any.
    fn outer_status(&self, scope: ScopeId) -> Value {
        let status = self.scopes.get(scope, "for");
        if matches!(status, Value::Status(_)) { status } else { Value::Null }
    }

    /// Consumes a pending break/continue after a loop body. Returns true when
    /// the loop must stop.
    const fn take_loop_jump(&mut self) -> bool {
        match self.ctrl.jump() {
            Jump::None => false,
            Jump::Continue => {
                self.ctrl.clear_jump();
                false
            }
            Jump::Break => {
                self.ctrl.clear_jump();
                true
            }
            Jump::Return => true,
        }
    }
}

impl Stat {
    pub(crate) fn exec(
        &self,
        env: &Env,
        rt: &mut Runtime<'_>,
        scope: ScopeId,
        writer: &mut dyn Writer,
    ) -> HashlateResult<()> {
        match self {
            Self::Nop | Self::Define(_) => Ok(()),
            Self::Text(text) => writer.write_str(text),
            Self::Output(expr) => {
                let value = expr.eval(env, rt, scope)?;
                writer.write_value(&value)
            }
            Self::List(stats) => {
                for stat in stats {
                    stat.exec(env, rt, scope, writer)?;
                    if rt.ctrl.is_jump() {
                        break;
                    }
                }
                Ok(())
            }
            Self::If {
                cond,
                body,
                else_branch,
            } => {
                if cond.eval(env, rt, scope)?.is_truthy() {
                    body.exec(env, rt, scope, writer)
                } else if let Some(else_branch) = else_branch {
                    else_branch.exec(env, rt, scope, writer)
                } else {
                    Ok(())
                }
            }
            Self::For {
                ctrl,
                body,
                else_body,
            } => rt.in_frame(scope, |rt, frame| {
                let ran = match ctrl {
                    ForCtrl::Iter { item, expr } => {
                        let target = expr.eval(env, rt, scope)?;
                        exec_iter_loop(env, rt, frame, writer, item, target, body)?
                    }
                    ForCtrl::Numeric { init, cond, update } => {
                        exec_numeric_loop(env, rt, frame, writer, init, cond.as_ref(), update, body)?
                    }
                };
                match else_body {
                    Some(else_body) if !ran => else_body.exec(env, rt, frame, writer),
                    _ => Ok(()),
                }
            }),
            Self::Switch {
                expr,
                cases,
                default,
            } => {
                let value = expr.eval(env, rt, scope)?;
                for case in cases {
                    for candidate in &case.values {
                        if candidate.eval(env, rt, scope)? == value {
                            return case.body.exec(env, rt, scope, writer);
                        }
                    }
                }
                match default {
                    Some(default) => default.exec(env, rt, scope, writer),
                    None => Ok(()),
                }
            }
            Self::Call {
                target,
                args,
                if_defined,
                location,
            } => {
                let name = match target {
                    CallTarget::Named(name) => name.clone(),
                    CallTarget::Dynamic(expr) => {
                        let value = expr.eval(env, rt, scope)?;
                        let Value::Str(name) = value else {
                            return Err(HashlateError::template(
                                format!("#call expects a function name, found {}", value.type_name()),
                                location,
                            ));
                        };
                        name
                    }
                };
                match env.get_function(&name)? {
                    Some(function) => call_function(env, rt, scope, writer, &function, args, location),
                    None if *if_defined => Ok(()),
                    None => Err(HashlateError::template(
                        format!("Template function not defined: {name}"),
                        location,
                    )),
                }
            }
            Self::Include { assigns, body } => {
                let result = rt.in_frame(scope, |rt, frame| {
                    rt.with_policy(AssignPolicy::Local, |rt| eval_all(assigns, env, rt, frame))?;
                    body.exec(env, rt, frame, writer)
                });
                rt.ctrl.clear_jump();
                result
            }
            Self::Render {
                file_name,
                assigns,
                cache,
                location,
            } => {
                let template = sub_template(env, cache, file_name).map_err(|err| {
                    if matches!(err, HashlateError::MissingTemplate { .. } | HashlateError::Io(_)) {
                        HashlateError::template(format!("#render failed: {err}"), location)
                    } else {
                        err
                    }
                })?;
                let result = rt.in_frame(scope, |rt, frame| {
                    rt.with_policy(AssignPolicy::Local, |rt| eval_all(assigns, env, rt, frame))?;
                    template.body.exec(&template.env, rt, frame, writer)
                });
                rt.ctrl.clear_jump();
                result
            }
            Self::Set { policy, exprs } => rt
                .with_policy(*policy, |rt| eval_all(exprs, env, rt, scope))
                .map(drop),
            Self::Break => {
                rt.ctrl.set_jump(Jump::Break);
                Ok(())
            }
            Self::Continue => {
                rt.ctrl.set_jump(Jump::Continue);
                Ok(())
            }
            Self::Return => {
                rt.ctrl.set_jump(Jump::Return);
                Ok(())
            }
            Self::Custom {
                directive,
                args,
                body,
                location,
                ..
            } => {
                let args = eval_all(args, env, rt, scope)?;
                let mut ctx = DirectiveContext {
                    env,
                    rt,
                    scope,
                    writer,
                    body: body.as_deref(),
                    location,
                };
                directive.exec(&mut ctx, &args)
            }
        }
    }
}

/// What `#for(x : target)` walks.
enum ForIter {
    Items {
        items: std::vec::IntoIter<Value>,
        size: usize,
    },
    /// Ranges are walked by index, never materialised.
    Range {
        range: IntRange,
        next: usize,
    },
    Host(ValueIter),
}

impl ForIter {
    /// Lists are snapshotted, so the body may modify the list it walks.
    fn new(target: Value) -> Self {
        let items: Vec<Value> = match target {
            Value::Iter(iter) => return Self::Host(iter),
            Value::Range(range) => return Self::Range { range, next: 0 },
            Value::Null => Vec::new(),
            Value::List(list) => list.read().clone(),
            Value::Map(map) => map
                .read()
                .iter()
                .map(|(key, value)| Value::map([("key", Value::str(key)), ("value", value.clone())]))
                .collect(),
            Value::Bool(_)
            | Value::Int(_)
            | Value::Long(_)
            | Value::Float(_)
            | Value::Double(_)
            | Value::Str(_)
            | Value::Status(_)
            | Value::Object(_) => vec![target],
        };
        let size = items.len();
        Self::Items {
            items: items.into_iter(),
            size,
        }
    }

    fn size(&self) -> Option<usize> {
        match self {
            Self::Items { size, .. } => Some(*size),
            Self::Range { range, .. } => Some(range.size()),
            Self::Host(_) => None,
        }
    }

    fn has_next(&self) -> bool {
        match self {
            Self::Items { items, .. } => items.len() > 0,
            Self::Range { range, next } => *next < range.size(),
            Self::Host(iter) => iter.has_next(),
        }
    }
}

impl Iterator for ForIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Items { items, .. } => items.next(),
            Self::Range { range, next } => {
                let value = range.get(*next)?;
                *next = next.saturating_add(1);
                Some(Value::Int(value))
            }
            Self::Host(iter) => iter.next_value(),
        }
    }
}

/// Runs an iterator loop in `frame`. Returns whether the body ran at all.
fn exec_iter_loop(
    env: &Env,
    rt: &mut Runtime<'_>,
    frame: ScopeId,
    writer: &mut dyn Writer,
    item: &str,
    target: Value,
    body: &Stat,
) -> HashlateResult<bool> {
    let outer = rt.outer_status(frame);
    let mut iter = ForIter::new(target);
    let mut index: usize = 0;
    while let Some(value) = iter.next() {
        let status = LoopStatus::iterator(index, iter.size(), !iter.has_next(), outer.clone());
        rt.scopes.set_local(frame, item, value);
        rt.scopes.set_local(frame, "for", Value::Status(Arc::new(status)));
        body.exec(env, rt, frame, writer)?;
        index = index.saturating_add(1);
        if rt.take_loop_jump() {
            break;
        }
    }
    Ok(index > 0)
}

/// Runs `#for(init; cond; update)` in `frame`. Returns whether the body ran
/// at all.
fn exec_numeric_loop(
    env: &Env,
    rt: &mut Runtime<'_>,
    frame: ScopeId,
    writer: &mut dyn Writer,
    init: &[Expr],
    cond: Option<&Expr>,
    update: &[Expr],
    body: &Stat,
) -> HashlateResult<bool> {
    let outer = rt.outer_status(frame);
    rt.with_policy(AssignPolicy::Local, |rt| eval_all(init, env, rt, frame))?;
    let mut index: usize = 0;
    loop {
        if let Some(cond) = cond {
            let go = rt.with_policy(AssignPolicy::Local, |rt| cond.eval(env, rt, frame))?;
            if !go.is_truthy() {
                break;
            }
        }
        let status = LoopStatus::numeric(index, outer.clone());
        rt.scopes.set_local(frame, "for", Value::Status(Arc::new(status)));
        body.exec(env, rt, frame, writer)?;
        index = index.saturating_add(1);
        if rt.take_loop_jump() {
            break;
        }
        rt.with_policy(AssignPolicy::Local, |rt| eval_all(update, env, rt, frame))?;
    }
    Ok(index > 0)
}

fn call_function(
    env: &Env,
    rt: &mut Runtime<'_>,
    scope: ScopeId,
    writer: &mut dyn Writer,
    function: &Function,
    args: &[Expr],
    location: &Location,
) -> HashlateResult<()> {
    if args.len() != function.params.len() {
        return Err(HashlateError::template(
            format!(
                "Wrong number of arguments to function {} (defined {}): expected {}, found {}",
                function.name,
                function.location,
                function.params.len(),
                args.len()
            ),
            location,
        ));
    }
    let values = eval_all(args, env, rt, scope)?;
    let result = rt.in_frame(scope, |rt, frame| {
        for (param, value) in function.params.iter().zip(values) {
            rt.scopes.set_local(frame, param, value);
        }
        function.body.exec(env, rt, frame, writer)
    });
    rt.ctrl.clear_jump();
    result
}

/// Compiles a `#render` target on first use, and again in dev mode when one of
/// its sources changed.
fn sub_template(env: &Env, cache: &RenderCache, file_name: &str) -> HashlateResult<Arc<RenderedTemplate>> {
    let config = env.config();
    if let Some(template) = cache.get(file_name) {
        if !config.dev_mode() || !template.env.is_modified() {
            return Ok(template);
        }
        debug!(file_name, "recompiling modified #render target");
    }
    let source = config
        .source_factory()
        .get_source(config.base_template_path(), file_name)?;
    let unit = parser::parse_source(config, source)?;
    let template = Arc::new(RenderedTemplate {
        env: Env::new(config.clone(), unit.functions, unit.sources),
        body: unit.body,
    });
    cache.insert(file_name.to_owned(), template.clone());
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::EngineConfig,
        source::{MemorySourceFactory, StringSource},
        writer::CharWriter,
    };

    fn run(config: EngineConfig, input: &str, data: HashMap<String, Value>) -> HashlateResult<(String, HashMap<String, Value>)> {
        let config = Arc::new(config);
        let unit = parser::parse_source(&config, Arc::new(StringSource::new(input, false)))?;
        let env = Env::new(config.clone(), unit.functions, unit.sources);
        let shared = HashMap::new();
        let mut rt = Runtime::new(data, &shared);
        let mut writer = CharWriter::new(String::new());
        unit.body.exec(&env, &mut rt, Scopes::root(), &mut writer)?;

        let globals = ["x", "y", "i", "n", "item"]
            .into_iter()
            .filter_map(|key| {
                rt.scopes
                    .get_local(Scopes::root(), key)
                    .map(|value| (key.to_owned(), value.clone()))
            })
            .collect();
        Ok((writer.into_inner(), globals))
    }

    fn render(input: &str) -> String {
        run(EngineConfig::new(), input, HashMap::new()).unwrap().0
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_break_and_continue() {
        assert_eq!(
            render("#for(x : [1..6])#if(x == 2)#continue#end#if(x == 5)#break#end#(x)#end"),
            "134"
        );
        assert_eq!(render("#for(i = 0; i < 10; i++)#if(i == 3)#break#end#(i)#end"), "012");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_continue_still_runs_update() {
        assert_eq!(render("#for(i = 0; i < 4; i++)#if(i % 2 == 0)#continue#end#(i)#end"), "13");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_return_leaves_function_only() {
        let out = render("#define f()\na#return\nb\n#end\n#@f()c");
        assert_eq!(out, "ac");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_return_propagates_through_loops() {
        let out = render("#define f()#for(x : [1, 2, 3])#(x)#if(x == 2)#return#end#end after#end#@f()!");
        assert_eq!(out, "12!");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_loop_status() {
        let out = render("#for(x : ['a', 'b', 'c'])#(for.index)#(for.count)#(for.first ? 'F' : '')#(for.last ? 'L' : '')#(for.odd ? 'o' : 'e')#(for.size) #end");
        assert_eq!(out, "01Fo3 12e3 23Lo3 ");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_nested_loop_outer_status() {
        let out = render("#for(a : [1, 2])#for(b : [1])#(for.outer.index)#(for.outer == for ? 'same' : '')#end#end");
        assert_eq!(out, "01");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_else() {
        assert_eq!(render("#for(x : [])#(x)#else empty#end"), " empty");
        assert_eq!(render("#for(x : null)#(x)#else empty#end"), " empty");
        assert_eq!(render("#for(x : [1])#(x)#else empty#end"), "1");
        assert_eq!(render("#for(i = 0; i < 0; i++)#(i)#else none#end"), " none");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_for_over_map_and_scalar() {
        assert_eq!(render("#for(e : {a: 1, b: 2})#(e.key)=#(e.value);#end"), "a=1;b=2;");
        assert_eq!(render("#for(x : 'solo')[#(x)]#end"), "[solo]");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_list_is_snapshotted_for_iteration() {
        let out = render("#set(xs = [1, 2])#for(x : xs)#(xs.add(x))#end#(xs.size())");
        assert_eq!(out, "truetrue4");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_set_policies() {
        let (_, globals) = run(
            EngineConfig::new(),
            "#for(item : [1])#setGlobal(x = 1)#setLocal(y = 2)#end#for(i = 0; i < 1; i++)#end",
            HashMap::new(),
        )
        .unwrap();
        assert_eq!(globals.get("x"), Some(&Value::Int(1)));
        assert!(!globals.contains_key("y"));
        assert!(!globals.contains_key("i"));
        assert!(!globals.contains_key("item"));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_wisdom_assignment_updates_existing_binding() {
        let mut data = HashMap::new();
        data.insert("n".to_owned(), Value::Int(0));
        let (out, globals) = run(
            EngineConfig::new(),
            "#for(x : [1, 2, 3])#set(n = n + x)#end#(n)",
            data,
        )
        .unwrap();
        assert_eq!(out, "6");
        assert_eq!(globals.get("n"), Some(&Value::Int(6)));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_policy_restored_after_failed_set() {
        let config = Arc::new(EngineConfig::new());
        let unit = parser::parse_source(&config, Arc::new(StringSource::new("#setLocal(x = 1 / 0)", false))).unwrap();
        let env = Env::new(config.clone(), unit.functions, unit.sources);
        let shared = HashMap::new();
        let mut rt = Runtime::new(HashMap::new(), &shared);
        let mut writer = CharWriter::new(String::new());
        assert!(unit.body.exec(&env, &mut rt, Scopes::root(), &mut writer).is_err());
        assert_eq!(rt.ctrl.policy(), AssignPolicy::Wisdom);
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_switch_picks_first_match() {
        let src = "#switch(x)#case(1, 2)low#case(2)dup#default other#end";
        let mut data = HashMap::new();
        data.insert("x".to_owned(), Value::Int(2));
        assert_eq!(run(EngineConfig::new(), src, data).unwrap().0, "low");
        let mut data = HashMap::new();
        data.insert("x".to_owned(), Value::Int(9));
        assert_eq!(run(EngineConfig::new(), src, data).unwrap().0, " other");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_call_errors() {
        let err = run(EngineConfig::new(), "#define f(a)#end\n#@f(1, 2)", HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("Wrong number of arguments"), "{err}");
        assert!(err.to_string().contains("(defined at row 1)"), "{err}");
        assert_eq!(err.location().map(Location::row), Some(2));

        let err = run(EngineConfig::new(), "#@missing()", HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("not defined"), "{err}");
        assert_eq!(render("#@missing?()#call?('missing')ok"), "ok");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_dynamic_call() {
        assert_eq!(render("#define hi(who)hi #(who)#end#set(f = 'hi')#call(f, 'bob')"), "hi bob");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_uses_own_functions() {
        let factory = MemorySourceFactory::new();
        factory.insert("part.html", "#define inner()in#end#@inner() #(v)");
        let config = EngineConfig::new().with_source_factory(factory);
        let (out, _) = run(config, "#render('part.html', v = 7)|#@inner?()", HashMap::new()).unwrap();
        assert_eq!(out, "in 7|");
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_render_missing_file_fails_at_render_time() {
        let config = EngineConfig::new().with_source_factory(MemorySourceFactory::new());
        let err = run(config, "a\n#render('gone.html')", HashMap::new()).unwrap_err();
        assert!(matches!(err, HashlateError::Template { .. }), "{err:?}");
        assert!(err.to_string().contains("Template not found: gone.html"), "{err}");
        assert_eq!(err.location().map(Location::row), Some(2));
    }

    #[test]
    #[ntest::timeout(100)]
    fn test_huge_range_is_not_materialised() {
        assert_eq!(render("#for(x : [0..2147483647])#(x)#break#end"), "0");
        assert_eq!(
            render("#for(x : [2147483647..-2147483647])#(for.size)#(for.last)#break#end"),
            "4294967295false"
        );
        assert_eq!(render("#for(x : [2..0])#(x)#(for.last ? '' : ',')#end"), "2,1,0");
    }
}
