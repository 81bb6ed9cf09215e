
use std::sync::Arc;

use fixtures::{generate_random_whitespace, generate_random_whitespace_at_least_one, get_engine, get_engine_with_files};
use hashlate::{
    Compressor, Data, Directive, DirectiveContext, Engine, EngineConfig, HashlateError, HashlateResult,
    ParseError, ParseErrorKind, StaticNamespace, TemplateObject, Value,
};

fn render(template: &str, data: Option<&Data>) -> String {
    get_engine()
        .get_template_by_string(template, false)
        .unwrap()
        .render_to_string(data)
        .unwrap()
}

fn render_err(template: &str, data: Option<&Data>) -> HashlateError {
    match get_engine().get_template_by_string(template, false) {
        Ok(compiled) => compiled.render_to_string(data).unwrap_err(),
        Err(err) => err,
    }
}

// --- Text and output ---

#[test]
#[ntest::timeout(100)]
fn test_text_without_directives_is_unchanged() {
    let text = "plain text: color #fff, 100% sure.\n  second line\t\n#third";
    assert_eq!(render(text, None), text, "Text without directives must render verbatim");
}

#[test]
#[ntest::timeout(100)]
fn test_basic_substitution() {
    let mut data = Data::new();
    data.insert("name", "Jessica");
    assert_eq!(
        render("Hello, #(name)!", Some(&data)),
        "Hello, Jessica!",
        "Rendered string should match the template."
    );
}

#[test]
#[ntest::timeout(100)]
fn test_null_renders_nothing() {
    assert_eq!(render("[#(missing)]", None), "[]");
}

#[test]
#[ntest::timeout(100)]
fn test_arithmetic_and_concatenation() {
    assert_eq!(render("#(1 + 2 * 3) #(10 / 4) #(10.0 / 4) #('a' + 1) #(7 % 3)", None), "7 2 2.5 a1 1");
    assert_eq!(render("#(2147483647 + 1L)", None), "2147483648");
}

#[test]
#[ntest::timeout(100)]
fn test_division_by_zero_fails() {
    let err = render_err("#(1 / 0)", None);
    assert!(matches!(err, HashlateError::Template { .. }), "{err}");
}

#[test]
#[ntest::timeout(100)]
fn test_hash_before_non_directive_text_is_literal() {
    assert_eq!(
        render("<td style=\"color:#ff0000\"># not a directive #\n", None),
        "<td style=\"color:#ff0000\"># not a directive #\n"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_double_output_format() {
    assert_eq!(render("#(1.5e10)|#(1e20)|#(2.0)|#(0.1 + 0.2)", None), "15000000000.0|1e20|2.0|0.30000000000000004");
}

#[test]
#[ntest::timeout(100)]
fn test_numeric_literals() {
    assert_eq!(render("#(0x1F)|#(10L + 1)|#(1.5e10 > 1e9)|#(017)", None), "31|11|true|15");
    let err = render_err("#(10.5L)", None);
    let HashlateError::Parse(err) = err else {
        panic!("expected a parse error, got {err:?}");
    };
    assert!(matches!(err.kind, ParseErrorKind::InvalidNumber { .. }));
}

#[test]
#[ntest::timeout(100)]
fn test_map_and_list_literals() {
    assert_eq!(render("#set(m = {a: 1, \"b\": 2})#(m.a + m['b'])", None), "3");
    assert_eq!(render("#set(xs = [1, 2, 3])#(xs[1])#(xs.size())", None), "23");
    assert_eq!(render("#for(x : [3..1])#(x)#end", None), "321");
    assert!(matches!(
        render_err("#({1 + 1: 2})", None),
        HashlateError::Parse(ParseError { kind: ParseErrorKind::IllegalMapKey { .. }, .. })
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_comparison_across_numeric_types() {
    assert_eq!(render("#(1 == 1L) #(1 == 1.0) #('a' < 'b') #(2 >= 3)", None), "true true true false");
}

#[test]
#[ntest::timeout(100)]
fn test_null_safe_access() {
    let mut data = Data::new();
    data.insert("user", Value::map([("name", "ann")]));
    assert_eq!(render("#(user.name ?? 'anon')|#(nobody.name ?? 'anon')|#(nobody.name??)", Some(&data)), "ann|anon|");

    let err = render_err("#(nobody.name)", None);
    assert!(err.to_string().contains("null"), "{err}");
}

#[test]
#[ntest::timeout(100)]
fn test_builtin_methods() {
    let mut data = Data::new();
    data.insert("s", "hello");
    data.insert("xs", vec!["a", "b"]);
    assert_eq!(
        render("#(s.toUpperCase())#(s.length())#(s.substring(1, 3))|#(xs.join('+'))", Some(&data)),
        "HELLO5el|a+b"
    );
}

// --- Control flow ---

#[test]
#[ntest::timeout(100)]
fn test_if_else() {
    assert_eq!(render("#if(true)A#else B#end", None), "A");
    assert_eq!(render("#if(false)A#else B#end", None), " B");
}

#[test]
#[ntest::timeout(100)]
fn test_elseif_chain_with_random_whitespace() {
    let template = format!(
        "#if({}n > 10{})big#elseif({}n > 5{})mid#else{}small#end",
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace_at_least_one(),
    );
    dbg!(&template);

    for (n, expected) in [(20, "big"), (7, "mid"), (1, "small")] {
        let mut data = Data::new();
        data.insert("n", n);
        assert_eq!(render(&template, Some(&data)).trim(), expected);
    }
}

#[test]
#[ntest::timeout(100)]
fn test_basic_iteration() {
    let template = format!(
        "#for({}cat{}:{}cats{})Greetings #(cat)\n#end",
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
    );
    dbg!(&template);

    let mut data = Data::new();
    data.insert("cats", vec!["Fluffy", "Whiskers", "Mittens"]);
    assert_eq!(
        render(&template, Some(&data)),
        "Greetings Fluffy\nGreetings Whiskers\nGreetings Mittens\n"
    );
}

#[test]
#[ntest::timeout(100)]
fn test_for_else_on_empty() {
    let template = "#for(x : xs)<#(x)>#else empty#end";
    let mut data = Data::new();
    data.insert("xs", Vec::<i32>::new());
    assert_eq!(render(template, Some(&data)), " empty");

    data.insert("xs", vec![1, 2]);
    assert_eq!(render(template, Some(&data)), "<1><2>");
}

#[test]
#[ntest::timeout(100)]
fn test_numeric_for_loop() {
    assert_eq!(render("#for(i = 0; i < 5; i = i + 2)#(i)#end", None), "024");
}

#[test]
#[ntest::timeout(100)]
fn test_nested_loops_see_outer_status() {
    let template = "#for(a : ['x', 'y'])#for(b : [1, 2])#(for.outer.index)#(a)#(b) #end#end";
    assert_eq!(render(template, None), "0x1 0x2 1y1 1y2 ");
}

#[test]
#[ntest::timeout(100)]
fn test_host_iterator() {
    let mut data = Data::new();
    data.insert("it", Value::iter((1..=3).map(Value::from)));
    assert_eq!(render("#for(x : it)#(x)#(for.last ? '.' : ',')#end", Some(&data)), "1,2,3.");
}

#[test]
#[ntest::timeout(100)]
fn test_switch() {
    let template = "#switch(day)\n#case('sat', 'sun')\nweekend\n#case('mon')\nugh\n#default\nweekday\n#end\n";
    for (day, expected) in [("sun", "weekend\n"), ("mon", "ugh\n"), ("wed", "weekday\n")] {
        let mut data = Data::new();
        data.insert("day", day);
        assert_eq!(render(template, Some(&data)), expected, "day {day}");
    }
}

// --- Functions ---

#[test]
#[ntest::timeout(100)]
fn test_define_and_call() {
    assert_eq!(render("#define add(a, b)#(a + b)#end#call(add(2, 3))|#@add(2, 3)", None), "5|5");
}

#[test]
#[ntest::timeout(100)]
fn test_function_can_be_called_before_definition() {
    let template = "#@hello('you')\n#define hello(who)\nhello #(who)\n#end\n";
    assert_eq!(render(template, None), "hello you\n");
}

#[test]
#[ntest::timeout(100)]
fn test_wrong_arity_fails_at_call_time() {
    let err = render_err("ok\n#define f(a)#end#@f()", None);
    let HashlateError::Template { message, location } = err else {
        panic!("expected a template error");
    };
    assert!(message.contains("Wrong number of arguments"), "{message}");
    assert_eq!(location.row(), 2);
}

#[test]
#[ntest::timeout(100)]
fn test_function_parameters_are_local() {
    assert_eq!(render("#define f(x)#(x)#end#@f(1)[#(x)]", None), "1[]");
}

#[test]
#[ntest::timeout(100)]
fn test_shared_functions() {
    let engine = get_engine();
    engine
        .add_shared_function_by_string("#define hello(n)\nHello #(n)!\n#end\n")
        .unwrap();
    let template = engine.get_template_by_string("#@hello('there')", false).unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "Hello there!\n");

    let err = engine
        .add_shared_function_by_string("#define hello()#end")
        .unwrap_err();
    assert!(matches!(err, HashlateError::Config { .. }), "{err}");
}

#[test]
#[ntest::timeout(100)]
fn test_local_function_shadows_shared() {
    let engine = get_engine();
    engine.add_shared_function_by_string("#define f()shared#end").unwrap();
    let template = engine
        .get_template_by_string("#define f()local#end#@f()", false)
        .unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "local");
}

#[test]
#[ntest::timeout(100)]
fn test_shared_functions_reload_in_dev_mode() {
    let (engine, files) = get_engine_with_files(&[("lib.html", "#define v()one#end")], true);
    engine.add_shared_function("lib.html").unwrap();
    let template = engine.get_template_by_string("#@v()", true).unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "one");

    files.insert("lib.html", "#define v()two#end");
    assert_eq!(template.render_to_string(None).unwrap(), "two");
}

// --- Assignment and scoping ---

#[test]
#[ntest::timeout(100)]
fn test_set_global_is_visible_after_nested_blocks() {
    let (engine, _) = get_engine_with_files(
        &[
            ("main.html", "#for(i : [1])#for(j : [1])#include('part.html')#end#end#(x)"),
            ("part.html", "#setGlobal(x = 'set')"),
        ],
        false,
    );
    let template = engine.get_template("main.html").unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "set");
}

#[test]
#[ntest::timeout(100)]
fn test_local_writes_do_not_leak() {
    assert_eq!(render("#for(i = 0; i < 2; i++)#setLocal(y = i)#end[#(y)][#(i)]", None), "[][]");
}

#[test]
#[ntest::timeout(100)]
fn test_wisdom_assignment_reaches_existing_variable() {
    let mut data = Data::new();
    data.insert("total", 0);
    assert_eq!(render("#for(x : [1, 2, 3])#set(total = total + x)#end#(total)", Some(&data)), "6");
}

#[test]
#[ntest::timeout(100)]
fn test_data_overrides_shared_objects() {
    let mut config = EngineConfig::new();
    config.add_shared_object("site", "hashlate").unwrap();
    let engine = Engine::with_config("test", config);
    let template = engine.get_template_by_string("#(site)", false).unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "hashlate");

    let mut data = Data::new();
    data.insert("site", Value::Null);
    assert_eq!(template.render_to_string(Some(&data)).unwrap(), "");
}

// --- Include and render ---

#[test]
#[ntest::timeout(100)]
fn test_include_resolves_relative_paths() {
    let (engine, _) = get_engine_with_files(
        &[
            ("blog/index.html", "#include('_post.html', title = 'T')|#include('/footer.html')"),
            ("blog/_post.html", "post #(title)"),
            ("footer.html", "foot"),
        ],
        false,
    );
    let template = engine.get_template("blog/index.html").unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "post T|foot");
}

#[test]
#[ntest::timeout(100)]
fn test_include_assignments_are_local() {
    let (engine, _) = get_engine_with_files(&[("main.html", "#include('p.html', v = 1)[#(v)]"), ("p.html", "#(v)")], false);
    let template = engine.get_template("main.html").unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "1[]");
}

#[test]
#[ntest::timeout(100)]
fn test_render_directive() {
    let (engine, files) = get_engine_with_files(
        &[("main.html", "#for(n : [1, 2])#render('row.html', n = n)#end"), ("row.html", "<#(n)>")],
        true,
    );
    let template = engine.get_template("main.html").unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "<1><2>");

    files.insert("row.html", "(#(n))");
    assert_eq!(template.render_to_string(None).unwrap(), "(1)(2)");
}

// --- Configuration and extension ---

#[test]
#[ntest::timeout(100)]
fn test_compressor() {
    let engine = Engine::with_config("test", EngineConfig::new().with_compressor(Compressor::lines()));
    let template = engine
        .get_template_by_string("<ul>\n    <li>#(x)</li>\n</ul>", false)
        .unwrap();
    let mut data = Data::new();
    data.insert("x", 1);
    assert_eq!(template.render_to_string(Some(&data)).unwrap(), "<ul>\n<li>1</li>\n</ul>");
}

#[test]
#[ntest::timeout(100)]
fn test_escape_directive() {
    let mut data = Data::new();
    data.insert("x", "Tom & Jerry");
    assert_eq!(
        render("#escape()<b>#(x)</b>#end", Some(&data)),
        "&lt;b&gt;Tom &amp; Jerry&lt;/b&gt;"
    );
}

struct Repeat;

impl Directive for Repeat {
    fn has_end(&self) -> bool {
        true
    }

    fn exec(&self, ctx: &mut DirectiveContext<'_, '_>, args: &[Value]) -> HashlateResult<()> {
        let Some(times) = args.first().and_then(Value::as_i64) else {
            return Err(ctx.error("#repeat needs a count"));
        };
        for i in 0..times {
            ctx.set_local("i", i);
            ctx.render_body()?;
        }
        Ok(())
    }
}

#[test]
#[ntest::timeout(100)]
fn test_custom_directive() {
    let mut config = EngineConfig::new();
    config.add_directive("repeat", Repeat).unwrap();
    assert!(config.add_directive("if", Repeat).is_err());
    let engine = Engine::with_config("test", config);

    let template = engine.get_template_by_string("#repeat(3)#(i)#end", false).unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "012");

    let template = engine.get_template_by_string("#repeat('x')#end", false).unwrap();
    let err = template.render_to_string(None).unwrap_err();
    assert!(err.to_string().contains("#repeat needs a count"), "{err}");
}

#[test]
#[ntest::timeout(100)]
fn test_shared_and_static_methods() {
    let mut config = EngineConfig::new();
    config
        .add_shared_method("double", |args: &[Value]| match args {
            [Value::Int(i)] => Ok(Value::Int(i * 2)),
            _ => Err("double takes one int".to_owned()),
        })
        .unwrap();
    config
        .add_static_namespace(
            "Limits",
            StaticNamespace::new()
                .with_field("MAX", 10)
                .with_method("clamp", |args: &[Value]| {
                    let v = args.first().and_then(Value::as_i64).unwrap_or_default();
                    Ok(Value::from(v.min(10)))
                }),
        )
        .unwrap();
    let engine = Engine::with_config("test", config);
    let template = engine
        .get_template_by_string("#(double(21))|#(Limits::MAX)|#(Limits::clamp(99))", false)
        .unwrap();
    assert_eq!(template.render_to_string(None).unwrap(), "42|10|10");

    let template = engine.get_template_by_string("#(double('x'))", false).unwrap();
    assert!(template.render_to_string(None).is_err());
}

#[derive(Debug)]
struct User {
    name: String,
}

impl TemplateObject for User {
    fn field(&self, name: &str) -> Option<Value> {
        (name == "name").then(|| Value::str(&self.name))
    }

    fn call(&self, name: &str, args: &[Value]) -> Option<Result<Value, String>> {
        (name == "greet").then(|| match args {
            [Value::Str(other)] => Ok(Value::str(format!("{} greets {other}", self.name))),
            _ => Err("greet takes a name".to_owned()),
        })
    }
}

#[test]
#[ntest::timeout(100)]
fn test_host_objects() {
    let mut data = Data::new();
    data.insert("user", Value::object(User { name: "Ann".to_owned() }));
    assert_eq!(render("#(user.name)|#(user.greet('Bob'))", Some(&data)), "Ann|Ann greets Bob");
    assert!(render_err("#(user.age)", Some(&data)).to_string().contains("age"));
}

// --- Errors ---

#[test]
#[ntest::timeout(100)]
fn test_runtime_error_location() {
    let (engine, _) = get_engine_with_files(&[("page.html", "line one\n#(1 / 0)")], false);
    let err = engine.get_template("page.html").unwrap().render_to_string(None).unwrap_err();
    let location = err.location().unwrap();
    assert_eq!(location.file_name(), Some("page.html"));
    assert_eq!(location.row(), 2);
}

#[test]
#[ntest::timeout(100)]
fn test_parse_error_location() {
    let (engine, _) = get_engine_with_files(&[("page.html", "a\n\n#if(x\n")], false);
    let HashlateError::Parse(err) = engine.get_template("page.html").unwrap_err() else {
        panic!("expected a parse error");
    };
    assert_eq!(err.file_name(), Some("page.html"));
    assert_eq!(err.row(), 3);
}

#[test]
#[ntest::timeout(100)]
fn test_missing_template() {
    let (engine, _) = get_engine_with_files(&[], false);
    assert!(matches!(engine.get_template("nope.html"), Err(HashlateError::MissingTemplate { .. })));
}

#[test]
#[ntest::timeout(100)]
fn test_undefined_function() {
    let err = render_err("#@nope()", None);
    assert!(err.to_string().contains("nope"), "{err}");
    assert_eq!(render("#@nope?()fine", None), "fine");
}

// --- Output sinks ---

#[test]
#[ntest::timeout(100)]
fn test_small_buffer_writer() {
    let engine = Engine::with_config("test", EngineConfig::new().with_buffer_size(4));
    let template = engine
        .get_template_by_string("#for(i = 0; i < 50; i++)#(i),#end", false)
        .unwrap();
    let bytes = template.render_to_writer(None, Vec::new()).unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), template.render_to_string(None).unwrap());
}

#[test]
#[ntest::timeout(1000)]
fn test_concurrent_renders_share_one_template() {
    let engine = Arc::new(get_engine());
    let template = engine.get_template_by_string("#for(x : xs)#(x * n)#end", true).unwrap();
    std::thread::scope(|s| {
        for n in 1..=4 {
            let template = template.clone();
            s.spawn(move || {
                let mut data = Data::new();
                data.insert("xs", vec![1, 2, 3]);
                data.insert("n", n);
                let expected: String = [1, 2, 3].iter().map(|x| (x * n).to_string()).collect();
                assert_eq!(template.render_to_string(Some(&data)).unwrap(), expected);
            });
        }
    });
}
