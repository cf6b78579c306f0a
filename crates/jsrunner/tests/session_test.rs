//! Integration tests for the synchronous Session API

use jsrunner::{HostValue, InvocationFailure, JsType, RunnerError, Session};
use serde_json::json;
use std::io::Write;

#[test]
fn test_set_global_round_trips() {
    let mut session = Session::new().unwrap();
    session.set_global("count", 7).unwrap();
    session.set_global("ratio", 0.5).unwrap();
    session.set_global("label", "seven").unwrap();
    session.set_global("flag", true).unwrap();
    session
        .set_global("config", json!({"items": [1, 2, 3], "nested": {"ok": true}}))
        .unwrap();

    assert_eq!(session.eval("count + 1").unwrap().export_int(), 8);
    assert_eq!(session.eval("ratio * 4").unwrap().export_float(), 2.0);
    assert_eq!(session.eval("label.length").unwrap().export_int(), 5);
    assert!(session.eval("flag").unwrap().export_bool());
    assert_eq!(
        session.eval("config.items.length + (config.nested.ok ? 1 : 0)").unwrap().export_int(),
        4
    );
}

#[test]
fn test_with_globals_binds_before_first_script() {
    let mut session = Session::with_globals([("a", 2), ("b", 3)]).unwrap();
    assert_eq!(session.eval("a * b").unwrap().export_int(), 6);
}

#[test]
fn test_parse_error_defines_nothing() {
    let mut session = Session::new().unwrap();
    let err = session
        .load_script_str("var partial = 1; function broken( {")
        .unwrap_err();
    assert!(matches!(err, RunnerError::Parse(_)), "got {err:?}");

    let kind = session.eval("typeof partial").unwrap();
    assert_eq!(kind.export_string(), "undefined");
}

#[test]
fn test_runtime_error_keeps_earlier_definitions() {
    let mut session = Session::new().unwrap();
    let err = session
        .load_script_str("var before = 1; missingFunction(); var after = 2;")
        .unwrap_err();
    match err {
        RunnerError::Runtime(exception) => assert_eq!(exception.name, "ReferenceError"),
        other => panic!("expected runtime error, got {other:?}"),
    }
    assert_eq!(session.eval("before").unwrap().export_int(), 1);
    assert!(session.eval("after").unwrap().is_undefined());
}

#[test]
fn test_call_passes_arguments_without_splicing() {
    let mut session = Session::new().unwrap();
    session
        .load_script_str("function echo(s) { return '[' + s + ']'; }")
        .unwrap();

    let tricky = r#"it's "quoted" \ and </script>"#;
    let value = session.call("echo", &[HostValue::from(tricky)]).unwrap();
    assert_eq!(value.export_string(), format!("[{}]", tricky));
}

#[test]
fn test_call_dotted_path_binds_owner() {
    let mut session = Session::new().unwrap();
    session
        .load_script_str("var app = { prefix: '>', render(x) { return this.prefix + x; } };")
        .unwrap();
    let value = session.call("app.render", &[HostValue::from(1)]).unwrap();
    assert_eq!(value.export_string(), ">1");
}

#[test]
fn test_call_missing_function() {
    let mut session = Session::new().unwrap();
    session.load_script_str("var notAFunction = 3;").unwrap();

    for name in ["doesNotExist", "notAFunction"] {
        match session.call(name, &[]) {
            Err(RunnerError::Invocation {
                function,
                reason: InvocationFailure::NotCallable(_),
            }) => assert_eq!(function, name),
            other => panic!("expected not-callable for {name}, got {other:?}"),
        }
    }
}

#[test]
fn test_call_that_throws() {
    let mut session = Session::new().unwrap();
    session
        .load_script_str("function fail() { throw new RangeError('out of range'); }")
        .unwrap();
    match session.call("fail", &[]) {
        Err(RunnerError::Invocation {
            reason: InvocationFailure::Threw(exception),
            ..
        }) => {
            assert_eq!(exception.name, "RangeError");
            assert_eq!(exception.message, "out of range");
        }
        other => panic!("expected thrown invocation, got {other:?}"),
    }
}

#[test]
fn test_host_function_is_callable_from_script() {
    let mut session = Session::new().unwrap();
    session
        .set_global(
            "sum",
            HostValue::function(|args| {
                Ok(args.iter().map(|a| a.export_int()).sum::<i64>().into())
            }),
        )
        .unwrap();
    assert_eq!(session.eval("sum(1, 2, 3, 4)").unwrap().export_int(), 10);
}

#[test]
fn test_load_script_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "function greet(name) {{ return 'hello ' + name; }}").unwrap();

    let mut session = Session::new().unwrap();
    session.load_script(file.path()).unwrap();
    let value = session.call("greet", &[HostValue::from("file")]).unwrap();
    assert_eq!(value.export_string(), "hello file");
}

#[test]
fn test_load_missing_file_is_resource_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.js");

    let mut session = Session::new().unwrap();
    match session.load_script(&missing) {
        Err(RunnerError::Resource { path, .. }) => assert_eq!(path, missing),
        other => panic!("expected resource error, got {other:?}"),
    }
}

#[test]
fn test_value_kinds() {
    let mut session = Session::new().unwrap();
    let cases = [
        ("undefined", JsType::Undefined),
        ("null", JsType::Null),
        ("true", JsType::Boolean),
        ("1.5", JsType::Number),
        ("'s'", JsType::String),
        ("[1]", JsType::Array),
        ("({})", JsType::Object),
        ("(function f() {})", JsType::Function),
    ];
    for (source, kind) in cases {
        assert_eq!(session.eval(source).unwrap().kind(), kind, "{source}");
    }
}

#[test]
fn test_export_of_nested_values() {
    let mut session = Session::new().unwrap();
    let value = session
        .eval("({ list: [1, 'two', null], when: new Date(Date.UTC(2024, 4, 1)) })")
        .unwrap();
    assert_eq!(
        value.export(),
        json!({"list": [1, "two", null], "when": "2024-05-01T00:00:00.000Z"})
    );
}

#[test]
fn test_reading_a_result_runs_no_script_code() {
    let mut session = Session::new().unwrap();
    session
        .load_script_str(
            "var hits = 0; \
             var o = { \
                 id: 3, \
                 get x() { hits++; return 1; }, \
                 toString() { hits++; return 'o'; }, \
                 valueOf() { hits++; return 1; }, \
                 toJSON() { hits++; return {}; } \
             };",
        )
        .unwrap();

    let value = session.eval("o").unwrap();
    assert_eq!(session.eval("hits").unwrap().export_int(), 0);
    assert_eq!(value.export(), json!({"id": 3}));
    assert_eq!(value.export_string(), "[object Object]");
}

#[test]
fn test_self_referencing_results_return() {
    let mut session = Session::new().unwrap();
    session
        .load_script_str(
            "var o = { n: 1 }; o.a = o; o.b = o; \
             var wide = { items: [] }; \
             for (var i = 0; i < 500; i++) wide.items.push(o);",
        )
        .unwrap();

    let value = session.eval("o").unwrap();
    assert_eq!(value.export(), json!({"n": 1, "a": null, "b": null}));

    let value = session.eval("wide").unwrap();
    let items = value.export()["items"].as_array().unwrap().clone();
    assert_eq!(items.len(), 500);
    assert_eq!(items[0]["n"], json!(1));
    assert_eq!(items[499]["a"], json!(null));
}

#[test]
fn test_console_does_not_fail_scripts() {
    let mut session = Session::new().unwrap();
    let value = session
        .eval("console.log('a', 1); console.warn({x: 1}); console.error(new Error('e')); 5")
        .unwrap();
    assert_eq!(value.export_int(), 5);
}

#[test]
fn test_fetch_is_disabled_by_default() {
    let mut session = Session::new().unwrap();
    let err = session.eval("fetchText('http://127.0.0.1:1/')").unwrap_err();
    assert!(matches!(err, RunnerError::Usage(_)), "got {err:?}");
}
