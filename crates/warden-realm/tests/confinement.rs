// Integration tests: build sealed environments and drive them through the
// boundary gateway the way a host would.

use std::sync::Arc;

use warden_policy::{resolve, CapabilityMode, CapabilityPolicy, ConfinementOptions};
use warden_realm::{
    confine, BufferedOutput, ConfinementEnvironment, Endowments, EnvironmentBuilder, ErrorKind,
    HostFunction, HostValue, OutputLevel, OPAQUE_MESSAGE,
};

fn default_env() -> ConfinementEnvironment {
    let policy = CapabilityPolicy::default_policy().unwrap();
    confine(&resolve(&ConfinementOptions::default(), &policy)).unwrap()
}

fn env_with(options: ConfinementOptions) -> ConfinementEnvironment {
    let policy = CapabilityPolicy::default_policy().unwrap();
    confine(&resolve(&options, &policy)).unwrap()
}

fn eval(env: &ConfinementEnvironment, code: &str) -> HostValue {
    env.evaluate(code, &Endowments::new())
        .unwrap_or_else(|err| panic!("{} failed: {}", code, err))
}

#[test]
fn evaluates_programs_and_expressions() {
    let env = default_env();
    assert_eq!(eval(&env, "2 + 2").as_f64(), Some(4.0));
    assert_eq!(eval(&env, "let x = 1; x + 1").as_f64(), Some(2.0));
    assert_eq!(
        env.evaluate_expression("'a' + 'b'", &Endowments::new())
            .unwrap()
            .as_str(),
        Some("ab")
    );
}

#[test]
fn trailing_input_after_an_expression_is_a_syntax_error() {
    let env = default_env();
    let err = env
        .evaluate_expression("1 + 1; 2", &Endowments::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn endowments_are_visible_for_one_call_only() {
    let env = default_env();
    let endowments = Endowments::new().with("x", 20.0);
    let out = env.evaluate("x + 1", &endowments).unwrap();
    assert_eq!(out.as_f64(), Some(21.0));

    let err = env.evaluate("x", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReferenceError);
}

#[test]
fn locals_do_not_leak_between_calls() {
    let env = default_env();
    eval(&env, "let leaked = 5");
    let out = eval(&env, "typeof leaked");
    assert_eq!(out.as_str(), Some("undefined"));
}

#[test]
fn endowment_objects_can_be_mutated_but_the_environment_cannot() {
    let env = default_env();
    let endowments = Endowments::new().with(
        "state",
        HostValue::from(serde_json::json!({ "count": 1 })),
    );
    let out = env
        .evaluate("state.count = state.count + 1; state.count", &endowments)
        .unwrap();
    assert_eq!(out.as_f64(), Some(2.0));

    let err = env.evaluate("Math.abs = null", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    let err = env.evaluate("delete Math.abs", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    let err = env.evaluate("Math = 1", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(eval(&env, "typeof Math.abs").as_str(), Some("function"));
}

#[test]
fn clock_is_tamed_by_default() {
    let env = default_env();
    let out = eval(
        &env,
        "let a = Date.now(); let b = Date.now(); let c = Date.now(); isNaN(a) && isNaN(b) && isNaN(c)",
    );
    assert_eq!(out.as_bool(), Some(true));
}

#[test]
fn long_operator_chains_evaluate() {
    let env = default_env();
    let sum = format!("1{}", "+1".repeat(800));
    assert_eq!(eval(&env, &sum).as_f64(), Some(801.0));
    let guarded = format!(
        "let hits = 0; let bump = () => {{ hits += 1; return true }}; false{}; hits",
        " && bump()".repeat(500)
    );
    assert_eq!(eval(&env, &guarded).as_f64(), Some(0.0));
}

#[test]
fn allowed_clock_reports_wall_time() {
    let env = env_with(ConfinementOptions {
        clock_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    let out = eval(&env, "let a = Date.now(); let b = Date.now(); a > 0 && b >= a");
    assert_eq!(out.as_bool(), Some(true));
}

#[test]
fn randomness_is_tamed_by_default() {
    let env = default_env();
    assert_eq!(eval(&env, "isNaN(Math.random())").as_bool(), Some(true));

    let allowed = env_with(ConfinementOptions {
        random_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    let out = eval(&allowed, "let r = Math.random(); r >= 0 && r < 1");
    assert_eq!(out.as_bool(), Some(true));
}

#[test]
fn locale_capability_is_removed() {
    let env = default_env();
    assert_eq!(eval(&env, "typeof Intl").as_str(), Some("undefined"));
    assert_eq!(
        eval(&env, "typeof ({}).toLocaleString").as_str(),
        Some("undefined")
    );

    let allowed = env_with(ConfinementOptions {
        locale_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    // The default policy never licenses Intl; allowing the locale option
    // only spares toLocaleString from the shim.
    assert_eq!(eval(&allowed, "typeof Intl").as_str(), Some("undefined"));
    assert_eq!(
        eval(&allowed, "({}).toLocaleString()").as_str(),
        Some("[object Object]")
    );
}

#[test]
fn custom_policy_can_license_intl() {
    let mut policy = CapabilityPolicy::default_policy().unwrap();
    policy.grant("Intl.NumberFormat");
    let options = ConfinementOptions {
        locale_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    };
    let env = confine(&resolve(&options, &policy)).unwrap();
    let out = eval(&env, "new Intl.NumberFormat().format(1234567)");
    assert!(out.as_str().unwrap().contains(','));
    assert_eq!(eval(&env, "typeof Intl.DateTimeFormat").as_str(), Some("undefined"));
}

#[test]
fn errors_cross_the_boundary_as_plain_data() {
    let env = default_env();
    let err = env
        .evaluate("throw new TypeError('bad')", &Endowments::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert_eq!(err.message, "bad");
    assert!(!err.is_opaque());
    // Diagnostics are tamed by default: no trace text.
    assert!(err.trace.is_empty());
}

#[test]
fn thrown_primitives_become_generic_errors() {
    let env = default_env();
    let err = env.evaluate("throw 42", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "42");
}

#[test]
fn unknown_error_names_map_to_the_generic_kind() {
    let env = default_env();
    let err = env
        .evaluate("throw { name: 'HostileError', message: 'x' }", &Endowments::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "x");
}

#[test]
fn hostile_error_fields_yield_an_opaque_error() {
    let env = default_env();
    let err = env
        .evaluate(
            "throw { get name() { throw new Error('gotcha') }, message: 'm' }",
            &Endowments::new(),
        )
        .unwrap_err();
    assert!(err.is_opaque());
    assert_eq!(err.message, OPAQUE_MESSAGE);

    let err = env
        .evaluate(
            "throw { name: 'TypeError', message: { toString() { throw 1 } } }",
            &Endowments::new(),
        )
        .unwrap_err();
    assert!(err.is_opaque());
}

#[test]
fn allowed_diagnostics_keep_stack_hooks() {
    let env = env_with(ConfinementOptions {
        diagnostic_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    let err = env
        .evaluate(
            "function inner() { throw new RangeError('deep') } inner()",
            &Endowments::new(),
        )
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RangeError);
    assert!(err.trace.contains("inner"), "trace was {:?}", err.trace);
    assert_eq!(
        eval(&env, "typeof Error.captureStackTrace").as_str(),
        Some("function")
    );

    let tamed = default_env();
    assert_eq!(
        eval(&tamed, "typeof Error.captureStackTrace").as_str(),
        Some("undefined")
    );
}

#[test]
fn legacy_pattern_state_is_removed() {
    let env = default_env();
    let out = eval(&env, "new RegExp('(b+)').test('abbc'); typeof RegExp.lastMatch");
    assert_eq!(out.as_str(), Some("undefined"));

    let allowed = env_with(ConfinementOptions {
        pattern_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    let out = eval(&allowed, "new RegExp('(b+)').test('abbc'); RegExp.lastMatch + RegExp.$1");
    assert_eq!(out.as_str(), Some("bbbb"));
}

#[test]
fn dynamic_code_evaluator_is_unreachable() {
    let env = default_env();
    let out = eval(
        &env,
        "let proto = Object.getPrototypeOf(function () {}); typeof proto.constructor",
    );
    assert_eq!(out.as_str(), Some("undefined"));
    let out = eval(&env, "typeof Object.getPrototypeOf(isNaN).toString");
    assert_eq!(out.as_str(), Some("function"));
}

#[test]
fn bootstrap_bindings_are_available() {
    let env = default_env();
    assert_eq!(eval(&env, "nat(3)").as_f64(), Some(3.0));
    let err = env.evaluate("nat(-1)", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::RangeError);
    let err = env.evaluate("nat('3')", &Endowments::new()).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeError);

    let out = eval(
        &env,
        "let o = harden({ inner: { v: 1 } }); Object.isFrozen(o) && Object.isFrozen(o.inner)",
    );
    assert_eq!(out.as_bool(), Some(true));
}

#[test]
fn console_forwards_to_the_output_sink() {
    let sink = Arc::new(BufferedOutput::new());
    let policy = CapabilityPolicy::default_policy().unwrap();
    let options = ConfinementOptions {
        output_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    };
    let env = EnvironmentBuilder::new(resolve(&options, &policy))
        .with_output(sink.clone())
        .build()
        .unwrap();
    eval(&env, "console.log('hello', 1 + 1); console.warn('careful')");
    assert_eq!(
        sink.lines(),
        vec![
            (OutputLevel::Log, "hello 2".to_string()),
            (OutputLevel::Warn, "careful".to_string()),
        ]
    );
}

#[test]
fn nested_confinement_rethrows_fresh_errors() {
    let env = default_env();
    assert_eq!(
        eval(&env, "Confine.evaluate('a * b', { a: 6, b: 7 })").as_f64(),
        Some(42.0)
    );
    let out = eval(
        &env,
        "let caught; try { Confine.evaluate('null.x') } catch (e) { caught = e.name } caught",
    );
    assert_eq!(out.as_str(), Some("TypeError"));
    let err = env
        .evaluate("Confine.evaluateExpression('1 +')", &Endowments::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::SyntaxError);
}

#[test]
fn nested_confinement_passes_thrown_primitives_through() {
    let env = default_env();
    let out = eval(
        &env,
        "let seen; try { Confine.evaluate('throw 5') } catch (e) { seen = typeof e + ':' + e } seen",
    );
    assert_eq!(out.as_str(), Some("number:5"));
}

#[test]
fn nested_confinement_keeps_the_inner_trace() {
    let env = env_with(ConfinementOptions {
        diagnostic_mode: CapabilityMode::Allow,
        ..ConfinementOptions::default()
    });
    let out = eval(
        &env,
        "let trace; try { Confine.evaluate('function inner() { null.x } inner()') } \
         catch (e) { trace = e.stack } trace",
    );
    let trace = out.as_str().unwrap();
    assert!(trace.starts_with("TypeError"), "trace: {}", trace);
    assert!(trace.contains("at inner"), "trace: {}", trace);
}

#[test]
fn host_functions_can_reenter_the_environment() {
    let env = default_env();
    let inner = env.clone();
    let twice = HostFunction::new("twice", move |args| {
        let n = args.first().and_then(HostValue::as_f64).unwrap_or(0.0);
        inner
            .evaluate("n * 2", &Endowments::new().with("n", n))
            .map_err(|err| err.to_string())
    });
    let out = env
        .evaluate("twice(twice(5))", &Endowments::new().with("twice", twice))
        .unwrap();
    assert_eq!(out.as_f64(), Some(20.0));
}

#[test]
fn host_function_failures_surface_as_errors() {
    let env = default_env();
    let fail = HostFunction::new("fail", |_| Err("host said no".to_string()));
    let err = env
        .evaluate("fail()", &Endowments::new().with("fail", fail))
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Error);
    assert_eq!(err.message, "host said no");
}

#[test]
fn results_are_exported_as_host_data() {
    let env = default_env();
    let out = eval(&env, "({ list: [1, 'two', null], f: function g() {} })");
    let list = out.get("list").unwrap();
    assert_eq!(
        list.to_json(),
        serde_json::json!([1, "two", null])
    );
    assert!(matches!(out.get("f"), Some(HostValue::Function(f)) if !f.is_callable()));

    let cyclic = eval(&env, "let o = {}; o.self = o; o");
    assert!(matches!(cyclic.get("self"), Some(HostValue::Undefined)));
}

#[test]
fn runaway_recursion_is_a_range_error() {
    let env = default_env();
    let err = env
        .evaluate("function f() { return f() } f()", &Endowments::new())
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RangeError);
}

#[test]
fn environments_are_shared_across_threads() {
    let env = default_env();
    let handles: Vec<_> = (0..4)
        .map(|i| {
            let env = env.clone();
            std::thread::spawn(move || {
                env.evaluate("n * n", &Endowments::new().with("n", i as f64))
                    .unwrap()
                    .as_f64()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, vec![Some(0.0), Some(1.0), Some(4.0), Some(9.0)]);
}

#[test]
fn audit_finds_only_licensed_paths() {
    let policy = CapabilityPolicy::default_policy().unwrap();
    let effective = resolve(&ConfinementOptions::default(), &policy);
    let env = confine(&effective).unwrap();
    env.audit(&effective.policy).unwrap();

    let paths = env.reachable_paths();
    assert!(paths.contains(&"Math.abs".to_string()));
    assert!(paths.contains(&"%FunctionPrototype%.toString".to_string()));
    assert!(!paths.iter().any(|p| p.starts_with("Intl")));
    assert!(!paths.contains(&"%FunctionPrototype%.constructor".to_string()));
}

#[test]
fn policy_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("policy.json");
    std::fs::write(
        &path,
        r#"{ "version": 1, "named": { "Math": { "max": true } } }"#,
    )
    .unwrap();
    let policy = CapabilityPolicy::load(&path).unwrap();
    let env = confine(&resolve(&ConfinementOptions::default(), &policy)).unwrap();
    assert_eq!(eval(&env, "Math.max(1, 9, 3)").as_f64(), Some(9.0));
    assert_eq!(eval(&env, "typeof Math.min").as_str(), Some("undefined"));
    assert_eq!(eval(&env, "typeof Object").as_str(), Some("undefined"));
}
