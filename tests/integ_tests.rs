// Copyright 2026 the stepscript authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use lazy_static::lazy_static;

use stepscript::{
    run, with_global, Error, ExecuteOptions, Execution, Runtime, RuntimeOptions, Scope, Value,
};

mod common;
use common::{eval_expr, run_capture};

lazy_static! {
    /// A long straight-line program, shared by the stress and stepping
    /// tests.
    static ref LONG_SUM: String = {
        let mut src = String::from("let total = 0\n");
        for i in 0..200 {
            src.push_str(&format!("total += {}\n", i));
        }
        src.push_str("return total");
        src
    };
}

#[test]
fn test_arithmetic() {
    assert_eq!(eval_expr("1 + 2 * 3"), Value::Num(7.0));
    assert_eq!(eval_expr("2 ** 3 ** 2"), Value::Num(512.0));
    assert_eq!(eval_expr("7 % 3"), Value::Num(1.0));
    assert_eq!(eval_expr("-5 + +'3'"), Value::Num(-2.0));
    assert_eq!(eval_expr("'a' + 1"), Value::string("a1"));
    assert_eq!(eval_expr("(5 & 3) | (1 << 4)"), Value::Num(17.0));
    assert_eq!(eval_expr("-1 >>> 28"), Value::Num(15.0));
    assert_eq!(eval_expr("1 < 2 === true"), Value::Bool(true));
    assert_eq!(eval_expr("'b' < 'a'"), Value::Bool(false));
    assert_eq!(eval_expr("1 == '1'"), Value::Bool(true));
    assert_eq!(eval_expr("1 === '1'"), Value::Bool(false));
    assert_eq!(eval_expr("null == undefined"), Value::Bool(true));
    assert_eq!(eval_expr("5 |> (x => x * 2)"), Value::Num(10.0));
    assert_eq!(eval_expr("true ? 'y' : 'n'"), Value::string("y"));
}

#[test]
fn test_closure_captures_defining_scope() {
    let value = run(
        "const make = () => {\n\
         \x20 let n = 0\n\
         \x20 return { inc() { n = n + 1; return n }, get() { return n } }\n\
         }\n\
         const c = make()\n\
         c.inc()\n\
         c.inc()\n\
         return c.get()",
    )
    .unwrap();
    assert_eq!(value, Value::Num(2.0));
}

#[test]
fn test_tdz_read_before_init() {
    let err = run("console.log(a); let a = 1").unwrap_err();
    assert!(matches!(err, Error::UninitializedRead(name) if name == "a"));
}

#[test]
fn test_tdz_in_block() {
    let err = run("{ b; let b = 1 }").unwrap_err();
    assert!(matches!(err, Error::UninitializedRead(name) if name == "b"));
}

#[test]
fn test_undefined_identifier() {
    let err = run("zzz").unwrap_err();
    assert!(matches!(err, Error::UndefinedIdentifier(name) if name == "zzz"));
    let err = run("missing = 1").unwrap_err();
    assert!(matches!(err, Error::UndefinedIdentifier(name) if name == "missing"));
}

#[test]
fn test_short_circuit_skips_right_operand() {
    let value = run(
        "let n = 0\n\
         const bump = () => { n = n + 1; return true }\n\
         false && bump()\n\
         true || bump()\n\
         0 ?? bump()\n\
         return n",
    )
    .unwrap();
    assert_eq!(value, Value::Num(0.0));
}

#[test]
fn test_logical_assignment_short_circuits_per_operator() {
    let value = run(
        "let calls = 0\n\
         const effect = v => { calls = calls + 1; return v }\n\
         let a = 1\n\
         a ||= effect(9)\n\
         let b = 0\n\
         b ||= effect(7)\n\
         let c = null\n\
         c ??= effect(5)\n\
         let d = 2\n\
         d &&= effect(3)\n\
         return [a, b, c, d, calls]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::Num(1.0),
            Value::Num(7.0),
            Value::Num(5.0),
            Value::Num(3.0),
            Value::Num(3.0),
        ])
    );
}

#[test]
fn test_arguments_evaluate_before_callee_resolves() {
    let value = run(
        "const seq = []\n\
         const tag = (t, v) => { seq.push(t); return v }\n\
         const fns = { add: (x, y) => x + y }\n\
         const r = fns[tag('callee', 'add')](tag('a', 1), tag('b', 2))\n\
         seq.push(r)\n\
         return seq",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::string("a"),
            Value::string("b"),
            Value::string("callee"),
            Value::Num(3.0),
        ])
    );
}

#[test]
fn test_for_loop_with_break_and_continue() {
    let value = run(
        "let sum = 0\n\
         for (let i = 0; i < 10; i++) {\n\
         \x20 if (i === 5) continue\n\
         \x20 if (i === 8) break\n\
         \x20 sum += i\n\
         }\n\
         return sum",
    )
    .unwrap();
    assert_eq!(value, Value::Num(23.0));
}

#[test]
fn test_while_and_do_while() {
    let value = run(
        "let n = 0\n\
         while (n < 5) { n += 2 }\n\
         let m = 0\n\
         do { m++ } while (false)\n\
         return [n, m]",
    )
    .unwrap();
    assert_eq!(value, Value::array_from(vec![Value::Num(6.0), Value::Num(1.0)]));
}

#[test]
fn test_for_loop_closures_see_per_iteration_binding() {
    let value = run(
        "const fns = []\n\
         for (let i = 0; i < 3; i++) { fns.push(() => i) }\n\
         return [fns[0](), fns[1](), fns[2]()]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Num(0.0), Value::Num(1.0), Value::Num(2.0)])
    );
}

#[test]
fn test_method_call_binds_this() {
    let value = run("const o = { x: 7, get() { return this.x } }\nreturn o.get()").unwrap();
    assert_eq!(value, Value::Num(7.0));
}

#[test]
fn test_arrow_inherits_this() {
    let value = run(
        "const o = { x: 1, m() { const f = () => this.x; return f() } }\n\
         return o.m()",
    )
    .unwrap();
    assert_eq!(value, Value::Num(1.0));
}

#[test]
fn test_object_literal_features() {
    let value = run(
        "const key = 'k'\n\
         const base = { a: 1 }\n\
         const x = 5\n\
         const o = { ...base, [key + '1']: 2, x, m() { return 3 } }\n\
         return [o.a, o.k1, o.x, o.m()]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::Num(1.0),
            Value::Num(2.0),
            Value::Num(5.0),
            Value::Num(3.0),
        ])
    );
}

#[test]
fn test_array_holes_and_spread() {
    let value = run(
        "const a = [1, , 3]\n\
         const b = [0, ...a, 4]\n\
         return [a.length, b.length, b[1], b.join('-')]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::Num(2.0),
            Value::Num(4.0),
            Value::Num(1.0),
            Value::string("0-1-3-4"),
        ])
    );
}

#[test]
fn test_rest_params_and_spread_call() {
    let value = run(
        "const f = (a, ...rest) => [a, rest.length, rest[0]]\n\
         return f(...[1, 2, 3])",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Num(1.0), Value::Num(2.0), Value::Num(2.0)])
    );
}

#[test]
fn test_function_names() {
    let value = run(
        "const foo = () => 1\n\
         const bar = function baz() { return 2 }\n\
         return [foo.name, bar.name]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::string("foo"), Value::string("baz")])
    );
}

#[test]
fn test_new_constructs_objects() {
    let value = run(
        "const P = function Point(x, y) { this.x = x; this.y = y }\n\
         const p = new P(3, 4)\n\
         return [p.x, p.y]",
    )
    .unwrap();
    assert_eq!(value, Value::array_from(vec![Value::Num(3.0), Value::Num(4.0)]));
}

#[test]
fn test_instanceof_builtins() {
    let value =
        run("return [[] instanceof Array, {} instanceof Object, (() => 1) instanceof Function]")
            .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Bool(true), Value::Bool(true), Value::Bool(true)])
    );
}

#[test]
fn test_update_and_typeof() {
    let value = run(
        "let i = 5\n\
         const a = i++\n\
         const b = ++i\n\
         return [a, b, typeof i, typeof 'x', typeof undefined]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::Num(5.0),
            Value::Num(7.0),
            Value::string("number"),
            Value::string("string"),
            Value::string("undefined"),
        ])
    );
}

#[test]
fn test_optional_chaining() {
    let value = run(
        "const o = { a: { b: 1 } }\n\
         const n = null\n\
         return [o?.a?.b, n?.a.b, n?.missing?.()]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Num(1.0), Value::Undefined, Value::Undefined])
    );
}

#[test]
fn test_member_of_nullish_is_type_error() {
    let err = run("const n = null\nreturn n.x").unwrap_err();
    assert!(matches!(err, Error::Type(_)));
    let err = run("return (1)()").unwrap_err();
    assert!(matches!(err, Error::Type(_)));
}

#[test]
fn test_json_round_trip() {
    let value = run(
        "const x = { a: [1, 2, 'x'], b: { c: true, d: null } }\n\
         return [JSON.stringify(x), JSON.stringify(JSON.parse(JSON.stringify(x)))]",
    )
    .unwrap();
    match value {
        Value::Array(items) => {
            let items = items.borrow();
            assert_eq!(items[0], items[1]);
        }
        other => panic!("expected an array, got {}", other),
    }
}

#[test]
fn test_leibniz_pi() {
    let value = run(
        "const calc = N => {\n\
         \x20 let s = 0, d = 1, g = 1\n\
         \x20 for (let i = 0; i < N; i++) { s += g / d; d += 2; g *= -1 }\n\
         \x20 return s * 4\n\
         }\n\
         return calc(100000)",
    )
    .unwrap();
    match value {
        Value::Num(n) => assert!((n - std::f64::consts::PI).abs() < 1e-4, "got {}", n),
        other => panic!("expected a number, got {}", other),
    }
}

#[test]
fn test_console_format_directives() {
    let (result, lines) = run_capture("console.log('%d', 3.5)\nconsole.log('%s and %d', 'x', 2)");
    result.unwrap();
    assert_eq!(lines, vec!["3.5".to_string(), "x and 2".to_string()]);
}

#[test]
fn test_regex_literals() {
    let value = run("return [/ab+/i.test('xABBy'), /ab+/.test('xy'), /a/.source]").unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Bool(true), Value::Bool(false), Value::string("a")])
    );
}

#[test]
fn test_string_methods() {
    let value = run("return ['Hello'.toUpperCase(), 'hello'.slice(1, 3), 'abc'.length]").unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![
            Value::string("HELLO"),
            Value::string("el"),
            Value::Num(3.0),
        ])
    );
}

#[test]
fn test_unsupported_param_patterns() {
    assert!(matches!(
        run("const f = (a = 1) => a").unwrap_err(),
        Error::UnsupportedParam(_)
    ));
    assert!(matches!(
        run("const f = ([a]) => a").unwrap_err(),
        Error::UnsupportedParam(_)
    ));
}

#[test]
fn test_delete_is_unsupported() {
    let err = run("const o = { a: 1 }\ndelete o.a").unwrap_err();
    assert!(matches!(err, Error::UnsupportedOperator(op) if op == "delete"));
}

#[test]
fn test_out_of_subset_syntax_is_rejected() {
    assert!(matches!(run("try { 1 } catch (e) {}").unwrap_err(), Error::Syntax { .. }));
    assert!(matches!(run("function f() {}").unwrap_err(), Error::Syntax { .. }));
    assert!(matches!(
        run("for (const v of [1]) {}").unwrap_err(),
        Error::Syntax { .. }
    ));
    assert!(matches!(run("class A {}").unwrap_err(), Error::Syntax { .. }));
    assert!(matches!(run("`template`").unwrap_err(), Error::Syntax { .. }));
}

#[test]
fn test_long_straight_line_program() {
    let value = run(&LONG_SUM).unwrap();
    assert_eq!(value, Value::Num(19900.0));
}

fn observe(execution: &Execution) -> (usize, usize, usize, bool) {
    execution.with_state(|state| {
        (
            state.stack.len(),
            state.stack.last().map_or(0, |f| f.index),
            state.stack.last().map_or(0, |f| f.sub_index),
            state.awaiting.is_some(),
        )
    })
}

#[test]
fn test_every_step_makes_observable_progress() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let scope = with_global(Scope::new());
    let execution = runtime
        .execute(&LONG_SUM, ExecuteOptions::new(scope))
        .unwrap();
    assert_eq!(execution.stack_depth(), 1);
    let mut steps = 0u64;
    while !execution.is_terminated() {
        let before = observe(&execution);
        execution.step().unwrap();
        if execution.is_terminated() {
            break;
        }
        let after = observe(&execution);
        assert!(
            after != before || after.3,
            "step {} made no observable progress: {:?}",
            steps,
            after
        );
        steps += 1;
    }
    assert!(steps > 1000);
    match execution.outcome() {
        Some(Ok(v)) => assert_eq!(v, Value::Num(19900.0)),
        other => panic!("unexpected outcome: {:?}", other.map(|r| r.map_err(|e| e.to_string()))),
    }
}

#[test]
fn test_stepping_a_finished_execution_is_an_error() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let scope = with_global(Scope::new());
    let execution = runtime
        .execute("return 1", ExecuteOptions::new(scope))
        .unwrap();
    execution.wait().unwrap();
    assert!(matches!(
        execution.step().unwrap_err(),
        Error::StateInvariant(_)
    ));
}
