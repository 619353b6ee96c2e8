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

use std::time::{Duration, Instant};

use stepscript::{
    run, Error, ExecuteOptions, Promise, PromiseState, Runtime, RuntimeOptions, Value,
};

mod common;
use common::{capture_scope, new_sink, run_capture};

#[test]
fn test_nested_async_functions_sleep_twice() {
    let started = Instant::now();
    let (result, lines) = run_capture(
        "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
         const f = async () => { await sleep(10); console.log('hi') }\n\
         const g = async () => { await f(); await f() }\n\
         await g()",
    );
    result.unwrap();
    assert_eq!(lines, vec!["hi".to_string(), "hi".to_string()]);
    assert!(
        started.elapsed() >= Duration::from_millis(18),
        "the two sleeps did not run sequentially: {:?}",
        started.elapsed()
    );
}

#[test]
fn test_await_non_promise_yields_value() {
    assert_eq!(run("return await 42").unwrap(), Value::Num(42.0));
}

#[test]
fn test_await_thenable_object() {
    let value = run(
        "const thenable = { then(res) { res(9) } }\n\
         return await thenable",
    )
    .unwrap();
    assert_eq!(value, Value::Num(9.0));
}

#[test]
fn test_then_chain_transforms_value() {
    let value = run(
        "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
         return await sleep(5).then(() => 42)",
    )
    .unwrap();
    assert_eq!(value, Value::Num(42.0));
}

#[test]
fn test_promise_all_resolves_in_timer_order() {
    let (result, lines) = run_capture(
        "const arr = [1, 2, 3]\n\
         const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
         const ps = []\n\
         for (let i = 0; i < arr.length; i++) {\n\
         \x20 const v = arr[i]\n\
         \x20 ps.push(sleep(v * 10).then(() => console.log(v)))\n\
         }\n\
         await Promise.all(ps)",
    );
    result.unwrap();
    assert_eq!(
        lines,
        vec!["1".to_string(), "2".to_string(), "3".to_string()]
    );
}

#[test]
fn test_promise_all_accepts_plain_values() {
    let value = run(
        "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
         return await Promise.all([1, sleep(5).then(() => 2), 3])",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Num(1.0), Value::Num(2.0), Value::Num(3.0)])
    );
}

#[test]
fn test_rejection_unwinds_execution() {
    let err = run(
        "const boom = new Promise((res, rej) => rej('bad'))\n\
         await boom",
    )
    .unwrap_err();
    assert!(matches!(err, Error::Thrown(reason) if reason == Value::string("bad")));
}

#[test]
fn test_catch_recovers_from_rejection() {
    let value = run(
        "const boom = new Promise((res, rej) => rej('bad'))\n\
         return await boom.catch(e => 'caught:' + e)",
    )
    .unwrap();
    assert_eq!(value, Value::string("caught:bad"));
}

#[test]
fn test_finally_passes_outcome_through() {
    let value = run(
        "let ran = false\n\
         const p = new Promise(r => r(5))\n\
         const v = await p.finally(() => { ran = true })\n\
         return [v, ran]",
    )
    .unwrap();
    assert_eq!(
        value,
        Value::array_from(vec![Value::Num(5.0), Value::Bool(true)])
    );
}

#[test]
fn test_async_function_returns_promise() {
    let value = run(
        "const f = async () => 7\n\
         const p = f()\n\
         return await p",
    )
    .unwrap();
    assert_eq!(value, Value::Num(7.0));
}

#[test]
fn test_async_calls_register_executions() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let sink = new_sink();
    let scope = capture_scope(&sink);
    let execution = runtime
        .execute(
            "const f = async () => 1\nreturn await f()",
            ExecuteOptions::new(scope),
        )
        .unwrap();
    assert_eq!(runtime.executions().len(), 1);
    assert_eq!(execution.wait().unwrap(), Value::Num(1.0));
    assert_eq!(runtime.executions().len(), 2);
    assert!(runtime.executions().iter().all(|e| e.is_terminated()));
}

#[test]
fn test_two_executions_interleave_around_awaits() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let sink = new_sink();
    let first = runtime
        .execute(
            "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
             await sleep(10)\n\
             console.log('a')",
            ExecuteOptions::new(capture_scope(&sink)).desc("first"),
        )
        .unwrap();
    let second = runtime
        .execute(
            "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
             await sleep(10)\n\
             console.log('b')",
            ExecuteOptions::new(capture_scope(&sink)).desc("second"),
        )
        .unwrap();
    first.start().unwrap();
    second.start().unwrap();
    // both are parked on their timers now
    assert!(first.awaiting().is_some());
    assert!(second.awaiting().is_some());
    first.wait().unwrap();
    second.wait().unwrap();
    let lines = sink.borrow().clone();
    assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn test_abort_propagates_the_sentinel() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let sink = new_sink();
    let scope = capture_scope(&sink);
    let gate = Promise::pending();
    scope.declare("gate", Value::Promise(gate.clone()));
    let execution = runtime
        .execute(
            "await gate\nconsole.log('never')",
            ExecuteOptions::new(scope),
        )
        .unwrap();
    execution.start().unwrap();
    let parked = execution.awaiting().expect("execution should be parked");
    assert!(parked.ptr_eq(&gate));
    assert!(matches!(gate.state(), PromiseState::Pending));

    gate.abort();
    assert!(matches!(gate.state(), PromiseState::Aborted));
    // aborting again is a no-op
    gate.abort();

    let err = execution.wait().unwrap_err();
    assert!(matches!(err, Error::Aborted));
    assert!(execution.is_terminated());
    assert!(sink.borrow().is_empty());
}

#[test]
fn test_settled_promise_ignores_abort() {
    let p = Promise::pending();
    p.resolve(Value::Num(1.0));
    p.abort();
    assert!(matches!(p.state(), PromiseState::Fulfilled(v) if v == Value::Num(1.0)));
}

#[test]
fn test_await_outside_async_function_is_rejected() {
    let err = run("const f = () => { return await 1 }\nreturn f()").unwrap_err();
    assert!(matches!(err, Error::Syntax { .. }));
}

#[test]
fn test_never_settling_await_is_a_deadlock() {
    let err = run("await new Promise(r => 0)").unwrap_err();
    assert!(matches!(err, Error::StateInvariant(_)));
}

#[test]
fn test_clear_timeout_cancels_a_timer() {
    let value = run(
        "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
         let fired = false\n\
         const id = setTimeout(() => { fired = true }, 5)\n\
         clearTimeout(id)\n\
         await sleep(20)\n\
         return fired",
    )
    .unwrap();
    assert_eq!(value, Value::Bool(false));
}

#[test]
fn test_awaiting_promise_is_observable_while_parked() {
    let runtime = Runtime::new(RuntimeOptions::default());
    let sink = new_sink();
    let execution = runtime
        .execute(
            "const sleep = ms => new Promise(r => setTimeout(r, ms))\n\
             await sleep(5)\n\
             console.log('done')",
            ExecuteOptions::new(capture_scope(&sink)),
        )
        .unwrap();
    assert!(execution.awaiting().is_none());
    execution.start().unwrap();
    let parked = execution.awaiting().expect("should be parked on the sleep");
    assert!(matches!(parked.state(), PromiseState::Pending));
    execution.wait().unwrap();
    assert!(execution.awaiting().is_none());
    assert!(matches!(parked.state(), PromiseState::Fulfilled(_)));
    assert_eq!(sink.borrow().clone(), vec!["done".to_string()]);
}
