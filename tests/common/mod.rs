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

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use stepscript::{
    format_console, with_global, Error, ExecuteOptions, Runtime, RuntimeOptions, Scope, Value,
};

pub type LogSink = Rc<RefCell<Vec<String>>>;

pub fn new_sink() -> LogSink {
    Rc::new(RefCell::new(Vec::new()))
}

/// A root scope whose `console.log` captures into `sink` instead of
/// printing; `with_global` fills in everything else.
pub fn capture_scope(sink: &LogSink) -> Scope {
    let log = sink.clone();
    let console = Value::object_from(vec![(
        "log".to_string(),
        Value::native("log", move |_rt, _this, args| {
            log.borrow_mut().push(format_console(args));
            Ok(Value::Undefined)
        }),
    )]);
    let scope = Scope::new();
    scope.declare("console", console);
    with_global(scope)
}

/// Run a program to completion, capturing its console output.
pub fn run_capture(source: &str) -> (Result<Value, Error>, Vec<String>) {
    let runtime = Runtime::new(RuntimeOptions::default());
    let sink = new_sink();
    let scope = capture_scope(&sink);
    let result = runtime
        .execute(source, ExecuteOptions::new(scope))
        .and_then(|execution| execution.wait());
    let lines = sink.borrow().clone();
    (result, lines)
}

/// Evaluate a single expression by returning it from a program.
pub fn eval_expr(expr: &str) -> Value {
    let (result, _) = run_capture(&format!("return {}", expr));
    result.unwrap()
}
