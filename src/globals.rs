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

//! Host globals and property access.
//!
//! [`with_global`] fills a host-supplied base scope with the ambient
//! bindings a guest program expects (`console`, `setTimeout`, `Promise`,
//! `JSON`, `Math`, ...) for names not already present, so hosts can seed
//! their own `console` or extra globals first. Property reads and writes on
//! guest values also live here, since that is where the builtin methods
//! hang.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::error::Error;
use crate::exec::invoke_function;
use crate::promise::{Promise, PromiseState};
use crate::runtime::{promise_finally, promise_then, Runtime};
use crate::scope::Scope;
use crate::value::{fmt_num, RegExpValue, Value};

/// Populate `base` with the default globals for every name it does not
/// already bind, and hand it back.
pub fn with_global(base: Scope) -> Scope {
    let defaults: Vec<(&str, Value)> = vec![
        ("console", console_object()),
        ("setTimeout", set_timeout_native()),
        ("clearTimeout", clear_timeout_native()),
        ("Promise", promise_constructor()),
        ("JSON", json_object()),
        ("Math", math_object()),
        ("Object", object_namespace()),
        ("Array", array_namespace()),
        ("Function", function_namespace()),
        ("parseInt", parse_int_native()),
        ("parseFloat", parse_float_native()),
        ("isNaN", is_nan_native()),
        ("NaN", Value::Num(f64::NAN)),
        ("Infinity", Value::Num(f64::INFINITY)),
        ("undefined", Value::Undefined),
    ];
    for (name, value) in defaults {
        if !base.has_local(name) {
            base.declare(name, value);
        }
    }
    base
}

/// `console.log`-style formatting: when the first argument is a string
/// containing `%` directives, substitute; remaining arguments append
/// space-separated.
pub fn format_console(args: &[Value]) -> String {
    if let Some(Value::Str(fmt)) = args.first() {
        if fmt.contains('%') {
            let mut out = String::new();
            let mut rest = args[1..].iter();
            let mut chars = fmt.chars().peekable();
            while let Some(c) = chars.next() {
                if c != '%' {
                    out.push(c);
                    continue;
                }
                match chars.peek() {
                    Some('d') | Some('f') => {
                        chars.next();
                        match rest.next() {
                            Some(v) => out.push_str(&fmt_num(v.to_number())),
                            None => out.push_str("%d"),
                        }
                    }
                    Some('i') => {
                        chars.next();
                        match rest.next() {
                            Some(v) => out.push_str(&fmt_num(v.to_number().trunc())),
                            None => out.push_str("%i"),
                        }
                    }
                    Some('s') => {
                        chars.next();
                        match rest.next() {
                            Some(v) => out.push_str(&v.to_display()),
                            None => out.push_str("%s"),
                        }
                    }
                    Some('%') => {
                        chars.next();
                        out.push('%');
                    }
                    _ => out.push('%'),
                }
            }
            for v in rest {
                out.push(' ');
                out.push_str(&v.to_display());
            }
            return out;
        }
    }
    args.iter()
        .map(|v| v.to_display())
        .collect::<Vec<_>>()
        .join(" ")
}

fn console_object() -> Value {
    Value::object_from(vec![
        (
            "log".to_string(),
            Value::native("log", |_rt, _this, args| {
                println!("{}", format_console(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "info".to_string(),
            Value::native("info", |_rt, _this, args| {
                println!("{}", format_console(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "warn".to_string(),
            Value::native("warn", |_rt, _this, args| {
                eprintln!("{}", format_console(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "error".to_string(),
            Value::native("error", |_rt, _this, args| {
                eprintln!("{}", format_console(args));
                Ok(Value::Undefined)
            }),
        ),
        (
            "debug".to_string(),
            Value::native("debug", |_rt, _this, args| {
                log::debug!("{}", format_console(args));
                Ok(Value::Undefined)
            }),
        ),
    ])
}

fn set_timeout_native() -> Value {
    Value::native("setTimeout", |rt, _this, args| {
        let callback = args.first().cloned().unwrap_or(Value::Undefined);
        if !matches!(callback, Value::Function(_)) {
            return Err(Error::Type(
                "setTimeout requires a callback function".to_string(),
            ));
        }
        let delay = args.get(1).map_or(0.0, |v| v.to_number());
        let extra = args.get(2..).map(|s| s.to_vec()).unwrap_or_default();
        let id = rt.set_timeout(callback, delay, extra);
        Ok(Value::Num(id as f64))
    })
}

fn clear_timeout_native() -> Value {
    Value::native("clearTimeout", |rt, _this, args| {
        if let Some(id) = args.first() {
            rt.clear_timeout(id.to_number() as u64);
        }
        Ok(Value::Undefined)
    })
}

fn parse_int_native() -> Value {
    Value::native("parseInt", |_rt, _this, args| {
        let n = args.first().map_or(f64::NAN, |v| v.to_number());
        Ok(Value::Num(n.trunc()))
    })
}

fn parse_float_native() -> Value {
    Value::native("parseFloat", |_rt, _this, args| {
        Ok(Value::Num(args.first().map_or(f64::NAN, |v| v.to_number())))
    })
}

fn is_nan_native() -> Value {
    Value::native("isNaN", |_rt, _this, args| {
        Ok(Value::Bool(
            args.first().map_or(true, |v| v.to_number().is_nan()),
        ))
    })
}

// ---------------------------------------------------------------------------
// Promise builtin
// ---------------------------------------------------------------------------

fn promise_constructor() -> Value {
    let ctor = Value::native("Promise", |rt, _this, args| {
        let executor = match args.first() {
            Some(f @ Value::Function(_)) => f.clone(),
            _ => {
                return Err(Error::Type(
                    "the Promise executor must be a function".to_string(),
                ))
            }
        };
        let promise = Promise::pending();
        let resolver = promise.clone();
        let rejecter = promise.clone();
        let resolve_fn = Value::native("resolve", move |_rt, _this, args: &[Value]| {
            resolver.resolve(args.first().cloned().unwrap_or(Value::Undefined));
            Ok(Value::Undefined)
        });
        let reject_fn = Value::native("reject", move |_rt, _this, args: &[Value]| {
            rejecter.reject(args.first().cloned().unwrap_or(Value::Undefined));
            Ok(Value::Undefined)
        });
        // an executor that throws rejects the promise instead
        if let Err(err) = invoke_function(rt, &executor, Value::Undefined, vec![resolve_fn, reject_fn])
        {
            promise.reject(err.to_reason());
        }
        Ok(Value::Promise(promise))
    });
    if let Value::Function(f) = &ctor {
        let mut props = f.properties.borrow_mut();
        props.insert(
            "resolve".to_string(),
            Value::native("resolve", |_rt, _this, args| {
                let p = Promise::pending();
                p.resolve(args.first().cloned().unwrap_or(Value::Undefined));
                Ok(Value::Promise(p))
            }),
        );
        props.insert(
            "reject".to_string(),
            Value::native("reject", |_rt, _this, args| {
                let p = Promise::pending();
                p.reject(args.first().cloned().unwrap_or(Value::Undefined));
                Ok(Value::Promise(p))
            }),
        );
        props.insert("all".to_string(), promise_all_native());
        props.insert("race".to_string(), promise_race_native());
    }
    ctor
}

fn promise_all_native() -> Value {
    Value::native("all", |_rt, _this, args| {
        let items: Vec<Value> = match args.first() {
            Some(Value::Array(a)) => a.borrow().clone(),
            _ => {
                return Err(Error::Type(
                    "Promise.all expects an array of promises".to_string(),
                ))
            }
        };
        let result = Promise::pending();
        let count = items.len();
        if count == 0 {
            result.resolve(Value::array_from(Vec::new()));
            return Ok(Value::Promise(result));
        }
        let slots = Rc::new(RefCell::new(vec![Value::Undefined; count]));
        let remaining = Rc::new(Cell::new(count));
        for (i, item) in items.into_iter().enumerate() {
            match item {
                Value::Promise(p) => {
                    let slots = slots.clone();
                    let remaining = remaining.clone();
                    let result = result.clone();
                    p.subscribe(move |state| match state {
                        PromiseState::Fulfilled(v) => {
                            slots.borrow_mut()[i] = v.clone();
                            remaining.set(remaining.get() - 1);
                            if remaining.get() == 0 {
                                let values = slots.borrow().clone();
                                result.resolve(Value::array_from(values));
                            }
                        }
                        PromiseState::Rejected(r) => result.reject(r.clone()),
                        PromiseState::Aborted => result.reject(Value::Abort),
                        PromiseState::Pending => {}
                    });
                }
                value => {
                    slots.borrow_mut()[i] = value;
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        let values = slots.borrow().clone();
                        result.resolve(Value::array_from(values));
                    }
                }
            }
        }
        Ok(Value::Promise(result))
    })
}

fn promise_race_native() -> Value {
    Value::native("race", |_rt, _this, args| {
        let items: Vec<Value> = match args.first() {
            Some(Value::Array(a)) => a.borrow().clone(),
            _ => {
                return Err(Error::Type(
                    "Promise.race expects an array of promises".to_string(),
                ))
            }
        };
        let result = Promise::pending();
        for item in items {
            match item {
                Value::Promise(p) => {
                    let result = result.clone();
                    p.subscribe(move |state| match state {
                        PromiseState::Fulfilled(v) => result.resolve(v.clone()),
                        PromiseState::Rejected(r) => result.reject(r.clone()),
                        PromiseState::Aborted => result.reject(Value::Abort),
                        PromiseState::Pending => {}
                    });
                }
                value => result.resolve(value),
            }
        }
        Ok(Value::Promise(result))
    })
}

// ---------------------------------------------------------------------------
// JSON builtin
// ---------------------------------------------------------------------------

fn json_object() -> Value {
    Value::object_from(vec![
        (
            "parse".to_string(),
            Value::native("parse", |_rt, _this, args| {
                let text = match args.first() {
                    Some(Value::Str(s)) => s.clone(),
                    other => {
                        return Err(Error::Type(format!(
                            "JSON.parse expects a string, got {}",
                            other.map_or("nothing".to_string(), |v| v.to_display())
                        )))
                    }
                };
                let json: serde_json::Value = serde_json::from_str(&text)
                    .map_err(|e| Error::Type(format!("JSON.parse: {}", e)))?;
                Ok(json_to_value(&json))
            }),
        ),
        (
            "stringify".to_string(),
            Value::native("stringify", |_rt, _this, args| {
                match args.first().and_then(value_to_json) {
                    Some(json) => Ok(Value::string(json.to_string())),
                    None => Ok(Value::Undefined),
                }
            }),
        ),
    ])
}

fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => Value::Num(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::string(s.clone()),
        serde_json::Value::Array(items) => {
            Value::array_from(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::object_from(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_value(v)))
                .collect(),
        ),
    }
}

fn value_to_json(value: &Value) -> Option<serde_json::Value> {
    match value {
        Value::Undefined | Value::Uninitialized | Value::Abort | Value::Function(_) => None,
        Value::Null => Some(serde_json::Value::Null),
        Value::Bool(b) => Some(serde_json::Value::Bool(*b)),
        Value::Num(n) => Some(
            serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
        ),
        Value::Str(s) => Some(serde_json::Value::String(s.to_string())),
        Value::Array(items) => Some(serde_json::Value::Array(
            items
                .borrow()
                .iter()
                .map(|v| value_to_json(v).unwrap_or(serde_json::Value::Null))
                .collect(),
        )),
        Value::Object(map) => Some(serde_json::Value::Object(
            map.borrow()
                .iter()
                .filter_map(|(k, v)| value_to_json(v).map(|j| (k.clone(), j)))
                .collect(),
        )),
        // regexes and promises stringify as empty objects
        Value::RegExp(_) | Value::Promise(_) => {
            Some(serde_json::Value::Object(serde_json::Map::new()))
        }
    }
}

// ---------------------------------------------------------------------------
// Math / Object / Array namespaces
// ---------------------------------------------------------------------------

fn math_unary<F: Fn(f64) -> f64 + 'static>(name: &str, f: F) -> Value {
    Value::native(name, move |_rt, _this, args| {
        Ok(Value::Num(f(args.first().map_or(f64::NAN, |v| v.to_number()))))
    })
}

fn math_object() -> Value {
    Value::object_from(vec![
        ("PI".to_string(), Value::Num(std::f64::consts::PI)),
        ("E".to_string(), Value::Num(std::f64::consts::E)),
        ("abs".to_string(), math_unary("abs", f64::abs)),
        ("floor".to_string(), math_unary("floor", f64::floor)),
        ("ceil".to_string(), math_unary("ceil", f64::ceil)),
        ("round".to_string(), math_unary("round", f64::round)),
        ("sqrt".to_string(), math_unary("sqrt", f64::sqrt)),
        (
            "pow".to_string(),
            Value::native("pow", |_rt, _this, args| {
                let base = args.first().map_or(f64::NAN, |v| v.to_number());
                let exp = args.get(1).map_or(f64::NAN, |v| v.to_number());
                Ok(Value::Num(base.powf(exp)))
            }),
        ),
        (
            "min".to_string(),
            Value::native("min", |_rt, _this, args| {
                Ok(Value::Num(
                    args.iter()
                        .map(|v| v.to_number())
                        .fold(f64::INFINITY, f64::min),
                ))
            }),
        ),
        (
            "max".to_string(),
            Value::native("max", |_rt, _this, args| {
                Ok(Value::Num(
                    args.iter()
                        .map(|v| v.to_number())
                        .fold(f64::NEG_INFINITY, f64::max),
                ))
            }),
        ),
        (
            "random".to_string(),
            Value::native("random", |_rt, _this, _args| {
                Ok(Value::Num(rand::random::<f64>()))
            }),
        ),
    ])
}

fn object_namespace() -> Value {
    let ctor = Value::native("Object", |_rt, _this, args| {
        Ok(args.first().cloned().unwrap_or_else(Value::new_object))
    });
    if let Value::Function(f) = &ctor {
        let mut props = f.properties.borrow_mut();
        props.insert(
            "keys".to_string(),
            Value::native("keys", |_rt, _this, args| match args.first() {
                Some(Value::Object(map)) => Ok(Value::array_from(
                    map.borrow().keys().map(|k| Value::string(k.clone())).collect(),
                )),
                Some(Value::Array(items)) => Ok(Value::array_from(
                    (0..items.borrow().len())
                        .map(|i| Value::string(i.to_string()))
                        .collect(),
                )),
                _ => Err(Error::Type("Object.keys expects an object".to_string())),
            }),
        );
        props.insert(
            "values".to_string(),
            Value::native("values", |_rt, _this, args| match args.first() {
                Some(Value::Object(map)) => {
                    Ok(Value::array_from(map.borrow().values().cloned().collect()))
                }
                Some(Value::Array(items)) => Ok(Value::array_from(items.borrow().clone())),
                _ => Err(Error::Type("Object.values expects an object".to_string())),
            }),
        );
        props.insert(
            "assign".to_string(),
            Value::native("assign", |_rt, _this, args| {
                let target = match args.first() {
                    Some(v @ Value::Object(_)) => v.clone(),
                    _ => return Err(Error::Type("Object.assign expects an object".to_string())),
                };
                if let Value::Object(map) = &target {
                    for source in args.iter().skip(1) {
                        if let Value::Object(other) = source {
                            for (k, v) in other.borrow().iter() {
                                map.borrow_mut().insert(k.clone(), v.clone());
                            }
                        }
                    }
                }
                Ok(target)
            }),
        );
    }
    ctor
}

fn array_namespace() -> Value {
    let ctor = Value::native("Array", |_rt, _this, args| {
        Ok(Value::array_from(args.to_vec()))
    });
    if let Value::Function(f) = &ctor {
        f.properties.borrow_mut().insert(
            "isArray".to_string(),
            Value::native("isArray", |_rt, _this, args| {
                Ok(Value::Bool(matches!(args.first(), Some(Value::Array(_)))))
            }),
        );
    }
    ctor
}

/// Exists so `instanceof Function` has something to name; building
/// functions from source at runtime is not supported.
fn function_namespace() -> Value {
    Value::native("Function", |_rt, _this, _args| {
        Err(Error::Type(
            "the Function constructor is not supported".to_string(),
        ))
    })
}

// ---------------------------------------------------------------------------
// Property access
// ---------------------------------------------------------------------------

pub(crate) fn member_get(_rt: &Runtime, target: &Value, key: &Value) -> Result<Value, Error> {
    let key_str = key.to_display();
    match target {
        Value::Undefined | Value::Null | Value::Uninitialized => Err(Error::Type(format!(
            "cannot read properties of {} (reading '{}')",
            target.to_display(),
            key_str
        ))),
        Value::Object(map) => Ok(map
            .borrow()
            .get(&key_str)
            .cloned()
            .unwrap_or(Value::Undefined)),
        Value::Array(items) => {
            if key_str == "length" {
                return Ok(Value::Num(items.borrow().len() as f64));
            }
            if let Ok(idx) = key_str.parse::<usize>() {
                return Ok(items.borrow().get(idx).cloned().unwrap_or(Value::Undefined));
            }
            Ok(array_method(&key_str).unwrap_or(Value::Undefined))
        }
        Value::Str(s) => {
            if key_str == "length" {
                return Ok(Value::Num(s.chars().count() as f64));
            }
            if let Ok(idx) = key_str.parse::<usize>() {
                return Ok(s
                    .chars()
                    .nth(idx)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Undefined));
            }
            Ok(string_method(&key_str).unwrap_or(Value::Undefined))
        }
        Value::Function(f) => {
            if key_str == "name" {
                return Ok(Value::string(f.name.clone().unwrap_or_default()));
            }
            Ok(f.properties
                .borrow()
                .get(&key_str)
                .cloned()
                .unwrap_or(Value::Undefined))
        }
        Value::Promise(_) => Ok(promise_method(&key_str).unwrap_or(Value::Undefined)),
        Value::RegExp(r) => Ok(match key_str.as_str() {
            "source" => Value::string(r.pattern.clone()),
            "flags" => Value::string(r.flags.clone()),
            "test" => regexp_test_native(),
            _ => Value::Undefined,
        }),
        Value::Bool(_) | Value::Num(_) | Value::Abort => Ok(Value::Undefined),
    }
}

pub(crate) fn member_set(target: &Value, key: &Value, value: Value) -> Result<(), Error> {
    let key_str = key.to_display();
    match target {
        Value::Object(map) => {
            map.borrow_mut().insert(key_str, value);
            Ok(())
        }
        Value::Array(items) => {
            if let Ok(idx) = key_str.parse::<usize>() {
                let mut items = items.borrow_mut();
                if idx >= items.len() {
                    items.resize(idx + 1, Value::Undefined);
                }
                items[idx] = value;
                return Ok(());
            }
            if key_str == "length" {
                let n = value.to_number();
                if n < 0.0 || n.fract() != 0.0 || !n.is_finite() {
                    return Err(Error::Type("invalid array length".to_string()));
                }
                items.borrow_mut().resize(n as usize, Value::Undefined);
                return Ok(());
            }
            Err(Error::Type(format!(
                "cannot set property `{}` on an array",
                key_str
            )))
        }
        Value::Function(f) => {
            f.properties.borrow_mut().insert(key_str, value);
            Ok(())
        }
        other => Err(Error::Type(format!(
            "cannot set properties of {}",
            other.to_display()
        ))),
    }
}

fn expect_array(this: &Value, method: &str) -> Result<crate::value::Array, Error> {
    match this {
        Value::Array(items) => Ok(items.clone()),
        _ => Err(Error::Type(format!("{} called on a non-array", method))),
    }
}

fn array_method(name: &str) -> Option<Value> {
    Some(match name {
        "push" => Value::native("push", |_rt, this, args| {
            let items = expect_array(this, "push")?;
            items.borrow_mut().extend(args.iter().cloned());
            let len = items.borrow().len();
            Ok(Value::Num(len as f64))
        }),
        "pop" => Value::native("pop", |_rt, this, _args| {
            let items = expect_array(this, "pop")?;
            let popped = items.borrow_mut().pop();
            Ok(popped.unwrap_or(Value::Undefined))
        }),
        "indexOf" => Value::native("indexOf", |_rt, this, args| {
            let items = expect_array(this, "indexOf")?;
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            let found = items
                .borrow()
                .iter()
                .position(|v| v.strict_eq(&needle))
                .map_or(-1.0, |i| i as f64);
            Ok(Value::Num(found))
        }),
        "includes" => Value::native("includes", |_rt, this, args| {
            let items = expect_array(this, "includes")?;
            let needle = args.first().cloned().unwrap_or(Value::Undefined);
            let found = items.borrow().iter().any(|v| v.strict_eq(&needle));
            Ok(Value::Bool(found))
        }),
        "join" => Value::native("join", |_rt, this, args| {
            let items = expect_array(this, "join")?;
            let sep = match args.first() {
                Some(Value::Str(s)) => s.to_string(),
                _ => ",".to_string(),
            };
            let joined = items
                .borrow()
                .iter()
                .map(|v| match v {
                    Value::Undefined | Value::Null => String::new(),
                    other => other.to_display(),
                })
                .collect::<Vec<_>>()
                .join(&sep);
            Ok(Value::string(joined))
        }),
        "slice" => Value::native("slice", |_rt, this, args| {
            let items = expect_array(this, "slice")?;
            let len = items.borrow().len() as i64;
            let clamp = |v: f64| -> usize {
                let v = v as i64;
                let v = if v < 0 { len + v } else { v };
                v.max(0).min(len) as usize
            };
            let start = clamp(args.first().map_or(0.0, |v| v.to_number()));
            let end = clamp(args.get(1).map_or(len as f64, |v| v.to_number()));
            let out: Vec<Value> = if start < end {
                items.borrow()[start..end].to_vec()
            } else {
                Vec::new()
            };
            Ok(Value::array_from(out))
        }),
        "forEach" => Value::native("forEach", |rt, this, args| {
            let items = expect_array(this, "forEach")?;
            let callback = args.first().cloned().unwrap_or(Value::Undefined);
            let snapshot = items.borrow().clone();
            for (i, item) in snapshot.into_iter().enumerate() {
                invoke_function(rt, &callback, Value::Undefined, vec![item, Value::Num(i as f64)])?;
            }
            Ok(Value::Undefined)
        }),
        "map" => Value::native("map", |rt, this, args| {
            let items = expect_array(this, "map")?;
            let callback = args.first().cloned().unwrap_or(Value::Undefined);
            let snapshot = items.borrow().clone();
            let mut out = Vec::with_capacity(snapshot.len());
            for (i, item) in snapshot.into_iter().enumerate() {
                out.push(invoke_function(
                    rt,
                    &callback,
                    Value::Undefined,
                    vec![item, Value::Num(i as f64)],
                )?);
            }
            Ok(Value::array_from(out))
        }),
        _ => return None,
    })
}

fn expect_str(this: &Value, method: &str) -> Result<Rc<str>, Error> {
    match this {
        Value::Str(s) => Ok(s.clone()),
        _ => Err(Error::Type(format!("{} called on a non-string", method))),
    }
}

fn string_method(name: &str) -> Option<Value> {
    Some(match name {
        "slice" => Value::native("slice", |_rt, this, args| {
            let s = expect_str(this, "slice")?;
            let chars: Vec<char> = s.chars().collect();
            let len = chars.len() as i64;
            let clamp = |v: f64| -> usize {
                let v = v as i64;
                let v = if v < 0 { len + v } else { v };
                v.max(0).min(len) as usize
            };
            let start = clamp(args.first().map_or(0.0, |v| v.to_number()));
            let end = clamp(args.get(1).map_or(len as f64, |v| v.to_number()));
            let out: String = if start < end {
                chars[start..end].iter().collect()
            } else {
                String::new()
            };
            Ok(Value::string(out))
        }),
        "toUpperCase" => Value::native("toUpperCase", |_rt, this, _args| {
            Ok(Value::string(expect_str(this, "toUpperCase")?.to_uppercase()))
        }),
        "toLowerCase" => Value::native("toLowerCase", |_rt, this, _args| {
            Ok(Value::string(expect_str(this, "toLowerCase")?.to_lowercase()))
        }),
        "includes" => Value::native("includes", |_rt, this, args| {
            let s = expect_str(this, "includes")?;
            let needle = args.first().map_or(String::new(), |v| v.to_display());
            Ok(Value::Bool(s.contains(&needle)))
        }),
        "indexOf" => Value::native("indexOf", |_rt, this, args| {
            let s = expect_str(this, "indexOf")?;
            let needle = args.first().map_or(String::new(), |v| v.to_display());
            // byte offset converted to a character index
            let found = s.find(&needle).map_or(-1.0, |byte| {
                s[..byte].chars().count() as f64
            });
            Ok(Value::Num(found))
        }),
        "charAt" => Value::native("charAt", |_rt, this, args| {
            let s = expect_str(this, "charAt")?;
            let idx = args.first().map_or(0.0, |v| v.to_number());
            if idx < 0.0 || idx.fract() != 0.0 {
                return Ok(Value::string(""));
            }
            Ok(s.chars()
                .nth(idx as usize)
                .map(|c| Value::string(c.to_string()))
                .unwrap_or_else(|| Value::string("")))
        }),
        "trim" => Value::native("trim", |_rt, this, _args| {
            Ok(Value::string(expect_str(this, "trim")?.trim().to_string()))
        }),
        _ => return None,
    })
}

fn expect_promise(this: &Value, method: &str) -> Result<Promise, Error> {
    match this {
        Value::Promise(p) => Ok(p.clone()),
        _ => Err(Error::Type(format!("{} called on a non-promise", method))),
    }
}

fn as_handler(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(f @ Value::Function(_)) => Some(f.clone()),
        _ => None,
    }
}

fn promise_method(name: &str) -> Option<Value> {
    Some(match name {
        "then" => Value::native("then", |rt, this, args| {
            let promise = expect_promise(this, "then")?;
            let result = promise_then(rt, &promise, as_handler(args.first()), as_handler(args.get(1)));
            Ok(Value::Promise(result))
        }),
        "catch" => Value::native("catch", |rt, this, args| {
            let promise = expect_promise(this, "catch")?;
            let result = promise_then(rt, &promise, None, as_handler(args.first()));
            Ok(Value::Promise(result))
        }),
        "finally" => Value::native("finally", |rt, this, args| {
            let promise = expect_promise(this, "finally")?;
            match as_handler(args.first()) {
                Some(callback) => {
                    let result = promise_finally(rt, &promise, callback);
                    Ok(Value::Promise(result))
                }
                None => Ok(Value::Promise(promise)),
            }
        }),
        _ => return None,
    })
}

fn regexp_test_native() -> Value {
    Value::native("test", |_rt, this, args| {
        let regex = match this {
            Value::RegExp(r) => r.clone(),
            _ => return Err(Error::Type("test called on a non-regex".to_string())),
        };
        let text = args.first().map_or(String::new(), |v| v.to_display());
        Ok(Value::Bool(regex.compiled.is_match(&text)))
    })
}

/// Compile a regex literal. Flags map onto the engine's inline flags where
/// they exist; `g`, `u` and `y` change matching APIs this engine does not
/// expose and are recorded verbatim.
pub(crate) fn compile_regex(pattern: &str, flags: &str) -> Result<Value, Error> {
    let mut inline = String::new();
    for flag in flags.chars() {
        match flag {
            'i' | 'm' | 's' | 'x' => inline.push(flag),
            'g' | 'u' | 'y' => {}
            other => {
                return Err(Error::Syntax {
                    msg: format!("unknown regex flag `{}`", other),
                    line: 0,
                    col: 0,
                })
            }
        }
    }
    let full = if inline.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{}){}", inline, pattern)
    };
    let compiled = regex::Regex::new(&full).map_err(|e| Error::Syntax {
        msg: format!("invalid regex: {}", e),
        line: 0,
        col: 0,
    })?;
    Ok(Value::RegExp(Rc::new(RegExpValue {
        pattern: pattern.to_string(),
        flags: flags.to_string(),
        compiled,
    })))
}
