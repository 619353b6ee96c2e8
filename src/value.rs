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

//! Guest values.
//!
//! All values a guest program can hold, plus two sentinels the guest cannot
//! forge: `Uninitialized` (the temporal-dead-zone placeholder) and `Abort`
//! (carried by a cancelled await). Objects, arrays, functions and promises
//! are reference values shared through `Rc`; everything else is copied.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::ast::Node;
use crate::error::Error;
use crate::promise::Promise;
use crate::runtime::Runtime;
use crate::scope::Scope;

pub type Object = Rc<RefCell<IndexMap<String, Value>>>;
pub type Array = Rc<RefCell<Vec<Value>>>;

/// Host-implemented functions take the runtime, the receiver and the
/// argument list.
pub type NativeImpl = dyn Fn(&Runtime, &Value, &[Value]) -> Result<Value, Error>;

/// A guest-defined function: the AST body plus the captured defining scope.
/// The `source` is the program text the node's span indexes into, carried
/// for step traces of the function body.
pub struct UserFunction {
    pub node: Rc<Node>,
    pub scope: Scope,
    pub source: Rc<str>,
    pub is_async: bool,
    pub is_arrow: bool,
}

/// The tag distinguishing guest-defined callables from host natives.
pub enum FunctionKind {
    Native(Rc<NativeImpl>),
    User(UserFunction),
}

pub struct FunctionValue {
    pub name: Option<String>,
    pub kind: FunctionKind,
    /// Function objects can carry plain properties (`Promise.all` etc).
    pub properties: RefCell<IndexMap<String, Value>>,
}

impl FunctionValue {
    pub fn is_user(&self) -> bool {
        matches!(self.kind, FunctionKind::User(_))
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.as_deref() {
            Some(name) => write!(f, "[Function: {}]", name),
            None => write!(f, "[Function (anonymous)]"),
        }
    }
}

#[derive(Debug)]
pub struct RegExpValue {
    pub pattern: String,
    pub flags: String,
    pub compiled: regex::Regex,
}

#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    /// Declared but not yet initialized; reading it is an error.
    Uninitialized,
    Null,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    Object(Object),
    Array(Array),
    Function(Rc<FunctionValue>),
    Promise(Promise),
    RegExp(Rc<RegExpValue>),
    /// The cancellation sentinel a cancelled await propagates.
    Abort,
}

impl Value {
    pub fn string<S: Into<Rc<str>>>(s: S) -> Value {
        Value::Str(s.into())
    }

    pub fn native<S, F>(name: S, f: F) -> Value
    where
        S: Into<String>,
        F: Fn(&Runtime, &Value, &[Value]) -> Result<Value, Error> + 'static,
    {
        Value::Function(Rc::new(FunctionValue {
            name: Some(name.into()),
            kind: FunctionKind::Native(Rc::new(f)),
            properties: RefCell::new(IndexMap::new()),
        }))
    }

    pub fn new_object() -> Value {
        Value::Object(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn object_from(entries: Vec<(String, Value)>) -> Value {
        Value::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn array_from(elements: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(elements)))
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Uninitialized | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Num(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined | Value::Uninitialized => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Function(_) => "function",
            _ => "object",
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined | Value::Uninitialized | Value::Abort => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Num(n) => *n,
            Value::Str(s) => {
                let t = s.trim();
                if t.is_empty() {
                    0.0
                } else {
                    t.parse::<f64>().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    pub fn to_i32(&self) -> i32 {
        let n = self.to_number();
        if n.is_nan() || n.is_infinite() {
            0
        } else {
            n as i64 as i32
        }
    }

    pub fn to_u32(&self) -> u32 {
        self.to_i32() as u32
    }

    /// Same-value-kind comparison; reference values compare by identity.
    pub fn strict_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Null, Value::Null) => true,
            (Value::Abort, Value::Abort) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Num(a), Value::Num(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Promise(a), Value::Promise(b)) => a.ptr_eq(b),
            (Value::RegExp(a), Value::RegExp(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==` with the usual coercions, minus object-to-primitive conversion
    /// (reference values only compare equal by identity). Nullish values
    /// loosely equal only each other.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Num(_), Value::Str(_))
            | (Value::Str(_), Value::Num(_))
            | (Value::Bool(_), _)
            | (_, Value::Bool(_)) => self.to_number() == other.to_number(),
            _ => self.strict_eq(other),
        }
    }

    /// Rendering used by `console`, string concatenation and traces.
    pub fn to_display(&self) -> String {
        match self {
            Value::Undefined | Value::Uninitialized => "undefined".to_string(),
            Value::Null => "null".to_string(),
            Value::Abort => "[aborted]".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => fmt_num(*n),
            Value::Str(s) => s.to_string(),
            Value::Object(map) => {
                let map = map.borrow();
                let entries: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k, v.to_quoted()))
                    .collect();
                if entries.is_empty() {
                    "{}".to_string()
                } else {
                    format!("{{ {} }}", entries.join(", "))
                }
            }
            Value::Array(items) => {
                let items = items.borrow();
                let entries: Vec<String> = items.iter().map(|v| v.to_quoted()).collect();
                format!("[ {} ]", entries.join(", "))
            }
            Value::Function(f) => format!("{:?}", f),
            Value::Promise(p) => format!("{:?}", p),
            Value::RegExp(r) => format!("/{}/{}", r.pattern, r.flags),
        }
    }

    /// Like `to_display` but quotes strings; used for container elements.
    fn to_quoted(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s),
            other => other.to_display(),
        }
    }

    pub fn as_promise(&self) -> Option<&Promise> {
        match self {
            Value::Promise(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display())
    }
}

/// Structural comparison for tests and `assert_eq!`-style use. Numbers and
/// strings compare by value, containers compare element-wise, functions and
/// promises by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k).map_or(false, |w| v == w))
            }
            (Value::Array(a), Value::Array(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                *a.borrow() == *b.borrow()
            }
            _ => self.strict_eq(other),
        }
    }
}

/// Number rendering: integral values print without a fraction, specials
/// print the way the guest language spells them.
pub fn fmt_num(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 {
            "Infinity".to_string()
        } else {
            "-Infinity".to_string()
        }
    } else {
        format!("{}", n)
    }
}
