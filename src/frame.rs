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

//! Frames: one resumable evaluation record per in-progress AST node.
//!
//! The `(index, sub_index)` pair is the resumption point inside a node's
//! child list; `on_ret` is the only channel by which a popped child hands
//! its result to its parent.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::Node;
use crate::scope::Scope;
use crate::value::Value;

/// Hint telling the evaluator how a sub-expression's result will be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Target of `return` unwinding; the root frame of every call.
    Call,
    /// Produce `{function, this}` for an upcoming invocation.
    Callee,
    /// Produce the property name literally instead of resolving it.
    Key,
    /// Produce an assignable place instead of a value.
    Left,
}

/// Where an assignable place lives: a scope binding or a property slot.
#[derive(Debug, Clone)]
pub enum PlaceBase {
    Scope(Scope),
    Value(Value),
}

#[derive(Debug, Clone)]
pub struct Place {
    pub base: PlaceBase,
    pub key: Value,
}

/// What a popped frame delivers to its parent. Plain expressions return
/// values; role-tagged ones return places or callee pairs.
#[derive(Debug, Clone)]
pub enum Returned {
    Val(Value),
    Place(Place),
    Callee { function: Value, this: Value },
}

impl Returned {
    pub fn into_value(self) -> Value {
        match self {
            Returned::Val(v) => v,
            Returned::Callee { function, .. } => function,
            Returned::Place(_) => Value::Undefined,
        }
    }
}

/// The return protocol between child and parent frame.
#[derive(Clone)]
pub enum OnRet {
    /// Ignore the child's result.
    Discard,
    /// Assign the result to the parent's `state.cur`.
    AsState,
    /// Assign the result to the named slot in the parent's `state`.
    AsStateProp(&'static str),
    /// Write the value into a shared slot outside the stack; used by the
    /// root call frame of every execution to capture its result.
    Store(Rc<RefCell<Option<Value>>>),
}

/// Scratch state of a frame: the `on_ret` targets plus the evaluator's own
/// accumulators.
#[derive(Default)]
pub struct Scratch {
    pub cur: Option<Returned>,
    pub props: HashMap<&'static str, Returned>,
    /// Value accumulator for argument/element lists.
    pub values: Vec<Value>,
    /// The scope a multi-phase node allocated (block inner scope, loop init
    /// scope).
    pub scope: Option<Scope>,
}

impl Scratch {
    pub fn take_cur(&mut self) -> Returned {
        self.cur.take().unwrap_or(Returned::Val(Value::Undefined))
    }

    pub fn take_cur_value(&mut self) -> Value {
        self.take_cur().into_value()
    }

    pub fn take_prop(&mut self, key: &'static str) -> Returned {
        self.props
            .remove(key)
            .unwrap_or(Returned::Val(Value::Undefined))
    }

    pub fn take_prop_value(&mut self, key: &'static str) -> Value {
        self.take_prop(key).into_value()
    }

    pub fn peek_prop(&self, key: &'static str) -> Option<&Returned> {
        self.props.get(key)
    }
}

pub struct Frame {
    pub node: Rc<Node>,
    pub scope: Scope,
    pub role: Option<Role>,
    /// Binding name in effect for this frame; gives anonymous functions
    /// their declared name.
    pub name: Option<String>,
    pub index: usize,
    pub sub_index: usize,
    pub state: Scratch,
    pub on_ret: OnRet,
}

impl Frame {
    pub fn new(node: Rc<Node>, scope: Scope, on_ret: OnRet) -> Frame {
        Frame {
            node,
            scope,
            role: None,
            name: None,
            index: 0,
            sub_index: 0,
            state: Scratch::default(),
            on_ret,
        }
    }

    pub fn with_role(mut self, role: Role) -> Frame {
        self.role = Some(role);
        self
    }

    pub fn with_name(mut self, name: Option<String>) -> Frame {
        self.name = name;
        self
    }
}
