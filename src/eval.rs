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

//! The evaluator: one case per AST node kind.
//!
//! Every call to [`step`] performs exactly one unit of progress on the top
//! frame: push a child frame, pop with a value, or advance the frame's own
//! `(index, sub_index)` machine. The pair encodes the resumption point
//! within a node's ordered children, which is what lets an execution
//! suspend mid-expression at an await and resume later.

use std::cmp::Ordering;
use std::mem;
use std::rc::Rc;

use log::debug;

use crate::ast::{Arg, AssignOp, BinaryOp, Element, Node, NodeKind, Property, UnaryOp, UpdateOp};
use crate::error::Error;
use crate::exec::{self, Execution, ExecutionData};
use crate::frame::{Frame, OnRet, Place, PlaceBase, Returned, Role, Scratch};
use crate::globals;
use crate::promise::{Promise, PromiseState};
use crate::runtime::Runtime;
use crate::scope::Scope;
use crate::value::{FunctionKind, FunctionValue, UserFunction, Value};

pub(crate) fn step(rt: &Runtime, exec: &Execution) -> Result<(), Error> {
    let is_debug = rt.is_debug();
    let mut guard = exec.data.borrow_mut();
    let data = &mut *guard;
    if data.state.stack.is_empty() {
        return Err(Error::StateInvariant("step on an empty stack"));
    }
    data.steps += 1;
    if is_debug {
        trace_enter(data);
    }
    step_top(rt, data, is_debug)
}

fn top(data: &mut ExecutionData) -> &mut Frame {
    data.state.stack.last_mut().unwrap()
}

fn push(data: &mut ExecutionData, frame: Frame) {
    data.state.stack.push(frame);
}

/// Pop the top frame and deliver `value` through its `on_ret`. The parent's
/// `sub_index` advances by exactly one; this is the sole channel between
/// frames.
fn ret(data: &mut ExecutionData, value: Returned, is_debug: bool) {
    if is_debug {
        trace_ret(data, &value);
    }
    let frame = data.state.stack.pop().unwrap();
    if let Some(parent) = data.state.stack.last_mut() {
        parent.sub_index += 1;
    }
    match frame.on_ret {
        OnRet::Discard => {}
        OnRet::AsState => {
            if let Some(parent) = data.state.stack.last_mut() {
                parent.state.cur = Some(value);
            }
        }
        OnRet::AsStateProp(prop) => {
            if let Some(parent) = data.state.stack.last_mut() {
                parent.state.props.insert(prop, value);
            }
        }
        OnRet::Store(slot) => {
            *slot.borrow_mut() = Some(value.into_value());
        }
    }
}

fn trace_enter(data: &ExecutionData) {
    let frame = data.state.stack.last().unwrap();
    let indent = "  ".repeat(data.state.stack.len() - 1);
    debug!(
        "[{}:{}] {}{} {}:{} {}",
        data.desc,
        data.steps,
        indent,
        frame.node.kind_name(),
        frame.index,
        frame.sub_index,
        source_slice(&data.source, &frame.node)
    );
}

fn trace_ret(data: &ExecutionData, value: &Returned) {
    let indent = "  ".repeat(data.state.stack.len().saturating_sub(1));
    let shown = match value {
        Returned::Val(v) => v.to_display(),
        Returned::Place(_) => "<place>".to_string(),
        Returned::Callee { function, .. } => format!("<callee {}>", function.to_display()),
    };
    debug!("[{}:{}] {}→ {}", data.desc, data.steps, indent, shown);
}

fn source_slice(source: &str, node: &Node) -> String {
    let text = source.get(node.start..node.end).unwrap_or("");
    let line = text.lines().next().unwrap_or("");
    let mut out: String = line.trim().chars().take(48).collect();
    if out.len() < line.trim().len() {
        out.push_str("...");
    }
    out
}

/// Find the innermost loop frame without crossing a call boundary.
fn find_loop(data: &ExecutionData) -> Result<usize, Error> {
    for (i, frame) in data.state.stack.iter().enumerate().rev() {
        if frame.node.is_loop() {
            return Ok(i);
        }
        if frame.role == Some(Role::Call) {
            break;
        }
    }
    Err(Error::StateInvariant("loop control outside of a loop"))
}

/// Pre-store the TDZ sentinel for every declaration directly contained in a
/// block, so reads before the declaration executes fail as uninitialized
/// rather than undefined.
fn hoist_declarations(body: &[Rc<Node>], scope: &Scope) {
    for stmt in body {
        if let NodeKind::VariableDeclaration { declarations, .. } = &stmt.kind {
            for decl in declarations {
                scope.declare(decl.name.clone(), Value::Uninitialized);
            }
        }
    }
}

pub(crate) fn make_function(
    source: Rc<str>,
    node: &Rc<Node>,
    scope: &Scope,
    name_hint: Option<String>,
) -> Result<Value, Error> {
    match &node.kind {
        NodeKind::FunctionExpression {
            name,
            is_async,
            is_arrow,
            ..
        } => Ok(Value::Function(Rc::new(FunctionValue {
            name: name.clone().or(name_hint),
            kind: FunctionKind::User(UserFunction {
                node: node.clone(),
                scope: scope.clone(),
                source,
                is_async: *is_async,
                is_arrow: *is_arrow,
            }),
            properties: Default::default(),
        }))),
        _ => Err(Error::StateInvariant("expected a function node")),
    }
}

fn place_read(rt: &Runtime, place: &Place) -> Result<Value, Error> {
    match &place.base {
        PlaceBase::Scope(scope) => scope.resolve(&place.key.to_display()),
        PlaceBase::Value(target) => globals::member_get(rt, target, &place.key),
    }
}

fn place_write(place: &Place, value: Value) -> Result<(), Error> {
    match &place.base {
        PlaceBase::Scope(scope) => scope.assign(&place.key.to_display(), value),
        PlaceBase::Value(target) => globals::member_set(target, &place.key, value),
    }
}

fn take_place(scratch: &mut Scratch, key: &'static str) -> Result<Place, Error> {
    match scratch.take_prop(key) {
        Returned::Place(p) => Ok(p),
        _ => Err(Error::StateInvariant("expected an assignable place")),
    }
}

fn step_top(rt: &Runtime, data: &mut ExecutionData, is_debug: bool) -> Result<(), Error> {
    let (node, scope, role, index, sub) = {
        let frame = data.state.stack.last().unwrap();
        (
            frame.node.clone(),
            frame.scope.clone(),
            frame.role,
            frame.index,
            frame.sub_index,
        )
    };
    match &node.kind {
        NodeKind::Program { body } | NodeKind::Block { body } => {
            if index == 0 && sub == 0 && top(data).state.scope.is_none() {
                let inner = scope.child();
                hoist_declarations(body, &inner);
                top(data).state.scope = Some(inner);
            }
            if index >= body.len() {
                ret(data, Returned::Val(Value::Undefined), is_debug);
            } else if sub == 0 {
                let inner = top(data).state.scope.clone().unwrap();
                push(data, Frame::new(body[index].clone(), inner, OnRet::Discard));
            } else {
                let frame = top(data);
                frame.index += 1;
                frame.sub_index = 0;
            }
            Ok(())
        }

        NodeKind::ExpressionStatement { expression } => {
            if sub == 0 {
                push(data, Frame::new(expression.clone(), scope, OnRet::Discard));
            } else {
                ret(data, Returned::Val(Value::Undefined), is_debug);
            }
            Ok(())
        }

        NodeKind::VariableDeclaration { declarations, .. } => {
            if index >= declarations.len() {
                ret(data, Returned::Val(Value::Undefined), is_debug);
            } else if sub == 0 {
                let decl = &declarations[index];
                match &decl.init {
                    Some(init) => {
                        scope.declare(decl.name.clone(), Value::Uninitialized);
                        push(
                            data,
                            Frame::new(init.clone(), scope.clone(), OnRet::AsState)
                                .with_name(Some(decl.name.clone())),
                        );
                    }
                    None => {
                        scope.declare(decl.name.clone(), Value::Undefined);
                        top(data).index += 1;
                    }
                }
            } else {
                let value = top(data).state.take_cur_value();
                scope.declare(declarations[index].name.clone(), value);
                let frame = top(data);
                frame.index += 1;
                frame.sub_index = 0;
            }
            Ok(())
        }

        NodeKind::IfStatement {
            test,
            consequent,
            alternate,
        } => {
            match sub {
                0 => push(data, Frame::new(test.clone(), scope, OnRet::AsState)),
                1 => {
                    let taken = top(data).state.take_cur_value().is_truthy();
                    if taken {
                        push(data, Frame::new(consequent.clone(), scope, OnRet::Discard));
                    } else if let Some(alternate) = alternate {
                        push(data, Frame::new(alternate.clone(), scope, OnRet::Discard));
                    } else {
                        ret(data, Returned::Val(Value::Undefined), is_debug);
                    }
                }
                _ => ret(data, Returned::Val(Value::Undefined), is_debug),
            }
            Ok(())
        }

        // index encodes the phase: 0 init, 1 test, 2 body, 3 update
        NodeKind::ForStatement {
            init,
            test,
            update,
            body,
        } => {
            match (index, sub) {
                (0, 0) => {
                    let init_scope = scope.child();
                    top(data).state.scope = Some(init_scope.clone());
                    match init {
                        Some(init) => {
                            push(data, Frame::new(init.clone(), init_scope, OnRet::Discard))
                        }
                        None => top(data).index = 1,
                    }
                }
                (0, _) => {
                    let frame = top(data);
                    frame.index = 1;
                    frame.sub_index = 0;
                }
                (1, 0) => {
                    let init_scope = top(data).state.scope.clone().unwrap();
                    match test {
                        // a missing test is truthy
                        Some(test) => {
                            push(data, Frame::new(test.clone(), init_scope, OnRet::AsState))
                        }
                        None => top(data).index = 2,
                    }
                }
                (1, _) => {
                    if top(data).state.take_cur_value().is_truthy() {
                        let frame = top(data);
                        frame.index = 2;
                        frame.sub_index = 0;
                    } else {
                        ret(data, Returned::Val(Value::Undefined), is_debug);
                    }
                }
                (2, 0) => {
                    let init_scope = top(data).state.scope.clone().unwrap();
                    let iteration = init_scope.iteration_copy();
                    push(data, Frame::new(body.clone(), iteration, OnRet::Discard));
                }
                (2, _) => {
                    let frame = top(data);
                    frame.index = 3;
                    frame.sub_index = 0;
                }
                (3, 0) => {
                    let init_scope = top(data).state.scope.clone().unwrap();
                    match update {
                        Some(update) => {
                            push(data, Frame::new(update.clone(), init_scope, OnRet::Discard))
                        }
                        None => {
                            let frame = top(data);
                            frame.index = 1;
                            frame.sub_index = 0;
                        }
                    }
                }
                _ => {
                    let frame = top(data);
                    frame.index = 1;
                    frame.sub_index = 0;
                }
            }
            Ok(())
        }

        NodeKind::WhileStatement { test, body } => {
            match (index, sub) {
                (0, 0) => push(data, Frame::new(test.clone(), scope, OnRet::AsState)),
                (0, _) => {
                    if top(data).state.take_cur_value().is_truthy() {
                        let frame = top(data);
                        frame.index = 1;
                        frame.sub_index = 0;
                    } else {
                        ret(data, Returned::Val(Value::Undefined), is_debug);
                    }
                }
                (1, 0) => push(data, Frame::new(body.clone(), scope, OnRet::Discard)),
                _ => {
                    let frame = top(data);
                    frame.index = 0;
                    frame.sub_index = 0;
                }
            }
            Ok(())
        }

        NodeKind::DoWhileStatement { body, test } => {
            match (index, sub) {
                (0, 0) => push(data, Frame::new(body.clone(), scope, OnRet::Discard)),
                (0, _) => {
                    let frame = top(data);
                    frame.index = 1;
                    frame.sub_index = 0;
                }
                (1, 0) => push(data, Frame::new(test.clone(), scope, OnRet::AsState)),
                _ => {
                    if top(data).state.take_cur_value().is_truthy() {
                        let frame = top(data);
                        frame.index = 0;
                        frame.sub_index = 0;
                    } else {
                        ret(data, Returned::Val(Value::Undefined), is_debug);
                    }
                }
            }
            Ok(())
        }

        NodeKind::BreakStatement => {
            let pos = find_loop(data)?;
            data.state.stack.truncate(pos + 1);
            ret(data, Returned::Val(Value::Undefined), is_debug);
            Ok(())
        }

        NodeKind::ContinueStatement => {
            let pos = find_loop(data)?;
            data.state.stack.truncate(pos + 1);
            let frame = top(data);
            // re-enter the phase the next iteration starts with: the update
            // for `for` loops, the test or body otherwise
            let is_for = matches!(frame.node.kind, NodeKind::ForStatement { .. });
            frame.index = if is_for { 3 } else { 0 };
            frame.sub_index = 0;
            frame.state.cur = None;
            Ok(())
        }

        NodeKind::ReturnStatement { argument } => {
            match sub {
                0 => match argument {
                    Some(argument) => {
                        push(data, Frame::new(argument.clone(), scope, OnRet::AsState))
                    }
                    None => {
                        let frame = top(data);
                        frame.state.cur = Some(Returned::Val(Value::Undefined));
                        frame.sub_index = 1;
                    }
                },
                _ => {
                    let value = top(data).state.take_cur_value();
                    let pos = data
                        .state
                        .stack
                        .iter()
                        .rposition(|f| f.role == Some(Role::Call))
                        .ok_or(Error::StateInvariant("return outside of a call"))?;
                    data.state.stack.truncate(pos + 1);
                    ret(data, Returned::Val(value), is_debug);
                }
            }
            Ok(())
        }

        NodeKind::Identifier { name } => {
            match role {
                Some(Role::Key) => ret(data, Returned::Val(Value::string(name.clone())), is_debug),
                Some(Role::Left) => ret(
                    data,
                    Returned::Place(Place {
                        base: PlaceBase::Scope(scope),
                        key: Value::string(name.clone()),
                    }),
                    is_debug,
                ),
                Some(Role::Callee) => {
                    let function = scope.resolve(name)?;
                    ret(
                        data,
                        Returned::Callee {
                            function,
                            this: Value::Undefined,
                        },
                        is_debug,
                    );
                }
                _ => {
                    let value = scope.resolve(name)?;
                    ret(data, Returned::Val(value), is_debug);
                }
            }
            Ok(())
        }

        NodeKind::ThisExpression => {
            let value = scope.lookup("this").unwrap_or(Value::Undefined);
            match role {
                Some(Role::Callee) => ret(
                    data,
                    Returned::Callee {
                        function: value,
                        this: Value::Undefined,
                    },
                    is_debug,
                ),
                _ => ret(data, Returned::Val(value), is_debug),
            }
            Ok(())
        }

        NodeKind::MemberExpression {
            object,
            property,
            computed,
            optional,
        } => {
            match sub {
                0 => push(
                    data,
                    Frame::new(object.clone(), scope, OnRet::AsStateProp("object")),
                ),
                1 => {
                    let nullish = match top(data).state.peek_prop("object") {
                        Some(Returned::Val(v)) => v.is_nullish(),
                        _ => false,
                    };
                    if *optional && nullish {
                        match role {
                            Some(Role::Callee) => ret(
                                data,
                                Returned::Callee {
                                    function: Value::Undefined,
                                    this: Value::Undefined,
                                },
                                is_debug,
                            ),
                            _ => ret(data, Returned::Val(Value::Undefined), is_debug),
                        }
                    } else {
                        let mut frame =
                            Frame::new(property.clone(), scope, OnRet::AsStateProp("key"));
                        if !*computed {
                            frame = frame.with_role(Role::Key);
                        }
                        push(data, frame);
                    }
                }
                _ => {
                    let object = top(data).state.take_prop_value("object");
                    let key = top(data).state.take_prop_value("key");
                    match role {
                        Some(Role::Left) => ret(
                            data,
                            Returned::Place(Place {
                                base: PlaceBase::Value(object),
                                key,
                            }),
                            is_debug,
                        ),
                        Some(Role::Callee) => {
                            let function = globals::member_get(rt, &object, &key)?;
                            ret(
                                data,
                                Returned::Callee {
                                    function,
                                    this: object,
                                },
                                is_debug,
                            );
                        }
                        _ => {
                            let value = globals::member_get(rt, &object, &key)?;
                            ret(data, Returned::Val(value), is_debug);
                        }
                    }
                }
            }
            Ok(())
        }

        NodeKind::UnaryExpression { op, argument } => {
            if *op == UnaryOp::Delete {
                return Err(Error::UnsupportedOperator("delete".to_string()));
            }
            if sub == 0 {
                push(data, Frame::new(argument.clone(), scope, OnRet::AsState));
            } else {
                let value = top(data).state.take_cur_value();
                let result = match op {
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::BitNot => Value::Num(!value.to_i32() as f64),
                    UnaryOp::Plus => Value::Num(value.to_number()),
                    UnaryOp::Minus => Value::Num(-value.to_number()),
                    UnaryOp::Void => Value::Undefined,
                    UnaryOp::TypeOf => Value::string(value.type_of()),
                    UnaryOp::Delete => unreachable!(),
                };
                ret(data, Returned::Val(result), is_debug);
            }
            Ok(())
        }

        NodeKind::BinaryExpression { op, left, right } => {
            match sub {
                0 => push(data, Frame::new(left.clone(), scope, OnRet::AsState)),
                1 => {
                    let lhs = top(data).state.take_cur_value();
                    if op.is_logical() {
                        let short_circuit = match op {
                            BinaryOp::And => !lhs.is_truthy(),
                            BinaryOp::Or => lhs.is_truthy(),
                            _ => !lhs.is_nullish(),
                        };
                        if short_circuit {
                            ret(data, Returned::Val(lhs), is_debug);
                        } else {
                            push(data, Frame::new(right.clone(), scope, OnRet::AsState));
                        }
                    } else {
                        top(data).state.props.insert("left", Returned::Val(lhs));
                        push(data, Frame::new(right.clone(), scope, OnRet::AsState));
                    }
                }
                _ => {
                    let rhs = top(data).state.take_cur_value();
                    if op.is_logical() {
                        ret(data, Returned::Val(rhs), is_debug);
                    } else if *op == BinaryOp::Pipeline {
                        let lhs = top(data).state.take_prop_value("left");
                        let value =
                            exec::invoke_function(rt, &rhs, Value::Undefined, vec![lhs])?;
                        ret(data, Returned::Val(value), is_debug);
                    } else {
                        let lhs = top(data).state.take_prop_value("left");
                        let value = apply_binary(*op, &lhs, &rhs)?;
                        ret(data, Returned::Val(value), is_debug);
                    }
                }
            }
            Ok(())
        }

        NodeKind::ConditionalExpression {
            test,
            consequent,
            alternate,
        } => {
            match sub {
                0 => push(data, Frame::new(test.clone(), scope, OnRet::AsState)),
                1 => {
                    let branch = if top(data).state.take_cur_value().is_truthy() {
                        consequent
                    } else {
                        alternate
                    };
                    push(data, Frame::new(branch.clone(), scope, OnRet::AsState));
                }
                _ => {
                    let value = top(data).state.take_cur_value();
                    ret(data, Returned::Val(value), is_debug);
                }
            }
            Ok(())
        }

        NodeKind::AssignmentExpression { op, left, right } => {
            let name_hint = match &left.kind {
                NodeKind::Identifier { name } => Some(name.clone()),
                _ => None,
            };
            if op.is_logical() {
                // the left place is read first and the right operand only
                // evaluates when the operator calls for it
                match sub {
                    0 => push(
                        data,
                        Frame::new(left.clone(), scope, OnRet::AsStateProp("place"))
                            .with_role(Role::Left),
                    ),
                    1 => {
                        let place = match top(data).state.peek_prop("place") {
                            Some(Returned::Place(p)) => p.clone(),
                            _ => {
                                return Err(Error::StateInvariant(
                                    "expected an assignable place",
                                ))
                            }
                        };
                        let current = place_read(rt, &place)?;
                        let short_circuit = match op {
                            AssignOp::And => !current.is_truthy(),
                            AssignOp::Or => current.is_truthy(),
                            _ => !current.is_nullish(),
                        };
                        if short_circuit {
                            ret(data, Returned::Val(current), is_debug);
                        } else {
                            push(
                                data,
                                Frame::new(right.clone(), scope, OnRet::AsState)
                                    .with_name(name_hint),
                            );
                        }
                    }
                    _ => {
                        let place = take_place(&mut top(data).state, "place")?;
                        let value = top(data).state.take_cur_value();
                        place_write(&place, value.clone())?;
                        ret(data, Returned::Val(value), is_debug);
                    }
                }
            } else {
                match sub {
                    0 => push(
                        data,
                        Frame::new(right.clone(), scope, OnRet::AsStateProp("value"))
                            .with_name(name_hint),
                    ),
                    1 => push(
                        data,
                        Frame::new(left.clone(), scope, OnRet::AsStateProp("place"))
                            .with_role(Role::Left),
                    ),
                    _ => {
                        let place = take_place(&mut top(data).state, "place")?;
                        let value = top(data).state.take_prop_value("value");
                        let out = match op.to_binary() {
                            None => value,
                            Some(binary) => {
                                let current = place_read(rt, &place)?;
                                apply_binary(binary, &current, &value)?
                            }
                        };
                        place_write(&place, out.clone())?;
                        ret(data, Returned::Val(out), is_debug);
                    }
                }
            }
            Ok(())
        }

        NodeKind::UpdateExpression { op, prefix, argument } => {
            match sub {
                0 => push(
                    data,
                    Frame::new(argument.clone(), scope, OnRet::AsStateProp("place"))
                        .with_role(Role::Left),
                ),
                _ => {
                    let place = take_place(&mut top(data).state, "place")?;
                    let old = place_read(rt, &place)?.to_number();
                    let new = match op {
                        UpdateOp::Inc => old + 1.0,
                        UpdateOp::Dec => old - 1.0,
                    };
                    place_write(&place, Value::Num(new))?;
                    let shown = if *prefix { new } else { old };
                    ret(data, Returned::Val(Value::Num(shown)), is_debug);
                }
            }
            Ok(())
        }

        NodeKind::ObjectExpression { properties } => {
            if index == 0 && sub == 0 && top(data).state.peek_prop("obj").is_none() {
                top(data)
                    .state
                    .props
                    .insert("obj", Returned::Val(Value::new_object()));
            }
            if index >= properties.len() {
                let object = top(data).state.take_prop_value("obj");
                ret(data, Returned::Val(object), is_debug);
                return Ok(());
            }
            let object = match top(data).state.peek_prop("obj") {
                Some(Returned::Val(Value::Object(map))) => map.clone(),
                _ => return Err(Error::StateInvariant("object literal scratch missing")),
            };
            match &properties[index] {
                Property::Keyed {
                    key,
                    value,
                    computed,
                    method,
                } => match sub {
                    0 => {
                        let mut frame =
                            Frame::new(key.clone(), scope, OnRet::AsStateProp("key"));
                        if !*computed {
                            frame = frame.with_role(Role::Key);
                        }
                        push(data, frame);
                    }
                    1 => {
                        let key_str = top(data).state.take_prop_value("key").to_display();
                        if *method {
                            let func =
                                make_function(data.source.clone(), value, &scope, Some(key_str.clone()))?;
                            object.borrow_mut().insert(key_str, func);
                            let frame = top(data);
                            frame.index += 1;
                            frame.sub_index = 0;
                        } else {
                            top(data)
                                .state
                                .props
                                .insert("key", Returned::Val(Value::string(key_str.clone())));
                            push(
                                data,
                                Frame::new(value.clone(), scope, OnRet::AsStateProp("value"))
                                    .with_name(Some(key_str)),
                            );
                        }
                    }
                    _ => {
                        let key_str = top(data).state.take_prop_value("key").to_display();
                        let value = top(data).state.take_prop_value("value");
                        object.borrow_mut().insert(key_str, value);
                        let frame = top(data);
                        frame.index += 1;
                        frame.sub_index = 0;
                    }
                },
                Property::Spread(argument) => match sub {
                    0 => push(data, Frame::new(argument.clone(), scope, OnRet::AsState)),
                    _ => {
                        let source = top(data).state.take_cur_value();
                        match &source {
                            Value::Object(entries) => {
                                for (k, v) in entries.borrow().iter() {
                                    object.borrow_mut().insert(k.clone(), v.clone());
                                }
                            }
                            Value::Array(items) => {
                                for (i, v) in items.borrow().iter().enumerate() {
                                    object.borrow_mut().insert(i.to_string(), v.clone());
                                }
                            }
                            // spreading primitives contributes nothing
                            _ => {}
                        }
                        let frame = top(data);
                        frame.index += 1;
                        frame.sub_index = 0;
                    }
                },
            }
            Ok(())
        }

        NodeKind::ArrayExpression { elements } => {
            if index == 0 && sub == 0 && top(data).state.peek_prop("arr").is_none() {
                top(data)
                    .state
                    .props
                    .insert("arr", Returned::Val(Value::array_from(Vec::new())));
            }
            if index >= elements.len() {
                let array = top(data).state.take_prop_value("arr");
                ret(data, Returned::Val(array), is_debug);
                return Ok(());
            }
            let array = match top(data).state.peek_prop("arr") {
                Some(Returned::Val(Value::Array(items))) => items.clone(),
                _ => return Err(Error::StateInvariant("array literal scratch missing")),
            };
            match &elements[index] {
                Element::Hole => {
                    top(data).index += 1;
                }
                Element::Expr(expr) => match sub {
                    0 => push(data, Frame::new(expr.clone(), scope, OnRet::AsState)),
                    _ => {
                        let value = top(data).state.take_cur_value();
                        array.borrow_mut().push(value);
                        let frame = top(data);
                        frame.index += 1;
                        frame.sub_index = 0;
                    }
                },
                Element::Spread(expr) => match sub {
                    0 => push(data, Frame::new(expr.clone(), scope, OnRet::AsState)),
                    _ => {
                        let value = top(data).state.take_cur_value();
                        spread_into(&mut array.borrow_mut(), value)?;
                        let frame = top(data);
                        frame.index += 1;
                        frame.sub_index = 0;
                    }
                },
            }
            Ok(())
        }

        NodeKind::CallExpression {
            callee,
            arguments,
            optional,
        } => step_call(rt, data, is_debug, scope, callee, arguments, *optional, false, index, sub),

        NodeKind::NewExpression { callee, arguments } => {
            step_call(rt, data, is_debug, scope, callee, arguments, false, true, index, sub)
        }

        NodeKind::FunctionExpression { .. } => {
            let hint = top(data).name.clone();
            let func = make_function(data.source.clone(), &node, &scope, hint)?;
            ret(data, Returned::Val(func), is_debug);
            Ok(())
        }

        NodeKind::StringLiteral { value } => {
            ret(data, Returned::Val(Value::string(value.clone())), is_debug);
            Ok(())
        }

        NodeKind::NumericLiteral { value } => {
            ret(data, Returned::Val(Value::Num(*value)), is_debug);
            Ok(())
        }

        NodeKind::BooleanLiteral { value } => {
            ret(data, Returned::Val(Value::Bool(*value)), is_debug);
            Ok(())
        }

        NodeKind::NullLiteral => {
            ret(data, Returned::Val(Value::Null), is_debug);
            Ok(())
        }

        NodeKind::RegExpLiteral { pattern, flags } => {
            let value = globals::compile_regex(pattern, flags)?;
            ret(data, Returned::Val(value), is_debug);
            Ok(())
        }

        NodeKind::AwaitExpression { argument } => {
            match sub {
                0 => push(data, Frame::new(argument.clone(), scope, OnRet::AsState)),
                1 => {
                    let value = top(data).state.take_cur_value();
                    let promise = match &value {
                        Value::Promise(p) => Some(p.clone()),
                        Value::Object(_) => wrap_thenable(rt, &value)?,
                        _ => None,
                    };
                    match promise {
                        Some(promise) => {
                            if data.state.awaiting.is_some() {
                                return Err(Error::StateInvariant(
                                    "awaitingPromise already set",
                                ));
                            }
                            data.state.awaiting = Some(promise);
                            top(data).sub_index = 2;
                        }
                        // a non-thenable awaits to itself immediately
                        None => ret(data, Returned::Val(value), is_debug),
                    }
                }
                _ => {
                    let promise = data
                        .state
                        .awaiting
                        .clone()
                        .ok_or(Error::StateInvariant("awaiting promise missing"))?;
                    match promise.state() {
                        // still pending: stay parked, the driver suspends
                        PromiseState::Pending => {}
                        PromiseState::Fulfilled(value) => {
                            data.state.awaiting = None;
                            ret(data, Returned::Val(value), is_debug);
                        }
                        PromiseState::Rejected(reason) => {
                            data.state.awaiting = None;
                            return Err(Error::Thrown(reason));
                        }
                        PromiseState::Aborted => {
                            data.state.awaiting = None;
                            return Err(Error::Aborted);
                        }
                    }
                }
            }
            Ok(())
        }
    }
}

/// Shared machine for calls and `new`: arguments evaluate in source order
/// first, then the callee resolves with the `callee` role, then the
/// invocation happens.
#[allow(clippy::too_many_arguments)]
fn step_call(
    rt: &Runtime,
    data: &mut ExecutionData,
    is_debug: bool,
    scope: Scope,
    callee: &Rc<Node>,
    arguments: &[Arg],
    optional: bool,
    is_new: bool,
    index: usize,
    sub: usize,
) -> Result<(), Error> {
    if index < arguments.len() {
        if sub == 0 {
            let expr = match &arguments[index] {
                Arg::Expr(e) | Arg::Spread(e) => e.clone(),
            };
            push(data, Frame::new(expr, scope, OnRet::AsState));
        } else {
            let value = top(data).state.take_cur_value();
            match &arguments[index] {
                Arg::Expr(_) => top(data).state.values.push(value),
                Arg::Spread(_) => {
                    let mut spread = Vec::new();
                    spread_into(&mut spread, value)?;
                    top(data).state.values.extend(spread);
                }
            }
            let frame = top(data);
            frame.index += 1;
            frame.sub_index = 0;
        }
        return Ok(());
    }
    if sub == 0 {
        push(
            data,
            Frame::new(callee.clone(), scope, OnRet::AsState).with_role(Role::Callee),
        );
        return Ok(());
    }
    let (function, this) = match top(data).state.take_cur() {
        Returned::Callee { function, this } => (function, this),
        Returned::Val(v) => (v, Value::Undefined),
        Returned::Place(_) => {
            return Err(Error::StateInvariant("callee evaluation produced a place"))
        }
    };
    let args = mem::take(&mut top(data).state.values);
    if function.is_nullish() && optional && !is_new {
        ret(data, Returned::Val(Value::Undefined), is_debug);
        return Ok(());
    }
    let result = if is_new {
        exec::construct(rt, &function, args)?
    } else {
        exec::invoke_function(rt, &function, this, args)?
    };
    ret(data, Returned::Val(result), is_debug);
    Ok(())
}

fn spread_into(out: &mut Vec<Value>, value: Value) -> Result<(), Error> {
    match value {
        Value::Array(items) => {
            out.extend(items.borrow().iter().cloned());
            Ok(())
        }
        Value::Str(s) => {
            out.extend(s.chars().map(|c| Value::string(c.to_string())));
            Ok(())
        }
        other => Err(Error::Type(format!(
            "{} is not iterable",
            other.to_display()
        ))),
    }
}

/// Wrap a plain object carrying a callable `then` into an observable
/// promise; anything else is not a thenable.
fn wrap_thenable(rt: &Runtime, value: &Value) -> Result<Option<Promise>, Error> {
    let then = match value {
        Value::Object(map) => map.borrow().get("then").cloned(),
        _ => None,
    };
    let then = match then {
        Some(f @ Value::Function(_)) => f,
        _ => return Ok(None),
    };
    let promise = Promise::pending();
    let resolver = promise.clone();
    let rejecter = promise.clone();
    let on_resolve = Value::native("", move |_rt, _this, args: &[Value]| {
        resolver.resolve(args.first().cloned().unwrap_or(Value::Undefined));
        Ok(Value::Undefined)
    });
    let on_reject = Value::native("", move |_rt, _this, args: &[Value]| {
        rejecter.reject(args.first().cloned().unwrap_or(Value::Undefined));
        Ok(Value::Undefined)
    });
    exec::invoke_function(rt, &then, value.clone(), vec![on_resolve, on_reject])?;
    Ok(Some(promise))
}

fn compare(lhs: &Value, rhs: &Value, pick: impl Fn(Ordering) -> bool) -> Value {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Value::Bool(pick(a.cmp(b))),
        _ => {
            let a = lhs.to_number();
            let b = rhs.to_number();
            match a.partial_cmp(&b) {
                Some(ordering) => Value::Bool(pick(ordering)),
                // NaN compares false against everything
                None => Value::Bool(false),
            }
        }
    }
}

pub(crate) fn apply_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
    Ok(match op {
        BinaryOp::Add => match (lhs, rhs) {
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                Value::string(format!("{}{}", lhs.to_display(), rhs.to_display()))
            }
            _ => Value::Num(lhs.to_number() + rhs.to_number()),
        },
        BinaryOp::Sub => Value::Num(lhs.to_number() - rhs.to_number()),
        BinaryOp::Mul => Value::Num(lhs.to_number() * rhs.to_number()),
        BinaryOp::Div => Value::Num(lhs.to_number() / rhs.to_number()),
        BinaryOp::Rem => Value::Num(lhs.to_number() % rhs.to_number()),
        BinaryOp::Pow => Value::Num(lhs.to_number().powf(rhs.to_number())),
        BinaryOp::BitAnd => Value::Num((lhs.to_i32() & rhs.to_i32()) as f64),
        BinaryOp::BitOr => Value::Num((lhs.to_i32() | rhs.to_i32()) as f64),
        BinaryOp::BitXor => Value::Num((lhs.to_i32() ^ rhs.to_i32()) as f64),
        BinaryOp::Shl => Value::Num((lhs.to_i32() << (rhs.to_u32() & 0x1f)) as f64),
        BinaryOp::Shr => Value::Num((lhs.to_i32() >> (rhs.to_u32() & 0x1f)) as f64),
        BinaryOp::UShr => Value::Num((lhs.to_u32() >> (rhs.to_u32() & 0x1f)) as f64),
        BinaryOp::Lt => compare(lhs, rhs, |o| o == Ordering::Less),
        BinaryOp::Le => compare(lhs, rhs, |o| o != Ordering::Greater),
        BinaryOp::Gt => compare(lhs, rhs, |o| o == Ordering::Greater),
        BinaryOp::Ge => compare(lhs, rhs, |o| o != Ordering::Less),
        BinaryOp::LooseEq => Value::Bool(lhs.loose_eq(rhs)),
        BinaryOp::LooseNotEq => Value::Bool(!lhs.loose_eq(rhs)),
        BinaryOp::StrictEq => Value::Bool(lhs.strict_eq(rhs)),
        BinaryOp::StrictNotEq => Value::Bool(!lhs.strict_eq(rhs)),
        BinaryOp::In => match rhs {
            Value::Object(map) => Value::Bool(map.borrow().contains_key(&lhs.to_display())),
            Value::Array(items) => {
                let len = items.borrow().len();
                let idx = lhs.to_number();
                Value::Bool(idx >= 0.0 && idx.fract() == 0.0 && (idx as usize) < len)
            }
            _ => {
                return Err(Error::Type(
                    "right-hand side of `in` must be an object".to_string(),
                ))
            }
        },
        BinaryOp::InstanceOf => instance_of(lhs, rhs)?,
        BinaryOp::Pipeline | BinaryOp::And | BinaryOp::Or | BinaryOp::Nullish => {
            return Err(Error::StateInvariant(
                "short-circuit operator reached the apply path",
            ))
        }
    })
}

/// Without a prototype chain, `instanceof` is answered for the builtin
/// constructors only.
fn instance_of(value: &Value, ctor: &Value) -> Result<Value, Error> {
    let func = match ctor {
        Value::Function(f) => f,
        _ => {
            return Err(Error::Type(
                "right-hand side of `instanceof` is not callable".to_string(),
            ))
        }
    };
    if func.is_user() {
        return Ok(Value::Bool(false));
    }
    let matched = match func.name.as_deref() {
        Some("Promise") => matches!(value, Value::Promise(_)),
        Some("Array") => matches!(value, Value::Array(_)),
        Some("RegExp") => matches!(value, Value::RegExp(_)),
        Some("Function") => matches!(value, Value::Function(_)),
        Some("Object") => matches!(value, Value::Object(_) | Value::Array(_)),
        _ => false,
    };
    Ok(Value::Bool(matched))
}
