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

//! Executions and the calling convention for guest functions.
//!
//! An [`Execution`] is one live interpretation of a program or of one
//! function-call body: a stack of frames plus, while suspended, the promise
//! being awaited. The host observes and drives it through `step`, `start`
//! and `wait`. Guest function calls spawn sub-executions: synchronous calls
//! pump theirs to completion inside the caller's step, asynchronous calls
//! hand theirs to the runtime's event loop and return an observable
//! completion promise.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::ast::{Node, NodeKind, Param};
use crate::error::Error;
use crate::eval;
use crate::frame::{Frame, OnRet, Role};
use crate::promise::Promise;
use crate::runtime::{Runtime, RuntimeData};
use crate::scope::Scope;
use crate::value::{FunctionKind, FunctionValue, UserFunction, Value};

/// The observation surface of one execution: the frame stack and, at an
/// await suspension, the promise being awaited.
pub struct ExecutionState {
    pub stack: Vec<Frame>,
    pub awaiting: Option<Promise>,
}

#[derive(Debug, Clone)]
pub enum ExecStatus {
    Running,
    Completed,
    Failed(Error),
}

pub(crate) struct ExecutionData {
    pub desc: String,
    pub source: Rc<str>,
    pub state: ExecutionState,
    pub status: ExecStatus,
    pub result: Rc<RefCell<Option<Value>>>,
    pub completion: Promise,
    pub steps: u64,
    /// Whether the host (or an async call) began pumping this execution.
    /// The event loop never advances an execution that is only being
    /// single-stepped.
    pub started: bool,
}

#[derive(Clone)]
pub struct Execution {
    pub(crate) data: Rc<RefCell<ExecutionData>>,
    rt: Weak<RefCell<RuntimeData>>,
}

impl Execution {
    pub(crate) fn new(
        rt: &Runtime,
        desc: String,
        source: Rc<str>,
        node: Rc<Node>,
        scope: Scope,
    ) -> Execution {
        let result = Rc::new(RefCell::new(None));
        let root = Frame::new(node, scope, OnRet::Store(result.clone())).with_role(Role::Call);
        Execution {
            data: Rc::new(RefCell::new(ExecutionData {
                desc,
                source,
                state: ExecutionState {
                    stack: vec![root],
                    awaiting: None,
                },
                status: ExecStatus::Running,
                result,
                completion: Promise::pending(),
                steps: 0,
                started: false,
            })),
            rt: rt.downgrade(),
        }
    }

    fn runtime(&self) -> Result<Runtime, Error> {
        self.rt
            .upgrade()
            .map(Runtime::from_data)
            .ok_or(Error::StateInvariant("runtime was dropped"))
    }

    pub fn desc(&self) -> String {
        self.data.borrow().desc.clone()
    }

    pub fn status(&self) -> ExecStatus {
        self.data.borrow().status.clone()
    }

    pub fn is_terminated(&self) -> bool {
        !matches!(self.data.borrow().status, ExecStatus::Running)
    }

    /// Started, running, and not parked on a still-pending promise.
    pub(crate) fn is_runnable(&self) -> bool {
        let data = self.data.borrow();
        data.started
            && matches!(data.status, ExecStatus::Running)
            && data.state.awaiting.as_ref().map_or(true, |p| !p.is_pending())
    }

    pub(crate) fn mark_started(&self) {
        self.data.borrow_mut().started = true;
    }

    pub fn stack_depth(&self) -> usize {
        self.data.borrow().state.stack.len()
    }

    /// The promise this execution is currently suspended on, if any.
    pub fn awaiting(&self) -> Option<Promise> {
        self.data.borrow().state.awaiting.clone()
    }

    /// Observe the execution state without copying it.
    pub fn with_state<R>(&self, f: impl FnOnce(&ExecutionState) -> R) -> R {
        f(&self.data.borrow().state)
    }

    /// The observable promise that settles with this execution's result.
    pub fn completion(&self) -> Promise {
        self.data.borrow().completion.clone()
    }

    /// Terminal result, if the execution has finished.
    pub fn outcome(&self) -> Option<Result<Value, Error>> {
        let data = self.data.borrow();
        match &data.status {
            ExecStatus::Running => None,
            ExecStatus::Completed => {
                Some(Ok(data.result.borrow().clone().unwrap_or(Value::Undefined)))
            }
            ExecStatus::Failed(e) => Some(Err(e.clone())),
        }
    }

    /// Advance by exactly one node-level micro-step.
    pub fn step(&self) -> Result<(), Error> {
        let rt = self.runtime()?;
        self.drive_step(&rt)
    }

    pub(crate) fn drive_step(&self, rt: &Runtime) -> Result<(), Error> {
        match eval::step(rt, self) {
            Ok(()) => {
                self.finalize_if_done();
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn finalize_if_done(&self) {
        let completion = {
            let mut data = self.data.borrow_mut();
            if !data.state.stack.is_empty() || !matches!(data.status, ExecStatus::Running) {
                return;
            }
            data.status = ExecStatus::Completed;
            data.completion.clone()
        };
        let value = {
            let data = self.data.borrow();
            let result = data.result.borrow().clone().unwrap_or(Value::Undefined);
            result
        };
        completion.resolve(value);
    }

    /// Record a terminal error: the stack unwinds to empty and the
    /// completion promise rejects with the error's reason.
    pub(crate) fn fail(&self, err: &Error) {
        let completion = {
            let mut data = self.data.borrow_mut();
            if !matches!(data.status, ExecStatus::Running) {
                return;
            }
            data.state.stack.clear();
            data.state.awaiting = None;
            data.status = ExecStatus::Failed(err.clone());
            data.completion.clone()
        };
        completion.reject(err.to_reason());
    }

    /// Step until this execution terminates or parks on a pending promise.
    /// Reports whether at least one step ran.
    pub(crate) fn run_slice(&self, rt: &Runtime) -> Result<bool, Error> {
        let mut stepped = false;
        while self.is_runnable() {
            self.drive_step(rt)?;
            stepped = true;
        }
        Ok(stepped)
    }

    /// Begin pumping: run to the first suspension and return.
    pub fn start(&self) -> Result<(), Error> {
        let rt = self.runtime()?;
        self.mark_started();
        self.run_slice(&rt).map(|_| ())
    }

    /// Pump the runtime's event loop until this execution terminates,
    /// returning its completion value or the error that unwound it.
    pub fn wait(&self) -> Result<Value, Error> {
        let rt = self.runtime()?;
        self.mark_started();
        rt.pump_until(self)
    }
}

// ---------------------------------------------------------------------------
// Calling convention
// ---------------------------------------------------------------------------

/// Invoke any callable value with an explicit receiver.
pub(crate) fn invoke_function(
    rt: &Runtime,
    callee: &Value,
    this: Value,
    args: Vec<Value>,
) -> Result<Value, Error> {
    let func = match callee {
        Value::Function(f) => f.clone(),
        other => {
            return Err(Error::Type(format!(
                "{} is not a function",
                other.to_display()
            )))
        }
    };
    match &func.kind {
        FunctionKind::Native(imp) => imp(rt, &this, &args),
        FunctionKind::User(user) => call_user(rt, &func, user, this, args),
    }
}

/// `new` on a callable. User functions get a fresh object as `this` and may
/// override it by returning a reference value.
pub(crate) fn construct(rt: &Runtime, callee: &Value, args: Vec<Value>) -> Result<Value, Error> {
    let func = match callee {
        Value::Function(f) => f.clone(),
        other => {
            return Err(Error::Type(format!(
                "{} is not a constructor",
                other.to_display()
            )))
        }
    };
    match &func.kind {
        FunctionKind::Native(imp) => imp(rt, &Value::Undefined, &args),
        FunctionKind::User(user) => {
            if user.is_arrow {
                return Err(Error::Type(
                    "an arrow function cannot be used as a constructor".to_string(),
                ));
            }
            if user.is_async {
                return Err(Error::Type(
                    "an async function cannot be used as a constructor".to_string(),
                ));
            }
            let this = Value::new_object();
            let result = call_user(rt, &func, user, this.clone(), args)?;
            Ok(match result {
                Value::Object(_) | Value::Array(_) | Value::Function(_) => result,
                _ => this,
            })
        }
    }
}

fn call_user(
    rt: &Runtime,
    func: &Rc<FunctionValue>,
    user: &UserFunction,
    this: Value,
    args: Vec<Value>,
) -> Result<Value, Error> {
    let (params, body) = match &user.node.kind {
        NodeKind::FunctionExpression { params, body, .. } => (params, body.clone()),
        _ => return Err(Error::StateInvariant("user function without a function node")),
    };
    // Lexical capture: the call scope hangs off the defining frame's scope.
    let scope = user.scope.child();
    // Arrows leave `this` unbound so resolution walks to the enclosing
    // scope.
    if !user.is_arrow {
        scope.declare("this", this);
    }
    bind_params(params, &scope, &args);
    let desc = func
        .name
        .clone()
        .unwrap_or_else(|| "<anonymous>".to_string());
    let sub = Execution::new(rt, desc, user.source.clone(), body, scope);
    if user.is_async {
        rt.register_execution(&sub);
        sub.mark_started();
        let completion = sub.completion();
        // Run to the first suspension; an early failure has already
        // rejected the completion promise.
        let _ = sub.run_slice(rt);
        Ok(Value::Promise(completion))
    } else {
        loop {
            {
                let data = sub.data.borrow();
                if data.state.stack.is_empty() {
                    break;
                }
                if data.state.awaiting.is_some() {
                    return Err(Error::StateInvariant(
                        "a synchronous call suspended on an await",
                    ));
                }
            }
            sub.drive_step(rt)?;
        }
        let out = sub.data.borrow().result.borrow().clone();
        Ok(out.unwrap_or(Value::Undefined))
    }
}

/// Positional parameters plus an optional trailing rest parameter; the
/// parser has already rejected every other pattern.
fn bind_params(params: &[Param], scope: &Scope, args: &[Value]) {
    let mut next = 0usize;
    for param in params {
        match param {
            Param::Ident(name) => {
                let value = args.get(next).cloned().unwrap_or(Value::Undefined);
                scope.declare(name.clone(), value);
                next += 1;
            }
            Param::Rest(name) => {
                let rest: Vec<Value> = args.get(next..).map(|s| s.to_vec()).unwrap_or_default();
                scope.declare(name.clone(), Value::array_from(rest));
            }
        }
    }
}
