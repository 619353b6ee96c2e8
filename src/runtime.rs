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

//! The runtime: the registry of live executions, the debug toggle and the
//! cooperative event loop.
//!
//! All scheduling is single-threaded. One pump round drains the microtask
//! queue (promise reactions), advances every runnable execution to its next
//! suspension, and, once everything is parked, sleeps to the earliest timer
//! deadline and fires it. A fully parked system with no timers pending is a
//! deadlock and reported as such.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::rc::{Rc, Weak};
use std::thread;
use std::time::{Duration, Instant};

use log::warn;

use crate::error::Error;
use crate::exec::{self, Execution};
use crate::parse;
use crate::promise::{Promise, PromiseState};
use crate::scope::Scope;
use crate::value::Value;

#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Emit a trace line for every evaluator step.
    pub is_debug: bool,
}

#[derive(Clone)]
pub struct ExecuteOptions {
    pub desc: Option<String>,
    pub root_scope: Scope,
}

impl ExecuteOptions {
    pub fn new(root_scope: Scope) -> ExecuteOptions {
        ExecuteOptions {
            desc: None,
            root_scope,
        }
    }

    pub fn desc<S: Into<String>>(mut self, desc: S) -> ExecuteOptions {
        self.desc = Some(desc.into());
        self
    }
}

pub(crate) struct Timer {
    deadline: Instant,
    seq: u64,
    id: u64,
    callback: Value,
    args: Vec<Value>,
}

// BinaryHeap is a max-heap; invert the ordering so the earliest deadline
// (ties broken by creation order) pops first.
impl Ord for Timer {
    fn cmp(&self, other: &Timer) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Timer {
    fn partial_cmp(&self, other: &Timer) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Timer {
    fn eq(&self, other: &Timer) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for Timer {}

/// A queued promise reaction: invoke `callback` with `args`, then settle
/// `settle` with the result, or with `pass_through` when set (the `finally`
/// shape).
pub(crate) struct Microtask {
    callback: Value,
    args: Vec<Value>,
    settle: Promise,
    pass_through: Option<PromiseState>,
}

pub(crate) struct RuntimeData {
    pub executions: Vec<Execution>,
    pub is_debug: bool,
    timers: BinaryHeap<Timer>,
    cancelled_timers: HashSet<u64>,
    microtasks: VecDeque<Microtask>,
    next_timer_id: u64,
    timer_seq: u64,
}

#[derive(Clone)]
pub struct Runtime {
    pub(crate) data: Rc<RefCell<RuntimeData>>,
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> Runtime {
        Runtime {
            data: Rc::new(RefCell::new(RuntimeData {
                executions: Vec::new(),
                is_debug: options.is_debug,
                timers: BinaryHeap::new(),
                cancelled_timers: HashSet::new(),
                microtasks: VecDeque::new(),
                next_timer_id: 0,
                timer_seq: 0,
            })),
        }
    }

    pub(crate) fn from_data(data: Rc<RefCell<RuntimeData>>) -> Runtime {
        Runtime { data }
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<RuntimeData>> {
        Rc::downgrade(&self.data)
    }

    /// Parse `source` and build a root execution for it. The execution is
    /// registered but not started; drive it with `step`, `start` or `wait`.
    pub fn execute(&self, source: &str, options: ExecuteOptions) -> Result<Execution, Error> {
        let program = parse::parse_program(source)?;
        let desc = options.desc.unwrap_or_else(|| "main".to_string());
        let exec = Execution::new(self, desc, Rc::from(source), program, options.root_scope);
        self.data.borrow_mut().executions.push(exec.clone());
        Ok(exec)
    }

    /// The live executions, in creation order. The list is append-only
    /// while a run is in flight; finished executions stay listed with their
    /// terminal status.
    pub fn executions(&self) -> Vec<Execution> {
        self.data.borrow().executions.clone()
    }

    pub fn is_debug(&self) -> bool {
        self.data.borrow().is_debug
    }

    pub fn set_debug(&self, is_debug: bool) {
        self.data.borrow_mut().is_debug = is_debug;
    }

    pub(crate) fn register_execution(&self, exec: &Execution) {
        self.data.borrow_mut().executions.push(exec.clone());
    }

    pub(crate) fn set_timeout(&self, callback: Value, delay_ms: f64, args: Vec<Value>) -> u64 {
        let mut data = self.data.borrow_mut();
        data.next_timer_id += 1;
        data.timer_seq += 1;
        let id = data.next_timer_id;
        let delay = if delay_ms.is_finite() && delay_ms > 0.0 {
            Duration::from_micros((delay_ms * 1000.0) as u64)
        } else {
            Duration::from_micros(0)
        };
        let seq = data.timer_seq;
        data.timers.push(Timer {
            deadline: Instant::now() + delay,
            seq,
            id,
            callback,
            args,
        });
        id
    }

    pub(crate) fn clear_timeout(&self, id: u64) {
        self.data.borrow_mut().cancelled_timers.insert(id);
    }

    /// Drive the event loop until `target` terminates.
    pub(crate) fn pump_until(&self, target: &Execution) -> Result<Value, Error> {
        loop {
            self.drain_microtasks();
            if let Some(outcome) = target.outcome() {
                return outcome;
            }
            let executions = self.executions();
            let mut progressed = false;
            for exec in &executions {
                if !exec.is_runnable() {
                    continue;
                }
                match exec.run_slice(self) {
                    Ok(stepped) => progressed |= stepped,
                    Err(err) => {
                        progressed = true;
                        if Rc::ptr_eq(&exec.data, &target.data) {
                            return Err(err);
                        }
                        warn!("execution `{}` failed: {}", exec.desc(), err);
                    }
                }
            }
            if let Some(outcome) = target.outcome() {
                return outcome;
            }
            if progressed || !self.data.borrow().microtasks.is_empty() {
                continue;
            }
            match self.next_deadline() {
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    }
                    self.fire_due_timers();
                }
                None => {
                    return Err(Error::StateInvariant(
                        "all executions are parked and no timers are pending",
                    ))
                }
            }
        }
    }

    fn drain_microtasks(&self) {
        loop {
            let task = self.data.borrow_mut().microtasks.pop_front();
            match task {
                Some(task) => self.run_microtask(task),
                None => break,
            }
        }
    }

    fn run_microtask(&self, task: Microtask) {
        let result = exec::invoke_function(self, &task.callback, Value::Undefined, task.args);
        match (result, task.pass_through) {
            (Ok(value), None) => task.settle.resolve(value),
            (Ok(_), Some(state)) => match state {
                PromiseState::Fulfilled(v) => task.settle.resolve(v),
                PromiseState::Rejected(r) => task.settle.reject(r),
                PromiseState::Aborted => task.settle.reject(Value::Abort),
                PromiseState::Pending => {}
            },
            (Err(err), _) => task.settle.reject(err.to_reason()),
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        let mut data = self.data.borrow_mut();
        loop {
            let cancelled = match data.timers.peek() {
                Some(timer) => data.cancelled_timers.contains(&timer.id),
                None => return None,
            };
            if cancelled {
                let timer = data.timers.pop().unwrap();
                data.cancelled_timers.remove(&timer.id);
                continue;
            }
            return data.timers.peek().map(|t| t.deadline);
        }
    }

    fn fire_due_timers(&self) {
        let now = Instant::now();
        loop {
            let timer = {
                let mut data = self.data.borrow_mut();
                match data.timers.peek() {
                    Some(t) if t.deadline <= now => data.timers.pop(),
                    _ => None,
                }
            };
            let timer = match timer {
                Some(t) => t,
                None => break,
            };
            if self.data.borrow_mut().cancelled_timers.remove(&timer.id) {
                continue;
            }
            if let Err(err) = exec::invoke_function(self, &timer.callback, Value::Undefined, timer.args)
            {
                warn!("timer callback failed: {}", err);
            }
        }
    }
}

/// Register a `then`-style reaction: the returned promise settles with the
/// handler's result. A missing handler passes the outcome through.
pub(crate) fn promise_then(
    rt: &Runtime,
    promise: &Promise,
    on_fulfilled: Option<Value>,
    on_rejected: Option<Value>,
) -> Promise {
    let result = Promise::pending();
    let weak = rt.downgrade();
    let settle = result.clone();
    promise.subscribe(move |state| {
        let data = match weak.upgrade() {
            Some(d) => d,
            None => return,
        };
        let (handler, arg) = match state {
            PromiseState::Fulfilled(v) => (on_fulfilled, v.clone()),
            PromiseState::Rejected(r) => (on_rejected, r.clone()),
            PromiseState::Aborted => (on_rejected, Value::Abort),
            PromiseState::Pending => return,
        };
        match handler {
            Some(callback) => data.borrow_mut().microtasks.push_back(Microtask {
                callback,
                args: vec![arg],
                settle,
                pass_through: None,
            }),
            None => match state {
                PromiseState::Fulfilled(v) => settle.resolve(v.clone()),
                _ => settle.reject(arg),
            },
        }
    });
    result
}

/// Register a `finally`-style reaction: the handler runs with no arguments
/// and the original outcome passes through.
pub(crate) fn promise_finally(rt: &Runtime, promise: &Promise, callback: Value) -> Promise {
    let result = Promise::pending();
    let weak = rt.downgrade();
    let settle = result.clone();
    promise.subscribe(move |state| {
        if let Some(data) = weak.upgrade() {
            data.borrow_mut().microtasks.push_back(Microtask {
                callback,
                args: Vec::new(),
                settle,
                pass_through: Some(state.clone()),
            });
        }
    });
    result
}
