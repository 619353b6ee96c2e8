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

//! Promises whose settle state is externally observable and which can be
//! cancelled from outside.
//!
//! The evaluator never subscribes callbacks on the await path: it polls
//! [`Promise::state`] each step and decides between re-parking and
//! resuming. Subscriptions exist for the `then` machinery and for internal
//! chaining. State transitions are monotone: `Pending` settles exactly once
//! into `Fulfilled`, `Rejected` or `Aborted`.

use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;

use crate::value::Value;

#[derive(Debug, Clone)]
pub enum PromiseState {
    Pending,
    Fulfilled(Value),
    Rejected(Value),
    Aborted,
}

impl PromiseState {
    pub fn is_pending(&self) -> bool {
        matches!(self, PromiseState::Pending)
    }
}

type Subscriber = Box<dyn FnOnce(&PromiseState)>;

struct PromiseData {
    state: PromiseState,
    subscribers: Vec<Subscriber>,
}

#[derive(Clone)]
pub struct Promise(Rc<RefCell<PromiseData>>);

impl Promise {
    pub fn pending() -> Promise {
        Promise(Rc::new(RefCell::new(PromiseData {
            state: PromiseState::Pending,
            subscribers: Vec::new(),
        })))
    }

    /// Build a promise and hand its resolve/reject triggers to `executor`.
    pub fn with_executor<F>(executor: F) -> Promise
    where
        F: FnOnce(&dyn Fn(Value), &dyn Fn(Value)),
    {
        let p = Promise::pending();
        let resolver = p.clone();
        let rejecter = p.clone();
        executor(&move |v| resolver.resolve(v), &move |v| rejecter.reject(v));
        p
    }

    pub fn fulfilled(value: Value) -> Promise {
        let p = Promise::pending();
        p.resolve(value);
        p
    }

    pub fn rejected(reason: Value) -> Promise {
        let p = Promise::pending();
        p.reject(reason);
        p
    }

    pub fn state(&self) -> PromiseState {
        self.0.borrow().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        self.0.borrow().state.is_pending()
    }

    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Fulfill with `value`, adopting it first when it is itself a promise.
    /// No-op once settled.
    pub fn resolve(&self, value: Value) {
        if let Value::Promise(inner) = &value {
            if inner.ptr_eq(self) {
                // A promise cannot adopt itself; settle the cycle shut.
                self.reject(Value::string("promise resolution cycle"));
                return;
            }
            let target = self.clone();
            inner.subscribe(move |state| match state {
                PromiseState::Fulfilled(v) => target.resolve(v.clone()),
                PromiseState::Rejected(r) => target.reject(r.clone()),
                PromiseState::Aborted => target.reject(Value::Abort),
                PromiseState::Pending => {}
            });
            return;
        }
        self.settle(PromiseState::Fulfilled(value));
    }

    /// Reject with `reason`; the `Abort` sentinel lands in the `Aborted`
    /// terminal state. No-op once settled.
    pub fn reject(&self, reason: Value) {
        if matches!(reason, Value::Abort) {
            self.settle(PromiseState::Aborted);
        } else {
            self.settle(PromiseState::Rejected(reason));
        }
    }

    /// Fire cancellation. Idempotent, and a no-op on a settled promise.
    pub fn abort(&self) {
        self.reject(Value::Abort);
    }

    /// Run `f` when the promise settles; immediately if it already has.
    pub fn subscribe<F>(&self, f: F)
    where
        F: FnOnce(&PromiseState) + 'static,
    {
        let state = {
            let mut data = self.0.borrow_mut();
            if data.state.is_pending() {
                data.subscribers.push(Box::new(f));
                return;
            }
            data.state.clone()
        };
        f(&state);
    }

    fn settle(&self, state: PromiseState) {
        let (state, subscribers) = {
            let mut data = self.0.borrow_mut();
            if !data.state.is_pending() {
                return;
            }
            data.state = state;
            (data.state.clone(), mem::take(&mut data.subscribers))
        };
        for sub in subscribers {
            sub(&state);
        }
    }
}

impl fmt::Debug for Promise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.borrow().state {
            PromiseState::Pending => write!(f, "Promise {{ <pending> }}"),
            PromiseState::Fulfilled(v) => write!(f, "Promise {{ {} }}", v.to_display()),
            PromiseState::Rejected(r) => write!(f, "Promise {{ <rejected> {} }}", r.to_display()),
            PromiseState::Aborted => write!(f, "Promise {{ <aborted> }}"),
        }
    }
}
