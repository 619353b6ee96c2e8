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

//! The scope chain: name→value mappings with parent links.
//!
//! Lookup walks the chain; declaration inserts into exactly one scope.
//! Scopes are shared (`Rc`) because closures capture the scope they were
//! defined in by reference.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::Error;
use crate::value::Value;

struct ScopeData {
    vars: IndexMap<String, Value>,
    parent: Option<Scope>,
}

#[derive(Clone)]
pub struct Scope(Rc<RefCell<ScopeData>>);

impl Scope {
    pub fn new() -> Scope {
        Scope(Rc::new(RefCell::new(ScopeData {
            vars: IndexMap::new(),
            parent: None,
        })))
    }

    /// A fresh empty scope whose lookups fall through to `self`.
    pub fn child(&self) -> Scope {
        Scope(Rc::new(RefCell::new(ScopeData {
            vars: IndexMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// A fresh scope holding copies of this scope's own slots, with `self`
    /// as parent. Used for the per-iteration bindings of `for` bodies:
    /// closures created in the body capture the copies, not the originals.
    pub fn iteration_copy(&self) -> Scope {
        let vars = self.0.borrow().vars.clone();
        Scope(Rc::new(RefCell::new(ScopeData {
            vars,
            parent: Some(self.clone()),
        })))
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0.borrow().parent.clone()
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Insert a binding into this scope, shadowing any outer one.
    pub fn declare<S: Into<String>>(&self, name: S, value: Value) {
        self.0.borrow_mut().vars.insert(name.into(), value);
    }

    pub fn has_local(&self, name: &str) -> bool {
        self.0.borrow().vars.contains_key(name)
    }

    /// Chain lookup without the initialization check.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let data = self.0.borrow();
        if let Some(v) = data.vars.get(name) {
            return Some(v.clone());
        }
        data.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Chain lookup for reads: an absent name and a declared-but-unset name
    /// are distinct errors.
    pub fn resolve(&self, name: &str) -> Result<Value, Error> {
        match self.lookup(name) {
            None => Err(Error::UndefinedIdentifier(name.to_string())),
            Some(Value::Uninitialized) => Err(Error::UninitializedRead(name.to_string())),
            Some(v) => Ok(v),
        }
    }

    /// Write through the chain into the scope that owns the binding.
    pub fn assign(&self, name: &str, value: Value) -> Result<(), Error> {
        let mut cursor = self.clone();
        loop {
            if cursor.has_local(name) {
                cursor.0.borrow_mut().vars.insert(name.to_string(), value);
                return Ok(());
            }
            let parent = cursor.parent();
            match parent {
                Some(p) => cursor = p,
                None => return Err(Error::UndefinedIdentifier(name.to_string())),
            }
        }
    }

    pub fn local_names(&self) -> Vec<String> {
        self.0.borrow().vars.keys().cloned().collect()
    }
}

impl Default for Scope {
    fn default() -> Scope {
        Scope::new()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Deliberately shallow: scope chains are cyclic through closures.
        let data = self.0.borrow();
        f.debug_struct("Scope")
            .field("vars", &data.vars.keys().collect::<Vec<_>>())
            .field("has_parent", &data.parent.is_some())
            .finish()
    }
}
