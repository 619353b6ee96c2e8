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

//! A step-wise, cooperatively scheduled interpreter for a C-family
//! scripting language with first-class promises and `await`.
//!
//! Programs run on an explicit heap-allocated stack of frames instead of
//! the host call stack, so every evaluation step is a discrete,
//! host-observable transition: the host can single-step an execution,
//! inspect its frames and scopes at any suspension point, run several
//! executions side by side, and cooperatively interleave them around
//! asynchronous waits.
//!
//! ```no_run
//! use stepscript::{with_global, ExecuteOptions, Runtime, RuntimeOptions, Scope};
//!
//! let runtime = Runtime::new(RuntimeOptions::default());
//! let scope = with_global(Scope::new());
//! let execution = runtime
//!     .execute("console.log('hi')", ExecuteOptions::new(scope))
//!     .unwrap();
//! execution.wait().unwrap();
//! ```

mod error;
mod eval;
mod exec;
mod frame;
mod globals;
mod promise;
mod runtime;
mod scope;
mod value;

pub mod ast;
pub mod parse;

pub use crate::error::Error;
pub use crate::exec::{ExecStatus, Execution, ExecutionState};
pub use crate::frame::{Frame, OnRet, Place, PlaceBase, Returned, Role, Scratch};
pub use crate::globals::{format_console, with_global};
pub use crate::promise::{Promise, PromiseState};
pub use crate::runtime::{ExecuteOptions, Runtime, RuntimeOptions};
pub use crate::scope::Scope;
pub use crate::value::{FunctionKind, FunctionValue, UserFunction, Value};

/// Parse and run a source program to completion on a fresh runtime with the
/// default globals, returning its completion value.
pub fn run(source: &str) -> Result<Value, Error> {
    let runtime = Runtime::new(RuntimeOptions::default());
    let scope = with_global(Scope::new());
    runtime.execute(source, ExecuteOptions::new(scope))?.wait()
}
