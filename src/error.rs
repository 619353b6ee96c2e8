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

use thiserror::Error;

use crate::value::Value;

/// Everything that can go wrong while parsing or running a program.
///
/// `Aborted` is the cooperative-cancellation sentinel and is deliberately
/// distinct from genuine failures; cancellation-aware callers typically
/// swallow it. `Thrown` carries a guest rejection value that unwound an
/// execution uncaught.
#[derive(Debug, Clone, Error)]
pub enum Error {
    #[error("syntax error: {msg} at {line}:{col}")]
    Syntax { msg: String, line: usize, col: usize },
    #[error("unsupported node `{0}`")]
    UnsupportedNode(&'static str),
    #[error("unsupported operator `{0}`")]
    UnsupportedOperator(String),
    #[error("unsupported parameter pattern: {0}")]
    UnsupportedParam(String),
    #[error("`{0}` is not defined")]
    UndefinedIdentifier(String),
    #[error("cannot access `{0}` before initialization")]
    UninitializedRead(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("uncaught: {0}")]
    Thrown(Value),
    #[error("execution state invariant violated: {0}")]
    StateInvariant(&'static str),
    #[error("aborted")]
    Aborted,
}

impl Error {
    pub fn syntax<S: Into<String>>(msg: S, line: usize, col: usize) -> Self {
        Error::Syntax {
            msg: msg.into(),
            line,
            col,
        }
    }

    /// The value an execution's completion promise is rejected with when
    /// this error unwinds it.
    pub fn to_reason(&self) -> Value {
        match self {
            Error::Aborted => Value::Abort,
            Error::Thrown(v) => v.clone(),
            other => Value::string(other.to_string()),
        }
    }
}
