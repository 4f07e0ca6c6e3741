//! Script-unit abstraction.
//!
//! The [`ScriptEngine`] trait decouples the execution controller from how
//! script text is actually run. The controller hands each run a fresh
//! [`ScriptContext`] and races the returned future against cancellation and
//! the execution's time bound; the future is dropped if it loses.
//!
//! [`interpreter::DirectiveEngine`] is the engine the binary ships with.

pub mod interpreter;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::remote::RemoteHandle;
use crate::session::SessionScope;
use crate::Result;

pub use interpreter::DirectiveEngine;

/// Boxed future returned by [`ScriptEngine::run`].
///
/// Resolves to the script's return value; `None` when the script returned
/// nothing.
pub type ScriptFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<Value>>> + Send + 'a>>;

/// Runs one script unit.
pub trait ScriptEngine: Send + Sync {
    /// Run `script` against `ctx`.
    ///
    /// Implementations should observe `ctx.cancel` at their suspension points.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Script`](crate::AppError::Script) for failures raised
    /// by the script, and passes remote and cancellation errors through.
    fn run<'a>(&'a self, script: &'a str, ctx: ScriptContext) -> ScriptFuture<'a>;
}

/// Lines printed by one execution.
///
/// Each execution gets its own buffer, so a handle kept alive past the end
/// of its execution can never leak lines into a later one.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one line.
    pub fn push(&self, line: impl Into<String>) {
        self.lock().push(line.into());
    }

    /// Remove and return every line printed so far.
    #[must_use]
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    /// Number of lines printed so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been printed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything a script can touch during one execution.
#[derive(Debug, Clone)]
pub struct ScriptContext {
    /// Collected `print` output.
    pub output: OutputBuffer,
    /// Session the execution runs in.
    pub session: SessionScope,
    /// Remote calls, bound to this execution's token.
    pub remote: RemoteHandle,
    /// Fires when the execution is cancelled.
    pub cancel: CancellationToken,
}

impl ScriptContext {
    /// Append a line to the execution's output.
    pub fn print(&self, line: impl Into<String>) {
        self.output.push(line);
    }
}
