//! Execution controller: one script unit at a time.
//!
//! Every execute request is first *admitted*, which registers its execution
//! id and a fresh cancellation token with the controller. Admitted
//! executions can be cancelled before they start. [`ExecutionController::run`]
//! then moves an admission into the single active slot, runs the script
//! against its own [`ScriptContext`], and clears the slot on every exit path.
//!
//! The state lock is a `std::sync::Mutex` and is never held across an await.

pub mod queue;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::remote::{RemoteCaller, RemoteHandle};
use crate::script::{OutputBuffer, ScriptContext, ScriptEngine};
use crate::session::{SessionScope, SessionStore};
use crate::{AppError, Result};

pub use queue::ExecutionQueue;

/// Result message when a script neither printed nor returned anything.
pub const NO_OUTPUT_MESSAGE: &str = "Script completed with no output";

/// Reason reported when a cancel request matches nothing.
pub const NO_MATCH_REASON: &str = "no matching execution";

/// An execute request registered with the controller but not yet started.
#[derive(Debug)]
pub struct Admission {
    ticket: u64,
    execution_id: i64,
    cancel: CancellationToken,
}

impl Admission {
    /// Execution id (the execute request's JSON-RPC id).
    #[must_use]
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// Whether the execution has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Inputs of one execution, resolved by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRequest {
    /// Script source.
    pub script: String,
    /// Requested session; `None` uses the default session.
    pub session_id: Option<String>,
    /// Time bound; `None` is unbounded.
    pub timeout: Option<Duration>,
    /// Inventory service the script's remote calls go to.
    pub server_url: String,
}

/// What a finished script produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOutcome {
    /// Lines printed, in order.
    pub output: Vec<String>,
    /// Value the script returned.
    pub value: Option<Value>,
}

impl ExecutionOutcome {
    /// Shape the outcome into an execute response result.
    #[must_use]
    pub fn into_result(self) -> Value {
        match (self.output.is_empty(), self.value) {
            (false, Some(value)) => json!({
                "output": self.output.join("\n"),
                "result": value,
            }),
            (false, None) => json!({ "output": self.output.join("\n") }),
            (true, Some(value @ (Value::Object(_) | Value::Array(_)))) => value,
            (true, Some(value)) => json!({ "value": value }),
            (true, None) => json!({ "message": NO_OUTPUT_MESSAGE }),
        }
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The execution's token was triggered.
    Cancelled {
        /// Id of the cancelled execution.
        execution_id: i64,
    },
    /// No admitted or running execution matched.
    NoMatch,
}

impl CancelOutcome {
    /// Cancel response result.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Cancelled { execution_id } => json!({
                "cancelled": true,
                "executionId": execution_id,
            }),
            Self::NoMatch => json!({
                "cancelled": false,
                "reason": NO_MATCH_REASON,
            }),
        }
    }
}

#[derive(Debug, Clone)]
struct Registered {
    ticket: u64,
    execution_id: i64,
    cancel: CancellationToken,
}

#[derive(Debug, Default)]
struct ExecutionState {
    active: Option<Registered>,
    admitted: VecDeque<Registered>,
}

/// Runs script units one at a time and tracks their cancellation tokens.
pub struct ExecutionController {
    engine: Arc<dyn ScriptEngine>,
    remote: Arc<dyn RemoteCaller>,
    sessions: Arc<SessionStore>,
    state: Mutex<ExecutionState>,
    next_ticket: AtomicU64,
}

impl ExecutionController {
    /// Create a controller with an empty session store.
    #[must_use]
    pub fn new(engine: Arc<dyn ScriptEngine>, remote: Arc<dyn RemoteCaller>) -> Self {
        Self::with_sessions(engine, remote, Arc::new(SessionStore::new()))
    }

    /// Create a controller sharing an existing session store.
    #[must_use]
    pub fn with_sessions(
        engine: Arc<dyn ScriptEngine>,
        remote: Arc<dyn RemoteCaller>,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            engine,
            remote,
            sessions,
            state: Mutex::new(ExecutionState::default()),
            next_ticket: AtomicU64::new(1),
        }
    }

    /// Session store shared by every execution.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Register an execution so it can be cancelled before it starts.
    #[must_use]
    pub fn admit(&self, execution_id: i64) -> Admission {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        self.lock().admitted.push_back(Registered {
            ticket,
            execution_id,
            cancel: cancel.clone(),
        });
        debug!(execution_id, "execution admitted");
        Admission {
            ticket,
            execution_id,
            cancel,
        }
    }

    /// Run an admitted execution to completion.
    ///
    /// Script completion races the admission's token and the request's time
    /// bound; cancellation wins ties. The active slot is cleared on every
    /// exit path, including the returned future being dropped.
    ///
    /// # Errors
    ///
    /// - `AppError::Busy` if another execution holds the active slot.
    /// - `AppError::Cancelled` if the token fired at any point before the
    ///   slot was cleared, whatever the script returned.
    /// - `AppError::Timeout` if the time bound elapsed first.
    /// - Script and remote errors raised by the script.
    pub async fn run(
        &self,
        admission: Admission,
        request: ExecutionRequest,
    ) -> Result<ExecutionOutcome> {
        let execution_id = admission.execution_id;
        let slot = self.begin(&admission)?;

        if admission.cancel.is_cancelled() {
            info!(execution_id, "execution cancelled before start");
            return slot.finish(Err(AppError::Cancelled));
        }

        let output = OutputBuffer::new();
        let session = SessionScope::new(Arc::clone(&self.sessions), request.session_id.as_deref());
        let ctx = ScriptContext {
            output: output.clone(),
            remote: RemoteHandle::new(
                Arc::clone(&self.remote),
                request.server_url.clone(),
                admission.cancel.clone(),
            ),
            session,
            cancel: admission.cancel.clone(),
        };

        info!(execution_id, session_id = ctx.session.id(), "execution started");

        let result = tokio::select! {
            biased;

            () = admission.cancel.cancelled() => Err(AppError::Cancelled),

            limit = deadline(request.timeout) => {
                warn!(execution_id, limit_ms = limit.as_millis(), "execution timed out");
                Err(AppError::Timeout(limit))
            }

            value = self.engine.run(&request.script, ctx) => value.map(|value| ExecutionOutcome {
                output: output.take(),
                value,
            }),
        };

        slot.finish(result)
    }

    /// Cancel the execution matching `target`.
    ///
    /// A target id matches the running execution first, then admitted ones in
    /// admission order. Without a target only the running execution matches;
    /// admitted executions are never picked implicitly. `publish` runs with
    /// the state lock held, so whatever it enqueues precedes the targeted
    /// execution's own response.
    #[must_use]
    pub fn cancel<F>(&self, target: Option<i64>, publish: F) -> CancelOutcome
    where
        F: FnOnce(&CancelOutcome),
    {
        let state = self.lock();

        let matched = match target {
            Some(id) => state
                .active
                .iter()
                .chain(state.admitted.iter())
                .find(|entry| entry.execution_id == id),
            None => state.active.as_ref(),
        };

        let outcome = match matched {
            Some(entry) => {
                entry.cancel.cancel();
                info!(execution_id = entry.execution_id, "execution cancel requested");
                CancelOutcome::Cancelled {
                    execution_id: entry.execution_id,
                }
            }
            None => {
                debug!(?target, "cancel matched no execution");
                CancelOutcome::NoMatch
            }
        };

        publish(&outcome);
        outcome
    }

    /// Cancel every admitted and running execution.
    ///
    /// Returns how many tokens were triggered.
    #[must_use]
    pub fn cancel_all(&self) -> usize {
        let state = self.lock();
        let mut count = 0;
        for entry in state.active.iter().chain(state.admitted.iter()) {
            if !entry.cancel.is_cancelled() {
                entry.cancel.cancel();
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "cancelled all executions");
        }
        count
    }

    /// Id of the running execution, if any.
    #[must_use]
    pub fn active_execution(&self) -> Option<i64> {
        self.lock().active.as_ref().map(|entry| entry.execution_id)
    }

    /// Number of admitted executions that have not started.
    #[must_use]
    pub fn admitted_count(&self) -> usize {
        self.lock().admitted.len()
    }

    fn begin(&self, admission: &Admission) -> Result<ActiveSlot<'_>> {
        let mut state = self.lock();
        if let Some(active) = &state.active {
            return Err(AppError::Busy(active.execution_id));
        }

        let position = state
            .admitted
            .iter()
            .position(|entry| entry.ticket == admission.ticket);
        let entry = match position.and_then(|index| state.admitted.remove(index)) {
            Some(entry) => entry,
            None => Registered {
                ticket: admission.ticket,
                execution_id: admission.execution_id,
                cancel: admission.cancel.clone(),
            },
        };
        state.active = Some(entry);

        Ok(ActiveSlot {
            controller: self,
            ticket: admission.ticket,
            cancel: admission.cancel.clone(),
            released: false,
        })
    }

    fn release(&self, ticket: u64, cancel: &CancellationToken) -> bool {
        let mut state = self.lock();
        if state
            .active
            .as_ref()
            .is_some_and(|entry| entry.ticket == ticket)
        {
            state.active = None;
        }
        cancel.is_cancelled()
    }

    fn lock(&self) -> MutexGuard<'_, ExecutionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ExecutionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ExecutionController")
            .field("active", &state.active.as_ref().map(|e| e.execution_id))
            .field("admitted", &state.admitted.len())
            .finish_non_exhaustive()
    }
}

/// Occupancy of the active slot; clears it when finished or dropped.
struct ActiveSlot<'a> {
    controller: &'a ExecutionController,
    ticket: u64,
    cancel: CancellationToken,
    released: bool,
}

impl ActiveSlot<'_> {
    /// Clear the slot and settle the result.
    ///
    /// A token that fired before the slot was cleared turns any result into
    /// `Cancelled`.
    fn finish(mut self, result: Result<ExecutionOutcome>) -> Result<ExecutionOutcome> {
        self.released = true;
        if self.controller.release(self.ticket, &self.cancel) {
            return Err(AppError::Cancelled);
        }
        result
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.controller.release(self.ticket, &self.cancel);
        }
    }
}

/// Resolve after `limit`, or never when unbounded.
async fn deadline(limit: Option<Duration>) -> Duration {
    match limit {
        Some(limit) => {
            tokio::time::sleep(limit).await;
            limit
        }
        None => std::future::pending().await,
    }
}
