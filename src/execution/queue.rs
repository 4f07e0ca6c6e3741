//! Single-slot FIFO of execute jobs.
//!
//! The queue keeps only the completion handle of the most recently admitted
//! job. Admitting a job spawns a task that first awaits that handle, so jobs
//! start strictly in admission order and never overlap, while admission
//! itself returns immediately.
//!
//! Admission is not bounded: every job waiting its turn is a parked task
//! holding only its request and the handle of the job before it. Depth grows
//! with the number of execute requests sent and not yet answered. A parked
//! task costs no CPU until its predecessor finishes.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::warn;

/// Chain of execute jobs; see the module docs.
#[derive(Debug, Default)]
pub struct ExecutionQueue {
    tail: Option<JoinHandle<()>>,
}

impl ExecutionQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `job` behind every job admitted before it.
    pub fn admit<F>(&mut self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let previous = self.tail.take();
        self.tail = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                if let Err(err) = previous.await {
                    warn!(%err, "previous execution job ended abnormally");
                }
            }
            job.await;
        }));
    }

    /// Wait for every admitted job to finish.
    pub async fn drain(&mut self) {
        if let Some(tail) = self.tail.take() {
            if let Err(err) = tail.await {
                warn!(%err, "execution job ended abnormally");
            }
        }
    }

    /// Whether every admitted job has finished.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tail.as_ref().is_none_or(JoinHandle::is_finished)
    }
}
